use super::division::DivisionId;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Staff account id that can never be deleted.
pub const RESERVED_STAFF_ID: i64 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct StaffUser {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// `None` means the operator may work in every division.
    pub division: Option<DivisionId>,
    pub is_admin: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl StaffUser {
    pub fn is_reserved(&self) -> bool {
        self.id == RESERVED_STAFF_ID
    }
}

/// Input for creating a staff account.
#[derive(Debug, Clone)]
pub struct NewStaff {
    pub username: String,
    pub password: String,
    pub division: Option<DivisionId>,
    pub is_admin: bool,
}
