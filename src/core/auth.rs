//! Explicit authorization context passed into every privileged call.

use crate::errors::{AppError, AppResult};
use crate::models::division::DivisionId;
use crate::models::staff::StaffUser;

/// Contract consumed from the staff-authentication collaborator.
pub trait StaffAuth {
    fn current_user_id(&self) -> Option<i64>;
    fn is_admin(&self) -> bool;
}

/// Who is calling, with which role, bound to which division.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    user_id: Option<i64>,
    admin: bool,
    division: Option<DivisionId>,
    system: bool,
}

impl AuthContext {
    /// Internal caller used by the scheduler's cleanup pipeline.
    pub fn system() -> Self {
        Self {
            user_id: None,
            admin: true,
            division: None,
            system: true,
        }
    }

    pub fn staff(user_id: i64, admin: bool, division: Option<DivisionId>) -> Self {
        Self {
            user_id: Some(user_id),
            admin,
            division,
            system: false,
        }
    }

    pub fn from_user(user: &StaffUser) -> Self {
        Self::staff(user.id, user.is_admin, user.division)
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    pub fn division(&self) -> Option<DivisionId> {
        self.division
    }

    pub fn is_system(&self) -> bool {
        self.system
    }

    /// Admins, unbound operators and the system caller may act everywhere;
    /// bound operators only in their own division.
    pub fn can_operate(&self, division: DivisionId) -> bool {
        self.admin || self.division.is_none_or(|d| d == division)
    }

    pub fn require_division(&self, division: DivisionId) -> AppResult<()> {
        if self.can_operate(division) {
            Ok(())
        } else {
            Err(AppError::Unauthorized(format!(
                "operator is not bound to division {}",
                division
            )))
        }
    }

    pub fn require_admin(&self) -> AppResult<()> {
        if self.admin {
            Ok(())
        } else {
            Err(AppError::Unauthorized("admin role required".into()))
        }
    }

    pub(crate) fn audit_name(&self) -> String {
        match (self.system, self.user_id) {
            (true, _) => "system".to_string(),
            (false, Some(id)) => format!("staff:{}", id),
            (false, None) => "anonymous".to_string(),
        }
    }
}

impl StaffAuth for AuthContext {
    fn current_user_id(&self) -> Option<i64> {
        self.user_id
    }

    fn is_admin(&self) -> bool {
        self.admin
    }
}
