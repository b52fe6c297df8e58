use super::{division::DivisionId, guest_status::GuestStatus};
use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of an encoded guest identifier (24 random bytes, base64url, no padding).
pub const GUEST_ID_LEN: usize = 32;

/// Opaque, URL-safe guest identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuestId(String);

impl GuestId {
    /// Validate the shape of an identifier coming from the outside world
    /// (URL path, scan event). Does not check that the guest exists.
    pub fn parse(raw: &str) -> AppResult<Self> {
        let raw = raw.trim();
        if raw.len() != GUEST_ID_LEN {
            return Err(AppError::Validation(format!(
                "guest identifier must be {} characters",
                GUEST_ID_LEN
            )));
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(AppError::Validation(
                "guest identifier contains invalid characters".into(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    pub(crate) fn from_db(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GuestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque token handed to the rendering collaborator for the scannable image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(pub String);

impl Token {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Identity and contact data required for tracing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

impl ContactInfo {
    /// Trim every field and reject records that cannot be used for tracing.
    pub fn normalized(self) -> AppResult<Self> {
        fn clean(v: Option<String>) -> Option<String> {
            v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
        }

        let info = Self {
            first_name: self.first_name.trim().to_string(),
            last_name: self.last_name.trim().to_string(),
            phone: clean(self.phone),
            email: clean(self.email),
            address: clean(self.address),
        };

        if info.first_name.is_empty() || info.last_name.is_empty() {
            return Err(AppError::Validation("first and last name are required".into()));
        }
        if info.phone.is_none() && info.email.is_none() {
            return Err(AppError::Validation(
                "a phone number or an e-mail address is required".into(),
            ));
        }
        if let Some(email) = &info.email
            && !email.contains('@')
        {
            return Err(AppError::Validation(format!("invalid e-mail address: {}", email)));
        }
        Ok(info)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GuestRecord {
    pub id: GuestId,
    pub division: DivisionId,
    pub contact: ContactInfo,
    pub status: GuestStatus,
    pub token: Token,
    pub created_at: DateTime<Utc>,
}
