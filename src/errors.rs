//! Unified application error type.
//! Ledger, tracer, token service, scheduler and the transport layer all return
//! AppError; callers branch on `kind()` rather than on the variant payloads.

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    // ---------------------------
    // Input
    // ---------------------------
    #[error("Validation error: {0}")]
    Validation(String),

    // ---------------------------
    // Guest lifecycle
    // ---------------------------
    #[error("Unknown guest: {0}")]
    UnknownGuest(String),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Guest {0} is already checked in")]
    AlreadyCheckedIn(String),

    #[error("Guest {0} is not checked in")]
    NotCheckedIn(String),

    // ---------------------------
    // Authorization
    // ---------------------------
    #[error("Staff account {0} is protected")]
    ProtectedResource(i64),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    // ---------------------------
    // Infrastructure
    // ---------------------------
    #[error("Database error: {0}")]
    Persistence(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Key material error: {0}")]
    KeyMaterial(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Scheduled job '{job}' failed: {reason}")]
    SchedulerJob { job: String, reason: String },
}

/// Stable error classification shared by the scan protocol and the HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    UnknownGuest,
    InvalidToken,
    AlreadyCheckedIn,
    NotCheckedIn,
    ProtectedResource,
    Unauthorized,
    Persistence,
    Internal,
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::UnknownGuest(_) => ErrorKind::UnknownGuest,
            AppError::InvalidToken => ErrorKind::InvalidToken,
            AppError::AlreadyCheckedIn(_) => ErrorKind::AlreadyCheckedIn,
            AppError::NotCheckedIn(_) => ErrorKind::NotCheckedIn,
            AppError::ProtectedResource(_) => ErrorKind::ProtectedResource,
            AppError::Unauthorized(_) => ErrorKind::Unauthorized,
            AppError::Persistence(_) => ErrorKind::Persistence,
            AppError::Io(_)
            | AppError::KeyMaterial(_)
            | AppError::Config(_)
            | AppError::SchedulerJob { .. } => ErrorKind::Internal,
        }
    }

    /// Errors a scanning device can recover from by re-scanning or
    /// correcting its input. Anything else is an infrastructure failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation
                | ErrorKind::UnknownGuest
                | ErrorKind::InvalidToken
                | ErrorKind::AlreadyCheckedIn
                | ErrorKind::NotCheckedIn
                | ErrorKind::Unauthorized
        )
    }

    pub(crate) fn job(job: &str, err: AppError) -> Self {
        AppError::SchedulerJob {
            job: job.to_string(),
            reason: err.to_string(),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
