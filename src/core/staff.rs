//! Staff directory: operator accounts and credential checks.

use crate::core::auth::AuthContext;
use crate::core::clock::Clock;
use crate::db::log::audit;
use crate::db::pool::DbPool;
use crate::db::staff as rows;
use crate::errors::{AppError, AppResult};
use crate::models::division::{DivisionId, Divisions};
use crate::models::staff::{NewStaff, RESERVED_STAFF_ID, StaffUser};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::RngCore;
use rand::rngs::OsRng;
use std::sync::Arc;
use tracing::{info, warn};

const MIN_PASSWORD_LEN: usize = 8;
const SALT_LEN: usize = 16;

fn hash_password(password: &str) -> AppResult<String> {
    let mut salt_bytes = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| AppError::Validation(format!("cannot encode salt: {}", e)))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Validation(format!("cannot hash password: {}", e)))
}

fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

fn check_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

#[derive(Debug)]
pub struct StaffDirectory {
    pool: Arc<DbPool>,
    clock: Arc<dyn Clock>,
    divisions: Divisions,
}

impl StaffDirectory {
    pub fn new(pool: Arc<DbPool>, clock: Arc<dyn Clock>, divisions: Divisions) -> Self {
        Self {
            pool,
            clock,
            divisions,
        }
    }

    /// Create the reserved admin account if it does not exist yet. Returns
    /// `None` when it was already there.
    pub fn bootstrap_admin(&self, username: &str, password: &str) -> AppResult<Option<StaffUser>> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AppError::Validation("username must not be empty".into()));
        }
        check_password(password)?;

        if self
            .pool
            .with_conn(|conn| rows::load_staff(conn, RESERVED_STAFF_ID))?
            .is_some()
        {
            return Ok(None);
        }

        let hash = hash_password(password)?;
        let now = self.clock.now();
        let user = self.pool.with_tx(|tx| {
            rows::insert_staff_with_id(tx, RESERVED_STAFF_ID, username, &hash, now)?;
            audit(tx, "staff_add", username, "reserved admin account created")?;
            rows::load_staff(tx, RESERVED_STAFF_ID)?
                .ok_or_else(|| AppError::Validation("reserved account vanished".into()))
        })?;

        info!(username, "reserved admin account created");
        Ok(Some(user))
    }

    pub fn add_staff(&self, auth: &AuthContext, new: NewStaff) -> AppResult<StaffUser> {
        auth.require_admin()?;

        let username = new.username.trim().to_string();
        if username.is_empty() {
            return Err(AppError::Validation("username must not be empty".into()));
        }
        check_password(&new.password)?;
        let division = new
            .division
            .map(|d| self.divisions.resolve(d.index()))
            .transpose()?;

        let hash = hash_password(&new.password)?;
        let now = self.clock.now();

        let user = self.pool.with_tx(|tx| {
            if rows::load_staff_by_name(tx, &username)?.is_some() {
                return Err(AppError::Validation(format!(
                    "staff account '{}' already exists",
                    username
                )));
            }
            let id = rows::insert_staff(tx, &username, &hash, division, new.is_admin, now)?;
            audit(
                tx,
                "staff_add",
                &username,
                &format!("created by {}", auth.audit_name()),
            )?;
            rows::load_staff(tx, id)?
                .ok_or_else(|| AppError::Validation("staff account vanished after insert".into()))
        })?;

        info!(id = user.id, username = %user.username, "staff account created");
        Ok(user)
    }

    /// Check credentials. Unknown users, wrong passwords and disabled
    /// accounts are all reported as `Unauthorized`.
    pub fn authenticate(&self, username: &str, password: &str) -> AppResult<AuthContext> {
        let user = self
            .pool
            .with_conn(|conn| rows::load_staff_by_name(conn, username.trim()))?;

        let Some(user) = user else {
            return Err(AppError::Unauthorized("invalid credentials".into()));
        };
        if !verify_password(password, &user.password_hash) {
            warn!(username, "rejected staff login");
            return Err(AppError::Unauthorized("invalid credentials".into()));
        }
        if !user.active {
            warn!(username, "login attempt on disabled account");
            return Err(AppError::Unauthorized("account is disabled".into()));
        }
        Ok(AuthContext::from_user(&user))
    }

    pub fn list(&self, auth: &AuthContext) -> AppResult<Vec<StaffUser>> {
        auth.require_admin()?;
        self.pool.with_conn(rows::list_staff)
    }

    pub fn get(&self, auth: &AuthContext, id: i64) -> AppResult<StaffUser> {
        auth.require_admin()?;
        self.pool
            .with_conn(|conn| rows::load_staff(conn, id))?
            .ok_or_else(|| AppError::Validation(format!("no staff account with id {}", id)))
    }

    pub fn update(
        &self,
        auth: &AuthContext,
        id: i64,
        division: Option<DivisionId>,
        is_admin: bool,
        active: bool,
    ) -> AppResult<StaffUser> {
        if id == RESERVED_STAFF_ID && (!is_admin || !active || division.is_some()) {
            return Err(AppError::ProtectedResource(id));
        }
        auth.require_admin()?;
        let division = division
            .map(|d| self.divisions.resolve(d.index()))
            .transpose()?;

        self.pool.with_tx(|tx| {
            if !rows::update_staff(tx, id, division, is_admin, active)? {
                return Err(AppError::Validation(format!("no staff account with id {}", id)));
            }
            rows::load_staff(tx, id)?
                .ok_or_else(|| AppError::Validation(format!("no staff account with id {}", id)))
        })
    }

    /// Admins may reset anyone's password; operators only their own.
    pub fn set_password(&self, auth: &AuthContext, id: i64, password: &str) -> AppResult<()> {
        if auth.require_admin().is_err() && auth.user_id() != Some(id) {
            return Err(AppError::Unauthorized("cannot change another account".into()));
        }
        check_password(password)?;
        let hash = hash_password(password)?;

        if !self.pool.with_conn(|conn| rows::update_password(conn, id, &hash))? {
            return Err(AppError::Validation(format!("no staff account with id {}", id)));
        }
        Ok(())
    }

    /// Delete an account. The reserved account is refused before anything
    /// else is checked.
    pub fn delete_staff(&self, auth: &AuthContext, id: i64) -> AppResult<()> {
        if id == RESERVED_STAFF_ID {
            warn!(id, caller = %auth.audit_name(), "refused to delete reserved staff account");
            return Err(AppError::ProtectedResource(id));
        }
        auth.require_admin()?;

        self.pool.with_tx(|tx| {
            let user = rows::load_staff(tx, id)?
                .ok_or_else(|| AppError::Validation(format!("no staff account with id {}", id)))?;
            rows::delete_staff(tx, id)?;
            audit(
                tx,
                "staff_del",
                &user.username,
                &format!("deleted by {}", auth.audit_name()),
            )
        })?;

        info!(id, "staff account deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_verifies_only_its_password() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("battery staple", &hash));
        assert!(!verify_password("correct horse", "not a phc string"));
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(check_password("short").is_err());
        assert!(check_password("long enough").is_ok());
    }
}
