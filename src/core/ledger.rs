//! Check-in ledger: guest records, visits and the per-guest state machine.
//!
//! ```text
//! registered --checkin--> checked_in --checkout--> checked_out
//!                             ^                         |
//!                             +--------checkin----------+
//! ```
//!
//! Every transition runs inside the guest's exclusive section
//! ([`GuestLocks`]) and inside one SQLite transaction, so the "at most one
//! active visit per guest" invariant holds under any interleaving of device
//! scans and scheduler runs.

use crate::core::auth::AuthContext;
use crate::core::clock::Clock;
use crate::core::locks::{GuestGuard, GuestLocks};
use crate::core::token::TokenService;
use crate::db::pool::DbPool;
use crate::db::queries;
use crate::errors::{AppError, AppResult};
use crate::models::division::{DivisionId, Divisions};
use crate::models::guest::{ContactInfo, GUEST_ID_LEN, GuestId, GuestRecord};
use crate::models::guest_status::{GuestStatus, ScanDirection};
use crate::models::visit::{GuestVisit, Visit};
use crate::utils::time::day_bounds;
use chrono::NaiveDate;
use chrono_tz::Tz;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Result of a direction-agnostic scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOutcome {
    pub direction: ScanDirection,
    pub visit: Visit,
}

#[derive(Debug)]
pub struct Ledger {
    pool: Arc<DbPool>,
    tokens: Arc<TokenService>,
    locks: Arc<GuestLocks>,
    clock: Arc<dyn Clock>,
    divisions: Divisions,
    timezone: Tz,
    closed_tx: mpsc::UnboundedSender<Visit>,
}

/// The partial unique index on active visits is the store-level backstop for
/// the one-active-visit invariant.
fn map_active_conflict(err: AppError, guest: &GuestId) -> AppError {
    match err {
        AppError::Persistence(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            AppError::AlreadyCheckedIn(guest.to_string())
        }
        other => other,
    }
}

impl Ledger {
    pub fn new(
        pool: Arc<DbPool>,
        tokens: Arc<TokenService>,
        locks: Arc<GuestLocks>,
        clock: Arc<dyn Clock>,
        divisions: Divisions,
        timezone: Tz,
        closed_tx: mpsc::UnboundedSender<Visit>,
    ) -> Self {
        Self {
            pool,
            tokens,
            locks,
            clock,
            divisions,
            timezone,
            closed_tx,
        }
    }

    pub fn divisions(&self) -> &Divisions {
        &self.divisions
    }

    // -----------------------------------------------------------------
    // Registration and lookup
    // -----------------------------------------------------------------

    pub fn register_guest(&self, division: usize, contact: ContactInfo) -> AppResult<GuestRecord> {
        let division = self.divisions.resolve(division)?;
        let contact = contact.normalized()?;
        let now = self.clock.now();

        let record = self.pool.with_tx(|tx| {
            let id = self
                .tokens
                .generate_identifier(|candidate| queries::identifier_taken(tx, candidate))?;
            let token = self.tokens.issue_token(&id)?;

            let record = GuestRecord {
                id,
                division,
                contact,
                status: GuestStatus::Registered,
                token,
                created_at: now,
            };
            queries::insert_guest(tx, &record)?;
            Ok(record)
        })?;

        info!(guest = %record.id, division = %division, "guest registered");
        Ok(record)
    }

    pub fn fetch_guest(&self, guest: &GuestId) -> AppResult<GuestRecord> {
        self.pool
            .with_conn(|conn| queries::load_guest(conn, guest))?
            .ok_or_else(|| AppError::UnknownGuest(guest.to_string()))
    }

    pub fn guest_status(&self, guest: &GuestId) -> AppResult<GuestStatus> {
        Ok(self.fetch_guest(guest)?.status)
    }

    /// Check a scanned token: integrity, decryption, and that the guest exists.
    pub fn validate_token(&self, token: &str) -> AppResult<GuestId> {
        let id = self.tokens.decode_token(token)?;
        if self.pool.with_conn(|conn| queries::guest_exists(conn, &id))? {
            Ok(id)
        } else {
            Err(AppError::InvalidToken)
        }
    }

    /// Resolve what a device scanned: either a bare identifier or a token.
    pub fn resolve_scanned(&self, scanned: &str) -> AppResult<GuestId> {
        let scanned = scanned.trim();
        if scanned.is_empty() {
            return Err(AppError::Validation("empty scan".into()));
        }
        if scanned.len() == GUEST_ID_LEN {
            let id = GuestId::parse(scanned)?;
            return if self.pool.with_conn(|conn| queries::guest_exists(conn, &id))? {
                Ok(id)
            } else {
                Err(AppError::UnknownGuest(id.to_string()))
            };
        }
        self.validate_token(scanned)
    }

    // -----------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------

    pub async fn checkin(
        &self,
        auth: &AuthContext,
        guest: &GuestId,
        division: DivisionId,
    ) -> AppResult<Visit> {
        let division = self.divisions.resolve(division.index())?;
        auth.require_division(division)?;
        let guard = self.locks.lock(guest).await;
        self.checkin_locked(&guard, division)
    }

    pub async fn checkout(&self, auth: &AuthContext, guest: &GuestId) -> AppResult<Visit> {
        let guard = self.locks.lock(guest).await;
        self.checkout_locked(&guard, auth)
    }

    /// Toggle: check in when not currently checked in, otherwise check out.
    /// The read of the current state and the transition share one exclusive
    /// section, so two concurrent scans can never both check in.
    pub async fn scan(
        &self,
        auth: &AuthContext,
        guest: &GuestId,
        division: DivisionId,
    ) -> AppResult<ScanOutcome> {
        let division = self.divisions.resolve(division.index())?;
        let guard = self.locks.lock(guest).await;

        let active = self
            .pool
            .with_conn(|conn| queries::active_visit(conn, guard.guest()))?;

        let outcome = match active {
            None => {
                auth.require_division(division)?;
                ScanOutcome {
                    direction: ScanDirection::CheckedIn,
                    visit: self.checkin_locked(&guard, division)?,
                }
            }
            Some(_) => ScanOutcome {
                direction: ScanDirection::CheckedOut,
                visit: self.checkout_locked(&guard, auth)?,
            },
        };

        debug!(guest = %guest, direction = ?outcome.direction, "scan applied");
        Ok(outcome)
    }

    fn checkin_locked(&self, guard: &GuestGuard, division: DivisionId) -> AppResult<Visit> {
        let guest = guard.guest();
        let now = self.clock.now();

        let visit = self
            .pool
            .with_tx(|tx| {
                if !queries::guest_exists(tx, guest)? {
                    return Err(AppError::UnknownGuest(guest.to_string()));
                }
                if queries::active_visit(tx, guest)?.is_some() {
                    return Err(AppError::AlreadyCheckedIn(guest.to_string()));
                }
                let visit = queries::insert_visit(tx, guest, division, now)?;
                queries::set_guest_status(tx, guest, GuestStatus::CheckedIn)?;
                Ok(visit)
            })
            .map_err(|e| map_active_conflict(e, guest))?;

        info!(guest = %guest, division = %division, visit = visit.id, "checked in");
        Ok(visit)
    }

    fn checkout_locked(&self, guard: &GuestGuard, auth: &AuthContext) -> AppResult<Visit> {
        let guest = guard.guest();
        let now = self.clock.now();

        let visit = self.pool.with_tx(|tx| {
            if !queries::guest_exists(tx, guest)? {
                return Err(AppError::UnknownGuest(guest.to_string()));
            }
            let mut visit = queries::active_visit(tx, guest)?
                .ok_or_else(|| AppError::NotCheckedIn(guest.to_string()))?;
            auth.require_division(visit.division)?;

            // Clock steps backwards must not produce a negative visit.
            let checkout_at = now.max(visit.checkin_at);
            queries::close_visit(tx, visit.id, checkout_at)?;
            queries::set_guest_status(tx, guest, GuestStatus::CheckedOut)?;

            visit.checkout_at = Some(checkout_at);
            Ok(visit)
        })?;

        info!(guest = %guest, division = %visit.division, visit = visit.id, "checked out");
        self.notify_closed(&visit);
        Ok(visit)
    }

    fn notify_closed(&self, visit: &Visit) {
        if self.closed_tx.send(visit.clone()).is_err() {
            debug!(visit = visit.id, "contact tracer is not running; edge derivation deferred to query time");
        }
    }

    /// Close every active visit. Each guest is handled inside its own
    /// exclusive section, so a forced checkout cannot race a live scan.
    pub async fn checkout_all(&self, auth: &AuthContext) -> AppResult<usize> {
        auth.require_admin()?;

        let active = self.pool.with_conn(queries::active_guest_ids)?;
        let mut closed = 0;

        for guest in active {
            let guard = self.locks.lock(&guest).await;
            match self.checkout_locked(&guard, auth) {
                Ok(_) => closed += 1,
                // closed by a live scan between listing and locking
                Err(AppError::NotCheckedIn(_)) | Err(AppError::UnknownGuest(_)) => {}
                Err(e) => {
                    warn!(guest = %guest, error = %e, "forced checkout failed");
                    return Err(e);
                }
            }
        }

        let pruned = self.locks.prune_idle();
        info!(closed, pruned, "forced checkout of all active visits");
        Ok(closed)
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    pub fn count_active(&self, division: DivisionId) -> AppResult<usize> {
        let division = self.divisions.resolve(division.index())?;
        self.pool.with_conn(|conn| queries::count_active(conn, division))
    }

    pub fn fetch_visits(&self, auth: &AuthContext, guest: &GuestId) -> AppResult<Vec<Visit>> {
        auth.require_admin()?;
        self.pool.with_conn(|conn| {
            if !queries::guest_exists(conn, guest)? {
                return Err(AppError::UnknownGuest(guest.to_string()));
            }
            queries::visits_for_guest(conn, guest)
        })
    }

    /// Every visit that started on `date` (in the configured timezone).
    pub fn fetch_guests(&self, auth: &AuthContext, date: NaiveDate) -> AppResult<Vec<GuestVisit>> {
        auth.require_admin()?;
        let (start, end) = day_bounds(date, self.timezone)?;
        self.pool
            .with_conn(|conn| queries::guest_visits_between(conn, start, end))
    }
}
