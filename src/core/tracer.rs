//! Contact derivation, tracing queries and retention purge.

use crate::core::auth::AuthContext;
use crate::core::calculator::overlap::{intersect, visit_overlap};
use crate::core::clock::Clock;
use crate::core::locks::{GuestGuard, GuestLocks};
use crate::db::log::audit;
use crate::db::pool::DbPool;
use crate::db::queries::{self, ContactCursor};
use crate::errors::{AppError, AppResult};
use crate::models::contact::{Contact, ContactEdge};
use crate::models::division::DivisionId;
use crate::models::guest::GuestId;
use crate::models::visit::Visit;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const PAGE_SIZE: usize = 64;

/// Which overlaps count as contacts.
#[derive(Debug, Clone)]
pub struct TracingPolicy {
    pub min_overlap: Duration,
    /// `None` traces every division.
    pub traced_divisions: Option<Vec<DivisionId>>,
}

impl Default for TracingPolicy {
    fn default() -> Self {
        Self {
            min_overlap: Duration::zero(),
            traced_divisions: None,
        }
    }
}

impl TracingPolicy {
    pub fn traces(&self, division: DivisionId) -> bool {
        self.traced_divisions
            .as_ref()
            .is_none_or(|list| list.contains(&division))
    }
}

/// Counts of what one purge run removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub visits: usize,
    pub contacts: usize,
    pub guests: usize,
}

impl PurgeReport {
    pub fn is_empty(&self) -> bool {
        self.visits == 0 && self.contacts == 0 && self.guests == 0
    }

    fn add(&mut self, other: PurgeReport) {
        self.visits += other.visits;
        self.contacts += other.contacts;
        self.guests += other.guests;
    }
}

#[derive(Debug)]
pub struct ContactTracer {
    pool: Arc<DbPool>,
    locks: Arc<GuestLocks>,
    clock: Arc<dyn Clock>,
    policy: TracingPolicy,
}

impl ContactTracer {
    pub fn new(
        pool: Arc<DbPool>,
        locks: Arc<GuestLocks>,
        clock: Arc<dyn Clock>,
        policy: TracingPolicy,
    ) -> Self {
        Self {
            pool,
            locks,
            clock,
            policy,
        }
    }

    // -----------------------------------------------------------------
    // Derivation
    // -----------------------------------------------------------------

    /// Derive and store the edges of one closed visit. Returns how many new
    /// edges were stored.
    ///
    /// The visit is re-read inside the transaction: a visit purged since it
    /// was queued produces nothing.
    pub fn trace_visit(&self, visit: &Visit) -> AppResult<usize> {
        if !self.policy.traces(visit.division) {
            return Ok(0);
        }
        let now = self.clock.now();

        self.pool.with_tx(|tx| {
            let Some(visit) = queries::load_visit(tx, visit.id)? else {
                return Ok(0);
            };
            let Some(end) = visit.checkout_at else {
                return Ok(0);
            };

            let others = queries::closed_visits_overlapping(
                tx,
                &visit.guest_id,
                visit.division,
                visit.checkin_at,
                end,
            )?;

            let mut stored = 0;
            for other in &others {
                let Some(window) = visit_overlap(&visit, other, now, self.policy.min_overlap) else {
                    continue;
                };
                let edge = ContactEdge::new(
                    (visit.guest_id.clone(), visit.id),
                    (other.guest_id.clone(), other.id),
                    visit.division,
                    window,
                );
                if queries::insert_contact(tx, &edge, now)? {
                    stored += 1;
                }
            }
            Ok(stored)
        })
    }

    /// Idempotent insert of an already computed edge.
    ///
    /// The edge must describe two stored, closed visits of its guests in its
    /// division, and its window must be exactly their qualifying overlap.
    pub fn record_contact(&self, edge: &ContactEdge) -> AppResult<bool> {
        if edge.guest_a == edge.guest_b {
            return Err(AppError::Validation("a guest cannot be its own contact".into()));
        }
        if edge.window.end < edge.window.start {
            return Err(AppError::Validation("contact window ends before it starts".into()));
        }
        if !self.policy.traces(edge.division) {
            return Err(AppError::Validation(format!(
                "division {} is not traced",
                edge.division
            )));
        }
        let now = self.clock.now();

        self.pool.with_tx(|tx| {
            let va = closed_visit_of(tx, edge.visit_a, &edge.guest_a, edge.division)?;
            let vb = closed_visit_of(tx, edge.visit_b, &edge.guest_b, edge.division)?;
            if visit_overlap(&va, &vb, now, self.policy.min_overlap) != Some(edge.window) {
                return Err(AppError::Validation(
                    "contact window does not match the visits' overlap".into(),
                ));
            }
            queries::insert_contact(tx, edge, now)
        })
    }

    /// Re-derive every closed visit of `guest`. Makes the stored graph
    /// consistent for that guest regardless of the worker's progress.
    pub fn trace_guest(&self, guest: &GuestId) -> AppResult<usize> {
        let visits = self
            .pool
            .with_conn(|conn| queries::visits_for_guest(conn, guest))?;

        let mut stored = 0;
        for visit in visits.iter().filter(|v| !v.is_active()) {
            stored += self.trace_visit(visit)?;
        }
        Ok(stored)
    }

    /// Drain closed visits sent by the ledger until every sender is gone.
    pub async fn run_worker(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Visit>) {
        debug!("contact tracer worker started");
        while let Some(visit) = rx.recv().await {
            match self.trace_visit(&visit) {
                Ok(0) => {}
                Ok(n) => debug!(visit = visit.id, edges = n, "contacts derived"),
                Err(e) => warn!(visit = visit.id, error = %e, "contact derivation failed"),
            }
        }
        debug!("contact tracer worker stopped");
    }

    // -----------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------

    /// Contacts of `guest`, optionally restricted to windows intersecting
    /// `range`. Stored edges come first, ordered by window start, followed by
    /// provisional overlaps involving a still-open visit.
    pub fn fetch_contacts(
        &self,
        auth: &AuthContext,
        guest: &GuestId,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> AppResult<ContactQuery> {
        auth.require_admin()?;
        if let Some((from, to)) = range
            && to < from
        {
            return Err(AppError::Validation("date range ends before it starts".into()));
        }
        if !self.pool.with_conn(|conn| queries::guest_exists(conn, guest))? {
            return Err(AppError::UnknownGuest(guest.to_string()));
        }

        self.trace_guest(guest)?;
        let provisional = self.provisional_contacts(guest, range)?;

        Ok(ContactQuery {
            pool: self.pool.clone(),
            guest: guest.clone(),
            range,
            provisional,
            page_size: PAGE_SIZE,
        })
    }

    fn provisional_contacts(
        &self,
        guest: &GuestId,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> AppResult<Vec<Contact>> {
        let now = self.clock.now();

        let mut out = self.pool.with_conn(|conn| {
            let mut out = Vec::new();
            for mine in queries::visits_for_guest(conn, guest)? {
                if !self.policy.traces(mine.division) {
                    continue;
                }
                let end = mine.checkout_at.unwrap_or(now).max(mine.checkin_at);
                let others =
                    queries::any_visits_overlapping(conn, guest, mine.division, mine.checkin_at, end)?;

                // Pairs of closed visits are stored edges already.
                for other in others.iter().filter(|o| mine.is_active() || o.is_active()) {
                    if let Some(window) = visit_overlap(&mine, other, now, self.policy.min_overlap) {
                        out.push(Contact {
                            other_guest: other.guest_id.clone(),
                            division: mine.division,
                            window,
                            provisional: true,
                        });
                    }
                }
            }
            Ok(out)
        })?;

        if let Some((from, to)) = range {
            out.retain(|c| intersect((c.window.start, c.window.end), (from, to)).is_some());
        }
        out.sort_by(|a, b| a.window.start.cmp(&b.window.start));
        Ok(out)
    }

    // -----------------------------------------------------------------
    // Retention
    // -----------------------------------------------------------------

    /// Remove everything that ended before `horizon`.
    ///
    /// Each guest is purged in its own transaction inside its exclusive
    /// section; an interrupted run leaves every guest either fully purged or
    /// untouched. Running twice with the same horizon removes nothing more.
    pub async fn purge_older_than(
        &self,
        auth: &AuthContext,
        horizon: DateTime<Utc>,
    ) -> AppResult<PurgeReport> {
        auth.require_admin()?;

        let candidates = self
            .pool
            .with_conn(|conn| queries::purge_candidates(conn, horizon))?;
        let mut report = PurgeReport::default();

        for guest in candidates {
            let guard = self.locks.lock(&guest).await;
            let part = self.purge_guest(&guard, horizon)?;
            drop(guard);
            if part.guests > 0 {
                self.locks.forget(&guest);
            }
            report.add(part);
        }

        report.contacts += self
            .pool
            .with_conn(|conn| queries::sweep_contacts(conn, horizon))?;

        self.pool.with_conn(|conn| {
            audit(
                conn,
                "purge",
                &auth.audit_name(),
                &format!(
                    "horizon {}: {} visits, {} contacts, {} guests",
                    horizon.to_rfc3339(),
                    report.visits,
                    report.contacts,
                    report.guests
                ),
            )
        })?;

        info!(
            horizon = %horizon,
            visits = report.visits,
            contacts = report.contacts,
            guests = report.guests,
            "retention purge finished"
        );
        Ok(report)
    }

    fn purge_guest(&self, guard: &GuestGuard, horizon: DateTime<Utc>) -> AppResult<PurgeReport> {
        let guest = guard.guest();
        let now = self.clock.now();

        self.pool.with_tx(|tx| {
            let mut report = PurgeReport {
                visits: queries::delete_closed_visits_before(tx, guest, horizon)?,
                contacts: queries::delete_contacts_before(tx, guest, horizon)?,
                guests: 0,
            };

            let created_at = queries::guest_created_at(tx, guest)?;
            let expired = created_at.is_some_and(|c| c < horizon);
            if expired && queries::visit_count(tx, guest)? == 0 {
                report.contacts += queries::delete_contacts_of(tx, guest)?;
                if queries::delete_guest(tx, guest, now)? {
                    report.guests = 1;
                }
            }
            Ok(report)
        })
    }
}

/// Load visit `id` and check it is a closed visit of `guest` in `division`.
fn closed_visit_of(
    conn: &rusqlite::Connection,
    id: i64,
    guest: &GuestId,
    division: DivisionId,
) -> AppResult<Visit> {
    let visit = queries::load_visit(conn, id)?
        .ok_or_else(|| AppError::Validation(format!("visit {} does not exist", id)))?;
    if &visit.guest_id != guest || visit.division != division || visit.is_active() {
        return Err(AppError::Validation(format!(
            "visit {} is not a closed visit of {} in division {}",
            id, guest, division
        )));
    }
    Ok(visit)
}

/// Restartable tracing query. Every call to [`ContactQuery::iter`] starts a
/// fresh, lazily paged walk over the store.
#[derive(Debug, Clone)]
pub struct ContactQuery {
    pool: Arc<DbPool>,
    guest: GuestId,
    range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    provisional: Vec<Contact>,
    page_size: usize,
}

impl ContactQuery {
    pub fn guest(&self) -> &GuestId {
        &self.guest
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn iter(&self) -> ContactIter<'_> {
        ContactIter {
            query: self,
            cursor: None,
            buffer: VecDeque::new(),
            stored_done: false,
            provisional_next: 0,
            failed: false,
        }
    }

    /// Drain the whole query into a vector.
    pub fn collect_all(&self) -> AppResult<Vec<Contact>> {
        self.iter().collect()
    }
}

impl<'a> IntoIterator for &'a ContactQuery {
    type Item = AppResult<Contact>;
    type IntoIter = ContactIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug)]
pub struct ContactIter<'a> {
    query: &'a ContactQuery,
    cursor: Option<ContactCursor>,
    buffer: VecDeque<Contact>,
    stored_done: bool,
    provisional_next: usize,
    failed: bool,
}

impl ContactIter<'_> {
    fn fetch_page(&mut self) -> AppResult<()> {
        let q = self.query;
        let after = self.cursor;
        let page = q
            .pool
            .with_conn(|conn| queries::contacts_page(conn, &q.guest, q.range, after, q.page_size))?;

        if page.len() < q.page_size {
            self.stored_done = true;
        }
        for (cursor, edge) in page {
            self.cursor = Some(cursor);
            if let Some(other) = edge.other(&q.guest) {
                self.buffer.push_back(Contact {
                    other_guest: other.clone(),
                    division: edge.division,
                    window: edge.window,
                    provisional: false,
                });
            }
        }
        Ok(())
    }
}

impl Iterator for ContactIter<'_> {
    type Item = AppResult<Contact>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(contact) = self.buffer.pop_front() {
                return Some(Ok(contact));
            }
            if self.stored_done {
                break;
            }
            if let Err(e) = self.fetch_page() {
                self.failed = true;
                return Some(Err(e));
            }
        }

        let contact = self.query.provisional.get(self.provisional_next)?.clone();
        self.provisional_next += 1;
        Some(Ok(contact))
    }
}
