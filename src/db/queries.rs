//! Row mapping and CRUD for guests, visits and contact edges.
//!
//! Every function takes a plain `&Connection` so it can run either directly
//! or inside a transaction opened by `DbPool::with_tx`.

use crate::errors::{AppError, AppResult};
use crate::models::contact::{ContactEdge, ContactWindow};
use crate::models::division::DivisionId;
use crate::models::guest::{ContactInfo, GuestId, GuestRecord, Token};
use crate::models::guest_status::GuestStatus;
use crate::models::visit::{GuestVisit, Visit};
use crate::utils::time::{from_millis, to_millis};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use sha2::{Digest, Sha256};

fn conversion_error(idx: usize, err: AppError) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

fn timestamp(row: &Row, col: &str) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(col)?;
    from_millis(ms)
        .ok_or_else(|| conversion_error(0, AppError::Validation(format!("bad timestamp {}", ms))))
}

fn optional_timestamp(row: &Row, col: &str) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(col)? {
        Some(ms) => from_millis(ms).map(Some).ok_or_else(|| {
            conversion_error(0, AppError::Validation(format!("bad timestamp {}", ms)))
        }),
        None => Ok(None),
    }
}

pub fn map_guest(row: &Row) -> rusqlite::Result<GuestRecord> {
    let status_str: String = row.get("status")?;
    let status = GuestStatus::from_db_str(&status_str).ok_or_else(|| {
        conversion_error(
            0,
            AppError::Validation(format!("Invalid guest status: {}", status_str)),
        )
    })?;

    Ok(GuestRecord {
        id: GuestId::from_db(row.get("id")?),
        division: DivisionId::from_db(row.get("division")?),
        contact: ContactInfo {
            first_name: row.get("first_name")?,
            last_name: row.get("last_name")?,
            phone: row.get("phone")?,
            email: row.get("email")?,
            address: row.get("address")?,
        },
        status,
        token: Token(row.get("token")?),
        created_at: timestamp(row, "created_at")?,
    })
}

pub fn map_visit(row: &Row) -> rusqlite::Result<Visit> {
    Ok(Visit {
        id: row.get("id")?,
        guest_id: GuestId::from_db(row.get("guest_id")?),
        division: DivisionId::from_db(row.get("division")?),
        checkin_at: timestamp(row, "checkin_at")?,
        checkout_at: optional_timestamp(row, "checkout_at")?,
    })
}

pub fn map_contact(row: &Row) -> rusqlite::Result<ContactEdge> {
    Ok(ContactEdge {
        guest_a: GuestId::from_db(row.get("guest_a")?),
        guest_b: GuestId::from_db(row.get("guest_b")?),
        visit_a: row.get("visit_a")?,
        visit_b: row.get("visit_b")?,
        division: DivisionId::from_db(row.get("division")?),
        window: ContactWindow {
            start: timestamp(row, "window_start")?,
            end: timestamp(row, "window_end")?,
        },
    })
}

fn collect<T>(rows: impl Iterator<Item = rusqlite::Result<T>>) -> AppResult<Vec<T>> {
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Guests
// ---------------------------------------------------------------------------

pub fn insert_guest(conn: &Connection, guest: &GuestRecord) -> AppResult<()> {
    conn.execute(
        "INSERT INTO guests (id, division, first_name, last_name, phone, email, address, status, token, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            guest.id.as_str(),
            guest.division.to_db(),
            guest.contact.first_name,
            guest.contact.last_name,
            guest.contact.phone,
            guest.contact.email,
            guest.contact.address,
            guest.status.to_db_str(),
            guest.token.as_str(),
            to_millis(guest.created_at),
        ],
    )?;
    Ok(())
}

pub fn load_guest(conn: &Connection, id: &GuestId) -> AppResult<Option<GuestRecord>> {
    let mut stmt = conn.prepare_cached("SELECT * FROM guests WHERE id = ?1")?;
    Ok(stmt.query_row([id.as_str()], map_guest).optional()?)
}

pub fn guest_exists(conn: &Connection, id: &GuestId) -> AppResult<bool> {
    let mut stmt = conn.prepare_cached("SELECT 1 FROM guests WHERE id = ?1")?;
    Ok(stmt.exists([id.as_str()])?)
}

fn retired_digest(id: &GuestId) -> String {
    let digest = Sha256::digest(id.as_str().as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// An identifier is taken if a live record uses it or a purged one used it.
pub fn identifier_taken(conn: &Connection, id: &GuestId) -> AppResult<bool> {
    if guest_exists(conn, id)? {
        return Ok(true);
    }
    let mut stmt = conn.prepare_cached("SELECT 1 FROM retired_guest_ids WHERE digest = ?1")?;
    Ok(stmt.exists([retired_digest(id)])?)
}

pub fn set_guest_status(conn: &Connection, id: &GuestId, status: GuestStatus) -> AppResult<()> {
    conn.execute(
        "UPDATE guests SET status = ?1 WHERE id = ?2",
        params![status.to_db_str(), id.as_str()],
    )?;
    Ok(())
}

/// Delete the guest row and retire its identifier. Visits must already be gone.
pub fn delete_guest(conn: &Connection, id: &GuestId, now: DateTime<Utc>) -> AppResult<bool> {
    let removed = conn.execute("DELETE FROM guests WHERE id = ?1", [id.as_str()])?;
    if removed > 0 {
        conn.execute(
            "INSERT OR IGNORE INTO retired_guest_ids (digest, retired_at) VALUES (?1, ?2)",
            params![retired_digest(id), to_millis(now)],
        )?;
    }
    Ok(removed > 0)
}

pub fn guest_created_at(conn: &Connection, id: &GuestId) -> AppResult<Option<DateTime<Utc>>> {
    let mut stmt = conn.prepare_cached("SELECT created_at FROM guests WHERE id = ?1")?;
    let ms: Option<i64> = stmt.query_row([id.as_str()], |row| row.get(0)).optional()?;
    Ok(ms.and_then(from_millis))
}

/// Guests that have something to purge before `horizon`: a closed visit that
/// ended before it, a contact window that ended before it, or a record older
/// than it with no visit that must be kept.
pub fn purge_candidates(conn: &Connection, horizon: DateTime<Utc>) -> AppResult<Vec<GuestId>> {
    let mut stmt = conn.prepare(
        "SELECT id FROM guests g
         WHERE EXISTS (SELECT 1 FROM visits v
                       WHERE v.guest_id = g.id
                         AND v.checkout_at IS NOT NULL AND v.checkout_at < ?1)
            OR EXISTS (SELECT 1 FROM contacts c
                       WHERE (c.guest_a = g.id OR c.guest_b = g.id) AND c.window_end < ?1)
            OR (g.created_at < ?1
                AND NOT EXISTS (SELECT 1 FROM visits v
                                WHERE v.guest_id = g.id
                                  AND (v.checkout_at IS NULL OR v.checkout_at >= ?1)))
         ORDER BY id",
    )?;
    let rows = stmt.query_map([to_millis(horizon)], |row| {
        row.get::<_, String>(0).map(GuestId::from_db)
    })?;
    collect(rows)
}

// ---------------------------------------------------------------------------
// Visits
// ---------------------------------------------------------------------------

pub fn insert_visit(
    conn: &Connection,
    guest: &GuestId,
    division: DivisionId,
    checkin_at: DateTime<Utc>,
) -> AppResult<Visit> {
    conn.execute(
        "INSERT INTO visits (guest_id, division, checkin_at) VALUES (?1, ?2, ?3)",
        params![guest.as_str(), division.to_db(), to_millis(checkin_at)],
    )?;
    Ok(Visit {
        id: conn.last_insert_rowid(),
        guest_id: guest.clone(),
        division,
        checkin_at: from_millis(to_millis(checkin_at)).unwrap_or(checkin_at),
        checkout_at: None,
    })
}

/// Insert a visit with explicit bounds. Used for imports and tests; the
/// ledger always goes through `insert_visit` + `close_visit`.
pub fn insert_closed_visit(
    conn: &Connection,
    guest: &GuestId,
    division: DivisionId,
    checkin_at: DateTime<Utc>,
    checkout_at: DateTime<Utc>,
) -> AppResult<Visit> {
    if checkout_at < checkin_at {
        return Err(AppError::Validation("visit ends before it starts".into()));
    }
    conn.execute(
        "INSERT INTO visits (guest_id, division, checkin_at, checkout_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            guest.as_str(),
            division.to_db(),
            to_millis(checkin_at),
            to_millis(checkout_at)
        ],
    )?;
    load_visit(conn, conn.last_insert_rowid())?
        .ok_or_else(|| AppError::Validation("visit vanished after insert".into()))
}

pub fn load_visit(conn: &Connection, id: i64) -> AppResult<Option<Visit>> {
    let mut stmt = conn.prepare_cached("SELECT * FROM visits WHERE id = ?1")?;
    Ok(stmt.query_row([id], map_visit).optional()?)
}

pub fn active_visit(conn: &Connection, guest: &GuestId) -> AppResult<Option<Visit>> {
    let mut stmt =
        conn.prepare_cached("SELECT * FROM visits WHERE guest_id = ?1 AND checkout_at IS NULL")?;
    Ok(stmt.query_row([guest.as_str()], map_visit).optional()?)
}

pub fn close_visit(conn: &Connection, visit_id: i64, checkout_at: DateTime<Utc>) -> AppResult<()> {
    let changed = conn.execute(
        "UPDATE visits SET checkout_at = ?1 WHERE id = ?2 AND checkout_at IS NULL",
        params![to_millis(checkout_at), visit_id],
    )?;
    if changed == 0 {
        return Err(AppError::NotCheckedIn(format!("visit {}", visit_id)));
    }
    Ok(())
}

pub fn count_active(conn: &Connection, division: DivisionId) -> AppResult<usize> {
    let mut stmt = conn.prepare_cached(
        "SELECT COUNT(DISTINCT guest_id) FROM visits WHERE division = ?1 AND checkout_at IS NULL",
    )?;
    let n: i64 = stmt.query_row([division.to_db()], |row| row.get(0))?;
    Ok(n as usize)
}

pub fn active_guest_ids(conn: &Connection) -> AppResult<Vec<GuestId>> {
    let mut stmt = conn.prepare(
        "SELECT guest_id FROM visits WHERE checkout_at IS NULL ORDER BY checkin_at ASC",
    )?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0).map(GuestId::from_db))?;
    collect(rows)
}

pub fn visits_for_guest(conn: &Connection, guest: &GuestId) -> AppResult<Vec<Visit>> {
    let mut stmt =
        conn.prepare("SELECT * FROM visits WHERE guest_id = ?1 ORDER BY checkin_at ASC, id ASC")?;
    let rows = stmt.query_map([guest.as_str()], map_visit)?;
    collect(rows)
}

/// Visits that started in `[start, end)`, joined with their guests.
pub fn guest_visits_between(
    conn: &Connection,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> AppResult<Vec<GuestVisit>> {
    let mut stmt = conn.prepare(
        "SELECT g.*, v.id AS visit_id, v.division AS visit_division,
                v.checkin_at, v.checkout_at
         FROM visits v JOIN guests g ON g.id = v.guest_id
         WHERE v.checkin_at >= ?1 AND v.checkin_at < ?2
         ORDER BY v.checkin_at ASC, v.id ASC",
    )?;
    let rows = stmt.query_map(params![to_millis(start), to_millis(end)], |row| {
        let guest = map_guest(row)?;
        let visit = Visit {
            id: row.get("visit_id")?,
            guest_id: guest.id.clone(),
            division: DivisionId::from_db(row.get("visit_division")?),
            checkin_at: timestamp(row, "checkin_at")?,
            checkout_at: optional_timestamp(row, "checkout_at")?,
        };
        Ok(GuestVisit { guest, visit })
    })?;
    collect(rows)
}

/// Closed visits of other guests in the same division whose interval
/// intersects `[start, end]`.
pub fn closed_visits_overlapping(
    conn: &Connection,
    exclude_guest: &GuestId,
    division: DivisionId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> AppResult<Vec<Visit>> {
    let mut stmt = conn.prepare_cached(
        "SELECT * FROM visits
         WHERE division = ?1 AND guest_id <> ?2
           AND checkout_at IS NOT NULL
           AND checkin_at <= ?4 AND checkout_at >= ?3
         ORDER BY checkin_at ASC, id ASC",
    )?;
    let rows = stmt.query_map(
        params![
            division.to_db(),
            exclude_guest.as_str(),
            to_millis(start),
            to_millis(end)
        ],
        map_visit,
    )?;
    collect(rows)
}

/// Like `closed_visits_overlapping`, but includes still-open visits.
pub fn any_visits_overlapping(
    conn: &Connection,
    exclude_guest: &GuestId,
    division: DivisionId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> AppResult<Vec<Visit>> {
    let mut stmt = conn.prepare_cached(
        "SELECT * FROM visits
         WHERE division = ?1 AND guest_id <> ?2
           AND checkin_at <= ?4 AND (checkout_at IS NULL OR checkout_at >= ?3)
         ORDER BY checkin_at ASC, id ASC",
    )?;
    let rows = stmt.query_map(
        params![
            division.to_db(),
            exclude_guest.as_str(),
            to_millis(start),
            to_millis(end)
        ],
        map_visit,
    )?;
    collect(rows)
}

pub fn delete_closed_visits_before(
    conn: &Connection,
    guest: &GuestId,
    horizon: DateTime<Utc>,
) -> AppResult<usize> {
    Ok(conn.execute(
        "DELETE FROM visits WHERE guest_id = ?1 AND checkout_at IS NOT NULL AND checkout_at < ?2",
        params![guest.as_str(), to_millis(horizon)],
    )?)
}

pub fn visit_count(conn: &Connection, guest: &GuestId) -> AppResult<usize> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM visits WHERE guest_id = ?1",
        [guest.as_str()],
        |row| row.get(0),
    )?;
    Ok(n as usize)
}

// ---------------------------------------------------------------------------
// Contacts
// ---------------------------------------------------------------------------

/// Idempotent insert. Returns `true` when the edge was not known yet.
pub fn insert_contact(conn: &Connection, edge: &ContactEdge, recorded_at: DateTime<Utc>) -> AppResult<bool> {
    let mut stmt = conn.prepare_cached(
        "INSERT OR IGNORE INTO contacts
            (guest_a, guest_b, visit_a, visit_b, division, window_start, window_end, recorded_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    let inserted = stmt.execute(params![
        edge.guest_a.as_str(),
        edge.guest_b.as_str(),
        edge.visit_a,
        edge.visit_b,
        edge.division.to_db(),
        to_millis(edge.window.start),
        to_millis(edge.window.end),
        to_millis(recorded_at),
    ])?;
    Ok(inserted == 1)
}

/// Keyset cursor over a guest's edges: `(window_start_ms, row id)`.
pub type ContactCursor = (i64, i64);

/// One page of a guest's edges ordered by window start, optionally restricted
/// to windows intersecting `range`.
pub fn contacts_page(
    conn: &Connection,
    guest: &GuestId,
    range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    after: Option<ContactCursor>,
    limit: usize,
) -> AppResult<Vec<(ContactCursor, ContactEdge)>> {
    let (from, to) = range
        .map(|(a, b)| (to_millis(a), to_millis(b)))
        .unwrap_or((i64::MIN, i64::MAX));
    let (after_start, after_id) = after.unwrap_or((i64::MIN, i64::MIN));

    let mut stmt = conn.prepare_cached(
        "SELECT * FROM contacts
         WHERE (guest_a = ?1 OR guest_b = ?1)
           AND window_end >= ?2 AND window_start <= ?3
           AND (window_start > ?4 OR (window_start = ?4 AND id > ?5))
         ORDER BY window_start ASC, id ASC
         LIMIT ?6",
    )?;
    let rows = stmt.query_map(
        params![guest.as_str(), from, to, after_start, after_id, limit as i64],
        |row| {
            let cursor = (row.get::<_, i64>("window_start")?, row.get::<_, i64>("id")?);
            Ok((cursor, map_contact(row)?))
        },
    )?;
    collect(rows)
}

pub fn delete_contacts_before(
    conn: &Connection,
    guest: &GuestId,
    horizon: DateTime<Utc>,
) -> AppResult<usize> {
    Ok(conn.execute(
        "DELETE FROM contacts WHERE (guest_a = ?1 OR guest_b = ?1) AND window_end < ?2",
        params![guest.as_str(), to_millis(horizon)],
    )?)
}

pub fn delete_contacts_of(conn: &Connection, guest: &GuestId) -> AppResult<usize> {
    Ok(conn.execute(
        "DELETE FROM contacts WHERE guest_a = ?1 OR guest_b = ?1",
        [guest.as_str()],
    )?)
}

/// Remove expired edges and edges whose guests no longer exist.
pub fn sweep_contacts(conn: &Connection, horizon: DateTime<Utc>) -> AppResult<usize> {
    Ok(conn.execute(
        "DELETE FROM contacts
         WHERE window_end < ?1
            OR guest_a NOT IN (SELECT id FROM guests)
            OR guest_b NOT IN (SELECT id FROM guests)",
        [to_millis(horizon)],
    )?)
}

pub fn contact_count(conn: &Connection) -> AppResult<usize> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))?;
    Ok(n as usize)
}
