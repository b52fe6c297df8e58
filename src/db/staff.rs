//! Staff account rows.

use crate::errors::{AppError, AppResult};
use crate::models::division::DivisionId;
use crate::models::staff::StaffUser;
use crate::utils::time::{from_millis, to_millis};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

pub fn map_staff(row: &Row) -> rusqlite::Result<StaffUser> {
    let created_ms: i64 = row.get("created_at")?;
    let created_at = from_millis(created_ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Integer,
            Box::new(AppError::Validation(format!("bad timestamp {}", created_ms))),
        )
    })?;

    Ok(StaffUser {
        id: row.get("id")?,
        username: row.get("username")?,
        password_hash: row.get("password_hash")?,
        division: row.get::<_, Option<i64>>("division")?.map(DivisionId::from_db),
        is_admin: row.get::<_, i64>("is_admin")? == 1,
        active: row.get::<_, i64>("active")? == 1,
        created_at,
    })
}

pub fn insert_staff(
    conn: &Connection,
    username: &str,
    password_hash: &str,
    division: Option<DivisionId>,
    is_admin: bool,
    created_at: DateTime<Utc>,
) -> AppResult<i64> {
    conn.execute(
        "INSERT INTO staff (username, password_hash, division, is_admin, active, created_at)
         VALUES (?1, ?2, ?3, ?4, 1, ?5)",
        params![
            username,
            password_hash,
            division.map(DivisionId::to_db),
            if is_admin { 1 } else { 0 },
            to_millis(created_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Insert the account with a fixed id. Used once, for the reserved admin.
pub fn insert_staff_with_id(
    conn: &Connection,
    id: i64,
    username: &str,
    password_hash: &str,
    created_at: DateTime<Utc>,
) -> AppResult<()> {
    conn.execute(
        "INSERT INTO staff (id, username, password_hash, division, is_admin, active, created_at)
         VALUES (?1, ?2, ?3, NULL, 1, 1, ?4)",
        params![id, username, password_hash, to_millis(created_at)],
    )?;
    Ok(())
}

pub fn load_staff(conn: &Connection, id: i64) -> AppResult<Option<StaffUser>> {
    let mut stmt = conn.prepare_cached("SELECT * FROM staff WHERE id = ?1")?;
    Ok(stmt.query_row([id], map_staff).optional()?)
}

pub fn load_staff_by_name(conn: &Connection, username: &str) -> AppResult<Option<StaffUser>> {
    let mut stmt = conn.prepare_cached("SELECT * FROM staff WHERE username = ?1")?;
    Ok(stmt.query_row([username], map_staff).optional()?)
}

pub fn list_staff(conn: &Connection) -> AppResult<Vec<StaffUser>> {
    let mut stmt = conn.prepare("SELECT * FROM staff ORDER BY id ASC")?;
    let rows = stmt.query_map([], map_staff)?;

    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

pub fn update_staff(
    conn: &Connection,
    id: i64,
    division: Option<DivisionId>,
    is_admin: bool,
    active: bool,
) -> AppResult<bool> {
    let changed = conn.execute(
        "UPDATE staff SET division = ?1, is_admin = ?2, active = ?3 WHERE id = ?4",
        params![
            division.map(DivisionId::to_db),
            if is_admin { 1 } else { 0 },
            if active { 1 } else { 0 },
            id
        ],
    )?;
    Ok(changed > 0)
}

pub fn update_password(conn: &Connection, id: i64, password_hash: &str) -> AppResult<bool> {
    let changed = conn.execute(
        "UPDATE staff SET password_hash = ?1 WHERE id = ?2",
        params![password_hash, id],
    )?;
    Ok(changed > 0)
}

pub fn delete_staff(conn: &Connection, id: i64) -> AppResult<bool> {
    Ok(conn.execute("DELETE FROM staff WHERE id = ?1", [id])? > 0)
}
