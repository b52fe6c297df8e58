//! Versioned schema migrations, tracked through `PRAGMA user_version`.

use crate::errors::AppResult;
use rusqlite::Connection;
use tracing::info;

/// Ordered list of (version, SQL). Never edit an entry once released; append.
const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        r#"
        CREATE TABLE IF NOT EXISTS guests (
            id          TEXT PRIMARY KEY,
            division    INTEGER NOT NULL,
            first_name  TEXT NOT NULL,
            last_name   TEXT NOT NULL,
            phone       TEXT,
            email       TEXT,
            address     TEXT,
            status      TEXT NOT NULL DEFAULT 'registered'
                        CHECK (status IN ('registered','checked_in','checked_out')),
            token       TEXT NOT NULL,
            created_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS visits (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            guest_id     TEXT NOT NULL REFERENCES guests(id),
            division     INTEGER NOT NULL,
            checkin_at   INTEGER NOT NULL,
            checkout_at  INTEGER,
            CHECK (checkout_at IS NULL OR checkout_at >= checkin_at)
        );

        -- at most one active visit per guest
        CREATE UNIQUE INDEX IF NOT EXISTS idx_visits_one_active
            ON visits(guest_id) WHERE checkout_at IS NULL;
        CREATE INDEX IF NOT EXISTS idx_visits_guest_checkin ON visits(guest_id, checkin_at);
        CREATE INDEX IF NOT EXISTS idx_visits_division_window
            ON visits(division, checkin_at, checkout_at);

        CREATE TABLE IF NOT EXISTS contacts (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            guest_a       TEXT NOT NULL,
            guest_b       TEXT NOT NULL,
            visit_a       INTEGER NOT NULL,
            visit_b       INTEGER NOT NULL,
            division      INTEGER NOT NULL,
            window_start  INTEGER NOT NULL,
            window_end    INTEGER NOT NULL,
            recorded_at   INTEGER NOT NULL,
            CHECK (guest_a < guest_b),
            CHECK (window_end >= window_start),
            UNIQUE (guest_a, guest_b, division, window_start, window_end)
        );

        CREATE INDEX IF NOT EXISTS idx_contacts_a ON contacts(guest_a, window_start);
        CREATE INDEX IF NOT EXISTS idx_contacts_b ON contacts(guest_b, window_start);
        CREATE INDEX IF NOT EXISTS idx_contacts_end ON contacts(window_end);

        CREATE TABLE IF NOT EXISTS retired_guest_ids (
            digest      TEXT PRIMARY KEY,
            retired_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS log (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            date      TEXT NOT NULL,
            operation TEXT NOT NULL,
            target    TEXT DEFAULT '',
            message   TEXT NOT NULL
        );
        "#,
    ),
    (
        2,
        r#"
        CREATE TABLE IF NOT EXISTS staff (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            username       TEXT NOT NULL UNIQUE,
            password_hash  TEXT NOT NULL,
            division       INTEGER,
            is_admin       INTEGER NOT NULL DEFAULT 0,
            active         INTEGER NOT NULL DEFAULT 1,
            created_at     INTEGER NOT NULL
        );
        "#,
    ),
];

pub fn current_version(conn: &Connection) -> AppResult<i64> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Apply every migration newer than the stored schema version, each in its
/// own transaction together with the version bump.
pub fn run_pending_migrations(conn: &Connection) -> AppResult<()> {
    let current = current_version(conn)?;

    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        conn.execute_batch(&format!(
            "BEGIN;\n{}\nPRAGMA user_version = {};\nCOMMIT;",
            sql, version
        ))?;
        info!(version, "applied schema migration");
    }

    Ok(())
}

pub fn latest_version() -> i64 {
    MIGRATIONS.last().map(|(v, _)| *v).unwrap_or(0)
}
