use plug_common::{Grant, Reservation};
use rusqlite::{Connection, OptionalExtension, Result, params};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::fs;

/// Connection shared between the engine, the policy and the API layer.
pub type SharedDb = Arc<Mutex<Connection>>;

/// Lock the shared connection. A panic elsewhere while holding the lock does
/// not invalidate SQLite's own state, so a poisoned lock is recovered.
pub fn lock(db: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    db.lock().unwrap_or_else(PoisonError::into_inner)
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS reservations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    plug_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    started_at TEXT NOT NULL,
    UNIQUE (plug_id, user_id)
);
CREATE INDEX IF NOT EXISTS reservations_plug ON reservations (plug_id);

CREATE TABLE IF NOT EXISTS grants (
    user_id TEXT NOT NULL,
    plug_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (user_id, plug_id)
);
"#;

/// Initialize the database at the given path, creating the directory if needed.
pub fn init_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).ok();
    }

    let conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// Open a throwaway in-memory database with the schema applied.
pub fn init_memory_db() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// Get the default database path (~/.plugshare/plugd.db)
pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".plugshare")
        .join("plugd.db")
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Current holders of a plug, first holder first.
pub fn holders(conn: &Connection, plug_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT user_id FROM reservations WHERE plug_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![plug_id], |row| row.get(0))?;
    rows.collect()
}

/// Insert a reservation unless one already exists for the pair.
///
/// Returns whether a row was created, together with the holders as seen by
/// the same transaction.
pub fn reserve(
    conn: &mut Connection,
    plug_id: &str,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<(bool, Vec<String>)> {
    let tx = conn.transaction()?;
    let created = tx.execute(
        "INSERT OR IGNORE INTO reservations (plug_id, user_id, started_at) VALUES (?1, ?2, ?3)",
        params![plug_id, user_id, now.to_rfc3339()],
    )? > 0;
    let current = holders(&tx, plug_id)?;
    tx.commit()?;
    Ok((created, current))
}

/// Delete the pair's reservation. `None` when the user held nothing.
pub fn release(conn: &mut Connection, plug_id: &str, user_id: &str) -> Result<Option<Vec<String>>> {
    let tx = conn.transaction()?;
    let deleted = tx.execute(
        "DELETE FROM reservations WHERE plug_id = ?1 AND user_id = ?2",
        params![plug_id, user_id],
    )?;
    if deleted == 0 {
        tx.rollback()?;
        return Ok(None);
    }
    let current = holders(&tx, plug_id)?;
    tx.commit()?;
    Ok(Some(current))
}

/// Delete every reservation on a plug, returning how many were removed.
pub fn clear_reservations(conn: &Connection, plug_id: &str) -> Result<usize> {
    conn.execute("DELETE FROM reservations WHERE plug_id = ?1", params![plug_id])
}

/// Load all live reservations.
pub fn load_reservations(conn: &Connection) -> Result<Vec<Reservation>> {
    let mut stmt = conn.prepare("SELECT plug_id, user_id, started_at FROM reservations ORDER BY id")?;

    let rows = stmt.query_map([], |row| {
        let plug_id: String = row.get(0)?;
        let user_id: String = row.get(1)?;
        let started_at_str: String = row.get(2)?;

        Ok(Reservation {
            plug_id,
            user_id,
            started_at: parse_time(&started_at_str),
        })
    })?;
    rows.collect()
}

/// Save a grant. Returns false if it already existed.
pub fn insert_grant(conn: &Connection, user_id: &str, plug_id: &str, now: DateTime<Utc>) -> Result<bool> {
    let rows = conn.execute(
        "INSERT OR IGNORE INTO grants (user_id, plug_id, created_at) VALUES (?1, ?2, ?3)",
        params![user_id, plug_id, now.to_rfc3339()],
    )?;
    Ok(rows > 0)
}

/// Delete a grant. Returns false if there was nothing to delete.
pub fn delete_grant(conn: &Connection, user_id: &str, plug_id: &str) -> Result<bool> {
    let rows = conn.execute(
        "DELETE FROM grants WHERE user_id = ?1 AND plug_id = ?2",
        params![user_id, plug_id],
    )?;
    Ok(rows > 0)
}

pub fn has_grant(conn: &Connection, user_id: &str, plug_id: &str) -> Result<bool> {
    conn.query_row(
        "SELECT 1 FROM grants WHERE user_id = ?1 AND plug_id = ?2",
        params![user_id, plug_id],
        |_| Ok(()),
    )
    .optional()
    .map(|row| row.is_some())
}

pub fn granted_plugs(conn: &Connection, user_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT plug_id FROM grants WHERE user_id = ?1 ORDER BY plug_id")?;
    let rows = stmt.query_map(params![user_id], |row| row.get(0))?;
    rows.collect()
}

pub fn load_grants(conn: &Connection) -> Result<Vec<Grant>> {
    let mut stmt = conn.prepare("SELECT user_id, plug_id, created_at FROM grants ORDER BY user_id, plug_id")?;
    let rows = stmt.query_map([], |row| {
        let created_at_str: String = row.get(2)?;
        Ok(Grant {
            user_id: row.get(0)?,
            plug_id: row.get(1)?,
            created_at: parse_time(&created_at_str),
        })
    })?;
    rows.collect()
}
