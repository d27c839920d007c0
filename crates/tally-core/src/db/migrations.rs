//! Database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 4;

/// Run all pending migrations
pub fn run(conn: &mut Connection) -> Result<()> {
    let version = get_version(conn)?;

    if version < 1 {
        migrate(conn, 1, V1_STATEMENTS)?;
    }
    if version < 2 {
        migrate(conn, 2, V2_STATEMENTS)?;
    }
    if version < 3 {
        migrate(conn, 3, V3_STATEMENTS)?;
    }
    if version < 4 {
        migrate(conn, 4, V4_STATEMENTS)?;
    }

    Ok(())
}

/// Get the current schema version
fn get_version(conn: &Connection) -> Result<i32> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        [],
        |row| row.get(0),
    )?;

    if !exists {
        return Ok(0);
    }

    let version = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version)
}

/// Apply one migration's statements in a single transaction
fn migrate(conn: &mut Connection, version: i32, statements: &[&str]) -> Result<()> {
    let tx = conn.transaction()?;
    for stmt in statements {
        tx.execute_batch(stmt)?;
    }
    tx.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    tx.commit()?;

    tracing::info!("Migrated database to version {version} (latest {CURRENT_VERSION})");
    Ok(())
}

/// Version 1: schema tracking and collection records
const V1_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER PRIMARY KEY
    )",
    // One row per record; `updated_at` is NULL only for malformed imports
    "CREATE TABLE IF NOT EXISTS records (
        collection TEXT NOT NULL,
        id TEXT NOT NULL,
        updated_at INTEGER,
        payload TEXT NOT NULL,
        PRIMARY KEY (collection, id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_records_updated ON records(collection, updated_at DESC)",
];

/// Version 2: durable pending conflicts
const V2_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS conflicts (
        collection TEXT NOT NULL,
        record_id TEXT NOT NULL,
        detected_at INTEGER NOT NULL,
        body TEXT NOT NULL,
        PRIMARY KEY (collection, record_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_conflicts_detected ON conflicts(detected_at DESC)",
];

/// Version 3: last-known remote versions for push tracking
const V3_STATEMENTS: &[&str] = &["CREATE TABLE IF NOT EXISTS remote_versions (
        collection TEXT NOT NULL,
        record_id TEXT NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (collection, record_id)
    )"];

/// Version 4: resolutions already applied, so repeats survive a restart
const V4_STATEMENTS: &[&str] = &["CREATE TABLE IF NOT EXISTS settled_resolutions (
        collection TEXT NOT NULL,
        record_id TEXT NOT NULL,
        body TEXT NOT NULL,
        PRIMARY KEY (collection, record_id)
    )"];
