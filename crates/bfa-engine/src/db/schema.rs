// crates/bfa-engine/src/db/schema.rs
// Database schema and migrations

use anyhow::Result;
use rusqlite::Connection;

/// Run all schema setup and migrations.
///
/// Idempotent: checks for existing tables/columns before changing them.
pub fn run_all_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    migrate_failure_causes_modified_at(conn)?;

    Ok(())
}

/// Check whether `table` has a column named `column`
fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names.iter().any(|name| name == column))
}

/// Add modified_at to failure_causes (databases created before it existed)
fn migrate_failure_causes_modified_at(conn: &Connection) -> Result<()> {
    if column_exists(conn, "failure_causes", "modified_at")? {
        return Ok(());
    }
    tracing::info!("Adding modified_at column to failure_causes");
    // ADD COLUMN only accepts constant defaults
    conn.execute_batch(
        "ALTER TABLE failure_causes ADD COLUMN modified_at TEXT;
         UPDATE failure_causes SET modified_at = datetime('now') WHERE modified_at IS NULL;",
    )?;
    Ok(())
}

/// Base schema. Categories and indications are stored as JSON arrays on
/// the cause row: they are always read and written together with it.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS failure_causes (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    comment TEXT NOT NULL DEFAULT '',
    last_occurred TEXT,
    categories TEXT NOT NULL DEFAULT '[]',
    indications TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS idx_failure_causes_name ON failure_causes(name COLLATE NOCASE);

CREATE TABLE IF NOT EXISTS scan_statistics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    build_id TEXT NOT NULL,
    project_name TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    result TEXT,
    cause_ids TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS idx_scan_statistics_build ON scan_statistics(build_id);
"#;
