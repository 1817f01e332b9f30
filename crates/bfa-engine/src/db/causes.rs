// crates/bfa-engine/src/db/causes.rs
// Failure cause rows

use bfa_types::{FailureCause, Indication};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

const CAUSE_COLUMNS: &str =
    "id, name, description, comment, last_occurred, categories, indications";

fn to_json<T: serde::Serialize>(value: &T) -> rusqlite::Result<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn from_json<T: serde::de::DeserializeOwned>(idx: usize, text: &str) -> rusqlite::Result<T> {
    serde_json::from_str(text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_timestamp(idx: usize, text: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    text.map(|t| {
        DateTime::parse_from_rfc3339(&t)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
    })
    .transpose()
}

/// Parse a row selected with `CAUSE_COLUMNS`
pub fn parse_cause_row(row: &Row) -> rusqlite::Result<FailureCause> {
    let categories: String = row.get(5)?;
    let indications: String = row.get(6)?;
    Ok(FailureCause {
        id: Some(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        comment: row.get(3)?,
        last_occurred: parse_timestamp(4, row.get(4)?)?,
        categories: from_json::<Vec<String>>(5, &categories)?,
        indications: from_json::<Vec<Indication>>(6, &indications)?,
    })
}

/// All causes in knowledge-base order (name, case-insensitive, then id)
pub fn list_causes_sync(conn: &Connection) -> rusqlite::Result<Vec<FailureCause>> {
    let sql = format!(
        "SELECT {} FROM failure_causes ORDER BY name COLLATE NOCASE, id",
        CAUSE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    stmt.query_map([], parse_cause_row)?.collect()
}

pub fn get_cause_sync(conn: &Connection, id: &str) -> rusqlite::Result<Option<FailureCause>> {
    let sql = format!("SELECT {} FROM failure_causes WHERE id = ?1", CAUSE_COLUMNS);
    conn.query_row(&sql, params![id], parse_cause_row).optional()
}

/// Insert a cause that already carries its id
pub fn insert_cause_sync(conn: &Connection, cause: &FailureCause) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO failure_causes (id, name, description, comment, last_occurred, categories, indications, modified_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, datetime('now'))",
        params![
            cause.id_str(),
            cause.name,
            cause.description,
            cause.comment,
            cause.last_occurred.map(|t| t.to_rfc3339()),
            to_json(&cause.categories)?,
            to_json(&cause.indications)?,
        ],
    )?;
    Ok(())
}

/// Replace the row with the cause's id. Returns rows changed (0 if unknown id).
pub fn update_cause_sync(conn: &Connection, cause: &FailureCause) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE failure_causes
         SET name = ?2, description = ?3, comment = ?4, last_occurred = ?5,
             categories = ?6, indications = ?7, modified_at = datetime('now')
         WHERE id = ?1",
        params![
            cause.id_str(),
            cause.name,
            cause.description,
            cause.comment,
            cause.last_occurred.map(|t| t.to_rfc3339()),
            to_json(&cause.categories)?,
            to_json(&cause.indications)?,
        ],
    )
}

/// Delete a cause, returning what was removed
pub fn delete_cause_sync(conn: &Connection, id: &str) -> rusqlite::Result<Option<FailureCause>> {
    let existing = get_cause_sync(conn, id)?;
    if existing.is_some() {
        conn.execute("DELETE FROM failure_causes WHERE id = ?1", params![id])?;
    }
    Ok(existing)
}

/// Write every cause (ids preserved) in one transaction.
/// Existing rows with the same id are overwritten.
pub fn import_causes_sync(conn: &mut Connection, causes: &[FailureCause]) -> rusqlite::Result<usize> {
    let tx = conn.transaction()?;
    for cause in causes {
        if update_cause_sync(&tx, cause)? == 0 {
            insert_cause_sync(&tx, cause)?;
        }
    }
    tx.commit()?;
    Ok(causes.len())
}
