// crates/bfa-engine/src/db/statistics.rs
// Per-scan statistics rows

use bfa_types::{BuildResult, ScanStatistics};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

pub fn insert_statistics_sync(conn: &Connection, stat: &ScanStatistics) -> rusqlite::Result<i64> {
    let cause_ids = serde_json::to_string(&stat.cause_ids)
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
    conn.execute(
        "INSERT INTO scan_statistics (build_id, project_name, timestamp, result, cause_ids)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            stat.build_id,
            stat.project_name,
            stat.timestamp.to_rfc3339(),
            stat.result.map(|r| r.as_str()),
            cause_ids,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Statistics recorded for one build, oldest first
pub fn statistics_for_build_sync(
    conn: &Connection,
    build_id: &str,
) -> rusqlite::Result<Vec<ScanStatistics>> {
    let mut stmt = conn.prepare(
        "SELECT build_id, project_name, timestamp, result, cause_ids
         FROM scan_statistics WHERE build_id = ?1 ORDER BY id",
    )?;
    stmt.query_map(params![build_id], |row| {
        let timestamp: String = row.get(2)?;
        let result: Option<String> = row.get(3)?;
        let cause_ids: String = row.get(4)?;
        Ok(ScanStatistics {
            build_id: row.get(0)?,
            project_name: row.get(1)?,
            timestamp: DateTime::parse_from_rfc3339(&timestamp)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            result: result.as_deref().and_then(BuildResult::from_str),
            cause_ids: serde_json::from_str(&cause_ids).unwrap_or_default(),
        })
    })?
    .collect()
}

pub fn delete_statistics_for_build_sync(conn: &Connection, build_id: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM scan_statistics WHERE build_id = ?1",
        params![build_id],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema::run_all_migrations;

    fn stat(build: &str) -> ScanStatistics {
        ScanStatistics {
            build_id: build.to_string(),
            project_name: "app".to_string(),
            timestamp: Utc::now(),
            result: Some(BuildResult::Failure),
            cause_ids: vec!["c1".to_string(), "c2".to_string()],
        }
    }

    #[test]
    fn test_insert_and_read_back() {
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();

        insert_statistics_sync(&conn, &stat("app#1")).unwrap();
        insert_statistics_sync(&conn, &stat("app#2")).unwrap();

        let rows = statistics_for_build_sync(&conn, "app#1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].result, Some(BuildResult::Failure));
        assert_eq!(rows[0].cause_ids, vec!["c1", "c2"]);
    }

    #[test]
    fn test_delete_for_build() {
        let conn = Connection::open_in_memory().unwrap();
        run_all_migrations(&conn).unwrap();

        insert_statistics_sync(&conn, &stat("app#1")).unwrap();
        insert_statistics_sync(&conn, &stat("app#1")).unwrap();
        insert_statistics_sync(&conn, &stat("app#2")).unwrap();

        assert_eq!(delete_statistics_for_build_sync(&conn, "app#1").unwrap(), 2);
        assert!(statistics_for_build_sync(&conn, "app#1").unwrap().is_empty());
        assert_eq!(statistics_for_build_sync(&conn, "app#2").unwrap().len(), 1);
    }
}
