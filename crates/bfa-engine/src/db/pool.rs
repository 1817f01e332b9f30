// crates/bfa-engine/src/db/pool.rs
// deadpool-sqlite pool behind the database knowledge base
//
// Every call runs its closure on the pool's blocking threads through
// `run()`. In-memory databases use a shared-cache URI so all pooled
// connections see one database.

use crate::error::BfaError;
use anyhow::{Context, Result};
use deadpool_sqlite::{Config, Hook, HookError, Pool, Runtime};
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

const MAX_CONNECTIONS: usize = 8;

/// Backoff between attempts when SQLite reports contention
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(500),
    Duration::from_millis(2000),
];

/// SQLITE_BUSY or SQLITE_LOCKED, directly or wrapped
fn is_contention(err: &BfaError) -> bool {
    fn busy(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error {
                    code: rusqlite::ffi::ErrorCode::DatabaseBusy
                        | rusqlite::ffi::ErrorCode::DatabaseLocked,
                    ..
                },
                _,
            )
        )
    }
    match err {
        BfaError::Db(e) => busy(e),
        BfaError::Anyhow(e) => e.downcast_ref::<rusqlite::Error>().is_some_and(busy),
        _ => false,
    }
}

pub struct DatabasePool {
    pool: Pool,
}

impl DatabasePool {
    /// Open (creating if needed) the database at `path` and migrate it
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn_str = path.to_string_lossy().to_string();
        Self::build(&conn_str, true).await
    }

    /// Private in-memory database, gone once the pool is dropped
    pub async fn open_in_memory() -> Result<Self> {
        let uri = format!(
            "file:bfa_kb_{}?mode=memory&cache=shared",
            uuid::Uuid::new_v4().simple()
        );
        Self::build(&uri, false).await
    }

    async fn build(conn_str: &str, wal: bool) -> Result<Self> {
        let pool = Config::new(conn_str)
            .builder(Runtime::Tokio1)
            .context("Failed to create pool builder")?
            .max_size(MAX_CONNECTIONS)
            .post_create(post_create_hook(wal))
            .build()
            .context("Failed to build connection pool")?;

        let db = Self { pool };
        db.run(|conn| super::schema::run_all_migrations(conn))
            .await
            .context("Failed to migrate knowledge base schema")?;
        Ok(db)
    }

    /// Run `f` on a pooled connection.
    ///
    /// Pool and interact failures become `BackendUnavailable`; errors
    /// returned by `f` keep their own variant.
    pub async fn run<F, R, E>(&self, f: F) -> Result<R, BfaError>
    where
        F: FnOnce(&mut Connection) -> Result<R, E> + Send + 'static,
        R: Send + 'static,
        E: Into<BfaError> + Send + 'static,
    {
        self.pool
            .get()
            .await
            .map_err(|e| BfaError::BackendUnavailable(format!("failed to get connection: {}", e)))?
            .interact(move |conn| f(conn).map_err(Into::into))
            .await
            .map_err(|e| BfaError::BackendUnavailable(format!("database error: {}", e)))?
    }

    /// [`run`](Self::run), retried with backoff while SQLite is busy
    pub async fn run_with_retry<F, R, E>(&self, f: F) -> Result<R, BfaError>
    where
        F: FnOnce(&mut Connection) -> Result<R, E> + Send + Clone + 'static,
        R: Send + 'static,
        E: Into<BfaError> + Send + 'static,
    {
        for (attempt, delay) in RETRY_DELAYS.iter().enumerate() {
            match self.run(f.clone()).await {
                Err(e) if is_contention(&e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        retries = RETRY_DELAYS.len(),
                        ?delay,
                        "SQLite busy, retrying"
                    );
                    tokio::time::sleep(*delay).await;
                }
                other => return other,
            }
        }
        self.run(f).await
    }

    /// Later `run` calls fail with `BackendUnavailable`
    pub fn close(&self) {
        self.pool.close();
    }
}

fn post_create_hook(wal: bool) -> Hook {
    Hook::async_fn(move |conn, _metrics| {
        Box::pin(async move {
            conn.interact(move |conn| setup_connection(conn, wal))
                .await
                .map_err(|e| HookError::Message(format!("interact failed: {e}").into()))?
                .map_err(|e| HookError::Message(format!("connection setup failed: {e}").into()))
        })
    })
}

/// WAL only applies to file databases
fn setup_connection(conn: &Connection, wal: bool) -> rusqlite::Result<()> {
    if wal {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    }
    conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")
}
