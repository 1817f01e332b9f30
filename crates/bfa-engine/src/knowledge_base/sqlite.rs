// crates/bfa-engine/src/knowledge_base/sqlite.rs
// Database-backed knowledge base
//
// Every operation is its own database call; nothing is cached between
// calls. save_cause policy: an unknown id is NotFound.

use super::{BackendKind, KnowledgeBase, KnowledgeBaseIdentity, new_cause_id, validate_cause};
use crate::db::{DatabasePool, causes, statistics};
use crate::error::{BfaError, Result};
use async_trait::async_trait;
use bfa_types::{FailureCause, ScanStatistics};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone)]
enum Target {
    File(PathBuf),
    InMemory(String),
}

pub struct SqliteKnowledgeBase {
    target: Target,
    enable_statistics: bool,
    pool: RwLock<Option<Arc<DatabasePool>>>,
}

impl SqliteKnowledgeBase {
    /// Backend stored at `path`; connects on `start()`
    pub fn open_file(path: PathBuf, enable_statistics: bool) -> Self {
        Self {
            target: Target::File(path),
            enable_statistics,
            pool: RwLock::new(None),
        }
    }

    /// Private in-memory database, statistics disabled
    pub fn in_memory() -> Self {
        Self::in_memory_with_statistics(false)
    }

    pub fn in_memory_with_statistics(enable_statistics: bool) -> Self {
        Self {
            target: Target::InMemory(format!("memory:{}", uuid::Uuid::new_v4().simple())),
            enable_statistics,
            pool: RwLock::new(None),
        }
    }

    async fn pool(&self) -> Result<Arc<DatabasePool>> {
        self.pool.read().await.clone().ok_or_else(|| {
            BfaError::BackendUnavailable(format!(
                "sqlite knowledge base {} not started",
                self.identity().target
            ))
        })
    }

    /// Statistics rows recorded for `build_id`, oldest first
    pub async fn statistics_for_build(&self, build_id: &str) -> Result<Vec<ScanStatistics>> {
        let build_id = build_id.to_string();
        self.pool()
            .await?
            .run(move |conn| statistics::statistics_for_build_sync(conn, &build_id))
            .await
    }
}

#[async_trait]
impl KnowledgeBase for SqliteKnowledgeBase {
    fn identity(&self) -> KnowledgeBaseIdentity {
        let target = match &self.target {
            Target::File(path) => path.display().to_string(),
            Target::InMemory(label) => label.clone(),
        };
        KnowledgeBaseIdentity {
            kind: BackendKind::Sqlite,
            target,
        }
    }

    async fn start(&self) -> Result<()> {
        let mut slot = self.pool.write().await;
        if slot.is_some() {
            return Ok(());
        }
        let opened = match &self.target {
            Target::File(path) => DatabasePool::open(path).await,
            Target::InMemory(_) => DatabasePool::open_in_memory().await,
        }
        .map_err(|e| BfaError::BackendUnavailable(format!("{:#}", e)))?;

        info!(kb = %self.identity().target, "Opened sqlite knowledge base");
        *slot = Some(Arc::new(opened));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close();
            debug!(kb = %self.identity().target, "Closed sqlite knowledge base");
        }
        Ok(())
    }

    async fn get_causes(&self) -> Result<Vec<FailureCause>> {
        self.pool()
            .await?
            .run(|conn| causes::list_causes_sync(conn))
            .await
    }

    async fn get_cause(&self, id: &str) -> Result<Option<FailureCause>> {
        let id = id.to_string();
        self.pool()
            .await?
            .run(move |conn| causes::get_cause_sync(conn, &id))
            .await
    }

    async fn add_cause(&self, mut cause: FailureCause) -> Result<FailureCause> {
        validate_cause(&cause)?;
        let pool = self.pool().await?;
        cause.id = Some(new_cause_id());
        let row = cause.clone();
        pool.run_with_retry(move |conn| causes::insert_cause_sync(conn, &row))
            .await?;
        Ok(cause)
    }

    async fn save_cause(&self, cause: FailureCause) -> Result<FailureCause> {
        if !cause.has_id() {
            return self.add_cause(cause).await;
        }
        validate_cause(&cause)?;
        let pool = self.pool().await?;
        let row = cause.clone();
        let changed = pool
            .run_with_retry(move |conn| causes::update_cause_sync(conn, &row))
            .await?;
        if changed == 0 {
            return Err(BfaError::NotFound(format!(
                "failure cause {}",
                cause.id_str()
            )));
        }
        Ok(cause)
    }

    async fn remove_cause(&self, id: &str) -> Result<Option<FailureCause>> {
        let id = id.to_string();
        self.pool()
            .await?
            .run_with_retry(move |conn| causes::delete_cause_sync(conn, &id))
            .await
    }

    async fn import_causes(&self, incoming: Vec<FailureCause>) -> Result<()> {
        if let Some(missing) = incoming.iter().find(|c| !c.has_id()) {
            return Err(BfaError::MigrationFailure(format!(
                "cause '{}' has no id",
                missing.name
            )));
        }
        let pool = self.pool().await?;
        let incoming = Arc::new(incoming);
        pool.run_with_retry(move |conn| causes::import_causes_sync(conn, &incoming))
            .await
            .map_err(|e| BfaError::MigrationFailure(e.to_string()))?;
        Ok(())
    }

    fn is_enable_statistics(&self) -> bool {
        self.enable_statistics
    }

    async fn save_statistics(&self, stat: &ScanStatistics) -> Result<()> {
        if !self.enable_statistics {
            return Ok(());
        }
        let stat = stat.clone();
        self.pool()
            .await?
            .run_with_retry(move |conn| statistics::insert_statistics_sync(conn, &stat))
            .await?;
        Ok(())
    }

    async fn remove_build_failure_cause(&self, build_id: &str) -> Result<()> {
        if !self.enable_statistics {
            return Ok(());
        }
        let build_id = build_id.to_string();
        let removed = self
            .pool()
            .await?
            .run_with_retry(move |conn| statistics::delete_statistics_for_build_sync(conn, &build_id))
            .await?;
        debug!(removed, "Removed statistics for deleted build");
        Ok(())
    }
}
