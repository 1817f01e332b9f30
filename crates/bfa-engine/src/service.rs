// crates/bfa-engine/src/service.rs
// Analyzer service: the active knowledge base, the scanner and the queue
//
// Constructed once and passed around by Arc.

use crate::config::BfaConfig;
use crate::display::{MessageFormatter, build_display_data};
use crate::error::{BfaError, Result};
use crate::host::Build;
use crate::knowledge_base::{KnowledgeBase, KnowledgeBaseConfig, SharedKnowledgeBase};
use crate::scanner::{CauseScanner, ScanOutcome};
use crate::sod::{CandidatePolicy, ScanOnDemandQueue};
use bfa_types::FailureCauseDisplayData;
use std::sync::Arc;
use tracing::{error, info, warn};

pub struct BuildFailureAnalyzer {
    config: BfaConfig,
    kb: Arc<SharedKnowledgeBase>,
    scanner: Arc<CauseScanner>,
    queue: Arc<ScanOnDemandQueue>,
    /// Serializes backend swaps
    reconfigure_lock: tokio::sync::Mutex<()>,
}

impl BuildFailureAnalyzer {
    /// Build and start the backend named in `config`, then the queue
    pub async fn start(config: BfaConfig) -> Result<Arc<Self>> {
        config.validate().into_result()?;
        let kb = config.knowledge_base.build();
        kb.start().await?;
        Ok(Self::assemble(config, kb))
    }

    /// Use an already started backend
    pub fn with_knowledge_base(config: BfaConfig, kb: Arc<dyn KnowledgeBase>) -> Result<Arc<Self>> {
        config.validate().into_result()?;
        Ok(Self::assemble(config, kb))
    }

    fn assemble(config: BfaConfig, kb: Arc<dyn KnowledgeBase>) -> Arc<Self> {
        let shared = Arc::new(SharedKnowledgeBase::new(kb));
        let scanner = Arc::new(CauseScanner::new(shared.clone()));
        let policy = CandidatePolicy::new(config.analysis.analyze_aborted);
        let queue = ScanOnDemandQueue::start(scanner.clone(), &config.scan_on_demand, policy);
        info!(
            backend = shared.current().identity().kind.as_str(),
            "Build failure analyzer started"
        );
        Arc::new(Self {
            config,
            kb: shared,
            scanner,
            queue,
            reconfigure_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn config(&self) -> &BfaConfig {
        &self.config
    }

    pub fn knowledge_base(&self) -> Arc<dyn KnowledgeBase> {
        self.kb.current()
    }

    pub fn scanner(&self) -> &Arc<CauseScanner> {
        &self.scanner
    }

    pub fn queue(&self) -> &Arc<ScanOnDemandQueue> {
        &self.queue
    }

    /// Scan a build now and attach the result
    pub async fn scan_build(&self, build: &dyn Build) -> Result<ScanOutcome> {
        self.scanner.scan_and_record(build).await
    }

    pub fn display_data(&self, build: &dyn Build) -> FailureCauseDisplayData {
        build_display_data(build)
    }

    pub fn build_completed_message(&self, build: &dyn Build) -> String {
        MessageFormatter::new(&self.config.analysis.base_url).format(&build_display_data(build))
    }

    /// Switch to the backend described by `config`
    pub async fn reconfigure(&self, config: &KnowledgeBaseConfig) -> Result<bool> {
        self.reconfigure_knowledge_base(config.build()).await
    }

    /// Make `new` the active backend, migrating every cause into it.
    ///
    /// Returns `false` when `new` is the backend already in use. On any
    /// failure the current backend stays active and `new` is stopped.
    pub async fn reconfigure_knowledge_base(&self, new: Arc<dyn KnowledgeBase>) -> Result<bool> {
        let _guard = self.reconfigure_lock.lock().await;
        let old = self.kb.current();
        if old.same_as(new.as_ref()) {
            info!(
                backend = new.identity().kind.as_str(),
                "Knowledge base unchanged, nothing to migrate"
            );
            return Ok(false);
        }

        if let Err(e) = new.start().await {
            error!(error = %e, "Failed to start new knowledge base");
            let _ = new.stop().await;
            return Err(BfaError::MigrationFailure(format!(
                "starting {}: {}",
                new.identity().kind.as_str(),
                e
            )));
        }

        match new.convert_from(old.as_ref()).await {
            Ok(count) => {
                self.kb.replace(new.clone());
                if let Err(e) = old.stop().await {
                    warn!(error = %e, "Failed to stop previous knowledge base");
                }
                info!(
                    from = old.identity().kind.as_str(),
                    to = new.identity().kind.as_str(),
                    count,
                    "Knowledge base reconfigured"
                );
                Ok(true)
            }
            Err(e) => {
                error!(error = %e, "Knowledge base migration failed, keeping current backend");
                if let Err(stop_err) = new.stop().await {
                    warn!(error = %stop_err, "Failed to stop abandoned knowledge base");
                }
                Err(e)
            }
        }
    }

    /// Purge per-build data when the host deletes a build
    pub async fn on_build_deleted(&self, build_id: &str) -> Result<()> {
        self.kb.current().remove_build_failure_cause(build_id).await
    }

    /// Stop the queue, then the active backend
    pub async fn shutdown(&self) -> Result<()> {
        self.queue.shutdown().await;
        self.kb.current().stop().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryBuild;
    use crate::knowledge_base::{KnowledgeBaseIdentity, LocalFileKnowledgeBase, SqliteKnowledgeBase};
    use async_trait::async_trait;
    use bfa_types::{BuildResult, FailureCause, Indication};

    fn cause(name: &str) -> FailureCause {
        FailureCause::new(name, format!("{} happened", name))
            .with_indication(Indication::build_log(".*ERROR.*"))
    }

    async fn analyzer_with_local() -> (Arc<BuildFailureAnalyzer>, FailureCause) {
        let local = Arc::new(LocalFileKnowledgeBase::new());
        let added = local.add_cause(cause("Error")).await.unwrap();
        let analyzer = BuildFailureAnalyzer::with_knowledge_base(BfaConfig::default(), local).unwrap();
        (analyzer, added)
    }

    /// Accepts a start, refuses every import
    struct RejectingKnowledgeBase;

    #[async_trait]
    impl KnowledgeBase for RejectingKnowledgeBase {
        fn identity(&self) -> KnowledgeBaseIdentity {
            KnowledgeBaseIdentity {
                kind: crate::knowledge_base::BackendKind::Sqlite,
                target: "rejecting".to_string(),
            }
        }
        async fn start(&self) -> Result<()> {
            Ok(())
        }
        async fn stop(&self) -> Result<()> {
            Ok(())
        }
        async fn get_causes(&self) -> Result<Vec<FailureCause>> {
            Ok(vec![])
        }
        async fn get_cause(&self, _id: &str) -> Result<Option<FailureCause>> {
            Ok(None)
        }
        async fn add_cause(&self, cause: FailureCause) -> Result<FailureCause> {
            Ok(cause)
        }
        async fn save_cause(&self, cause: FailureCause) -> Result<FailureCause> {
            Ok(cause)
        }
        async fn remove_cause(&self, _id: &str) -> Result<Option<FailureCause>> {
            Ok(None)
        }
        async fn import_causes(&self, _causes: Vec<FailureCause>) -> Result<()> {
            Err(BfaError::BackendUnavailable("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn test_scan_and_message() {
        let (analyzer, _) = analyzer_with_local().await;
        let build = MemoryBuild::new("app", 9)
            .with_result(BuildResult::Failure)
            .with_log("...ERROR occurred...\n");
        let outcome = analyzer.scan_build(&build).await.unwrap();
        assert_eq!(outcome.found.len(), 1);
        assert_eq!(
            analyzer.build_completed_message(&build),
            "Error happened ( job/app/9/ )"
        );
        analyzer.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconfigure_same_backend_is_noop() {
        let (analyzer, _) = analyzer_with_local().await;
        let current = analyzer.knowledge_base();
        assert!(!analyzer.reconfigure_knowledge_base(current.clone()).await.unwrap());
        assert!(Arc::ptr_eq(&analyzer.knowledge_base(), &current));
        analyzer.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconfigure_migrates_causes() {
        let (analyzer, added) = analyzer_with_local().await;
        let sqlite: Arc<dyn KnowledgeBase> = Arc::new(SqliteKnowledgeBase::in_memory());

        assert!(analyzer.reconfigure_knowledge_base(sqlite.clone()).await.unwrap());
        let active = analyzer.knowledge_base();
        assert!(active.same_as(sqlite.as_ref()));
        assert_eq!(active.get_cause(added.id_str()).await.unwrap(), Some(added));
        analyzer.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_migration_keeps_old_backend() {
        let (analyzer, added) = analyzer_with_local().await;
        let before = analyzer.knowledge_base();

        let err = analyzer
            .reconfigure_knowledge_base(Arc::new(RejectingKnowledgeBase))
            .await
            .unwrap_err();
        assert!(matches!(err, BfaError::MigrationFailure(_)));
        assert!(Arc::ptr_eq(&analyzer.knowledge_base(), &before));
        assert!(before.get_cause(added.id_str()).await.unwrap().is_some());
        analyzer.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unstartable_backend_keeps_old() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the database file should be
        let path = dir.path().join("kb.db");
        std::fs::create_dir_all(&path).unwrap();
        let (analyzer, _) = analyzer_with_local().await;
        let before = analyzer.knowledge_base();

        let result = analyzer
            .reconfigure(&KnowledgeBaseConfig::Sqlite {
                path,
                enable_statistics: false,
            })
            .await;
        assert!(matches!(result, Err(BfaError::MigrationFailure(_))));
        assert!(Arc::ptr_eq(&analyzer.knowledge_base(), &before));
        analyzer.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = BfaConfig::default();
        config.scan_on_demand.threads = 0;
        let result = BuildFailureAnalyzer::with_knowledge_base(
            config,
            Arc::new(LocalFileKnowledgeBase::new()),
        );
        assert!(matches!(result, Err(BfaError::Config(_))));
    }

    #[tokio::test]
    async fn test_build_deleted_purges_statistics() {
        let sqlite = Arc::new(SqliteKnowledgeBase::in_memory_with_statistics(true));
        sqlite.start().await.unwrap();
        sqlite.add_cause(cause("Error")).await.unwrap();
        let analyzer =
            BuildFailureAnalyzer::with_knowledge_base(BfaConfig::default(), sqlite.clone()).unwrap();

        let build = MemoryBuild::new("app", 1)
            .with_result(BuildResult::Failure)
            .with_log("ERROR\n");
        analyzer.scan_build(&build).await.unwrap();
        assert_eq!(sqlite.statistics_for_build("app#1").await.unwrap().len(), 1);

        analyzer.on_build_deleted("app#1").await.unwrap();
        assert!(sqlite.statistics_for_build("app#1").await.unwrap().is_empty());
        analyzer.shutdown().await.unwrap();
    }
}
