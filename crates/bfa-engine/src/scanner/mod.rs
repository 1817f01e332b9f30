// crates/bfa-engine/src/scanner/mod.rs
// Evaluates every known cause against one build
//
// A scan works on the cause list read once at its start. Indications that
// cannot be evaluated, including unreadable artifacts, are skipped with a
// diagnostic; only log read and knowledge base failures end a scan early.

use crate::error::{BfaError, Result};
use crate::host::Build;
use crate::indication::{BuildContent, IndicationMatcher};
use crate::knowledge_base::SharedKnowledgeBase;
use bfa_types::{FailureCause, FoundFailureCause, FoundIndication, ScanStatistics};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An indication skipped during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanDiagnostic {
    pub cause_id: String,
    pub cause_name: String,
    /// Position of the indication within its cause
    pub indication_index: usize,
    pub message: String,
}

/// Result of scanning one build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOutcome {
    /// Causes with at least one matching indication, in knowledge base order
    pub found: Vec<FoundFailureCause>,
    pub diagnostics: Vec<ScanDiagnostic>,
}

impl ScanOutcome {
    pub fn cause_ids(&self) -> Vec<String> {
        self.found.iter().map(|c| c.id.clone()).collect()
    }
}

pub struct CauseScanner {
    kb: Arc<SharedKnowledgeBase>,
    matcher: IndicationMatcher,
}

impl CauseScanner {
    pub fn new(kb: Arc<SharedKnowledgeBase>) -> Self {
        Self {
            kb,
            matcher: IndicationMatcher::new(),
        }
    }

    pub fn knowledge_base(&self) -> &Arc<SharedKnowledgeBase> {
        &self.kb
    }

    /// Scan without touching the build
    pub async fn scan(&self, build: &dyn Build) -> Result<ScanOutcome> {
        self.scan_with_cancel(build, &CancellationToken::new()).await
    }

    /// Like [`scan`](Self::scan), stopping with `Cancelled` between causes
    pub async fn scan_with_cancel(
        &self,
        build: &dyn Build,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome> {
        let causes = self.kb.current().get_causes().await?;
        debug!(build = %build.id(), causes = causes.len(), "Scanning build");

        let mut content = BuildContent::new(build);
        let mut outcome = ScanOutcome::default();

        for cause in &causes {
            if cancel.is_cancelled() {
                return Err(BfaError::Cancelled);
            }
            let matched = self
                .evaluate_cause(cause, &mut content, &mut outcome.diagnostics)
                .await?;
            if !matched.is_empty() {
                outcome
                    .found
                    .push(FoundFailureCause::from_cause(cause, matched));
            }
        }

        Ok(outcome)
    }

    /// Every matching indication of `cause`, in declared order
    async fn evaluate_cause(
        &self,
        cause: &FailureCause,
        content: &mut BuildContent<'_>,
        diagnostics: &mut Vec<ScanDiagnostic>,
    ) -> Result<Vec<FoundIndication>> {
        let mut matched = Vec::new();
        for (idx, indication) in cause.indications.iter().enumerate() {
            match self.matcher.match_indication(indication, content).await {
                Ok(result) => {
                    if let Some(excerpt) = result.excerpt {
                        matched.push(FoundIndication {
                            indication: indication.clone(),
                            excerpt,
                        });
                    }
                }
                Err(e) if e.is_indication_level() => {
                    warn!(
                        build = %content.build().id(),
                        cause = %cause.name,
                        indication = idx,
                        error = %e,
                        "Skipping indication"
                    );
                    diagnostics.push(ScanDiagnostic {
                        cause_id: cause.id_str().to_string(),
                        cause_name: cause.name.clone(),
                        indication_index: idx,
                        message: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(matched)
    }

    /// Scan, attach the result to the build, and record statistics
    pub async fn scan_and_record(&self, build: &dyn Build) -> Result<ScanOutcome> {
        self.scan_and_record_with_cancel(build, &CancellationToken::new())
            .await
    }

    pub async fn scan_and_record_with_cancel(
        &self,
        build: &dyn Build,
        cancel: &CancellationToken,
    ) -> Result<ScanOutcome> {
        let outcome = self.scan_with_cancel(build, cancel).await?;
        build.record_scan_result(outcome.found.clone());
        info!(
            build = %build.id(),
            found = outcome.found.len(),
            skipped = outcome.diagnostics.len(),
            "Recorded scan result"
        );

        let kb = self.kb.current();
        if kb.is_enable_statistics() {
            let stat = ScanStatistics {
                build_id: build.id().to_string(),
                project_name: build.project_name().to_string(),
                timestamp: chrono::Utc::now(),
                result: build.result(),
                cause_ids: outcome.cause_ids(),
            };
            if let Err(e) = kb.save_statistics(&stat).await {
                warn!(build = %build.id(), error = %e, "Failed to save scan statistics");
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryBuild;
    use crate::knowledge_base::{KnowledgeBase, LocalFileKnowledgeBase, SqliteKnowledgeBase};
    use async_trait::async_trait;
    use bfa_types::{BuildResult, Indication, IndicationKind};
    use tokio::sync::Notify;

    fn cause(id: &str, name: &str, indications: Vec<Indication>) -> FailureCause {
        let mut c = FailureCause::new(name, format!("{} description", name));
        c.id = Some(id.to_string());
        c.indications = indications;
        c
    }

    fn scanner_with(causes: Vec<FailureCause>) -> CauseScanner {
        let kb: Arc<dyn KnowledgeBase> = Arc::new(LocalFileKnowledgeBase::with_causes(causes));
        CauseScanner::new(Arc::new(SharedKnowledgeBase::new(kb)))
    }

    fn failed_build(log: &str) -> MemoryBuild {
        MemoryBuild::new("app", 1)
            .with_result(BuildResult::Failure)
            .with_log(log)
    }

    // ═══════════════════════════════════════
    // Matching
    // ═══════════════════════════════════════

    #[tokio::test]
    async fn test_error_scenario() {
        let scanner = scanner_with(vec![cause(
            "e",
            "Error",
            vec![Indication::build_log(".*ERROR.*")],
        )]);
        let build = failed_build("start\n...ERROR occurred...\nend\n");
        let outcome = scanner.scan(&build).await.unwrap();

        assert_eq!(outcome.found.len(), 1);
        assert_eq!(outcome.found[0].name, "Error");
        assert_eq!(outcome.found[0].indications.len(), 1);
        assert_eq!(outcome.found[0].indications[0].excerpt, "...ERROR occurred...");
    }

    #[tokio::test]
    async fn test_unmatched_cause_excluded() {
        let scanner = scanner_with(vec![
            cause("a", "Hit", vec![Indication::build_log(".*OOM.*")]),
            cause("b", "Miss", vec![Indication::build_log(".*segfault.*")]),
        ]);
        let outcome = scanner.scan(&failed_build("killed: OOM\n")).await.unwrap();
        let names: Vec<&str> = outcome.found.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Hit"]);
    }

    #[tokio::test]
    async fn test_all_matching_indications_recorded() {
        let scanner = scanner_with(vec![cause(
            "a",
            "Both",
            vec![
                Indication::build_log(".*first.*"),
                Indication::build_log(".*absent.*"),
                Indication::build_log(".*second.*"),
            ],
        )]);
        let outcome = scanner
            .scan(&failed_build("the first line\nthe second line\n"))
            .await
            .unwrap();
        let excerpts: Vec<&str> = outcome.found[0]
            .indications
            .iter()
            .map(|i| i.excerpt.as_str())
            .collect();
        assert_eq!(excerpts, vec!["the first line", "the second line"]);
    }

    #[tokio::test]
    async fn test_results_follow_knowledge_base_order() {
        let scanner = scanner_with(vec![
            cause("1", "zeta", vec![Indication::build_log(".*x.*")]),
            cause("2", "Alpha", vec![Indication::build_log(".*x.*")]),
            cause("3", "mid", vec![Indication::build_log(".*x.*")]),
        ]);
        let outcome = scanner.scan(&failed_build("x\n")).await.unwrap();
        let names: Vec<&str> = outcome.found.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "mid", "zeta"]);
    }

    #[tokio::test]
    async fn test_scan_is_repeatable_and_reads_log_once() {
        let scanner = scanner_with(vec![
            cause("a", "A", vec![Indication::build_log(".*ERROR.*")]),
            cause("b", "B", vec![Indication::multiline_build_log("ERROR\\s+at")]),
        ]);
        let build = failed_build("ERROR\n at main\n");
        let first = scanner.scan(&build).await.unwrap();
        assert_eq!(build.log_reads(), 1);
        let second = scanner.scan(&build).await.unwrap();
        assert_eq!(first, second);
    }

    // ═══════════════════════════════════════
    // Degraded inputs
    // ═══════════════════════════════════════

    #[tokio::test]
    async fn test_bad_indication_skipped_with_diagnostic() {
        let mut unsupported = Indication::build_log(".*");
        unsupported.kind = IndicationKind::Unsupported;
        let scanner = scanner_with(vec![
            cause(
                "a",
                "Broken",
                vec![
                    Indication::build_log("(unclosed"),
                    unsupported,
                    Indication::build_log(".*ERROR.*"),
                ],
            ),
            cause("b", "Other", vec![Indication::build_log(".*ERROR.*")]),
        ]);
        let outcome = scanner.scan(&failed_build("ERROR\n")).await.unwrap();

        assert_eq!(outcome.found.len(), 2);
        assert_eq!(outcome.diagnostics.len(), 2);
        assert_eq!(outcome.diagnostics[0].indication_index, 0);
        assert_eq!(outcome.diagnostics[1].indication_index, 1);
        assert_eq!(outcome.diagnostics[0].cause_name, "Broken");
    }

    #[tokio::test]
    async fn test_unreadable_artifact_skipped_with_diagnostic() {
        let scanner = scanner_with(vec![
            cause("a", "Report", vec![Indication::file("report.txt", ".*")]),
            cause("b", "Error", vec![Indication::build_log(".*ERROR.*")]),
        ]);
        let build = failed_build("ERROR\n").with_file_error("report.txt", "permission denied");
        let outcome = scanner.scan(&build).await.unwrap();

        assert_eq!(outcome.cause_ids(), vec!["b"]);
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].cause_name, "Report");
        assert!(outcome.diagnostics[0].message.contains("permission denied"));
    }

    #[tokio::test]
    async fn test_missing_log_gives_empty_result() {
        let scanner = scanner_with(vec![cause("a", "A", vec![Indication::build_log(".*")])]);
        let build = MemoryBuild::new("app", 1).with_result(BuildResult::Failure);
        let outcome = scanner.scan(&build).await.unwrap();
        assert!(outcome.found.is_empty());
        assert!(outcome.diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_log_read_failure_propagates() {
        let scanner = scanner_with(vec![cause("a", "A", vec![Indication::build_log(".*")])]);
        let build = MemoryBuild::new("app", 1).with_log_error("disk gone");
        assert!(scanner.scan(&build).await.is_err());
        assert!(build.scan_result().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_backend_propagates() {
        let kb: Arc<dyn KnowledgeBase> = Arc::new(SqliteKnowledgeBase::in_memory());
        let scanner = CauseScanner::new(Arc::new(SharedKnowledgeBase::new(kb)));
        let err = scanner.scan(&failed_build("x")).await.unwrap_err();
        assert!(matches!(err, BfaError::BackendUnavailable(_)));
    }

    #[tokio::test]
    async fn test_cancelled_scan() {
        let scanner = scanner_with(vec![cause("a", "A", vec![Indication::build_log(".*")])]);
        let token = CancellationToken::new();
        token.cancel();
        let err = scanner
            .scan_with_cancel(&failed_build("x"), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, BfaError::Cancelled));
    }

    // ═══════════════════════════════════════
    // Recording
    // ═══════════════════════════════════════

    #[tokio::test]
    async fn test_record_replaces_previous_result() {
        let scanner = scanner_with(vec![cause("a", "A", vec![Indication::build_log(".*x.*")])]);
        let build = failed_build("x\n");
        scanner.scan_and_record(&build).await.unwrap();
        scanner.scan_and_record(&build).await.unwrap();
        assert_eq!(build.records(), 2);
        assert_eq!(build.scan_result().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_statistics_sent_when_enabled() {
        let sqlite = Arc::new(SqliteKnowledgeBase::in_memory_with_statistics(true));
        sqlite.start().await.unwrap();
        let added = sqlite
            .add_cause(
                FailureCause::new("A", "").with_indication(Indication::build_log(".*x.*")),
            )
            .await
            .unwrap();
        let kb: Arc<dyn KnowledgeBase> = sqlite.clone();
        let scanner = CauseScanner::new(Arc::new(SharedKnowledgeBase::new(kb)));

        scanner.scan_and_record(&failed_build("x\n")).await.unwrap();

        let stats = sqlite.statistics_for_build("app#1").await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].cause_ids, vec![added.id_str().to_string()]);
        assert_eq!(stats[0].result, Some(BuildResult::Failure));
    }

    // ═══════════════════════════════════════
    // Snapshot
    // ═══════════════════════════════════════

    /// Build whose log read waits until the test releases it
    struct GatedBuild {
        inner: MemoryBuild,
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl Build for GatedBuild {
        fn id(&self) -> &str {
            self.inner.id()
        }
        fn project_name(&self) -> &str {
            self.inner.project_name()
        }
        fn project_url(&self) -> &str {
            self.inner.project_url()
        }
        fn url(&self) -> &str {
            self.inner.url()
        }
        fn display_name(&self) -> &str {
            self.inner.display_name()
        }
        fn result(&self) -> Option<BuildResult> {
            self.inner.result()
        }
        async fn read_log(&self) -> anyhow::Result<Option<String>> {
            self.entered.notify_one();
            self.release.notified().await;
            self.inner.read_log().await
        }
        async fn read_file(&self, path: &str) -> anyhow::Result<Option<String>> {
            self.inner.read_file(path).await
        }
        fn scan_result(&self) -> Option<Vec<FoundFailureCause>> {
            self.inner.scan_result()
        }
        fn record_scan_result(&self, causes: Vec<FoundFailureCause>) {
            self.inner.record_scan_result(causes)
        }
    }

    #[tokio::test]
    async fn test_cause_added_mid_scan_not_in_results() {
        let local = Arc::new(LocalFileKnowledgeBase::with_causes(vec![cause(
            "a",
            "Error",
            vec![Indication::build_log(".*ERROR.*")],
        )]));
        let kb: Arc<dyn KnowledgeBase> = local.clone();
        let scanner = Arc::new(CauseScanner::new(Arc::new(SharedKnowledgeBase::new(kb))));
        let build = Arc::new(GatedBuild {
            inner: failed_build("ERROR\n"),
            entered: Notify::new(),
            release: Notify::new(),
        });

        let scan = {
            let scanner = scanner.clone();
            let build = build.clone();
            tokio::spawn(async move { scanner.scan(build.as_ref()).await })
        };
        build.entered.notified().await;
        local
            .add_cause(FailureCause::new("Late", "").with_indication(Indication::build_log(".*ERROR.*")))
            .await
            .unwrap();
        build.release.notify_one();

        let outcome = scan.await.unwrap().unwrap();
        assert_eq!(outcome.cause_ids(), vec!["a"]);

        // The next scan sees it
        let again = scanner.scan(&failed_build("ERROR\n")).await.unwrap();
        assert_eq!(again.found.len(), 2);
    }
}
