// crates/bfa-engine/src/knowledge_base/mod.rs
// Storage abstraction for failure causes
//
// Every backend behaves the same for the scan engine. Differences are
// limited to persistence style (whole snapshot vs. per call), statistics
// support, and the documented save policy for unknown ids.

mod local_file;
mod sqlite;

pub use local_file::LocalFileKnowledgeBase;
pub use sqlite::SqliteKnowledgeBase;

use crate::error::{BfaError, Result};
use crate::indication::compile_pattern;
use async_trait::async_trait;
use bfa_types::{FailureCause, IndicationKind, ScanStatistics};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

/// Backend type tag
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::IntoStaticStr,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BackendKind {
    #[strum(to_string = "local_file", serialize = "local-file")]
    LocalFile,
    Sqlite,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Backend kind plus configured target; equal identities share data
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KnowledgeBaseIdentity {
    pub kind: BackendKind,
    pub target: String,
}

/// Storage for failure causes
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    fn identity(&self) -> KnowledgeBaseIdentity;

    /// Same backend kind and same configured target
    fn same_as(&self, other: &dyn KnowledgeBase) -> bool {
        self.identity() == other.identity()
    }

    /// Acquire connections / load data. Idempotent.
    async fn start(&self) -> Result<()>;

    /// Release connections. Idempotent, safe on a never-started backend.
    async fn stop(&self) -> Result<()>;

    /// All causes, ordered by name (ASCII case-insensitive) then id
    async fn get_causes(&self) -> Result<Vec<FailureCause>>;

    async fn get_cause(&self, id: &str) -> Result<Option<FailureCause>>;

    /// Persist a new cause under a freshly generated id
    async fn add_cause(&self, cause: FailureCause) -> Result<FailureCause>;

    /// Add when the id is unset, otherwise replace the cause with that id
    async fn save_cause(&self, cause: FailureCause) -> Result<FailureCause>;

    async fn remove_cause(&self, id: &str) -> Result<Option<FailureCause>>;

    /// Every category in use, first-seen order, no duplicates
    async fn get_categories(&self) -> Result<Vec<String>> {
        Ok(collect_categories(&self.get_causes().await?))
    }

    /// Write all `causes` with their ids, or none of them
    async fn import_causes(&self, causes: Vec<FailureCause>) -> Result<()>;

    /// Copy every cause out of `old`, keeping ids
    async fn convert_from(&self, old: &dyn KnowledgeBase) -> Result<usize> {
        let mut causes = old.get_causes().await.map_err(|e| {
            BfaError::MigrationFailure(format!(
                "reading causes from {}: {}",
                old.identity().kind.as_str(),
                e
            ))
        })?;
        for cause in causes.iter_mut() {
            if !cause.has_id() {
                cause.id = Some(new_cause_id());
            }
        }
        let count = causes.len();
        self.import_causes(causes).await.map_err(|e| match e {
            BfaError::MigrationFailure(_) => e,
            other => BfaError::MigrationFailure(other.to_string()),
        })?;
        tracing::info!(
            from = old.identity().kind.as_str(),
            to = self.identity().kind.as_str(),
            count,
            "Converted knowledge base"
        );
        Ok(count)
    }

    fn is_enable_statistics(&self) -> bool {
        false
    }

    async fn save_statistics(&self, _stat: &ScanStatistics) -> Result<()> {
        Ok(())
    }

    /// Drop anything stored for a deleted build
    async fn remove_build_failure_cause(&self, _build_id: &str) -> Result<()> {
        Ok(())
    }
}

pub fn new_cause_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Reject causes that cannot be stored or evaluated
pub fn validate_cause(cause: &FailureCause) -> Result<()> {
    if cause.name.trim().is_empty() {
        return Err(BfaError::Validation(
            "failure cause name must not be empty".to_string(),
        ));
    }
    for (idx, indication) in cause.indications.iter().enumerate() {
        if indication.pattern.trim().is_empty() {
            return Err(BfaError::Validation(format!(
                "indication {} of '{}' has an empty pattern",
                idx + 1,
                cause.name
            )));
        }
        if indication.kind == IndicationKind::File
            && indication
                .file_path
                .as_deref()
                .is_none_or(|p| p.trim().is_empty())
        {
            return Err(BfaError::Validation(format!(
                "file indication {} of '{}' has no file path",
                idx + 1,
                cause.name
            )));
        }
        compile_pattern(indication).map_err(|e| {
            BfaError::Validation(format!("indication {} of '{}': {}", idx + 1, cause.name, e))
        })?;
    }
    Ok(())
}

/// Union of categories in cause order, each once
pub fn collect_categories(causes: &[FailureCause]) -> Vec<String> {
    let mut seen = HashSet::new();
    causes
        .iter()
        .flat_map(|cause| cause.categories.iter())
        .filter(|category| seen.insert(category.as_str()))
        .cloned()
        .collect()
}

/// Sort into knowledge-base order
pub(crate) fn sort_causes(causes: &mut [FailureCause]) {
    causes.sort_by(|a, b| {
        a.name
            .to_ascii_lowercase()
            .cmp(&b.name.to_ascii_lowercase())
            .then_with(|| a.id_str().cmp(b.id_str()))
    });
}

/// Which backend to run, chosen when configuration is loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KnowledgeBaseConfig {
    LocalFile {
        #[serde(default)]
        path: Option<PathBuf>,
    },
    Sqlite {
        path: PathBuf,
        #[serde(default)]
        enable_statistics: bool,
    },
}

impl Default for KnowledgeBaseConfig {
    fn default() -> Self {
        KnowledgeBaseConfig::LocalFile {
            path: Some(crate::config::data_dir().join("causes.json")),
        }
    }
}

impl KnowledgeBaseConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            KnowledgeBaseConfig::LocalFile { .. } => BackendKind::LocalFile,
            KnowledgeBaseConfig::Sqlite { .. } => BackendKind::Sqlite,
        }
    }

    /// Create the backend. It still needs `start()`.
    pub fn build(&self) -> Arc<dyn KnowledgeBase> {
        match self {
            KnowledgeBaseConfig::LocalFile { path } => match path {
                Some(p) => Arc::new(LocalFileKnowledgeBase::with_file(p.clone())),
                None => Arc::new(LocalFileKnowledgeBase::new()),
            },
            KnowledgeBaseConfig::Sqlite {
                path,
                enable_statistics,
            } => Arc::new(SqliteKnowledgeBase::open_file(path.clone(), *enable_statistics)),
        }
    }
}

/// Process-wide handle on the active backend
///
/// Callers take an `Arc` of the current backend; replacing it never
/// disturbs work already holding the old one.
pub struct SharedKnowledgeBase {
    active: RwLock<Arc<dyn KnowledgeBase>>,
}

impl SharedKnowledgeBase {
    pub fn new(kb: Arc<dyn KnowledgeBase>) -> Self {
        Self {
            active: RwLock::new(kb),
        }
    }

    pub fn current(&self) -> Arc<dyn KnowledgeBase> {
        self.active
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Install `kb` and hand back the previous backend
    pub fn replace(&self, kb: Arc<dyn KnowledgeBase>) -> Arc<dyn KnowledgeBase> {
        let mut active = self
            .active
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *active, kb)
    }
}
