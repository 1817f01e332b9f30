// crates/bfa-engine/src/knowledge_base/local_file.rs
// In-memory knowledge base, optionally snapshotted to a JSON file
//
// Every mutation rewrites the whole snapshot. A failed write rolls the
// in-memory change back so memory and disk never disagree.
//
// save_cause policy: an unknown id is upserted under that id.

use super::{
    BackendKind, KnowledgeBase, KnowledgeBaseIdentity, new_cause_id, sort_causes, validate_cause,
};
use crate::error::{BfaError, Result};
use async_trait::async_trait;
use bfa_types::FailureCause;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotOut<'a> {
    version: u32,
    causes: Vec<&'a FailureCause>,
}

/// Accepts the current versioned file and a bare array of causes
#[derive(Deserialize)]
#[serde(untagged)]
enum SnapshotIn {
    Versioned {
        #[allow(dead_code)]
        version: u32,
        causes: Vec<FailureCause>,
    },
    Legacy(Vec<FailureCause>),
}

impl SnapshotIn {
    fn into_causes(self) -> Vec<FailureCause> {
        match self {
            SnapshotIn::Versioned { causes, .. } => causes,
            SnapshotIn::Legacy(causes) => causes,
        }
    }
}

pub struct LocalFileKnowledgeBase {
    path: Option<PathBuf>,
    /// Identity target for memory-only instances
    memory_label: String,
    causes: RwLock<HashMap<String, FailureCause>>,
    loaded: AtomicBool,
    /// Serializes mutate-then-flush sequences
    persist_lock: tokio::sync::Mutex<()>,
}

impl Default for LocalFileKnowledgeBase {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFileKnowledgeBase {
    /// Memory-only knowledge base, usable without `start()`
    pub fn new() -> Self {
        Self {
            path: None,
            memory_label: format!("memory:{}", uuid::Uuid::new_v4().simple()),
            causes: RwLock::new(HashMap::new()),
            loaded: AtomicBool::new(true),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Memory-only knowledge base seeded with `initial`.
    /// Causes without an id get one.
    pub fn with_causes(initial: Vec<FailureCause>) -> Self {
        let kb = Self::new();
        kb.write_map(|map| {
            for mut cause in initial {
                if !cause.has_id() {
                    cause.id = Some(new_cause_id());
                }
                map.insert(cause.id_str().to_string(), cause);
            }
        });
        kb
    }

    /// Knowledge base persisted to `path`; loaded on `start()`
    pub fn with_file(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            memory_label: String::new(),
            causes: RwLock::new(HashMap::new()),
            loaded: AtomicBool::new(false),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn read_map<R>(&self, f: impl FnOnce(&HashMap<String, FailureCause>) -> R) -> R {
        let map = self
            .causes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&map)
    }

    fn write_map<R>(&self, f: impl FnOnce(&mut HashMap<String, FailureCause>) -> R) -> R {
        let mut map = self
            .causes
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut map)
    }

    fn ensure_loaded(&self) -> Result<()> {
        if self.loaded.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BfaError::BackendUnavailable(format!(
                "local knowledge base {} not started",
                self.identity().target
            )))
        }
    }

    async fn load_snapshot(path: &Path) -> Result<Vec<FailureCause>> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => {
                let snapshot: SnapshotIn = serde_json::from_str(&text).map_err(|e| {
                    BfaError::BackendUnavailable(format!(
                        "corrupt snapshot {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Ok(snapshot.into_causes())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cause snapshot yet, starting empty");
                Ok(Vec::new())
            }
            Err(e) => Err(BfaError::BackendUnavailable(format!(
                "reading {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Write the current map to disk. Caller holds `persist_lock`.
    async fn flush(&self) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };

        let json = self.read_map(|map| {
            let mut causes: Vec<&FailureCause> = map.values().collect();
            causes.sort_by(|a, b| a.id_str().cmp(b.id_str()));
            serde_json::to_string_pretty(&SnapshotOut {
                version: SNAPSHOT_VERSION,
                causes,
            })
        })?;

        write_atomically(path, json.as_bytes())
            .await
            .map_err(|e| BfaError::BackendUnavailable(format!("writing {}: {}", path.display(), e)))
    }

    /// Apply `mutate`, flush, and undo via `undo` if the flush fails
    async fn mutate<R>(
        &self,
        mutate: impl FnOnce(&mut HashMap<String, FailureCause>) -> R,
        undo: impl FnOnce(&mut HashMap<String, FailureCause>, &R),
    ) -> Result<R> {
        let _guard = self.persist_lock.lock().await;
        let outcome = self.write_map(mutate);
        if let Err(e) = self.flush().await {
            self.write_map(|map| undo(map, &outcome));
            return Err(e);
        }
        Ok(outcome)
    }

    async fn put(&self, cause: FailureCause) -> Result<FailureCause> {
        let id = cause.id_str().to_string();
        let stored = cause.clone();
        let undo_id = id.clone();
        self.mutate(
            move |map| map.insert(id, cause),
            move |map, previous| match previous {
                Some(old) => {
                    map.insert(undo_id, old.clone());
                }
                None => {
                    map.remove(&undo_id);
                }
            },
        )
        .await?;
        Ok(stored)
    }
}

/// Write to a sibling temp file, then rename over the target
async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}

#[async_trait]
impl KnowledgeBase for LocalFileKnowledgeBase {
    fn identity(&self) -> KnowledgeBaseIdentity {
        KnowledgeBaseIdentity {
            kind: BackendKind::LocalFile,
            target: self
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| self.memory_label.clone()),
        }
    }

    async fn start(&self) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;
        if self.loaded.load(Ordering::SeqCst) {
            return Ok(());
        }

        let causes = Self::load_snapshot(path).await?;
        let count = causes.len();
        self.write_map(|map| {
            map.clear();
            for mut cause in causes {
                if !cause.has_id() {
                    cause.id = Some(new_cause_id());
                }
                map.insert(cause.id_str().to_string(), cause);
            }
        });
        self.loaded.store(true, Ordering::SeqCst);
        info!(path = %path.display(), count, "Loaded failure causes");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if self.path.is_some() {
            self.loaded.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn get_causes(&self) -> Result<Vec<FailureCause>> {
        self.ensure_loaded()?;
        let mut causes = self.read_map(|map| map.values().cloned().collect::<Vec<_>>());
        sort_causes(&mut causes);
        Ok(causes)
    }

    async fn get_cause(&self, id: &str) -> Result<Option<FailureCause>> {
        self.ensure_loaded()?;
        Ok(self.read_map(|map| map.get(id).cloned()))
    }

    async fn add_cause(&self, mut cause: FailureCause) -> Result<FailureCause> {
        self.ensure_loaded()?;
        validate_cause(&cause)?;
        cause.id = Some(new_cause_id());
        self.put(cause).await
    }

    async fn save_cause(&self, cause: FailureCause) -> Result<FailureCause> {
        if !cause.has_id() {
            return self.add_cause(cause).await;
        }
        self.ensure_loaded()?;
        validate_cause(&cause)?;
        self.put(cause).await
    }

    async fn remove_cause(&self, id: &str) -> Result<Option<FailureCause>> {
        self.ensure_loaded()?;
        if self.read_map(|map| !map.contains_key(id)) {
            return Ok(None);
        }
        let key = id.to_string();
        let undo_key = key.clone();
        self.mutate(
            move |map| map.remove(&key),
            move |map, removed| {
                if let Some(cause) = removed {
                    map.insert(undo_key, cause.clone());
                }
            },
        )
        .await
    }

    async fn import_causes(&self, causes: Vec<FailureCause>) -> Result<()> {
        self.ensure_loaded()?;
        if let Some(missing) = causes.iter().find(|c| !c.has_id()) {
            return Err(BfaError::MigrationFailure(format!(
                "cause '{}' has no id",
                missing.name
            )));
        }
        self.mutate(
            move |map| {
                let before = map.clone();
                for cause in causes {
                    map.insert(cause.id_str().to_string(), cause);
                }
                before
            },
            |map, before| *map = before.clone(),
        )
        .await
        .map_err(|e| BfaError::MigrationFailure(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bfa_types::Indication;

    fn error_cause() -> FailureCause {
        FailureCause::new("Error", "This is an error")
            .with_comment("comment")
            .with_category("category")
            .with_indication(Indication::build_log(".*ERROR.*"))
    }

    // ═══════════════════════════════════════
    // CRUD
    // ═══════════════════════════════════════

    #[tokio::test]
    async fn test_add_assigns_fresh_id() {
        let kb = LocalFileKnowledgeBase::new();
        let mut input = error_cause();
        input.id = Some("caller-chosen".to_string());
        let added = kb.add_cause(input).await.unwrap();
        assert!(added.has_id());
        assert_ne!(added.id_str(), "caller-chosen");
        assert_eq!(kb.get_cause(added.id_str()).await.unwrap(), Some(added));
    }

    #[tokio::test]
    async fn test_add_rejects_empty_name() {
        let kb = LocalFileKnowledgeBase::new();
        let err = kb.add_cause(FailureCause::new("", "d")).await.unwrap_err();
        assert!(matches!(err, BfaError::Validation(_)));
        assert!(kb.get_causes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_without_id_adds() {
        let kb = LocalFileKnowledgeBase::new();
        let saved = kb.save_cause(error_cause()).await.unwrap();
        assert!(saved.has_id());
        assert_eq!(kb.get_causes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_replaces_in_place() {
        let kb = LocalFileKnowledgeBase::new();
        let mut cause = kb.add_cause(error_cause()).await.unwrap();
        let id = cause.id.clone();
        cause.description = "edited".to_string();
        let saved = kb.save_cause(cause).await.unwrap();
        assert_eq!(saved.id, id);
        let all = kb.get_causes().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].description, "edited");
    }

    #[tokio::test]
    async fn test_save_unknown_id_upserts() {
        let kb = LocalFileKnowledgeBase::new();
        let mut cause = error_cause();
        cause.id = Some("from-elsewhere".to_string());
        kb.save_cause(cause).await.unwrap();
        assert!(kb.get_cause("from-elsewhere").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_remove_round_trip() {
        let kb = LocalFileKnowledgeBase::new();
        let original = error_cause();
        let added = kb.add_cause(original.clone()).await.unwrap();
        let mut removed = kb.remove_cause(added.id_str()).await.unwrap().unwrap();
        assert!(removed.has_id());
        removed.id = None;
        assert_eq!(removed, original);
        assert!(kb.remove_cause(added.id_str()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_with_causes_assigns_missing_ids() {
        let mut keep = error_cause();
        keep.id = Some("fixed".to_string());
        let kb = LocalFileKnowledgeBase::with_causes(vec![keep, FailureCause::new("Other", "")]);
        let causes = kb.get_causes().await.unwrap();
        assert_eq!(causes.len(), 2);
        assert!(causes.iter().all(|c| c.has_id()));
        assert!(kb.get_cause("fixed").await.unwrap().is_some());
    }

    #[test]
    fn test_memory_instances_are_distinct() {
        let a = LocalFileKnowledgeBase::new();
        let b = LocalFileKnowledgeBase::new();
        assert!(!a.same_as(&b));
        assert!(a.same_as(&a));
    }

    #[tokio::test]
    async fn test_statistics_are_noops() {
        let kb = LocalFileKnowledgeBase::new();
        assert!(!kb.is_enable_statistics());
        let stat = bfa_types::ScanStatistics {
            build_id: "b".to_string(),
            project_name: "p".to_string(),
            timestamp: chrono::Utc::now(),
            result: None,
            cause_ids: vec![],
        };
        kb.save_statistics(&stat).await.unwrap();
        kb.remove_build_failure_cause("b").await.unwrap();
    }

    // ═══════════════════════════════════════
    // Snapshot file
    // ═══════════════════════════════════════

    #[tokio::test]
    async fn test_file_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("causes.json");

        let kb = LocalFileKnowledgeBase::with_file(path.clone());
        kb.start().await.unwrap();
        let added = kb.add_cause(error_cause()).await.unwrap();
        kb.stop().await.unwrap();

        let reopened = LocalFileKnowledgeBase::with_file(path);
        reopened.start().await.unwrap();
        assert_eq!(reopened.get_cause(added.id_str()).await.unwrap(), Some(added));
    }

    #[tokio::test]
    async fn test_file_backend_requires_start() {
        let dir = tempfile::tempdir().unwrap();
        let kb = LocalFileKnowledgeBase::with_file(dir.path().join("causes.json"));
        let err = kb.add_cause(error_cause()).await.unwrap_err();
        assert!(matches!(err, BfaError::BackendUnavailable(_)));
        // stop on a never-started backend is fine
        kb.stop().await.unwrap();
        kb.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let kb = LocalFileKnowledgeBase::with_file(dir.path().join("causes.json"));
        kb.start().await.unwrap();
        kb.add_cause(error_cause()).await.unwrap();
        kb.start().await.unwrap();
        assert_eq!(kb.get_causes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_legacy_array_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("causes.json");
        std::fs::write(
            &path,
            r#"[{"name":"Legacy","indications":[{"kind":"build_log","pattern":".*x.*"}]}]"#,
        )
        .unwrap();

        let kb = LocalFileKnowledgeBase::with_file(path);
        kb.start().await.unwrap();
        let causes = kb.get_causes().await.unwrap();
        assert_eq!(causes.len(), 1);
        assert!(causes[0].has_id());
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_fails_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("causes.json");
        std::fs::write(&path, "{ not json").unwrap();
        let kb = LocalFileKnowledgeBase::with_file(path);
        assert!(matches!(
            kb.start().await,
            Err(BfaError::BackendUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_flush_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        // The target is a directory, so the rename over it fails
        let path = dir.path().join("blocked");
        std::fs::create_dir_all(path.join("inner")).unwrap();

        let kb = LocalFileKnowledgeBase::with_file(path);
        kb.loaded.store(true, Ordering::SeqCst);
        let err = kb.add_cause(error_cause()).await.unwrap_err();
        assert!(matches!(err, BfaError::BackendUnavailable(_)));
        assert!(kb.get_causes().await.unwrap().is_empty());
    }

    // ═══════════════════════════════════════
    // Import
    // ═══════════════════════════════════════

    #[tokio::test]
    async fn test_import_preserves_ids() {
        let kb = LocalFileKnowledgeBase::new();
        let mut cause = error_cause();
        cause.id = Some("kept".to_string());
        kb.import_causes(vec![cause]).await.unwrap();
        assert!(kb.get_cause("kept").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_import_rejects_missing_id() {
        let kb = LocalFileKnowledgeBase::new();
        let err = kb.import_causes(vec![error_cause()]).await.unwrap_err();
        assert!(matches!(err, BfaError::MigrationFailure(_)));
        assert!(kb.get_causes().await.unwrap().is_empty());
    }
}
