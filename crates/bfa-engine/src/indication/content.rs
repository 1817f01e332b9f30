// crates/bfa-engine/src/indication/content.rs
// Per-scan cache of the text a build exposes to indications

use crate::error::{BfaError, Result};
use crate::host::Build;
use std::collections::HashMap;
use std::sync::Arc;

/// Lazily read build log and artifact files, each at most once per scan
pub struct BuildContent<'a> {
    build: &'a dyn Build,
    log: Option<Option<Arc<str>>>,
    /// Read failures are kept too, so a broken file is tried once
    files: HashMap<String, std::result::Result<Option<Arc<str>>, String>>,
}

impl<'a> BuildContent<'a> {
    pub fn new(build: &'a dyn Build) -> Self {
        Self {
            build,
            log: None,
            files: HashMap::new(),
        }
    }

    pub fn build(&self) -> &dyn Build {
        self.build
    }

    /// Full console output; `None` when the build has no log
    pub async fn log(&mut self) -> Result<Option<Arc<str>>> {
        if let Some(ref cached) = self.log {
            return Ok(cached.clone());
        }
        let text = self
            .build
            .read_log()
            .await
            .map_err(|e| BfaError::Other(format!("reading log of {}: {:#}", self.build.id(), e)))?
            .map(Arc::from);
        self.log = Some(text.clone());
        Ok(text)
    }

    /// Contents of an artifact file; `None` when the build has no such file.
    /// A failed read is `ArtifactUnreadable`, which only skips the indication.
    pub async fn file(&mut self, path: &str) -> Result<Option<Arc<str>>> {
        if !self.files.contains_key(path) {
            let read = self
                .build
                .read_file(path)
                .await
                .map(|text| text.map(Arc::from))
                .map_err(|e| format!("{:#}", e));
            self.files.insert(path.to_string(), read);
        }
        match self.files.get(path) {
            Some(Ok(text)) => Ok(text.clone()),
            Some(Err(reason)) => Err(BfaError::ArtifactUnreadable {
                path: format!("{} of {}", path, self.build.id()),
                reason: reason.clone(),
            }),
            None => Ok(None),
        }
    }
}
