// crates/bfa-engine/src/host/mod.rs
// Narrow view of the CI host: builds, their logs and attached scan results
//
// The engine never owns builds. Everything it needs from the host goes
// through these two traits.

pub mod memory;

use async_trait::async_trait;
use bfa_types::{BuildResult, FoundFailureCause};
use std::sync::Arc;

pub use memory::{MemoryBuild, MemoryProject};

/// A finished (or running) build as seen by the scan engine
#[async_trait]
pub trait Build: Send + Sync {
    /// Unique identity of the build across all projects
    fn id(&self) -> &str;

    fn project_name(&self) -> &str;

    fn project_url(&self) -> &str;

    /// Build URL relative to the host root, e.g. `job/app/42/`
    fn url(&self) -> &str;

    fn display_name(&self) -> &str;

    /// Outcome, or `None` if the host has no result for this build itself
    fn result(&self) -> Option<BuildResult>;

    /// Full console output, `None` if the build has no log
    async fn read_log(&self) -> anyhow::Result<Option<String>>;

    /// Contents of a file produced by the build, `None` if missing
    async fn read_file(&self, path: &str) -> anyhow::Result<Option<String>>;

    /// Scan result previously attached to this build
    fn scan_result(&self) -> Option<Vec<FoundFailureCause>>;

    /// Attach a scan result, replacing any earlier one
    fn record_scan_result(&self, causes: Vec<FoundFailureCause>);

    /// Constituent builds of an aggregate (matrix) build
    fn sub_builds(&self) -> Vec<Arc<dyn Build>> {
        Vec::new()
    }

    /// Builds triggered by this one
    fn downstream_builds(&self) -> Vec<Arc<dyn Build>> {
        Vec::new()
    }
}

/// A job/project on the host
#[async_trait]
pub trait Project: Send + Sync {
    fn name(&self) -> &str;

    /// Builds, newest first
    async fn builds(&self) -> anyhow::Result<Vec<Arc<dyn Build>>>;
}
