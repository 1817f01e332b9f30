// crates/bfa-engine/src/sod/candidates.rs
// Which historical builds still need a scan
//
// A build's own result decides whether it failed. An aggregate build with
// no result of its own failed if any of its sub-builds did. A build counts
// as scanned once it carries its own attached result.

use crate::error::Result;
use crate::host::{Build, Project};
use bfa_types::BuildResult;
use std::sync::Arc;

/// Host-outcome classification used for candidacy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CandidatePolicy {
    /// Aborted builds count as failures
    pub analyze_aborted: bool,
}

impl CandidatePolicy {
    pub fn new(analyze_aborted: bool) -> Self {
        Self { analyze_aborted }
    }

    pub fn is_failure_class(&self, result: BuildResult) -> bool {
        match result {
            BuildResult::Failure | BuildResult::Unstable => true,
            BuildResult::Aborted => self.analyze_aborted,
            BuildResult::Success | BuildResult::NotBuilt => false,
        }
    }

    pub fn has_failed(&self, build: &dyn Build) -> bool {
        match build.result() {
            Some(result) => self.is_failure_class(result),
            None => build
                .sub_builds()
                .iter()
                .any(|sub| self.has_failed(sub.as_ref())),
        }
    }

    /// Failed and not scanned yet
    pub fn is_candidate(&self, build: &dyn Build) -> bool {
        build.scan_result().is_none() && self.has_failed(build)
    }

    /// Sub-builds of an aggregate that are candidates themselves
    pub fn candidate_sub_builds(&self, build: &dyn Build) -> Vec<Arc<dyn Build>> {
        build
            .sub_builds()
            .into_iter()
            .filter(|sub| self.is_candidate(sub.as_ref()))
            .collect()
    }
}

/// Candidate builds of `project`, newest first
pub async fn non_scanned_builds(
    project: &dyn Project,
    policy: &CandidatePolicy,
) -> Result<Vec<Arc<dyn Build>>> {
    let builds = project.builds().await?;
    Ok(builds
        .into_iter()
        .filter(|build| policy.is_candidate(build.as_ref()))
        .collect())
}
