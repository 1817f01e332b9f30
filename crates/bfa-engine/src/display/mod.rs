// crates/bfa-engine/src/display/mod.rs
// Read-only tree of found causes for a build and its downstream builds

mod message;

pub use message::{DEFAULT_NO_CAUSES_TEXT, MessageFormatter, build_completed_message, join_url};

use crate::host::Build;
use bfa_types::{FailureCauseDisplayData, Links};
use std::collections::HashSet;

pub fn links_for(build: &dyn Build) -> Links {
    Links {
        project_url: build.project_url().to_string(),
        project_name: build.project_name().to_string(),
        build_url: build.url().to_string(),
        build_name: build.display_name().to_string(),
    }
}

/// Tree of already-recorded results; never triggers a scan.
/// A build reachable twice (or through a cycle) appears once.
pub fn build_display_data(build: &dyn Build) -> FailureCauseDisplayData {
    let mut visited = HashSet::new();
    visited.insert(build.id().to_string());
    display_node(build, &mut visited)
}

fn display_node(build: &dyn Build, visited: &mut HashSet<String>) -> FailureCauseDisplayData {
    let mut node = FailureCauseDisplayData::new(links_for(build));
    node.found_failure_causes = build.scan_result();
    for downstream in build.downstream_builds() {
        if visited.insert(downstream.id().to_string()) {
            node.downstream
                .push(display_node(downstream.as_ref(), visited));
        }
    }
    node
}
