// crates/bfa-engine/src/sod/task.rs
// Queue entries and the counters reported about them

use crate::host::Build;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

/// One build waiting for (or undergoing) a scan
#[derive(Clone)]
pub struct ScanTask {
    pub project: String,
    pub build: Arc<dyn Build>,
    pub enqueued_at: DateTime<Utc>,
}

impl ScanTask {
    pub fn new(project: impl Into<String>, build: Arc<dyn Build>) -> Self {
        Self {
            project: project.into(),
            build,
            enqueued_at: Utc::now(),
        }
    }

    pub fn build_id(&self) -> &str {
        self.build.id()
    }
}

impl fmt::Debug for ScanTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanTask")
            .field("project", &self.project)
            .field("build", &self.build.id())
            .field("enqueued_at", &self.enqueued_at)
            .finish()
    }
}

/// Lifecycle of a task. There is no retry state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// The build is already queued or running; nothing was added
    AlreadyPending,
}

/// Queued and running tasks of one project
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectProgress {
    pub queued: usize,
    pub running: usize,
}

impl ProjectProgress {
    pub fn is_idle(&self) -> bool {
        self.queued == 0 && self.running == 0
    }
}

/// Queue-wide counters since start
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueTotals {
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

/// What one discovery pass over a project did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub queued: usize,
    pub already_pending: usize,
    /// Candidates turned away because the queue was full
    pub rejected: usize,
}

impl SweepReport {
    pub fn merge(&mut self, other: SweepReport) {
        self.queued += other.queued;
        self.already_pending += other.already_pending;
        self.rejected += other.rejected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MemoryBuild;

    #[test]
    fn test_task_state_names() {
        assert_eq!(TaskState::Queued.as_str(), "queued");
        assert_eq!(TaskState::Completed.as_str(), "completed");
        assert!(TaskState::Failed.is_terminal());
        assert!(!TaskState::Running.is_terminal());
    }

    #[test]
    fn test_task_debug_shows_build_id() {
        let task = ScanTask::new("app", Arc::new(MemoryBuild::new("app", 3)));
        assert_eq!(task.build_id(), "app#3");
        assert!(format!("{:?}", task).contains("app#3"));
    }

    #[test]
    fn test_sweep_report_merge() {
        let mut report = SweepReport {
            queued: 1,
            already_pending: 2,
            rejected: 0,
        };
        report.merge(SweepReport {
            queued: 3,
            already_pending: 0,
            rejected: 4,
        });
        assert_eq!(
            report,
            SweepReport {
                queued: 4,
                already_pending: 2,
                rejected: 4
            }
        );
    }
}
