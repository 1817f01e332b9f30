// crates/bfa-engine/src/sod/mod.rs
// Scan-on-demand: bounded queue of unscanned builds plus a fixed worker pool
//
// All queue state (pending tasks, the set of queued-or-running builds and
// the per-project counters) lives under one mutex. Enqueue never awaits;
// a full queue is reported back to the caller. Workers idle on a Notify
// and stop through a watch channel.

mod candidates;
mod task;

pub use candidates::{CandidatePolicy, non_scanned_builds};
pub use task::{EnqueueOutcome, ProjectProgress, QueueTotals, ScanTask, SweepReport, TaskState};

use crate::config::ScanOnDemandConfig;
use crate::error::{BfaError, Result};
use crate::host::{Build, Project};
use crate::scanner::CauseScanner;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct QueueState {
    pending: VecDeque<ScanTask>,
    /// Builds queued or running
    in_flight: HashSet<String>,
    progress: HashMap<String, ProjectProgress>,
    completed: usize,
    failed: usize,
    /// Set by shutdown; nothing is queued afterwards
    closed: bool,
}

impl QueueState {
    fn running(&self) -> usize {
        self.progress.values().map(|p| p.running).sum()
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }

    fn counter(&mut self, project: &str) -> &mut ProjectProgress {
        self.progress.entry(project.to_string()).or_default()
    }

    fn prune(&mut self, project: &str) {
        if self.progress.get(project).is_some_and(|p| p.is_idle()) {
            self.progress.remove(project);
        }
    }
}

struct Shared {
    state: Mutex<QueueState>,
    /// Wakes an idle worker when a task is queued
    work: Notify,
    /// Wakes `wait_idle` callers when the queue drains
    idle: Notify,
    scanner: Arc<CauseScanner>,
    policy: CandidatePolicy,
    max_depth: usize,
    projects: Mutex<Vec<Arc<dyn Project>>>,
    /// Cancelled on shutdown; running scans stop between causes
    cancel: CancellationToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pop the next task and reserve the candidate sub-builds it will scan
    /// inline. Sub-builds already queued or running elsewhere are left out.
    fn take_next(&self) -> Option<(ScanTask, Vec<Arc<dyn Build>>)> {
        let mut state = self.lock();
        let task = state.pending.pop_front()?;
        let counter = state.counter(&task.project);
        counter.queued = counter.queued.saturating_sub(1);
        counter.running += 1;
        let sub_builds: Vec<Arc<dyn Build>> = self
            .policy
            .candidate_sub_builds(task.build.as_ref())
            .into_iter()
            .filter(|sub| state.in_flight.insert(sub.id().to_string()))
            .collect();
        Some((task, sub_builds))
    }

    fn finish(&self, task: &ScanTask, reserved: &[String], outcome: TaskState) {
        let idle = {
            let mut state = self.lock();
            state.in_flight.remove(task.build_id());
            for id in reserved {
                state.in_flight.remove(id);
            }
            let counter = state.counter(&task.project);
            counter.running = counter.running.saturating_sub(1);
            state.prune(&task.project);
            match outcome {
                TaskState::Failed => state.failed += 1,
                _ => state.completed += 1,
            }
            state.is_idle()
        };
        if idle {
            self.idle.notify_waiters();
        }
    }
}

/// Process-wide scan-on-demand queue
pub struct ScanOnDemandQueue {
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ScanOnDemandQueue {
    /// Start `config.threads` workers and, if configured, the periodic sweep.
    /// Must be called inside a tokio runtime.
    pub fn start(
        scanner: Arc<CauseScanner>,
        config: &ScanOnDemandConfig,
        policy: CandidatePolicy,
    ) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            work: Notify::new(),
            idle: Notify::new(),
            scanner,
            policy,
            max_depth: config.max_queue_depth.max(1),
            projects: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        });

        let threads = config.threads.max(1);
        let mut handles = Vec::with_capacity(threads + 1);
        for id in 0..threads {
            let worker = ScanWorker {
                id,
                shared: shared.clone(),
                shutdown: shutdown_rx.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        if let Some(every) = config.sweep_interval() {
            handles.push(tokio::spawn(run_sweeper(
                shared.clone(),
                every,
                shutdown_rx.clone(),
            )));
        }

        info!(
            threads,
            max_depth = shared.max_depth,
            sweep = ?config.sweep_interval(),
            "Scan-on-demand queue started"
        );

        Arc::new(Self {
            shared,
            shutdown_tx,
            handles: Mutex::new(handles),
        })
    }

    pub fn policy(&self) -> CandidatePolicy {
        self.shared.policy
    }

    pub fn max_depth(&self) -> usize {
        self.shared.max_depth
    }

    /// Queue a scan of `build`. A build already queued or running is not added again.
    pub fn enqueue(&self, project: &str, build: Arc<dyn Build>) -> Result<EnqueueOutcome> {
        enqueue_task(&self.shared, ScanTask::new(project, build))
    }

    /// Queue every candidate build of `project`
    pub async fn enqueue_project(&self, project: &dyn Project) -> Result<SweepReport> {
        sweep_project(&self.shared, project).await
    }

    /// Remember `project` for the periodic sweep
    pub fn register_project(&self, project: Arc<dyn Project>) {
        let mut projects = self
            .shared
            .projects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !projects.iter().any(|p| p.name() == project.name()) {
            debug!(project = %project.name(), "Registered project for sweeps");
            projects.push(project);
        }
    }

    /// Forget `project` and drop its queued tasks
    pub fn unregister_project(&self, name: &str) -> usize {
        self.shared
            .projects
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|p| p.name() != name);
        self.cancel_project(name)
    }

    /// One sweep over every registered project
    pub async fn sweep_registered(&self) -> SweepReport {
        sweep_all(&self.shared).await
    }

    /// Drop queued tasks of `project`. Running tasks finish normally.
    pub fn cancel_project(&self, project: &str) -> usize {
        let (cancelled, idle) = {
            let mut state = self.shared.lock();
            let before = state.pending.len();
            let mut dropped = Vec::new();
            state.pending.retain(|task| {
                if task.project == project {
                    dropped.push(task.build_id().to_string());
                    false
                } else {
                    true
                }
            });
            for id in &dropped {
                state.in_flight.remove(id);
            }
            let cancelled = before - state.pending.len();
            let counter = state.counter(project);
            counter.queued = counter.queued.saturating_sub(cancelled);
            state.prune(project);
            (cancelled, state.is_idle())
        };
        if cancelled > 0 {
            info!(project, cancelled, "Cancelled queued scans");
        }
        if idle {
            self.shared.idle.notify_waiters();
        }
        cancelled
    }

    pub fn progress(&self, project: &str) -> ProjectProgress {
        self.shared
            .lock()
            .progress
            .get(project)
            .copied()
            .unwrap_or_default()
    }

    pub fn totals(&self) -> QueueTotals {
        let state = self.shared.lock();
        QueueTotals {
            queued: state.pending.len(),
            running: state.running(),
            completed: state.completed,
            failed: state.failed,
        }
    }

    /// Pending tasks
    pub fn len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves once nothing is queued or running
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.lock().is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Stop workers and the sweeper; queued tasks are dropped
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }
        self.shared.cancel.cancel();

        let dropped = {
            let mut state = self.shared.lock();
            state.closed = true;
            let dropped = state.pending.len();
            for task in std::mem::take(&mut state.pending) {
                state.in_flight.remove(task.build_id());
                let counter = state.counter(&task.project);
                counter.queued = counter.queued.saturating_sub(1);
                state.prune(&task.project);
            }
            dropped
        };

        let handles = std::mem::take(
            &mut *self
                .handles
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Scan-on-demand task ended abnormally");
            }
        }
        self.shared.idle.notify_waiters();
        info!(dropped, "Scan-on-demand queue stopped");
    }
}

impl Drop for ScanOnDemandQueue {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        self.shared.cancel.cancel();
    }
}

fn enqueue_task(shared: &Shared, task: ScanTask) -> Result<EnqueueOutcome> {
    {
        let mut state = shared.lock();
        if state.closed {
            return Err(BfaError::Other("scan queue has been shut down".to_string()));
        }
        if state.in_flight.contains(task.build_id()) {
            debug!(build = %task.build_id(), "Scan already pending");
            return Ok(EnqueueOutcome::AlreadyPending);
        }
        if state.pending.len() >= shared.max_depth {
            return Err(BfaError::QueueFull {
                depth: state.pending.len(),
            });
        }
        state.in_flight.insert(task.build_id().to_string());
        state.counter(&task.project).queued += 1;
        debug!(project = %task.project, build = %task.build_id(), "Queued scan");
        state.pending.push_back(task);
    }
    shared.work.notify_one();
    Ok(EnqueueOutcome::Queued)
}

async fn sweep_project(shared: &Shared, project: &dyn Project) -> Result<SweepReport> {
    let candidates = non_scanned_builds(project, &shared.policy).await?;
    let mut report = SweepReport::default();
    let total = candidates.len();

    for (idx, build) in candidates.into_iter().enumerate() {
        match enqueue_task(shared, ScanTask::new(project.name(), build)) {
            Ok(EnqueueOutcome::Queued) => report.queued += 1,
            Ok(EnqueueOutcome::AlreadyPending) => report.already_pending += 1,
            Err(BfaError::QueueFull { depth }) => {
                report.rejected += total - idx;
                warn!(
                    project = %project.name(),
                    depth,
                    rejected = report.rejected,
                    "Scan queue full, remaining candidates left for a later sweep"
                );
                break;
            }
            Err(e) => return Err(e),
        }
    }

    if report.queued > 0 {
        info!(project = %project.name(), queued = report.queued, "Queued unscanned builds");
    }
    Ok(report)
}

async fn sweep_all(shared: &Shared) -> SweepReport {
    let projects: Vec<Arc<dyn Project>> = shared
        .projects
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone();

    let mut report = SweepReport::default();
    for project in projects {
        match sweep_project(shared, project.as_ref()).await {
            Ok(r) => report.merge(r),
            Err(e) => warn!(project = %project.name(), error = %e, "Sweep failed"),
        }
    }
    report
}

async fn run_sweeper(shared: Arc<Shared>, every: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let report = sweep_all(&shared).await;
                debug!(?report, "Periodic sweep done");
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    debug!("Sweeper stopped");
}

/// One member of the fixed pool
struct ScanWorker {
    id: usize,
    shared: Arc<Shared>,
    shutdown: watch::Receiver<bool>,
}

impl ScanWorker {
    async fn run(mut self) {
        debug!(worker = self.id, "Scan worker started");
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            if let Some((task, sub_builds)) = self.shared.take_next() {
                self.execute(task, sub_builds).await;
                continue;
            }

            tokio::select! {
                _ = self.shared.work.notified() => {}
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!(worker = self.id, "Scan worker stopped");
    }

    /// Run one task in its own spawned task so a panic cannot take the worker down
    async fn execute(&self, task: ScanTask, sub_builds: Vec<Arc<dyn Build>>) {
        debug!(worker = self.id, build = %task.build_id(), state = TaskState::Running.as_str(), "Scan started");

        let reserved: Vec<String> = sub_builds.iter().map(|sub| sub.id().to_string()).collect();
        let scanner = self.shared.scanner.clone();
        let cancel = self.shared.cancel.child_token();
        let build = task.build.clone();
        let joined =
            tokio::spawn(async move { scan_build(&scanner, build, sub_builds, &cancel).await })
                .await;

        let state = match joined {
            Ok(Ok(found)) => {
                debug!(build = %task.build_id(), found, "Scan completed");
                TaskState::Completed
            }
            Ok(Err(e)) => {
                warn!(build = %task.build_id(), error = %e, "Scan failed");
                TaskState::Failed
            }
            Err(e) => {
                let err = BfaError::from(e);
                error!(build = %task.build_id(), error = %err, "Scan task ended abnormally");
                TaskState::Failed
            }
        };
        self.shared.finish(&task, &reserved, state);
    }
}

/// Scan the reserved sub-builds of an aggregate, then the build itself.
/// Returns the number of causes found on `build`.
async fn scan_build(
    scanner: &CauseScanner,
    build: Arc<dyn Build>,
    sub_builds: Vec<Arc<dyn Build>>,
    cancel: &CancellationToken,
) -> Result<usize> {
    for sub in sub_builds {
        scanner
            .scan_and_record_with_cancel(sub.as_ref(), cancel)
            .await?;
    }
    let outcome = scanner
        .scan_and_record_with_cancel(build.as_ref(), cancel)
        .await?;
    Ok(outcome.found.len())
}
