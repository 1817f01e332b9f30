// crates/bfa-engine/src/host/memory.rs
// In-process builds and projects (CLI log files, tests)

use super::{Build, Project};
use async_trait::async_trait;
use bfa_types::{BuildResult, FoundFailureCause};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// A build whose log and files live in memory
pub struct MemoryBuild {
    id: String,
    project_name: String,
    project_url: String,
    url: String,
    display_name: String,
    result: Option<BuildResult>,
    log: Option<String>,
    log_error: Option<String>,
    read_delay: Option<Duration>,
    files: HashMap<String, String>,
    file_errors: HashMap<String, String>,
    sub_builds: Vec<Arc<dyn Build>>,
    downstream: Vec<Arc<dyn Build>>,
    scan_result: RwLock<Option<Vec<FoundFailureCause>>>,
    log_reads: AtomicUsize,
    records: AtomicUsize,
}

impl MemoryBuild {
    /// Build `number` of `project`, urls in the `job/<project>/<number>/` shape
    pub fn new(project: &str, number: u32) -> Self {
        Self {
            id: format!("{}#{}", project, number),
            project_name: project.to_string(),
            project_url: format!("job/{}/", project),
            url: format!("job/{}/{}/", project, number),
            display_name: format!("#{}", number),
            result: None,
            log: None,
            log_error: None,
            read_delay: None,
            files: HashMap::new(),
            file_errors: HashMap::new(),
            sub_builds: Vec::new(),
            downstream: Vec::new(),
            scan_result: RwLock::new(None),
            log_reads: AtomicUsize::new(0),
            records: AtomicUsize::new(0),
        }
    }

    pub fn with_result(mut self, result: BuildResult) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_log(mut self, log: impl Into<String>) -> Self {
        self.log = Some(log.into());
        self
    }

    /// Make `read_log` fail, simulating host I/O trouble
    pub fn with_log_error(mut self, message: impl Into<String>) -> Self {
        self.log_error = Some(message.into());
        self
    }

    /// Delay every log read, keeping a scan in flight for a while
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }

    /// Make `read_file(path)` fail
    pub fn with_file_error(mut self, path: impl Into<String>, message: impl Into<String>) -> Self {
        self.file_errors.insert(path.into(), message.into());
        self
    }

    pub fn with_sub_build(mut self, build: Arc<dyn Build>) -> Self {
        self.sub_builds.push(build);
        self
    }

    pub fn with_downstream(mut self, build: Arc<dyn Build>) -> Self {
        self.downstream.push(build);
        self
    }

    pub fn with_scan_result(self, causes: Vec<FoundFailureCause>) -> Self {
        if let Ok(mut slot) = self.scan_result.write() {
            *slot = Some(causes);
        }
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// How many times the log has been read
    pub fn log_reads(&self) -> usize {
        self.log_reads.load(Ordering::SeqCst)
    }

    /// How many times a scan result has been attached
    pub fn records(&self) -> usize {
        self.records.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Build for MemoryBuild {
    fn id(&self) -> &str {
        &self.id
    }

    fn project_name(&self) -> &str {
        &self.project_name
    }

    fn project_url(&self) -> &str {
        &self.project_url
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn result(&self) -> Option<BuildResult> {
        self.result
    }

    async fn read_log(&self) -> anyhow::Result<Option<String>> {
        self.log_reads.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(ref message) = self.log_error {
            anyhow::bail!("{}", message);
        }
        Ok(self.log.clone())
    }

    async fn read_file(&self, path: &str) -> anyhow::Result<Option<String>> {
        if let Some(message) = self.file_errors.get(path) {
            anyhow::bail!("{}", message);
        }
        Ok(self.files.get(path).cloned())
    }

    fn scan_result(&self) -> Option<Vec<FoundFailureCause>> {
        self.scan_result.read().ok().and_then(|slot| slot.clone())
    }

    fn record_scan_result(&self, causes: Vec<FoundFailureCause>) {
        if let Ok(mut slot) = self.scan_result.write() {
            *slot = Some(causes);
            self.records.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn sub_builds(&self) -> Vec<Arc<dyn Build>> {
        self.sub_builds.clone()
    }

    fn downstream_builds(&self) -> Vec<Arc<dyn Build>> {
        self.downstream.clone()
    }
}

/// A project holding an in-memory build list
pub struct MemoryProject {
    name: String,
    builds: RwLock<Vec<Arc<dyn Build>>>,
}

impl MemoryProject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            builds: RwLock::new(Vec::new()),
        }
    }

    /// Record a new build; it becomes the newest
    pub fn push_build(&self, build: Arc<dyn Build>) {
        if let Ok(mut builds) = self.builds.write() {
            builds.insert(0, build);
        }
    }
}

#[async_trait]
impl Project for MemoryProject {
    fn name(&self) -> &str {
        &self.name
    }

    async fn builds(&self) -> anyhow::Result<Vec<Arc<dyn Build>>> {
        self.builds
            .read()
            .map(|builds| builds.clone())
            .map_err(|_| anyhow::anyhow!("build list lock poisoned"))
    }
}
