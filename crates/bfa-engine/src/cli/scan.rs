// crates/bfa-engine/src/cli/scan.rs
// Scan local log files through the scan-on-demand queue

use anyhow::{Context, Result};
use bfa::BfaError;
use bfa::config::BfaConfig;
use bfa::host::{Build, MemoryBuild, MemoryProject};
use bfa::service::BuildFailureAnalyzer;
use bfa_types::{BuildResult, FoundFailureCause};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub async fn run_scan(config: BfaConfig, logs: Vec<PathBuf>, project: String, json: bool) -> Result<()> {
    let analyzer = BuildFailureAnalyzer::start(config).await?;

    let memory_project = MemoryProject::new(project.clone());
    let mut builds: Vec<Arc<MemoryBuild>> = Vec::with_capacity(logs.len());
    for (idx, path) in logs.iter().enumerate() {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let build = Arc::new(
            MemoryBuild::new(&project, idx as u32 + 1)
                .with_result(BuildResult::Failure)
                .with_display_name(name)
                .with_log(text),
        );
        memory_project.push_build(build.clone());
        builds.push(build);
    }

    let report = analyzer.queue().enqueue_project(&memory_project).await?;
    info!(queued = report.queued, rejected = report.rejected, "Scanning logs");
    analyzer.queue().wait_idle().await;

    let totals = analyzer.queue().totals();
    let mut results = Vec::new();
    for build in &builds {
        let found = build.scan_result();
        if json {
            results.push(serde_json::json!({
                "build": build.display_name(),
                "scanned": found.is_some(),
                "causes": found.unwrap_or_default(),
            }));
        } else {
            print_build(build.as_ref(), found.as_deref());
            println!("{}", analyzer.build_completed_message(build.as_ref()));
            println!();
        }
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    }

    if report.rejected > 0 {
        let full = BfaError::QueueFull {
            depth: analyzer.queue().max_depth(),
        };
        eprintln!("{} log(s) not scanned. {}", report.rejected, full.to_user_string());
    }
    if totals.failed > 0 {
        eprintln!("{} scan(s) failed, see log output", totals.failed);
    }

    analyzer.shutdown().await?;
    Ok(())
}

fn print_build(build: &dyn Build, found: Option<&[FoundFailureCause]>) {
    println!("== {}", build.display_name());
    match found {
        None => println!("   not scanned"),
        Some([]) => println!("   no known failure cause"),
        Some(causes) => {
            for cause in causes {
                println!("   {} [{}]", cause.name, cause.categories.join(", "));
                for indication in &cause.indications {
                    println!("      > {}", indication.excerpt);
                }
            }
        }
    }
}
