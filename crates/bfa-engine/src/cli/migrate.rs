// crates/bfa-engine/src/cli/migrate.rs
// Move every cause into another backend

use anyhow::{Result, anyhow};
use bfa::config::BfaConfig;
use bfa::knowledge_base::{BackendKind, KnowledgeBaseConfig};
use bfa::service::BuildFailureAnalyzer;
use std::path::PathBuf;

pub fn target_config(to: &str, path: PathBuf, enable_statistics: bool) -> Result<KnowledgeBaseConfig> {
    let kind: BackendKind = to
        .parse()
        .map_err(|_| anyhow!("unknown backend '{}', expected local-file or sqlite", to))?;
    Ok(match kind {
        BackendKind::LocalFile => KnowledgeBaseConfig::LocalFile { path: Some(path) },
        BackendKind::Sqlite => KnowledgeBaseConfig::Sqlite {
            path,
            enable_statistics,
        },
    })
}

pub async fn run_migrate(
    config: BfaConfig,
    to: String,
    path: PathBuf,
    enable_statistics: bool,
) -> Result<()> {
    let target = target_config(&to, path, enable_statistics)?;
    let analyzer = BuildFailureAnalyzer::start(config).await?;

    let outcome = analyzer.reconfigure(&target).await;
    let migrated = match outcome {
        Ok(changed) => changed,
        Err(e) => {
            analyzer.shutdown().await?;
            return Err(e.into());
        }
    };

    if migrated {
        let count = analyzer.knowledge_base().get_causes().await?.len();
        println!("Migrated {} cause(s) to {}", count, to);
        println!("Update [knowledge_base] in the config file to use it:");
        println!("{}", toml::to_string_pretty(&target)?);
    } else {
        println!("Target is the configured knowledge base, nothing to do");
    }
    analyzer.shutdown().await?;
    Ok(())
}
