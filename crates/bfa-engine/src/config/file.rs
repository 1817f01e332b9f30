// crates/bfa-engine/src/config/file.rs
// File-based configuration from ~/.bfa/config.toml

use super::env::ConfigValidation;
use super::{data_dir, expand_home};
use crate::knowledge_base::KnowledgeBaseConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Top-level config structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BfaConfig {
    #[serde(default)]
    pub knowledge_base: KnowledgeBaseConfig,
    #[serde(default)]
    pub scan_on_demand: ScanOnDemandConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// Scan-on-demand section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanOnDemandConfig {
    /// Worker tasks scanning concurrently
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Pending tasks accepted before enqueue is rejected
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
    /// Seconds between sweeps of registered projects, 0 disables
    #[serde(default)]
    pub sweep_interval_secs: u64,
}

fn default_threads() -> usize {
    3
}

fn default_max_queue_depth() -> usize {
    1000
}

impl Default for ScanOnDemandConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            max_queue_depth: default_max_queue_depth(),
            sweep_interval_secs: 0,
        }
    }
}

impl ScanOnDemandConfig {
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

/// Analysis section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AnalysisConfig {
    /// Treat aborted builds as failures
    #[serde(default)]
    pub analyze_aborted: bool,
    /// Host root prepended to build urls in messages
    #[serde(default)]
    pub base_url: String,
}

impl BfaConfig {
    /// Load config from ~/.bfa/config.toml
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`, falling back to defaults when it is missing or unreadable
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    debug!(path = %path.display(), "Loaded config from file");
                    config
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to parse config file");
                    Self::default()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Self::default()
            }
        }
    }

    /// Parse TOML text, expanding `~/` in knowledge base paths
    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        let mut config: BfaConfig = toml::from_str(contents)?;
        config.knowledge_base = match config.knowledge_base {
            KnowledgeBaseConfig::LocalFile { path } => KnowledgeBaseConfig::LocalFile {
                path: path.map(|p| expand_home(&p)),
            },
            KnowledgeBaseConfig::Sqlite {
                path,
                enable_statistics,
            } => KnowledgeBaseConfig::Sqlite {
                path: expand_home(&path),
                enable_statistics,
            },
        };
        Ok(config)
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        data_dir().join("config.toml")
    }

    /// Check values the engine cannot run with
    pub fn validate(&self) -> ConfigValidation {
        let mut validation = ConfigValidation::new();

        if self.scan_on_demand.threads == 0 {
            validation.add_error("scan_on_demand.threads must be at least 1");
        }
        if self.scan_on_demand.max_queue_depth == 0 {
            validation.add_error("scan_on_demand.max_queue_depth must be at least 1");
        }
        if self.scan_on_demand.threads > 64 {
            validation.add_warning(format!(
                "scan_on_demand.threads = {} is unusually high",
                self.scan_on_demand.threads
            ));
        }
        if let KnowledgeBaseConfig::LocalFile { path: None } = self.knowledge_base {
            validation.add_warning("knowledge_base has no path; causes are kept in memory only");
        }
        if !self.analysis.base_url.is_empty() && !self.analysis.base_url.ends_with('/') {
            validation.add_warning("analysis.base_url should end with '/'");
        }

        validation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge_base::BackendKind;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[knowledge_base]
type = "sqlite"
path = "/var/lib/bfa/kb.db"
enable_statistics = true

[scan_on_demand]
threads = 5
max_queue_depth = 20
sweep_interval_secs = 60

[analysis]
analyze_aborted = true
base_url = "https://ci.example.com/"
"#;
        let config = BfaConfig::parse(toml).unwrap();
        assert_eq!(config.knowledge_base.kind(), BackendKind::Sqlite);
        assert_eq!(config.scan_on_demand.threads, 5);
        assert_eq!(config.scan_on_demand.max_queue_depth, 20);
        assert_eq!(
            config.scan_on_demand.sweep_interval(),
            Some(Duration::from_secs(60))
        );
        assert!(config.analysis.analyze_aborted);
        assert_eq!(config.analysis.base_url, "https://ci.example.com/");
        assert!(config.validate().is_valid());
    }

    #[test]
    fn test_parse_empty_config() {
        let config = BfaConfig::parse("").unwrap();
        assert_eq!(config.knowledge_base.kind(), BackendKind::LocalFile);
        assert_eq!(config.scan_on_demand, ScanOnDemandConfig::default());
        assert_eq!(config.scan_on_demand.sweep_interval(), None);
        assert!(!config.analysis.analyze_aborted);
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config = BfaConfig::parse("[scan_on_demand]\nthreads = 1\n").unwrap();
        assert_eq!(config.scan_on_demand.threads, 1);
        assert_eq!(config.scan_on_demand.max_queue_depth, 1000);
    }

    #[test]
    fn test_home_path_expanded() {
        let config =
            BfaConfig::parse("[knowledge_base]\ntype = \"local_file\"\npath = \"~/kb.json\"\n")
                .unwrap();
        match config.knowledge_base {
            KnowledgeBaseConfig::LocalFile { path: Some(p) } => {
                assert!(!p.starts_with("~"));
                assert!(p.ends_with("kb.json"));
            }
            other => panic!("unexpected backend: {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = BfaConfig::default();
        config.scan_on_demand.threads = 0;
        config.scan_on_demand.max_queue_depth = 0;
        let validation = config.validate();
        assert!(!validation.is_valid());
        assert_eq!(validation.errors.len(), 2);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = BfaConfig::load_from(&dir.path().join("absent.toml"));
        assert_eq!(config.scan_on_demand.threads, 3);
    }

    #[test]
    fn test_load_invalid_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scan_on_demand\nthreads = ").unwrap();
        let config = BfaConfig::load_from(&path);
        assert_eq!(config, BfaConfig::default());
    }
}
