// crates/bfa-engine/src/config/env.rs
// Environment overrides - every BFA_* variable is read here

use super::expand_home;
use super::file::BfaConfig;
use crate::knowledge_base::KnowledgeBaseConfig;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Values taken from the environment, applied on top of the config file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvOverrides {
    /// Worker count (BFA_SOD_THREADS)
    pub threads: Option<usize>,
    /// Queue bound (BFA_SOD_MAX_QUEUE_DEPTH)
    pub max_queue_depth: Option<usize>,
    /// Analyze aborted builds (BFA_ANALYZE_ABORTED)
    pub analyze_aborted: Option<bool>,
    /// Message base url (BFA_BASE_URL)
    pub base_url: Option<String>,
    /// Knowledge base path for the configured backend (BFA_KB_PATH)
    pub kb_path: Option<PathBuf>,
}

impl EnvOverrides {
    /// Read every override (call once at startup)
    pub fn from_env() -> Self {
        let overrides = Self {
            threads: parse_usize_env("BFA_SOD_THREADS"),
            max_queue_depth: parse_usize_env("BFA_SOD_MAX_QUEUE_DEPTH"),
            analyze_aborted: parse_bool_env("BFA_ANALYZE_ABORTED"),
            base_url: read_var("BFA_BASE_URL"),
            kb_path: read_var("BFA_KB_PATH").map(PathBuf::from),
        };
        if overrides != Self::default() {
            info!(?overrides, "Applying environment overrides");
        }
        overrides
    }

    pub fn apply(&self, config: &mut BfaConfig) {
        if let Some(threads) = self.threads {
            config.scan_on_demand.threads = threads;
        }
        if let Some(depth) = self.max_queue_depth {
            config.scan_on_demand.max_queue_depth = depth;
        }
        if let Some(aborted) = self.analyze_aborted {
            config.analysis.analyze_aborted = aborted;
        }
        if let Some(ref base_url) = self.base_url {
            config.analysis.base_url = base_url.clone();
        }
        if let Some(ref kb_path) = self.kb_path {
            let kb_path = expand_home(kb_path);
            match config.knowledge_base {
                KnowledgeBaseConfig::LocalFile { ref mut path } => *path = Some(kb_path),
                KnowledgeBaseConfig::Sqlite { ref mut path, .. } => *path = kb_path,
            }
        }
    }
}

/// Configuration validation result
#[derive(Debug, Default)]
pub struct ConfigValidation {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ConfigValidation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Log warnings and turn errors into a `Config` error
    pub fn into_result(self) -> crate::Result<()> {
        for warning in &self.warnings {
            warn!("{}", warning);
        }
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(crate::BfaError::Config(self.errors.join("; ")))
        }
    }

    /// Format as a human-readable report
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        if !self.errors.is_empty() {
            lines.push("Errors:".to_string());
            for err in &self.errors {
                lines.push(format!("  - {}", err));
            }
        }

        if !self.warnings.is_empty() {
            lines.push("Warnings:".to_string());
            for warn in &self.warnings {
                lines.push(format!("  - {}", warn));
            }
        }

        if lines.is_empty() {
            "Configuration OK".to_string()
        } else {
            lines.join("\n")
        }
    }
}

fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_usize_env(name: &str) -> Option<usize> {
    let value = read_var(name)?;
    match value.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!(name, value = %value, "Ignoring non-numeric environment value");
            None
        }
    }
}

pub fn parse_bool_env(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    let parsed = parse_bool(&value);
    if parsed.is_none() {
        debug!(name, value = %value, "Unrecognised boolean environment value");
    }
    parsed
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
