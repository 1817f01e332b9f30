// crates/bfa-engine/src/config/mod.rs
// Configuration: ~/.bfa/config.toml plus environment overrides

pub mod env;
pub mod file;

pub use env::{ConfigValidation, EnvOverrides};
pub use file::{AnalysisConfig, BfaConfig, ScanOnDemandConfig};

use std::path::{Path, PathBuf};

/// Directory holding config and the default local knowledge base
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".bfa")
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        Err(_) => path.to_path_buf(),
    }
}
