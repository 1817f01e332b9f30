// crates/bfa-engine/src/cli/config.rs
// Print and validate the effective configuration

use anyhow::{Result, bail};
use bfa::config::BfaConfig;
use std::path::Path;

pub fn run_config(config: &BfaConfig, source: &Path, check: bool) -> Result<()> {
    let validation = config.validate();
    if !check {
        println!("# {}", source.display());
        println!("{}", toml::to_string_pretty(config)?);
    }
    println!("{}", validation.report());
    if !validation.is_valid() {
        bail!("configuration has {} error(s)", validation.errors.len());
    }
    Ok(())
}
