// crates/bfa-engine/src/cli/mod.rs
// CLI module for bfa commands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod causes;
pub mod config;
pub mod migrate;
pub mod scan;

pub use causes::{run_categories, run_causes};
pub use config::run_config;
pub use migrate::run_migrate;
pub use scan::run_scan;

#[derive(Parser)]
#[command(name = "bfa")]
#[command(about = "Build failure analyzer: match build logs against known failure causes")]
#[command(version)]
pub struct Cli {
    /// Config file (default: ~/.bfa/config.toml)
    #[arg(short, long, global = true, env = "BFA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage failure causes
    Causes {
        #[command(subcommand)]
        action: CausesAction,
    },

    /// List every category in use
    Categories,

    /// Scan log files and print the causes found
    Scan {
        /// Build log files, one build each
        #[arg(required = true)]
        logs: Vec<PathBuf>,

        /// Project name the builds are filed under
        #[arg(short, long, default_value = "local")]
        project: String,

        /// Print found causes as JSON
        #[arg(long)]
        json: bool,
    },

    /// Copy every cause into another backend
    Migrate {
        /// Target backend: local-file or sqlite
        #[arg(long)]
        to: String,

        /// Target file
        #[arg(long)]
        path: PathBuf,

        /// Record scan statistics (sqlite only)
        #[arg(long)]
        enable_statistics: bool,
    },

    /// Show the effective configuration
    Config {
        /// Only validate, exit non-zero on errors
        #[arg(long)]
        check: bool,
    },
}

#[derive(Subcommand)]
pub enum CausesAction {
    /// List causes in knowledge base order
    List {
        #[arg(long)]
        json: bool,
    },

    /// Show one cause
    Show { id: String },

    /// Add a cause
    Add {
        #[arg(short, long)]
        name: String,

        #[arg(short, long, default_value = "")]
        description: String,

        #[arg(long, default_value = "")]
        comment: String,

        /// Category (repeatable)
        #[arg(long = "category")]
        categories: Vec<String>,

        /// Build log pattern matched against whole lines (repeatable)
        #[arg(long = "pattern")]
        patterns: Vec<String>,

        /// Build log pattern searched across lines (repeatable)
        #[arg(long = "multiline")]
        multiline: Vec<String>,

        /// File indication as PATH=PATTERN (repeatable)
        #[arg(long = "file")]
        files: Vec<String>,
    },

    /// Remove a cause by id
    Remove { id: String },
}
