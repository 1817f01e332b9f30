// crates/bfa-engine/src/lib.rs
// Build failure analyzer - knowledge base, log scanner and scan-on-demand queue

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod db;
pub mod display;
pub mod error;
pub mod host;
pub mod indication;
pub mod knowledge_base;
pub mod scanner;
pub mod service;
pub mod sod;

pub use error::{BfaError, Result};
