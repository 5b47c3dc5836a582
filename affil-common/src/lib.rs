//! # Affil Common Library
//!
//! Shared code for the affiliation classifier crates:
//! - Error type and `Result` alias
//! - Configuration file discovery and TOML loading
//! - Logging configuration and tracing initialization
//! - Newline-delimited JSON input/output helpers

pub mod config;
pub mod error;
pub mod jsonl;
pub mod logging;

pub use error::{Error, Result};
