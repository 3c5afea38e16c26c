//! Command-line interface for recon-forge.
//!
//! Provides commands for running workers, submitting jobs, inspecting job
//! and viewer state, applying migrations and running the chain locally.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
