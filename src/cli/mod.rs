//! Command-line interface for variant-forge.
//!
//! Provides the `run` pipeline command plus `validate`, `collect`, `score`
//! and `report` for working with individual stages.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli, Commands};
