//! variant-forge: evaluation harness for coding-agent prompt variants.
//!
//! Runs an agent CLI once per `variant × run`, runs binary checks in each
//! workspace, collects the produced code and tests, scores them with an
//! LLM judge against rubrics and aggregates per-variant statistics with
//! deltas against a baseline.

// Core modules
pub mod aggregate;
pub mod checks;
pub mod cli;
pub mod collector;
pub mod config;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod pipeline;
pub mod process;
pub mod runner;
pub mod scorer;
pub mod spec;
pub mod utils;

// Re-export commonly used types
pub use config::HarnessConfig;
pub use error::{
    CheckError, CollectionError, HarnessError, JudgeError, LlmError, ScoreError, SessionError,
    SpecError,
};
pub use pipeline::{EvalPipeline, RunOptions};
pub use spec::EvalSpec;
