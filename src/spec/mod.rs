//! Evaluation spec model and loader.
//!
//! An evaluation spec names a base prompt, the variants to compare, how many
//! times to run each variant, the binary checks to run in every workspace
//! and the rubric metrics to judge the output against.
//!
//! ```ignore
//! use variant_forge::spec;
//!
//! let spec = spec::load("evals/wordle.yaml")?;
//! for unit in spec.expand_units(None) {
//!     println!("{} #{}", unit.variant.id, unit.run_index);
//! }
//! ```

pub mod loader;
pub mod types;

pub use loader::{load, load_str, SpecFormat};
pub use types::{
    CheckDef, EvalSpec, ExecutionSettings, FixtureDef, MetricDef, SessionUnit, Variant,
    DEFAULT_SESSION_TIMEOUT_SECS,
};
