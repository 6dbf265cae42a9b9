//! Data model for evaluation specs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Session timeout used when neither the variant, the spec nor the CLI set one.
pub const DEFAULT_SESSION_TIMEOUT_SECS: u64 = 600;

fn default_runs() -> u32 {
    1
}

fn default_weight() -> f64 {
    1.0
}

/// A complete evaluation spec.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSpec {
    /// Name of the evaluation, used for the run directory.
    pub name: String,
    /// Optional free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Base prompt shared by every variant.
    #[serde(default, alias = "base_prompt")]
    pub prompt: String,
    /// Variants to compare.
    pub variants: Vec<Variant>,
    /// Number of sessions per variant.
    #[serde(default = "default_runs")]
    pub runs_per_variant: u32,
    /// Deterministic pass/fail commands run against each workspace.
    pub binary_checks: Vec<CheckDef>,
    /// Rubric metrics judged for each session.
    pub metrics: Vec<MetricDef>,
    /// Execution settings.
    #[serde(default)]
    pub execution: ExecutionSettings,
    /// Fixture shared by variants that don't name their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixture: Option<FixtureDef>,
    /// Variant id to compare the others against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<String>,
}

/// Spec-wide execution settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionSettings {
    /// Session timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

/// Spec-wide fixture reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureDef {
    /// Fixture path, resolved against the configured fixture sources.
    pub path: String,
}

/// A named prompt/configuration variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    /// Unique variant identifier.
    pub id: String,
    /// Text appended to the base prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_suffix: Option<String>,
    /// Fixture to materialize into the workspace before the session runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixture_path: Option<String>,
    /// Per-variant session timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    /// Optional description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Variant {
    /// Creates a variant with only an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt_suffix: None,
            fixture_path: None,
            timeout_seconds: None,
            description: None,
        }
    }

    /// Sets the prompt suffix.
    pub fn with_prompt_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.prompt_suffix = Some(suffix.into());
        self
    }

    /// Sets the fixture path.
    pub fn with_fixture(mut self, fixture: impl Into<String>) -> Self {
        self.fixture_path = Some(fixture.into());
        self
    }

    /// Sets the per-variant timeout.
    pub fn with_timeout_seconds(mut self, secs: u64) -> Self {
        self.timeout_seconds = Some(secs);
        self
    }
}

/// A binary check: an external shell predicate judged by its exit status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckDef {
    /// Check name, used as the aggregation key.
    pub name: String,
    /// Shell predicate; `{workspace}` is replaced with the absolute workspace path.
    #[serde(alias = "check", alias = "cmd")]
    pub command: String,
    /// Relative weight of this check.
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl CheckDef {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            weight: 1.0,
            description: None,
        }
    }
}

/// A judged metric, backed by a rubric document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDef {
    /// Metric name.
    pub name: String,
    /// Rubric document name; defaults to the metric name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rubric: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl MetricDef {
    /// Name of the rubric this metric is judged with.
    pub fn rubric_name(&self) -> &str {
        self.rubric.as_deref().unwrap_or(&self.name)
    }
}

/// The scheduling atom: one run of one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionUnit {
    /// Variant to run.
    pub variant: Variant,
    /// Zero-based run index within the variant.
    pub run_index: u32,
}

impl EvalSpec {
    /// Effective prompt for a variant: base prompt followed by the variant suffix.
    pub fn prompt_for(&self, variant: &Variant) -> String {
        match &variant.prompt_suffix {
            Some(suffix) => format!("{}{}", self.prompt, suffix),
            None => self.prompt.clone(),
        }
    }

    /// Effective fixture for a variant.
    pub fn fixture_for<'a>(&'a self, variant: &'a Variant) -> Option<&'a str> {
        variant
            .fixture_path
            .as_deref()
            .or_else(|| self.fixture.as_ref().map(|f| f.path.as_str()))
    }

    /// Effective session timeout for a variant.
    ///
    /// Precedence: variant timeout, spec execution timeout, CLI override,
    /// built-in default.
    pub fn timeout_for(&self, variant: &Variant, cli_override: Option<u64>) -> Duration {
        let secs = variant
            .timeout_seconds
            .or(self.execution.timeout)
            .or(cli_override)
            .unwrap_or(DEFAULT_SESSION_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    /// Looks up a variant by id.
    pub fn variant(&self, id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == id)
    }

    /// Rubric names for all metrics, in declaration order, without duplicates.
    pub fn rubric_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for metric in &self.metrics {
            let name = metric.rubric_name();
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    /// Expands `variants × runs_per_variant` into the unit queue.
    ///
    /// Units are ordered variant-major so a batch covers consecutive runs of
    /// one variant before moving on.
    pub fn expand_units(&self, runs_override: Option<u32>) -> Vec<SessionUnit> {
        let runs = runs_override.unwrap_or(self.runs_per_variant);
        self.variants
            .iter()
            .flat_map(|variant| {
                (0..runs).map(move |run_index| SessionUnit {
                    variant: variant.clone(),
                    run_index,
                })
            })
            .collect()
    }
}
