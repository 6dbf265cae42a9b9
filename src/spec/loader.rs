//! Spec loading and validation.
//!
//! The document is first parsed into an untyped tree so that required keys
//! can be reported by name, then normalized (variant `name` aliases `id`),
//! then deserialized into [`EvalSpec`] and checked for semantic errors.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use super::types::EvalSpec;
use crate::error::SpecError;

/// Document format of a spec file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecFormat {
    Yaml,
    Json,
}

impl SpecFormat {
    /// Picks the format from a file extension; anything but `.json` is YAML.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => SpecFormat::Json,
            _ => SpecFormat::Yaml,
        }
    }
}

/// Loads and validates a spec from disk.
pub fn load(path: impl AsRef<Path>) -> Result<EvalSpec, SpecError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(SpecError::NotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)?;
    let spec = parse(&content, SpecFormat::from_path(path), &path.display().to_string())?;
    debug!(
        spec = %spec.name,
        variants = spec.variants.len(),
        runs = spec.runs_per_variant,
        "Loaded spec from {}",
        path.display()
    );
    Ok(spec)
}

/// Loads and validates a spec from an in-memory document.
pub fn load_str(content: &str, format: SpecFormat) -> Result<EvalSpec, SpecError> {
    parse(content, format, "<inline>")
}

fn parse(content: &str, format: SpecFormat, origin: &str) -> Result<EvalSpec, SpecError> {
    let parse_error = |message: String| SpecError::ParseError {
        path: origin.to_string(),
        message,
    };

    let mut doc: Value = match format {
        SpecFormat::Json => serde_json::from_str(content).map_err(|e| parse_error(e.to_string()))?,
        SpecFormat::Yaml => serde_yaml::from_str(content).map_err(|e| parse_error(e.to_string()))?,
    };

    if !doc.is_object() {
        return Err(parse_error("top level must be a mapping".to_string()));
    }

    check_required(&doc)?;
    normalize_variant_ids(&mut doc)?;

    let spec: EvalSpec = serde_json::from_value(doc).map_err(|e| parse_error(e.to_string()))?;
    validate(&spec)?;
    Ok(spec)
}

/// Reports the first missing required key, in a fixed order.
fn check_required(doc: &Value) -> Result<(), SpecError> {
    match doc.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => {}
        Some(Value::String(_)) => return Err(SpecError::invalid("name", "must not be empty")),
        Some(_) => return Err(SpecError::invalid("name", "must be a string")),
        None => return Err(SpecError::invalid("name", "missing required field")),
    }

    match doc.get("variants") {
        Some(Value::Array(variants)) if variants.is_empty() => {
            return Err(SpecError::invalid("variants", "must not be empty"))
        }
        Some(Value::Array(_)) => {}
        Some(_) => return Err(SpecError::invalid("variants", "must be a list")),
        None => return Err(SpecError::invalid("variants", "missing required field")),
    }

    if let Some(Value::Array(variants)) = doc.get("variants") {
        for (i, variant) in variants.iter().enumerate() {
            let field = format!("variants[{}].id", i);
            if !variant.is_object() {
                return Err(SpecError::invalid(field, "variant must be a mapping"));
            }
            let has_id = ["id", "name"]
                .iter()
                .any(|key| matches!(variant.get(key), Some(Value::String(s)) if !s.trim().is_empty()));
            if !has_id {
                return Err(SpecError::invalid(field, "missing required field"));
            }
        }
    }

    for key in ["binary_checks", "metrics"] {
        match doc.get(key) {
            Some(Value::Array(_)) => {}
            Some(_) => return Err(SpecError::invalid(key, "must be a list")),
            None => return Err(SpecError::invalid(key, "missing required field")),
        }
    }

    Ok(())
}

/// A variant that has `name` but no `id` uses its name as id.
fn normalize_variant_ids(doc: &mut Value) -> Result<(), SpecError> {
    let Some(Value::Array(variants)) = doc.get_mut("variants") else {
        return Ok(());
    };
    for variant in variants.iter_mut() {
        let Some(obj) = variant.as_object_mut() else {
            continue;
        };
        let has_id = matches!(obj.get("id"), Some(Value::String(s)) if !s.trim().is_empty());
        if !has_id {
            if let Some(name) = obj.remove("name") {
                obj.insert("id".to_string(), name);
            }
        } else {
            obj.remove("name");
        }
    }
    Ok(())
}

fn validate(spec: &EvalSpec) -> Result<(), SpecError> {
    let mut seen = HashSet::new();
    for (i, variant) in spec.variants.iter().enumerate() {
        if !seen.insert(variant.id.as_str()) {
            return Err(SpecError::invalid(
                format!("variants[{}].id", i),
                format!("duplicate variant id '{}'", variant.id),
            ));
        }
        if variant.timeout_seconds == Some(0) {
            return Err(SpecError::invalid(
                format!("variants[{}].timeout_seconds", i),
                "must be greater than zero",
            ));
        }
    }

    if spec.runs_per_variant == 0 {
        return Err(SpecError::invalid("runs_per_variant", "must be at least 1"));
    }

    if spec.execution.timeout == Some(0) {
        return Err(SpecError::invalid("execution.timeout", "must be greater than zero"));
    }

    for (i, check) in spec.binary_checks.iter().enumerate() {
        if check.name.trim().is_empty() {
            return Err(SpecError::invalid(format!("binary_checks[{}].name", i), "must not be empty"));
        }
        if check.command.trim().is_empty() {
            return Err(SpecError::invalid(
                format!("binary_checks[{}].command", i),
                "must not be empty",
            ));
        }
    }

    for (i, metric) in spec.metrics.iter().enumerate() {
        if metric.name.trim().is_empty() {
            return Err(SpecError::invalid(format!("metrics[{}].name", i), "must not be empty"));
        }
    }

    if let Some(baseline) = &spec.baseline {
        if spec.variant(baseline).is_none() {
            return Err(SpecError::invalid(
                "baseline",
                format!("unknown variant '{}'", baseline),
            ));
        }
    }

    let all_empty = spec.prompt.trim().is_empty()
        && spec
            .variants
            .iter()
            .all(|v| v.prompt_suffix.as_deref().map_or(true, |s| s.trim().is_empty()));
    if all_empty {
        return Err(SpecError::invalid("prompt", "no variant has a non-empty prompt"));
    }

    Ok(())
}
