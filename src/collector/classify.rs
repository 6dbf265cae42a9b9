//! Code vs. test classification by filename and path conventions.

use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

/// Directories never descended into during collection.
pub const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "__pycache__",
    ".venv",
    "venv",
    "dist",
    "build",
];

const TEST_DIRS: &[&str] = &["test", "tests", "spec", "specs", "__tests__"];
const TEST_PREFIXES: &[&str] = &["test_", "test-", "spec_", "spec-"];
const TEST_SUFFIXES: &[&str] = &[
    "_test", "-test", ".test", "Test", "_spec", "-spec", ".spec", "Spec",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Code,
    Test,
}

pub fn is_excluded_dir(name: &str) -> bool {
    EXCLUDED_DIRS.contains(&name)
}

/// Classifies a path relative to the collection root.
pub fn classify(relative: &Path) -> FileKind {
    if is_test_path(relative) {
        FileKind::Test
    } else {
        FileKind::Code
    }
}

fn is_test_path(relative: &Path) -> bool {
    let in_test_dir = relative
        .parent()
        .into_iter()
        .flat_map(Path::components)
        .any(|c| match c {
            Component::Normal(name) => name
                .to_str()
                .map(|n| TEST_DIRS.contains(&n))
                .unwrap_or(false),
            _ => false,
        });
    if in_test_dir {
        return true;
    }

    let Some(file_name) = relative.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    if file_name.contains(".test.") || file_name.contains(".spec.") {
        return true;
    }

    // Stem without the final extension.
    let stem = relative
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    stem == "test"
        || stem == "spec"
        || TEST_PREFIXES.iter().any(|p| stem.starts_with(p))
        || TEST_SUFFIXES.iter().any(|s| stem.ends_with(s))
}
