//! Rubric documents.

use std::fs;
use std::path::Path;

use crate::error::ScoreError;

/// A rubric loaded from `<rubrics_dir>/<name>.md`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rubric {
    pub name: String,
    pub content: String,
}

impl Rubric {
    /// Test-oriented rubrics are judged against test files.
    pub fn is_test_oriented(&self) -> bool {
        is_test_rubric(&self.name)
    }
}

pub fn is_test_rubric(name: &str) -> bool {
    name.to_ascii_lowercase().contains("test")
}

/// Loads a rubric by name. `.md` is tried first, then the bare name.
pub fn load_rubric(dir: &Path, name: &str) -> Result<Rubric, ScoreError> {
    let candidates = [dir.join(format!("{}.md", name)), dir.join(name)];
    let path = candidates
        .iter()
        .find(|p| p.is_file())
        .ok_or_else(|| ScoreError::RubricNotFound(name.to_string()))?;
    Ok(Rubric {
        name: name.to_string(),
        content: fs::read_to_string(path)?,
    })
}
