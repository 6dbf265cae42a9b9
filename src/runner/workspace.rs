//! Workspace preparation and fixture materialization.
//!
//! A fixture is copied into a fresh workspace from the first source that
//! has it: the prepared cache, a local checkout, then a remote clone.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::FixtureSources;
use crate::error::SessionError;
use crate::process::run_with_timeout;

const CLONE_TIMEOUT: Duration = Duration::from_secs(300);

/// Where a fixture was materialized from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixtureSource {
    Cache,
    Local,
    Remote,
}

impl std::fmt::Display for FixtureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FixtureSource::Cache => write!(f, "cache"),
            FixtureSource::Local => write!(f, "local"),
            FixtureSource::Remote => write!(f, "remote"),
        }
    }
}

/// Resolves and copies fixtures into workspaces.
#[derive(Debug, Clone)]
pub struct FixtureResolver {
    sources: FixtureSources,
}

impl FixtureResolver {
    pub fn new(sources: FixtureSources) -> Self {
        Self { sources }
    }

    /// Candidate path in the prepared cache.
    fn cache_candidate(&self, fixture: &str) -> Option<PathBuf> {
        let cache = self.sources.cache_dir.as_ref()?;
        let key = Path::new(fixture).file_name()?;
        Some(cache.join(key))
    }

    /// Candidate path for a local checkout.
    fn local_candidate(&self, fixture: &str) -> PathBuf {
        let path = Path::new(fixture);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match &self.sources.local_root {
            Some(root) => root.join(path),
            None => path.to_path_buf(),
        }
    }

    /// Copies `fixture` into `workspace`, trying each source in order.
    pub async fn materialize(
        &self,
        fixture: &str,
        workspace: &Path,
    ) -> Result<FixtureSource, SessionError> {
        if let Some(cached) = self.cache_candidate(fixture) {
            if cached.is_dir() {
                copy_tree(&cached, workspace)?;
                debug!(fixture, "Fixture copied from cache {}", cached.display());
                return Ok(FixtureSource::Cache);
            }
        }

        let local = self.local_candidate(fixture);
        if local.is_dir() {
            copy_tree(&local, workspace)?;
            debug!(fixture, "Fixture copied from {}", local.display());
            return Ok(FixtureSource::Local);
        }

        if let Some(base) = &self.sources.remote_base {
            let url = format!(
                "{}/{}",
                base.trim_end_matches('/'),
                fixture.trim_start_matches('/')
            );
            clone_into(&url, workspace).await.map_err(|reason| SessionError::Fixture {
                fixture: fixture.to_string(),
                reason,
            })?;
            info!(fixture, "Fixture cloned from {}", url);
            return Ok(FixtureSource::Remote);
        }

        Err(SessionError::Fixture {
            fixture: fixture.to_string(),
            reason: "not found in cache, local checkout, and no remote configured".to_string(),
        })
    }
}

/// Clones a repository into a staging directory, then copies it over.
async fn clone_into(url: &str, workspace: &Path) -> Result<(), String> {
    let staging = tempfile::TempDir::new().map_err(|e| e.to_string())?;
    let target = staging.path().join("clone");

    let mut cmd = Command::new("git");
    cmd.args(["clone", "--depth", "1", url])
        .arg(&target);

    let output = run_with_timeout(cmd, None, CLONE_TIMEOUT)
        .await
        .map_err(|e| format!("git not available: {}", e))?;
    if output.timed_out {
        return Err(format!("clone timed out after {:?}", CLONE_TIMEOUT));
    }
    if !output.success() {
        return Err(format!("git clone failed: {}", output.stderr.trim()));
    }
    copy_tree(&target, workspace).map_err(|e| e.to_string())
}

/// Recursively copies `src` into `dst`, skipping `.git` directories.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<(), SessionError> {
    fs::create_dir_all(dst)?;
    let walker = WalkDir::new(src)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git");

    for entry in walker {
        let entry = entry.map_err(|e| SessionError::Setup(format!("walk failed: {}", e)))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| SessionError::Setup(e.to_string()))?;
        let dest = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// Removes a workspace directory, logging instead of failing.
pub fn remove_workspace(workspace: &Path) {
    if !workspace.exists() {
        return;
    }
    if let Err(e) = fs::remove_dir_all(workspace) {
        warn!("Failed to remove workspace {}: {}", workspace.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_fixture(root: &Path, name: &str, marker: &str) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::create_dir_all(dir.join(".git")).unwrap();
        fs::write(dir.join("src/main.py"), marker).unwrap();
        fs::write(dir.join(".git/HEAD"), "ref").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_cache_takes_priority() {
        let temp = TempDir::new().unwrap();
        let cache = temp.path().join("cache");
        let local = temp.path().join("local");
        make_fixture(&cache, "todo-app", "cached");
        make_fixture(&local, "fixtures/todo-app", "local");

        let resolver = FixtureResolver::new(FixtureSources {
            cache_dir: Some(cache),
            local_root: Some(local),
            remote_base: None,
        });
        let ws = temp.path().join("ws");
        let source = resolver.materialize("fixtures/todo-app", &ws).await.unwrap();

        assert_eq!(source, FixtureSource::Cache);
        assert_eq!(fs::read_to_string(ws.join("src/main.py")).unwrap(), "cached");
        assert!(!ws.join(".git").exists());
    }

    #[tokio::test]
    async fn test_local_fallback() {
        let temp = TempDir::new().unwrap();
        let local = temp.path().join("local");
        make_fixture(&local, "todo-app", "local");

        let resolver = FixtureResolver::new(FixtureSources {
            cache_dir: Some(temp.path().join("empty-cache")),
            local_root: Some(local),
            remote_base: None,
        });
        let ws = temp.path().join("ws");
        let source = resolver.materialize("todo-app", &ws).await.unwrap();
        assert_eq!(source, FixtureSource::Local);
        assert!(ws.join("src/main.py").exists());
    }

    #[tokio::test]
    async fn test_missing_fixture_without_remote() {
        let temp = TempDir::new().unwrap();
        let resolver = FixtureResolver::new(FixtureSources::default());
        let result = resolver
            .materialize("does-not-exist-anywhere", &temp.path().join("ws"))
            .await;
        assert!(matches!(result, Err(SessionError::Fixture { .. })));
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = std::process::Command::new("git")
            .args(["-c", "user.name=t", "-c", "user.email=t@example.com"])
            .args(args)
            .current_dir(dir)
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    #[tokio::test]
    async fn test_remote_clone_fallback() {
        let temp = TempDir::new().unwrap();
        let remotes = temp.path().join("remotes");
        let repo = remotes.join("todo-app");
        fs::create_dir_all(&repo).unwrap();
        fs::write(repo.join("app.py"), "print('hi')").unwrap();
        git(&repo, &["init", "-q"]);
        git(&repo, &["add", "."]);
        git(&repo, &["commit", "-q", "-m", "init"]);

        let resolver = FixtureResolver::new(FixtureSources {
            cache_dir: None,
            local_root: Some(temp.path().join("no-local")),
            remote_base: Some(format!("file://{}", remotes.display())),
        });
        let ws = temp.path().join("ws");
        let source = resolver.materialize("todo-app", &ws).await.unwrap();

        assert_eq!(source, FixtureSource::Remote);
        assert_eq!(fs::read_to_string(ws.join("app.py")).unwrap(), "print('hi')");
        assert!(!ws.join(".git").exists());
    }

    #[test]
    fn test_remove_workspace() {
        let temp = TempDir::new().unwrap();
        let ws = temp.path().join("workspace");
        fs::create_dir_all(ws.join("a/b")).unwrap();
        remove_workspace(&ws);
        assert!(!ws.exists());
        remove_workspace(&ws);
    }
}
