use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// What happens to a case's scratch directory once the case finished normally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[cfg_attr(feature = "clap", value(rename_all = "kebab-case"))]
pub enum CleanupPolicy {
    /// Keep every obj_dir for post-mortem inspection.
    #[default]
    Keep,
    /// Delete obj_dirs of passing cases, keep failures.
    DeletePassed,
    /// Delete every obj_dir.
    Delete,
}

impl CleanupPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            CleanupPolicy::Keep => "keep",
            CleanupPolicy::DeletePassed => "delete-passed",
            CleanupPolicy::Delete => "delete",
        }
    }

    pub fn keeps(self, passed: bool) -> bool {
        match self {
            CleanupPolicy::Keep => true,
            CleanupPolicy::DeletePassed => !passed,
            CleanupPolicy::Delete => false,
        }
    }
}

/// Scoped per-case scratch directory.
///
/// Created fresh (stale contents from an earlier run are removed). A guard that is
/// dropped without [`ObjDir::finish`] removes its directory: that only happens when
/// the harness itself failed mid-case.
#[derive(Debug)]
pub struct ObjDir {
    path: PathBuf,
    armed: bool,
}

impl ObjDir {
    pub fn create_fresh(path: &Path) -> Result<Self> {
        if path.exists() {
            std::fs::remove_dir_all(path)
                .with_context(|| format!("remove stale obj_dir: {}", path.display()))?;
        }
        std::fs::create_dir_all(path)
            .with_context(|| format!("create obj_dir: {}", path.display()))?;
        let path = std::fs::canonicalize(path)
            .with_context(|| format!("canonicalize obj_dir: {}", path.display()))?;
        tracing::debug!(obj_dir = %path.display(), "created obj_dir");
        Ok(Self { path, armed: true })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `policy` and release the guard. Returns whether the directory was kept.
    pub fn finish(mut self, policy: CleanupPolicy, passed: bool) -> Result<bool> {
        self.armed = false;
        if policy.keeps(passed) {
            return Ok(true);
        }
        std::fs::remove_dir_all(&self.path)
            .with_context(|| format!("remove obj_dir: {}", self.path.display()))?;
        Ok(false)
    }
}

impl Drop for ObjDir {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(obj_dir = %self.path.display(), "removing obj_dir of aborted case");
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}
