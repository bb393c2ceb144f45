use crate::error::GitError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyOutcome {
    pub changed_files: Vec<String>,
}

impl ApplyOutcome {
    pub fn has_changes(&self) -> bool {
        !self.changed_files.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchCleanup {
    pub local_deleted: bool,
    pub remote_deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub merge_commit: String,
    pub cleanup: BranchCleanup,
}

/// Git operations the lifecycle needs, all against a local working copy
/// (or, for the access checks, a remote URL).
///
/// Failure classes differ per operation: clone, branch, apply and merge
/// propagate; `delete_branch` never fails and reports what it managed.
pub trait GitManager: Send + Sync {
    fn ensure_cloned(&self, url: &str, token: Option<&str>, path: &Path) -> Result<(), GitError>;

    /// Checks out `main` (or `master`), fast-forwards it, then creates or
    /// reuses `branch`.
    fn create_sandbox_branch(&self, path: &Path, branch: &str) -> Result<(), GitError>;

    /// An empty or no-op diff yields an outcome with no changed files.
    fn apply_patch(&self, path: &Path, diff: &str) -> Result<ApplyOutcome, GitError>;

    fn commit(&self, path: &Path, message: &str) -> Result<String, GitError>;

    fn push_branch(&self, path: &Path, branch: &str) -> Result<(), GitError>;

    fn diff(&self, path: &Path, from: &str, to: &str) -> Result<String, GitError>;

    fn list_branches(&self, path: &Path) -> Result<Vec<String>, GitError>;

    fn merge_and_push(&self, path: &Path, from: &str, to: &str) -> Result<MergeOutcome, GitError>;

    fn delete_branch(&self, path: &Path, branch: &str) -> BranchCleanup;

    fn check_connection(&self, url: &str, token: Option<&str>) -> Result<(), GitError>;

    fn check_read_access(&self, url: &str, token: Option<&str>) -> Result<(), GitError>;

    fn check_write_access(&self, url: &str, token: Option<&str>) -> Result<(), GitError>;
}
