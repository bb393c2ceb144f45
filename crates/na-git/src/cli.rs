use crate::command::{GitOptions, run, run_ok};
use crate::error::GitError;
use crate::manager::{ApplyOutcome, BranchCleanup, GitManager, MergeOutcome};
use crate::paths::authenticated_url;
use crate::refs;
use std::io::Write as _;
use std::path::Path;
use ulid::Ulid;

const PATCH_PREFIX: &str = ".na-patch-";

/// [`GitManager`] backed by the `git` executable.
#[derive(Debug, Clone, Default)]
pub struct CliGit {
    options: GitOptions,
}

impl CliGit {
    pub fn new(options: GitOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &GitOptions {
        &self.options
    }

    fn local(&self, path: &Path, args: &[&str]) -> Result<String, GitError> {
        run_ok(&self.options, Some(path), args, self.options.local_timeout)
    }

    fn network(&self, path: Option<&Path>, args: &[&str]) -> Result<String, GitError> {
        run_ok(&self.options, path, args, self.options.network_timeout)
    }

    fn changed_files(&self, path: &Path) -> Result<Vec<String>, GitError> {
        let status = self.local(path, &["status", "--porcelain"])?;
        Ok(status
            .lines()
            .filter(|line| line.len() > 3)
            .map(|line| line[3..].trim().to_string())
            .collect())
    }

    fn head(&self, path: &Path) -> Result<String, GitError> {
        Ok(self.local(path, &["rev-parse", "HEAD"])?.trim().to_string())
    }

    fn current_branch(&self, path: &Path) -> Option<String> {
        self.local(path, &["rev-parse", "--abbrev-ref", "HEAD"])
            .ok()
            .map(|name| name.trim().to_string())
    }
}

impl GitManager for CliGit {
    fn ensure_cloned(&self, url: &str, token: Option<&str>, path: &Path) -> Result<(), GitError> {
        if refs::is_repository(path) {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let remote = authenticated_url(url, token);
        let target = path.display().to_string();
        tracing::info!(path = %target, "cloning repository");
        run_ok(
            &self.options,
            None,
            &["clone", "--quiet", &remote, &target],
            self.options.clone_timeout,
        )?;
        Ok(())
    }

    fn create_sandbox_branch(&self, path: &Path, branch: &str) -> Result<(), GitError> {
        let base = refs::base_branch(path)?;
        self.local(path, &["checkout", "--quiet", &base])?;
        self.network(Some(path), &["pull", "--quiet", "--ff-only", "origin", &base])?;

        if refs::local_branch_exists(path, branch)? {
            tracing::debug!(branch, "reusing existing sandbox branch");
            self.local(path, &["checkout", "--quiet", branch])?;
        } else {
            self.local(path, &["checkout", "--quiet", "-b", branch])?;
        }
        Ok(())
    }

    fn apply_patch(&self, path: &Path, diff: &str) -> Result<ApplyOutcome, GitError> {
        if diff.trim().is_empty() {
            return Ok(ApplyOutcome::default());
        }

        let mut patch_file = tempfile::Builder::new()
            .prefix(PATCH_PREFIX)
            .suffix(".patch")
            .tempfile_in(path)?;
        patch_file.write_all(diff.as_bytes())?;
        if !diff.ends_with('\n') {
            patch_file.write_all(b"\n")?;
        }
        patch_file.flush()?;
        let patch_path = patch_file.path().display().to_string();

        let applied = run(
            &self.options,
            Some(path),
            &["apply", "--3way", "--whitespace=nowarn", &patch_path],
            self.options.local_timeout,
        );

        // Removed before inspecting status so it never shows up as a change.
        if let Err(err) = patch_file.close() {
            tracing::warn!(error = %err, "failed to remove temporary patch file");
        }

        let output = applied?;
        if !output.success() {
            if let Err(err) = self.local(path, &["reset", "--quiet", "--hard", "HEAD"]) {
                tracing::warn!(error = %err, "failed to reset after rejected patch");
            }
            return Err(GitError::PatchRejected {
                reason: output.stderr.trim().to_string(),
            });
        }

        let changed_files = self.changed_files(path)?;
        if changed_files.is_empty() {
            tracing::info!("patch applied cleanly but changed nothing");
        }
        Ok(ApplyOutcome { changed_files })
    }

    fn commit(&self, path: &Path, message: &str) -> Result<String, GitError> {
        self.local(path, &["add", "-A"])?;
        if self.changed_files(path)?.is_empty() {
            return Err(GitError::NothingToCommit);
        }
        self.local(path, &["commit", "--quiet", "-m", message])?;
        self.head(path)
    }

    fn push_branch(&self, path: &Path, branch: &str) -> Result<(), GitError> {
        self.network(Some(path), &["push", "--quiet", "-u", "origin", branch])?;
        Ok(())
    }

    fn diff(&self, path: &Path, from: &str, to: &str) -> Result<String, GitError> {
        self.local(path, &["diff", &format!("{from}..{to}")])
    }

    fn list_branches(&self, path: &Path) -> Result<Vec<String>, GitError> {
        if let Err(err) = self.network(Some(path), &["fetch", "--quiet", "--prune", "origin"]) {
            tracing::debug!(error = %err, "fetch before listing branches failed");
        }
        refs::branch_names(path)
    }

    fn merge_and_push(&self, path: &Path, from: &str, to: &str) -> Result<MergeOutcome, GitError> {
        self.local(path, &["checkout", "--quiet", to])?;
        self.network(Some(path), &["pull", "--quiet", "--ff-only", "origin", to])?;

        let message = format!("Merge {from} into {to}");
        let merged = run(
            &self.options,
            Some(path),
            &["merge", "--no-ff", "-m", &message, from],
            self.options.local_timeout,
        )?;
        if !merged.success() {
            if let Err(err) = self.local(path, &["merge", "--abort"]) {
                tracing::warn!(error = %err, "merge --abort failed");
            }
            let reason = if merged.stderr.trim().is_empty() {
                merged.stdout.trim().to_string()
            } else {
                merged.stderr.trim().to_string()
            };
            return Err(GitError::MergeConflict {
                from: from.to_string(),
                to: to.to_string(),
                reason,
            });
        }

        self.network(Some(path), &["push", "--quiet", "origin", to])?;
        let merge_commit = self.head(path)?;
        let cleanup = self.delete_branch(path, from);
        Ok(MergeOutcome {
            merge_commit,
            cleanup,
        })
    }

    fn delete_branch(&self, path: &Path, branch: &str) -> BranchCleanup {
        if self.current_branch(path).as_deref() == Some(branch) {
            let base = refs::base_branch(path).unwrap_or_else(|_| "main".to_string());
            if let Err(err) = self.local(path, &["checkout", "--quiet", "--force", &base]) {
                tracing::warn!(branch, error = %err, "could not leave branch before delete");
            }
        }

        let local_deleted = match self.local(path, &["branch", "-D", branch]) {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(branch, error = %err, "local branch delete failed");
                false
            }
        };
        let remote_deleted =
            match self.network(Some(path), &["push", "--quiet", "origin", "--delete", branch]) {
                Ok(_) => true,
                Err(err) => {
                    tracing::warn!(branch, error = %err, "remote branch delete failed");
                    false
                }
            };
        BranchCleanup {
            local_deleted,
            remote_deleted,
        }
    }

    fn check_connection(&self, url: &str, token: Option<&str>) -> Result<(), GitError> {
        let remote = authenticated_url(url, token);
        self.network(None, &["ls-remote", &remote, "HEAD"])?;
        Ok(())
    }

    fn check_read_access(&self, url: &str, token: Option<&str>) -> Result<(), GitError> {
        let remote = authenticated_url(url, token);
        self.network(None, &["ls-remote", "--heads", &remote])?;
        Ok(())
    }

    fn check_write_access(&self, url: &str, token: Option<&str>) -> Result<(), GitError> {
        let dir = tempfile::Builder::new()
            .prefix("night-agent-write-check-")
            .tempdir()?;
        let remote = authenticated_url(url, token);
        let check_ref = format!("HEAD:refs/heads/night-agent-write-check-{}", Ulid::new());

        let result = (|| -> Result<(), GitError> {
            let path = dir.path();
            self.local(path, &["init", "--quiet"])?;
            self.local(path, &["remote", "add", "origin", &remote])?;
            std::fs::write(path.join("check"), "check")?;
            self.local(path, &["add", "check"])?;
            self.local(path, &["commit", "--quiet", "-m", "write check"])?;
            self.network(Some(path), &["push", "--dry-run", "--quiet", "origin", &check_ref])?;
            Ok(())
        })();

        if let Err(err) = dir.close() {
            tracing::warn!(error = %err, "failed to remove write-check directory");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{RemoteFixture, git};

    fn cloned(fixture: &RemoteFixture) -> (CliGit, std::path::PathBuf) {
        let manager = CliGit::default();
        let path = fixture.workspace().join("acme").join("acme-api");
        manager
            .ensure_cloned(&fixture.origin_url(), None, &path)
            .unwrap();
        (manager, path)
    }

    fn leftover_patch_files(path: &Path) -> usize {
        std::fs::read_dir(path)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(PATCH_PREFIX))
            .count()
    }

    #[test]
    fn ensure_cloned_is_idempotent() {
        let fixture = RemoteFixture::new();
        let (manager, path) = cloned(&fixture);
        assert!(path.join("README.md").exists());
        manager
            .ensure_cloned(&fixture.origin_url(), None, &path)
            .unwrap();
    }

    #[test]
    fn ensure_cloned_propagates_failure() {
        let fixture = RemoteFixture::new();
        let manager = CliGit::default();
        let missing = fixture.root().join("nope.git").display().to_string();
        let err = manager
            .ensure_cloned(&missing, None, &fixture.workspace().join("x"))
            .unwrap_err();
        assert!(matches!(err, GitError::CommandFailed { .. }));
    }

    #[test]
    fn sandbox_branch_can_be_recreated() {
        let fixture = RemoteFixture::new();
        let (manager, path) = cloned(&fixture);
        manager.create_sandbox_branch(&path, "fix/acme-api/1a2b3c4d").unwrap();
        manager.create_sandbox_branch(&path, "fix/acme-api/1a2b3c4d").unwrap();
        assert_eq!(
            manager.current_branch(&path).as_deref(),
            Some("fix/acme-api/1a2b3c4d")
        );
    }

    #[test]
    fn sandbox_branch_falls_back_to_master() {
        let fixture = RemoteFixture::with_base("master");
        let (manager, path) = cloned(&fixture);
        manager.create_sandbox_branch(&path, "fix/acme-api/deadbeef").unwrap();
        assert_eq!(
            manager.current_branch(&path).as_deref(),
            Some("fix/acme-api/deadbeef")
        );
    }

    #[test]
    fn apply_patch_reports_changes_and_cleans_up() {
        let fixture = RemoteFixture::new();
        let diff = fixture.make_patch("app.txt", "version = 2\n");
        let (manager, path) = cloned(&fixture);
        manager.create_sandbox_branch(&path, "fix/acme-api/1a2b3c4d").unwrap();

        let outcome = manager.apply_patch(&path, &diff).unwrap();
        assert_eq!(outcome.changed_files, vec!["app.txt".to_string()]);
        assert_eq!(leftover_patch_files(&path), 0);
        assert_eq!(
            std::fs::read_to_string(path.join("app.txt")).unwrap(),
            "version = 2\n"
        );
    }

    #[test]
    fn rejected_patch_still_removes_temp_file() {
        let fixture = RemoteFixture::new();
        let (manager, path) = cloned(&fixture);
        let garbage = "diff --git a/missing.txt b/missing.txt\n--- a/missing.txt\n+++ b/missing.txt\n@@ -1 +1 @@\n-nothing\n+here\n";

        let err = manager.apply_patch(&path, garbage).unwrap_err();
        assert!(matches!(err, GitError::PatchRejected { .. }));
        assert_eq!(leftover_patch_files(&path), 0);
        assert!(manager.changed_files(&path).unwrap().is_empty());
    }

    #[test]
    fn empty_patch_is_a_noop() {
        let fixture = RemoteFixture::new();
        let (manager, path) = cloned(&fixture);
        let outcome = manager.apply_patch(&path, "  \n").unwrap();
        assert!(!outcome.has_changes());
    }

    #[test]
    fn commit_without_changes_fails() {
        let fixture = RemoteFixture::new();
        let (manager, path) = cloned(&fixture);
        assert!(matches!(
            manager.commit(&path, "nothing"),
            Err(GitError::NothingToCommit)
        ));
    }

    #[test]
    fn diff_between_base_and_sandbox() {
        let fixture = RemoteFixture::new();
        let diff = fixture.make_patch("README.md", "hello\nworld\n");
        let (manager, path) = cloned(&fixture);
        manager.create_sandbox_branch(&path, "fix/acme-api/aaaa0000").unwrap();
        manager.apply_patch(&path, &diff).unwrap();
        manager.commit(&path, "fix").unwrap();

        let rendered = manager.diff(&path, "main", "fix/acme-api/aaaa0000").unwrap();
        assert!(rendered.contains("+world"));
        assert!(manager.diff(&path, "main", "no-such-branch").is_err());
    }

    #[test]
    fn merge_and_push_deletes_fix_branch() {
        let fixture = RemoteFixture::new();
        let diff = fixture.make_patch("app.txt", "version = 3\n");
        let (manager, path) = cloned(&fixture);
        let branch = "fix/acme-api/1a2b3c4d";
        manager.create_sandbox_branch(&path, branch).unwrap();
        manager.apply_patch(&path, &diff).unwrap();
        manager.commit(&path, "fix").unwrap();
        manager.push_branch(&path, branch).unwrap();
        assert!(fixture.origin_has_branch(branch));

        let outcome = manager.merge_and_push(&path, branch, "main").unwrap();
        assert!(outcome.cleanup.local_deleted);
        assert!(outcome.cleanup.remote_deleted);
        assert!(!fixture.origin_has_branch(branch));
        assert_eq!(
            fixture.origin_file("main", "app.txt").as_deref(),
            Some("version = 3\n")
        );
        let parents = git(&path, &["rev-list", "--parents", "-n", "1", "HEAD"]);
        assert_eq!(parents.split_whitespace().count(), 3);
    }

    #[test]
    fn merge_survives_unpushed_branch() {
        let fixture = RemoteFixture::new();
        let diff = fixture.make_patch("README.md", "hello\nagain\n");
        let (manager, path) = cloned(&fixture);
        let branch = "fix/acme-api/bbbb1111";
        manager.create_sandbox_branch(&path, branch).unwrap();
        manager.apply_patch(&path, &diff).unwrap();
        manager.commit(&path, "fix").unwrap();

        let outcome = manager.merge_and_push(&path, branch, "main").unwrap();
        assert!(outcome.cleanup.local_deleted);
        assert!(!outcome.cleanup.remote_deleted);
    }

    #[test]
    fn access_checks_against_local_remote() {
        let fixture = RemoteFixture::new();
        let manager = CliGit::default();
        let url = fixture.origin_url();
        manager.check_connection(&url, None).unwrap();
        manager.check_read_access(&url, None).unwrap();
        manager.check_write_access(&url, None).unwrap();

        let branches = git(fixture.origin(), &["branch", "--list"]);
        assert!(!branches.contains("night-agent-write-check"));
    }

    #[test]
    fn access_checks_fail_for_missing_remote() {
        let fixture = RemoteFixture::new();
        let manager = CliGit::default();
        let url = fixture.root().join("missing.git").display().to_string();
        assert!(manager.check_connection(&url, None).is_err());
        assert!(manager.check_read_access(&url, None).is_err());
        assert!(manager.check_write_access(&url, None).is_err());
    }
}
