//! Throwaway repositories for tests: a bare `origin` plus a seeded clone.

use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

pub struct RemoteFixture {
    root: TempDir,
    origin: PathBuf,
    seed: PathBuf,
    base: String,
}

impl RemoteFixture {
    pub fn new() -> Self {
        Self::with_base("main")
    }

    pub fn with_base(base: &str) -> Self {
        let root = TempDir::new().expect("tempdir");
        let origin = root.path().join("remotes").join("acme").join("acme-api.git");
        let seed = root.path().join("seed");
        std::fs::create_dir_all(&origin).expect("origin dir");

        git(&origin, &["init", "--bare", "--quiet"]);
        git(&origin, &["symbolic-ref", "HEAD", &format!("refs/heads/{base}")]);

        git(root.path(), &["init", "--quiet", "seed"]);
        git(&seed, &["symbolic-ref", "HEAD", &format!("refs/heads/{base}")]);
        std::fs::write(seed.join("README.md"), "hello\n").expect("write readme");
        std::fs::write(seed.join("app.txt"), "version = 1\n").expect("write app");
        git(&seed, &["add", "-A"]);
        git(&seed, &["commit", "--quiet", "-m", "initial"]);
        git(
            &seed,
            &["remote", "add", "origin", &origin.display().to_string()],
        );
        git(&seed, &["push", "--quiet", "-u", "origin", base]);

        Self {
            root,
            origin,
            seed,
            base: base.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn seed(&self) -> &Path {
        &self.seed
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }

    pub fn origin_url(&self) -> String {
        self.origin.display().to_string()
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn workspace(&self) -> PathBuf {
        self.root.path().join("workspace")
    }

    pub fn git_seed(&self, args: &[&str]) -> String {
        git(&self.seed, args)
    }

    /// Unified diff (with blob ids) that writes `content` to `file` on top of
    /// the current base. The seed is left clean.
    pub fn make_patch(&self, file: &str, content: &str) -> String {
        std::fs::write(self.seed.join(file), content).expect("write patch file");
        git(&self.seed, &["add", "-A"]);
        let diff = git(&self.seed, &["diff", "--cached"]);
        git(&self.seed, &["reset", "--quiet", "--hard", "HEAD"]);
        git(&self.seed, &["clean", "-fdq"]);
        diff
    }

    /// Does `branch` exist on origin?
    pub fn origin_has_branch(&self, branch: &str) -> bool {
        Command::new("git")
            .args(["rev-parse", "--verify", "--quiet"])
            .arg(format!("refs/heads/{branch}"))
            .current_dir(&self.origin)
            .output()
            .map(|out| out.status.success())
            .unwrap_or(false)
    }

    /// Contents of `file` at the tip of `branch` on origin.
    pub fn origin_file(&self, branch: &str, file: &str) -> Option<String> {
        let out = Command::new("git")
            .arg("show")
            .arg(format!("{branch}:{file}"))
            .current_dir(&self.origin)
            .output()
            .ok()?;
        out.status
            .success()
            .then(|| String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

impl Default for RemoteFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs git in `dir` with a fixed identity, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(["-c", "user.name=Fixture", "-c", "user.email=fixture@example.com"])
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("spawn git");
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).into_owned()
}
