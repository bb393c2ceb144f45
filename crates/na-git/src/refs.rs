use crate::error::{GitError, map_backend_error};
use bstr::ByteSlice;
use std::collections::BTreeSet;
use std::path::Path;

pub(crate) fn open_repo(path: &Path) -> Result<gix::Repository, GitError> {
    gix::open(path).map_err(|_| GitError::NotARepository {
        path: path.display().to_string(),
    })
}

pub fn is_repository(path: &Path) -> bool {
    path.join(".git").exists() && open_repo(path).is_ok()
}

pub fn local_branch_exists(path: &Path, name: &str) -> Result<bool, GitError> {
    let repo = open_repo(path)?;
    Ok(repo.find_reference(&format!("refs/heads/{name}")).is_ok())
}

pub fn remote_branch_exists(path: &Path, name: &str) -> Result<bool, GitError> {
    let repo = open_repo(path)?;
    Ok(repo
        .find_reference(&format!("refs/remotes/origin/{name}"))
        .is_ok())
}

/// `main` if present locally or on origin, else `master`.
pub fn base_branch(path: &Path) -> Result<String, GitError> {
    for candidate in ["main", "master"] {
        if local_branch_exists(path, candidate)? || remote_branch_exists(path, candidate)? {
            return Ok(candidate.to_string());
        }
    }
    Err(GitError::NoBaseBranch)
}

/// Local heads plus `origin/*` with the remote prefix stripped and `HEAD`
/// skipped. Always contains `main` when neither `main` nor `master` exist.
pub fn branch_names(path: &Path) -> Result<Vec<String>, GitError> {
    let repo = open_repo(path)?;
    let platform = repo
        .references()
        .map_err(map_backend_error("references"))?;
    let mut names = BTreeSet::new();

    for reference in platform
        .local_branches()
        .map_err(map_backend_error("local branches"))?
    {
        let reference = reference.map_err(map_backend_error("local branch"))?;
        names.insert(reference.name().shorten().to_str_lossy().into_owned());
    }

    for reference in platform
        .remote_branches()
        .map_err(map_backend_error("remote branches"))?
    {
        let reference = reference.map_err(map_backend_error("remote branch"))?;
        let short = reference.name().shorten().to_str_lossy().into_owned();
        let Some(name) = short.strip_prefix("origin/") else {
            continue;
        };
        if name == "HEAD" {
            continue;
        }
        names.insert(name.to_string());
    }

    if !names.contains("main") && !names.contains("master") {
        names.insert("main".to_string());
    }
    Ok(names.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RemoteFixture;
    use tempfile::TempDir;

    #[test]
    fn branch_names_merge_local_and_remote() {
        let fixture = RemoteFixture::new();
        fixture.git_seed(&["branch", "feature/local"]);
        fixture.git_seed(&["push", "origin", "main:refs/heads/remote-only"]);
        fixture.git_seed(&["fetch", "origin"]);

        let names = branch_names(fixture.seed()).unwrap();
        assert!(names.contains(&"main".to_string()));
        assert!(names.contains(&"feature/local".to_string()));
        assert!(names.contains(&"remote-only".to_string()));
        assert!(!names.iter().any(|name| name == "HEAD" || name.starts_with("origin/")));
        assert_eq!(names.iter().filter(|name| *name == "main").count(), 1);
    }

    #[test]
    fn branch_names_adds_synthetic_main() {
        let fixture = RemoteFixture::with_base("trunk");
        let names = branch_names(fixture.seed()).unwrap();
        assert!(names.contains(&"trunk".to_string()));
        assert!(names.contains(&"main".to_string()));
    }

    #[test]
    fn base_branch_prefers_main_then_master() {
        let fixture = RemoteFixture::with_base("master");
        assert_eq!(base_branch(fixture.seed()).unwrap(), "master");

        let fixture = RemoteFixture::with_base("trunk");
        assert!(matches!(base_branch(fixture.seed()), Err(GitError::NoBaseBranch)));
    }

    #[test]
    fn open_rejects_plain_directories() {
        let dir = TempDir::new().unwrap();
        assert!(!is_repository(dir.path()));
        assert!(matches!(
            branch_names(dir.path()),
            Err(GitError::NotARepository { .. })
        ));
    }
}
