use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git {command} timed out after {secs}s")]
    Timeout { command: String, secs: u64 },
    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("failed to spawn git: {reason}")]
    Spawn { reason: String },
    #[error("io error: {reason}")]
    Io { reason: String },
    #[error("not a git repository: {path}")]
    NotARepository { path: String },
    #[error("no main or master branch found")]
    NoBaseBranch,
    #[error("patch did not apply: {reason}")]
    PatchRejected { reason: String },
    #[error("nothing to commit")]
    NothingToCommit,
    #[error("merge of {from} into {to} failed: {reason}")]
    MergeConflict {
        from: String,
        to: String,
        reason: String,
    },
    #[error("backend error: {reason}")]
    Backend { reason: String },
}

impl From<std::io::Error> for GitError {
    fn from(value: std::io::Error) -> Self {
        Self::Io {
            reason: value.to_string(),
        }
    }
}

pub(crate) fn map_backend_error<E: std::fmt::Display>(
    context: &'static str,
) -> impl FnOnce(E) -> GitError {
    move |err| GitError::Backend {
        reason: format!("{context}: {err}"),
    }
}
