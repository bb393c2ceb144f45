pub mod cli;
pub mod command;
pub mod error;
pub mod manager;
pub mod paths;
pub mod refs;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use crate::cli::CliGit;
pub use crate::command::GitOptions;
pub use crate::error::GitError;
pub use crate::manager::{ApplyOutcome, BranchCleanup, GitManager, MergeOutcome};
pub use crate::paths::{authenticated_url, fix_branch_name, repo_name, working_copy_path};
