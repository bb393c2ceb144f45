use crate::error::RepoError;
use crate::types::{RepoId, Repository};

pub trait RepoRepository {
    fn get(&self, id: &RepoId) -> Result<Option<Repository>, RepoError>;
    fn list(&self) -> Result<Vec<Repository>, RepoError>;
    fn upsert(&self, repository: &Repository) -> Result<Repository, RepoError>;
    fn set_verified(&self, id: &RepoId, verified: bool) -> Result<Repository, RepoError>;
}
