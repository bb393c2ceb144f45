use crate::util::{decode_enum, encode_enum, from_rfc3339, repo_storage, to_rfc3339};
use na_core::error::RepoError;
use na_core::repos::RepoRepository;
use na_core::types::{RepoId, Repository};
use rusqlite::Connection;

const COLUMNS: &str = "id, url, protocol, credential_ref, verified, created_at, updated_at";

pub struct RepoRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> RepoRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl RepoRepository for RepoRepo<'_> {
    fn get(&self, id: &RepoId) -> Result<Option<Repository>, RepoError> {
        let sql = format!("SELECT {COLUMNS} FROM repositories WHERE id = ?1");
        let mut stmt = self.conn.prepare(&sql).map_err(repo_storage)?;
        let mut rows = stmt.query([id.as_str()]).map_err(repo_storage)?;
        let Some(row) = rows.next().map_err(repo_storage)? else {
            return Ok(None);
        };
        map_repo_row(row).map(Some)
    }

    fn list(&self) -> Result<Vec<Repository>, RepoError> {
        let sql = format!("SELECT {COLUMNS} FROM repositories ORDER BY id ASC");
        let mut stmt = self.conn.prepare(&sql).map_err(repo_storage)?;
        let mut rows = stmt.query([]).map_err(repo_storage)?;
        let mut repos = Vec::new();
        while let Some(row) = rows.next().map_err(repo_storage)? {
            repos.push(map_repo_row(row)?);
        }
        Ok(repos)
    }

    fn upsert(&self, repository: &Repository) -> Result<Repository, RepoError> {
        let sql = format!(
            "INSERT INTO repositories ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(id) DO UPDATE SET
                url = excluded.url,
                protocol = excluded.protocol,
                credential_ref = excluded.credential_ref,
                verified = excluded.verified,
                updated_at = excluded.updated_at"
        );
        let params = (
            repository.id.as_str(),
            repository.url.as_str(),
            encode_enum(&repository.protocol).map_err(repo_storage)?,
            repository.credential_ref.as_deref(),
            repository.verified,
            to_rfc3339(&repository.created_at),
            to_rfc3339(&repository.updated_at),
        );
        self.conn.execute(&sql, params).map_err(repo_storage)?;
        self.get(&repository.id)?.ok_or(RepoError::RepoNotFound)
    }

    fn set_verified(&self, id: &RepoId, verified: bool) -> Result<Repository, RepoError> {
        let changed = self
            .conn
            .execute(
                "UPDATE repositories SET verified = ?1, updated_at = ?2 WHERE id = ?3",
                (verified, to_rfc3339(&chrono::Utc::now()), id.as_str()),
            )
            .map_err(repo_storage)?;
        if changed == 0 {
            return Err(RepoError::RepoNotFound);
        }
        self.get(id)?.ok_or(RepoError::RepoNotFound)
    }
}

fn map_repo_row(row: &rusqlite::Row<'_>) -> Result<Repository, RepoError> {
    let id: String = row.get(0).map_err(repo_storage)?;
    let protocol: String = row.get(2).map_err(repo_storage)?;
    let created_at: String = row.get(5).map_err(repo_storage)?;
    let updated_at: String = row.get(6).map_err(repo_storage)?;

    Ok(Repository {
        id: RepoId::new(id).map_err(repo_storage)?,
        url: row.get(1).map_err(repo_storage)?,
        protocol: decode_enum(&protocol).map_err(repo_storage)?,
        credential_ref: row.get(3).map_err(repo_storage)?,
        verified: row.get(4).map_err(repo_storage)?,
        created_at: from_rfc3339(&created_at).map_err(repo_storage)?,
        updated_at: from_rfc3339(&updated_at).map_err(repo_storage)?,
    })
}
