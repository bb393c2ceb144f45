use crate::util::internal;
use na_core::OrchestratorError;
use na_core::store::Store;
use rusqlite::Connection;

use crate::anomaly_repo::AnomalyRepo;
use crate::event_repo::EventRepo;
use crate::fix_repo::FixRepo;
use crate::repo_repo::RepoRepo;

/// SQLite-backed [`Store`] over a single connection.
pub struct DbStore {
    conn: Connection,
}

impl DbStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Store for DbStore {
    type Anomalies<'a>
        = AnomalyRepo<'a>
    where
        Self: 'a;
    type Fixes<'a>
        = FixRepo<'a>
    where
        Self: 'a;
    type Repos<'a>
        = RepoRepo<'a>
    where
        Self: 'a;
    type Events<'a>
        = EventRepo<'a>
    where
        Self: 'a;

    fn anomalies(&self) -> Self::Anomalies<'_> {
        AnomalyRepo::new(&self.conn)
    }

    fn fixes(&self) -> Self::Fixes<'_> {
        FixRepo::new(&self.conn)
    }

    fn repos(&self) -> Self::Repos<'_> {
        RepoRepo::new(&self.conn)
    }

    fn events(&self) -> Self::Events<'_> {
        EventRepo::new(&self.conn)
    }

    fn with_tx<F, T>(&self, f: F) -> Result<T, OrchestratorError>
    where
        F: FnOnce(&Self) -> Result<T, OrchestratorError>,
    {
        self.conn.execute_batch("BEGIN IMMEDIATE").map_err(internal)?;
        match f(self) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT").map_err(internal)?;
                Ok(value)
            }
            Err(err) => {
                self.conn.execute_batch("ROLLBACK").map_err(internal)?;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::with_test_db;
    use chrono::Utc;
    use na_core::repos::RepoRepository;
    use na_core::types::{Protocol, RepoId, Repository};

    fn repository() -> Repository {
        Repository {
            id: RepoId::new("api".to_string()).unwrap(),
            url: "https://github.com/acme/api.git".to_string(),
            protocol: Protocol::Https,
            credential_ref: None,
            verified: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn failed_transaction_rolls_back() {
        let store = DbStore::new(with_test_db().unwrap());
        let result: Result<(), OrchestratorError> = store.with_tx(|store| {
            store.repos().upsert(&repository())?;
            Err(OrchestratorError::internal("boom"))
        });
        assert!(result.is_err());
        assert!(store.repos().list().unwrap().is_empty());
    }

    #[test]
    fn committed_transaction_persists() {
        let store = DbStore::new(with_test_db().unwrap());
        store
            .with_tx(|store| {
                store.repos().upsert(&repository())?;
                Ok(())
            })
            .unwrap();
        assert_eq!(store.repos().list().unwrap().len(), 1);
    }
}
