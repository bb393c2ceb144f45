use crate::util::{
    anomaly_storage, decode_enum, decode_json, encode_enum, encode_json, from_rfc3339, to_rfc3339,
};
use na_core::anomalies::AnomalyRepository;
use na_core::error::AnomalyError;
use na_core::types::{Anomaly, AnomalyFilter, AnomalyId, AnomalyStatus, RepoId};
use rusqlite::Connection;
use serde_json::{Map, Value};

const COLUMNS: &str = "id, repo_id, status, context_json, created_at, updated_at";

pub struct AnomalyRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> AnomalyRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl AnomalyRepository for AnomalyRepo<'_> {
    fn create(&self, anomaly: &Anomaly) -> Result<(), AnomalyError> {
        let sql = format!("INSERT INTO anomalies ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6)");
        let params = (
            anomaly.id.as_str(),
            anomaly.repo_id.as_str(),
            encode_enum(&anomaly.status).map_err(anomaly_storage)?,
            encode_json(&anomaly.context).map_err(anomaly_storage)?,
            to_rfc3339(&anomaly.created_at),
            to_rfc3339(&anomaly.updated_at),
        );
        self.conn.execute(&sql, params).map_err(anomaly_storage)?;
        Ok(())
    }

    fn get(&self, id: &AnomalyId) -> Result<Option<Anomaly>, AnomalyError> {
        let sql = format!("SELECT {COLUMNS} FROM anomalies WHERE id = ?1");
        let mut stmt = self.conn.prepare(&sql).map_err(anomaly_storage)?;
        let mut rows = stmt.query([id.as_str()]).map_err(anomaly_storage)?;
        let Some(row) = rows.next().map_err(anomaly_storage)? else {
            return Ok(None);
        };
        map_anomaly_row(row).map(Some)
    }

    fn list(&self, filter: &AnomalyFilter) -> Result<Vec<Anomaly>, AnomalyError> {
        let mut sql = format!("SELECT {COLUMNS} FROM anomalies");
        let mut clauses = Vec::new();
        let mut params: Vec<String> = Vec::new();
        if let Some(status) = filter.status {
            params.push(encode_enum(&status).map_err(anomaly_storage)?);
            clauses.push(format!("status = ?{}", params.len()));
        }
        if let Some(repo_id) = &filter.repo_id {
            params.push(repo_id.as_str().to_string());
            clauses.push(format!("repo_id = ?{}", params.len()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at DESC, id ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut stmt = self.conn.prepare(&sql).map_err(anomaly_storage)?;
        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter()))
            .map_err(anomaly_storage)?;
        let mut anomalies = Vec::new();
        while let Some(row) = rows.next().map_err(anomaly_storage)? {
            anomalies.push(map_anomaly_row(row)?);
        }
        Ok(anomalies)
    }

    fn update(
        &self,
        id: &AnomalyId,
        status: AnomalyStatus,
        context: &Map<String, Value>,
    ) -> Result<Anomaly, AnomalyError> {
        let changed = self
            .conn
            .execute(
                "UPDATE anomalies SET status = ?1, context_json = ?2, updated_at = ?3 WHERE id = ?4",
                (
                    encode_enum(&status).map_err(anomaly_storage)?,
                    encode_json(context).map_err(anomaly_storage)?,
                    to_rfc3339(&chrono::Utc::now()),
                    id.as_str(),
                ),
            )
            .map_err(anomaly_storage)?;
        if changed == 0 {
            return Err(AnomalyError::NotFound);
        }
        self.get(id)?.ok_or(AnomalyError::NotFound)
    }

    fn count_by_status(&self) -> Result<Vec<(AnomalyStatus, u64)>, AnomalyError> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM anomalies GROUP BY status")
            .map_err(anomaly_storage)?;
        let mut rows = stmt.query([]).map_err(anomaly_storage)?;
        let mut counts = Vec::new();
        while let Some(row) = rows.next().map_err(anomaly_storage)? {
            let status: String = row.get(0).map_err(anomaly_storage)?;
            let count: i64 = row.get(1).map_err(anomaly_storage)?;
            counts.push((
                decode_enum(&status).map_err(anomaly_storage)?,
                u64::try_from(count).unwrap_or_default(),
            ));
        }
        Ok(counts)
    }
}

fn map_anomaly_row(row: &rusqlite::Row<'_>) -> Result<Anomaly, AnomalyError> {
    let id: String = row.get(0).map_err(anomaly_storage)?;
    let repo_id: String = row.get(1).map_err(anomaly_storage)?;
    let status: String = row.get(2).map_err(anomaly_storage)?;
    let context_json: String = row.get(3).map_err(anomaly_storage)?;
    let created_at: String = row.get(4).map_err(anomaly_storage)?;
    let updated_at: String = row.get(5).map_err(anomaly_storage)?;

    Ok(Anomaly {
        id: AnomalyId::new(id).map_err(anomaly_storage)?,
        repo_id: RepoId::new(repo_id).map_err(anomaly_storage)?,
        status: decode_enum(&status).map_err(anomaly_storage)?,
        context: decode_json(&context_json).map_err(anomaly_storage)?,
        created_at: from_rfc3339(&created_at).map_err(anomaly_storage)?,
        updated_at: from_rfc3339(&updated_at).map_err(anomaly_storage)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::with_test_db;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn anomaly(repo: &str, status: AnomalyStatus, offset_secs: i64) -> Anomaly {
        let at = Utc::now() + Duration::seconds(offset_secs);
        let Value::Object(context) = json!({"type": "Latency Spike", "message": "slow"}) else {
            unreachable!()
        };
        Anomaly {
            id: AnomalyId::generate(),
            repo_id: RepoId::new(repo.to_string()).unwrap(),
            status,
            context,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn create_then_get() {
        let conn = with_test_db().unwrap();
        let repo = AnomalyRepo::new(&conn);
        let created = anomaly("repo-1", AnomalyStatus::Pending, 0);
        repo.create(&created).unwrap();

        let loaded = repo.get(&created.id).unwrap().unwrap();
        assert_eq!(loaded.id, created.id);
        assert_eq!(loaded.status, AnomalyStatus::Pending);
        assert_eq!(loaded.context["message"], "slow");
        assert!(repo.get(&AnomalyId::generate()).unwrap().is_none());
    }

    #[test]
    fn update_replaces_status_and_context() {
        let conn = with_test_db().unwrap();
        let repo = AnomalyRepo::new(&conn);
        let mut created = anomaly("repo-1", AnomalyStatus::Pending, 0);
        repo.create(&created).unwrap();

        created
            .context
            .insert("verified_critical".to_string(), json!(true));
        let updated = repo
            .update(&created.id, AnomalyStatus::Validated, &created.context)
            .unwrap();
        assert_eq!(updated.status, AnomalyStatus::Validated);
        assert_eq!(updated.context["verified_critical"], true);
        assert_eq!(updated.context["type"], "Latency Spike");
        assert_eq!(updated.created_at, created.created_at);

        assert!(matches!(
            repo.update(&AnomalyId::generate(), AnomalyStatus::Validated, &created.context),
            Err(AnomalyError::NotFound)
        ));
    }

    #[test]
    fn list_filters_and_orders_newest_first() {
        let conn = with_test_db().unwrap();
        let repo = AnomalyRepo::new(&conn);
        let old = anomaly("repo-1", AnomalyStatus::Pending, -60);
        let new = anomaly("repo-1", AnomalyStatus::Pending, 0);
        let other = anomaly("repo-2", AnomalyStatus::Resolved, 0);
        for item in [&old, &new, &other] {
            repo.create(item).unwrap();
        }

        let pending = repo
            .list(&AnomalyFilter {
                status: Some(AnomalyStatus::Pending),
                ..AnomalyFilter::default()
            })
            .unwrap();
        let ids: Vec<_> = pending.iter().map(|item| item.id.clone()).collect();
        assert_eq!(ids, vec![new.id.clone(), old.id.clone()]);

        let by_repo = repo
            .list(&AnomalyFilter {
                repo_id: Some(RepoId::new("repo-2".to_string()).unwrap()),
                limit: Some(5),
                ..AnomalyFilter::default()
            })
            .unwrap();
        assert_eq!(by_repo.len(), 1);
        assert_eq!(by_repo[0].id, other.id);

        let limited = repo
            .list(&AnomalyFilter {
                limit: Some(1),
                ..AnomalyFilter::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn counts_group_by_status() {
        let conn = with_test_db().unwrap();
        let repo = AnomalyRepo::new(&conn);
        repo.create(&anomaly("repo-1", AnomalyStatus::Pending, 0)).unwrap();
        repo.create(&anomaly("repo-1", AnomalyStatus::Pending, 1)).unwrap();
        repo.create(&anomaly("repo-1", AnomalyStatus::Resolved, 2)).unwrap();

        let mut counts = repo.count_by_status().unwrap();
        counts.sort();
        assert_eq!(
            counts,
            vec![(AnomalyStatus::Pending, 2), (AnomalyStatus::Resolved, 1)]
        );
    }
}
