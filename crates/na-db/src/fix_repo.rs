use crate::util::{decode_enum, encode_enum, fix_storage, from_rfc3339, to_rfc3339};
use na_core::error::FixError;
use na_core::fixes::FixRepository;
use na_core::types::{AnomalyId, Fix, FixId, FixStatus};
use rusqlite::Connection;

const COLUMNS: &str =
    "id, anomaly_id, diff, explanation, summary, branch, confidence, status, created_at, updated_at";

pub struct FixRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> FixRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn find(&self, column: &str, value: &str) -> Result<Option<Fix>, FixError> {
        let sql = format!("SELECT {COLUMNS} FROM fixes WHERE {column} = ?1");
        let mut stmt = self.conn.prepare(&sql).map_err(fix_storage)?;
        let mut rows = stmt.query([value]).map_err(fix_storage)?;
        let Some(row) = rows.next().map_err(fix_storage)? else {
            return Ok(None);
        };
        map_fix_row(row).map(Some)
    }
}

impl FixRepository for FixRepo<'_> {
    fn get(&self, id: &FixId) -> Result<Option<Fix>, FixError> {
        self.find("id", id.as_str())
    }

    fn get_by_anomaly(&self, anomaly_id: &AnomalyId) -> Result<Option<Fix>, FixError> {
        self.find("anomaly_id", anomaly_id.as_str())
    }

    fn upsert(&self, fix: &Fix) -> Result<Fix, FixError> {
        let sql = format!(
            "INSERT INTO fixes ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(anomaly_id) DO UPDATE SET
                diff = excluded.diff,
                explanation = excluded.explanation,
                summary = excluded.summary,
                branch = excluded.branch,
                confidence = excluded.confidence,
                status = excluded.status,
                updated_at = excluded.updated_at"
        );
        let params = (
            fix.id.as_str(),
            fix.anomaly_id.as_str(),
            fix.diff.as_str(),
            fix.explanation.as_str(),
            fix.summary.as_str(),
            fix.branch.as_str(),
            fix.confidence,
            encode_enum(&fix.status).map_err(fix_storage)?,
            to_rfc3339(&fix.created_at),
            to_rfc3339(&fix.updated_at),
        );
        self.conn.execute(&sql, params).map_err(fix_storage)?;
        self.get_by_anomaly(&fix.anomaly_id)?
            .ok_or(FixError::NotFound)
    }

    fn set_status(&self, id: &FixId, status: FixStatus) -> Result<Fix, FixError> {
        let changed = self
            .conn
            .execute(
                "UPDATE fixes SET status = ?1, updated_at = ?2 WHERE id = ?3",
                (
                    encode_enum(&status).map_err(fix_storage)?,
                    to_rfc3339(&chrono::Utc::now()),
                    id.as_str(),
                ),
            )
            .map_err(fix_storage)?;
        if changed == 0 {
            return Err(FixError::NotFound);
        }
        self.get(id)?.ok_or(FixError::NotFound)
    }

    fn count_by_status(&self) -> Result<Vec<(FixStatus, u64)>, FixError> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM fixes GROUP BY status")
            .map_err(fix_storage)?;
        let mut rows = stmt.query([]).map_err(fix_storage)?;
        let mut counts = Vec::new();
        while let Some(row) = rows.next().map_err(fix_storage)? {
            let status: String = row.get(0).map_err(fix_storage)?;
            let count: i64 = row.get(1).map_err(fix_storage)?;
            counts.push((
                decode_enum(&status).map_err(fix_storage)?,
                u64::try_from(count).unwrap_or_default(),
            ));
        }
        Ok(counts)
    }
}

fn map_fix_row(row: &rusqlite::Row<'_>) -> Result<Fix, FixError> {
    let id: String = row.get(0).map_err(fix_storage)?;
    let anomaly_id: String = row.get(1).map_err(fix_storage)?;
    let status: String = row.get(7).map_err(fix_storage)?;
    let created_at: String = row.get(8).map_err(fix_storage)?;
    let updated_at: String = row.get(9).map_err(fix_storage)?;

    Ok(Fix {
        id: FixId::new(id).map_err(fix_storage)?,
        anomaly_id: AnomalyId::new(anomaly_id).map_err(fix_storage)?,
        diff: row.get(2).map_err(fix_storage)?,
        explanation: row.get(3).map_err(fix_storage)?,
        summary: row.get(4).map_err(fix_storage)?,
        branch: row.get(5).map_err(fix_storage)?,
        confidence: row.get(6).map_err(fix_storage)?,
        status: decode_enum(&status).map_err(fix_storage)?,
        created_at: from_rfc3339(&created_at).map_err(fix_storage)?,
        updated_at: from_rfc3339(&updated_at).map_err(fix_storage)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::with_test_db;
    use chrono::{Duration, Utc};

    fn fix(status: FixStatus) -> Fix {
        let anomaly_id = AnomalyId::generate();
        let at = Utc::now() - Duration::minutes(5);
        Fix {
            id: FixId::for_anomaly(&anomaly_id),
            anomaly_id,
            diff: "diff --git a/app.py b/app.py\n".to_string(),
            explanation: "Guard the lookup".to_string(),
            summary: "Null user in handler".to_string(),
            branch: "fix/acme-api/3f2a9c1e".to_string(),
            confidence: 0.85,
            status,
            created_at: at,
            updated_at: at,
        }
    }

    #[test]
    fn upsert_inserts_then_overwrites_keeping_created_at() {
        let conn = with_test_db().unwrap();
        let repo = FixRepo::new(&conn);
        let original = fix(FixStatus::Pending);
        let stored = repo.upsert(&original).unwrap();
        assert_eq!(stored, original);

        let mut revised = original.clone();
        revised.diff = "diff --git a/other.py b/other.py\n".to_string();
        revised.status = FixStatus::Approved;
        revised.created_at = Utc::now();
        revised.updated_at = Utc::now();
        let stored = repo.upsert(&revised).unwrap();
        assert_eq!(stored.diff, revised.diff);
        assert_eq!(stored.status, FixStatus::Approved);
        assert_eq!(stored.created_at, original.created_at);

        let by_anomaly = repo.get_by_anomaly(&original.anomaly_id).unwrap().unwrap();
        assert_eq!(by_anomaly.id, original.id);
    }

    #[test]
    fn set_status_touches_updated_at() {
        let conn = with_test_db().unwrap();
        let repo = FixRepo::new(&conn);
        let original = repo.upsert(&fix(FixStatus::Approved)).unwrap();

        let applied = repo
            .set_status(&original.id, FixStatus::AppliedSandbox)
            .unwrap();
        assert_eq!(applied.status, FixStatus::AppliedSandbox);
        assert!(applied.updated_at > original.updated_at);

        let missing = FixId::for_anomaly(&AnomalyId::generate());
        assert!(matches!(
            repo.set_status(&missing, FixStatus::Merged),
            Err(FixError::NotFound)
        ));
    }

    #[test]
    fn counts_group_by_status() {
        let conn = with_test_db().unwrap();
        let repo = FixRepo::new(&conn);
        repo.upsert(&fix(FixStatus::Pending)).unwrap();
        repo.upsert(&fix(FixStatus::Merged)).unwrap();
        repo.upsert(&fix(FixStatus::Merged)).unwrap();

        let mut counts = repo.count_by_status().unwrap();
        counts.sort_by_key(|(status, _)| status.as_str());
        assert_eq!(
            counts,
            vec![(FixStatus::Merged, 2), (FixStatus::Pending, 1)]
        );
    }
}
