use crate::util::{decode_enum, decode_json, encode_enum, encode_json, from_rfc3339, internal, to_rfc3339};
use na_core::OrchestratorError;
use na_core::events::EventRepository;
use na_events::types::EventRecord;
use rusqlite::Connection;
use ulid::Ulid;

pub struct EventRepo<'a> {
    pub conn: &'a Connection,
}

impl<'a> EventRepo<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl EventRepository for EventRepo<'_> {
    fn append(&self, mut event: EventRecord) -> Result<EventRecord, OrchestratorError> {
        event.seq = next_seq(self.conn)?;
        event.id = format!("evt_{}", Ulid::new());
        let sql = "INSERT INTO events (id, seq, at, correlation_id, source, body_json) VALUES (?1, ?2, ?3, ?4, ?5, ?6)";
        let params = (
            event.id.as_str(),
            event.seq,
            to_rfc3339(&event.at),
            event.correlation_id.as_deref(),
            encode_enum(&event.source).map_err(internal)?,
            encode_json(&event.body).map_err(internal)?,
        );
        self.conn.execute(sql, params).map_err(internal)?;
        Ok(event)
    }

    fn list(
        &self,
        after: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<EventRecord>, OrchestratorError> {
        let mut sql = "SELECT id, seq, at, correlation_id, source, body_json FROM events".to_string();
        if after.is_some() {
            sql.push_str(" WHERE seq > ?1");
        }
        sql.push_str(" ORDER BY seq ASC");
        match (after, limit) {
            (Some(_), Some(_)) => sql.push_str(" LIMIT ?2"),
            (None, Some(_)) => sql.push_str(" LIMIT ?1"),
            _ => {}
        }

        let mut stmt = self.conn.prepare(&sql).map_err(internal)?;
        let mut rows = match (after, limit) {
            (Some(after), Some(limit)) => stmt.query(rusqlite::params![after, limit]),
            (Some(after), None) => stmt.query(rusqlite::params![after]),
            (None, Some(limit)) => stmt.query(rusqlite::params![limit]),
            (None, None) => stmt.query([]),
        }
        .map_err(internal)?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().map_err(internal)? {
            events.push(map_event_row(row)?);
        }
        Ok(events)
    }

    fn for_execution(&self, execution_id: &str) -> Result<Vec<EventRecord>, OrchestratorError> {
        let sql = "SELECT id, seq, at, correlation_id, source, body_json FROM events
                   WHERE json_extract(body_json, '$.payload.execution_id') = ?1
                   ORDER BY seq ASC";
        let mut stmt = self.conn.prepare(sql).map_err(internal)?;
        let mut rows = stmt.query([execution_id]).map_err(internal)?;

        let mut events = Vec::new();
        while let Some(row) = rows.next().map_err(internal)? {
            events.push(map_event_row(row)?);
        }
        Ok(events)
    }
}

fn map_event_row(row: &rusqlite::Row<'_>) -> Result<EventRecord, OrchestratorError> {
    let at: String = row.get(2).map_err(internal)?;
    let source: String = row.get(4).map_err(internal)?;
    let body_json: String = row.get(5).map_err(internal)?;

    Ok(EventRecord {
        id: row.get(0).map_err(internal)?,
        seq: row.get(1).map_err(internal)?,
        at: from_rfc3339(&at).map_err(internal)?,
        correlation_id: row.get(3).map_err(internal)?,
        source: decode_enum(&source).map_err(internal)?,
        body: decode_json(&body_json).map_err(internal)?,
    })
}

fn next_seq(conn: &Connection) -> Result<i64, OrchestratorError> {
    let seq: i64 = conn
        .query_row("SELECT COALESCE(MAX(seq), 0) FROM events", [], |row| {
            row.get(0)
        })
        .map_err(internal)?;
    Ok(seq + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::with_test_db;
    use chrono::Utc;
    use na_events::types::EventSource;
    use serde_json::json;

    fn record(kind: &str) -> EventRecord {
        EventRecord {
            id: String::new(),
            seq: 0,
            at: Utc::now(),
            correlation_id: Some("corr-1".to_string()),
            source: EventSource::Workflow,
            body: json!({"type": kind, "payload": {}}),
        }
    }

    #[test]
    fn append_assigns_sequence_and_id() {
        let conn = with_test_db().unwrap();
        let repo = EventRepo::new(&conn);
        let first = repo.append(record("AnomalyIngested")).unwrap();
        let second = repo.append(record("AnomalyReviewed")).unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert!(first.id.starts_with("evt_"));
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn list_pages_after_sequence() {
        let conn = with_test_db().unwrap();
        let repo = EventRepo::new(&conn);
        for kind in ["AnomalyIngested", "AnomalyReviewed", "AnalysisSaved"] {
            repo.append(record(kind)).unwrap();
        }

        assert_eq!(repo.list(None, None).unwrap().len(), 3);

        let limited = repo.list(None, Some(2)).unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].kind(), Some("AnomalyIngested"));

        let after = repo.list(Some(1), None).unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(after[0].seq, 2);

        let page = repo.list(Some(1), Some(1)).unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].kind(), Some("AnomalyReviewed"));
        assert_eq!(page[0].source, EventSource::Workflow);
        assert_eq!(page[0].correlation_id.as_deref(), Some("corr-1"));
    }

    #[test]
    fn events_are_found_by_execution_id() {
        let conn = with_test_db().unwrap();
        let repo = EventRepo::new(&conn);
        let mut dispatched = record("WorkflowDispatched");
        dispatched.body = json!({"type": "WorkflowDispatched", "payload": {"execution_id": "exec_1"}});
        let mut started = record("WorkflowStarted");
        started.body = json!({"type": "WorkflowStarted", "payload": {"execution_id": "exec_1"}});
        let mut other = record("WorkflowFailed");
        other.body = json!({"type": "WorkflowFailed", "payload": {"execution_id": "exec_2"}});
        for event in [dispatched, other, started] {
            repo.append(event).unwrap();
        }
        repo.append(record("AnomalyIngested")).unwrap();

        let found = repo.for_execution("exec_1").unwrap();
        let kinds: Vec<_> = found.iter().filter_map(EventRecord::kind).collect();
        assert_eq!(kinds, ["WorkflowDispatched", "WorkflowStarted"]);
        assert!(repo.for_execution("exec_9").unwrap().is_empty());
    }
}
