use crate::error::OrchestratorError;
use na_events::types::EventRecord;

pub trait EventRepository {
    fn append(&self, event: EventRecord) -> Result<EventRecord, OrchestratorError>;
    fn list(
        &self,
        after: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<EventRecord>, OrchestratorError>;

    /// Events whose payload carries `execution_id`, oldest first.
    fn for_execution(&self, execution_id: &str) -> Result<Vec<EventRecord>, OrchestratorError>;
}
