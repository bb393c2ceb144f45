use crate::error::AnomalyError;
use crate::types::{Anomaly, AnomalyFilter, AnomalyId, AnomalyStatus};
use serde_json::{Map, Value};

pub trait AnomalyRepository {
    fn create(&self, anomaly: &Anomaly) -> Result<(), AnomalyError>;
    fn get(&self, id: &AnomalyId) -> Result<Option<Anomaly>, AnomalyError>;
    fn list(&self, filter: &AnomalyFilter) -> Result<Vec<Anomaly>, AnomalyError>;
    /// Replaces status and context together and bumps `updated_at`.
    fn update(
        &self,
        id: &AnomalyId,
        status: AnomalyStatus,
        context: &Map<String, Value>,
    ) -> Result<Anomaly, AnomalyError>;
    fn count_by_status(&self) -> Result<Vec<(AnomalyStatus, u64)>, AnomalyError>;
}
