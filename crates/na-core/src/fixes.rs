use crate::error::FixError;
use crate::types::{AnomalyId, Fix, FixId, FixStatus};

pub trait FixRepository {
    fn get(&self, id: &FixId) -> Result<Option<Fix>, FixError>;
    fn get_by_anomaly(&self, anomaly_id: &AnomalyId) -> Result<Option<Fix>, FixError>;
    /// Insert or overwrite the fix for `fix.anomaly_id`; `created_at` of an
    /// existing row is kept.
    fn upsert(&self, fix: &Fix) -> Result<Fix, FixError>;
    fn set_status(&self, id: &FixId, status: FixStatus) -> Result<Fix, FixError>;
    fn count_by_status(&self) -> Result<Vec<(FixStatus, u64)>, FixError>;
}
