pub mod anomaly_repo;
pub mod event_repo;
pub mod fix_repo;
pub mod repo_repo;
pub mod schema;
pub mod store;
pub mod util;

pub use crate::store::DbStore;
