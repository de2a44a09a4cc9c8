mod recorder;

pub use recorder::spawn_history_recorder;

use crate::models::{CoreError, HistoryRecord};

pub type PersistenceResult<T> = Result<T, CoreError>;

pub trait MigrationStore: Send + Sync {
    fn current_version(&self) -> PersistenceResult<i64>;

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()>;
}

/// Durable log of operations that reached an end state.
pub trait OperationHistoryStore: Send + Sync {
    fn record(&self, record: &HistoryRecord) -> PersistenceResult<()>;

    /// Newest first.
    fn list_recent(&self, limit: usize) -> PersistenceResult<Vec<HistoryRecord>>;
}
