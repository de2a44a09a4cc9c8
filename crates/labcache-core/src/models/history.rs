use std::time::SystemTime;

use crate::models::{OperationKey, OperationSnapshot, OperationStatus};

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HistoryRecord {
    pub key: OperationKey,
    pub status: OperationStatus,
    pub error: Option<String>,
    pub started_at: SystemTime,
    pub finished_at: SystemTime,
}

impl HistoryRecord {
    pub fn from_snapshot(snapshot: &OperationSnapshot) -> Self {
        Self {
            key: snapshot.key.clone(),
            status: snapshot.status,
            error: snapshot.error.clone(),
            started_at: snapshot.started_at,
            finished_at: snapshot.finished_at.unwrap_or(snapshot.updated_at),
        }
    }
}
