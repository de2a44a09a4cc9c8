use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::models::{CoreError, CoreErrorKind, HistoryRecord, OperationStatus};
use crate::persistence::{OperationHistoryStore, PersistenceResult};
use crate::tracking::{OperationTracker, TrackerEvent};

/// Writes a history row for every finished or cancelled operation the tracker
/// reports. The task ends once the tracker and all its handles are dropped.
pub fn spawn_history_recorder(
    tracker: &OperationTracker,
    store: Arc<dyn OperationHistoryStore>,
) -> JoinHandle<()> {
    let mut events = tracker.subscribe();
    tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "history recorder fell behind the event stream");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let Some(record) = history_record(&event) else {
                continue;
            };
            if let Err(error) = persist_record(store.clone(), record).await {
                tracing::error!(
                    category = %event.key().category,
                    subject = %event.key().subject,
                    kind = ?error.kind,
                    message = %error.message,
                    "failed to persist operation history"
                );
            }
        }
    })
}

fn history_record(event: &TrackerEvent) -> Option<HistoryRecord> {
    match event {
        TrackerEvent::Finished { snapshot } => Some(HistoryRecord::from_snapshot(snapshot)),
        // A terminal snapshot was already written when it finished; cancelling
        // during the grace window only clears it locally.
        TrackerEvent::Cancelled {
            snapshot: Some(snapshot),
            ..
        } if !snapshot.is_terminal() => {
            let mut record = HistoryRecord::from_snapshot(snapshot);
            record.status = OperationStatus::Cancelled;
            record.finished_at = SystemTime::now();
            Some(record)
        }
        _ => None,
    }
}

async fn persist_record(
    store: Arc<dyn OperationHistoryStore>,
    record: HistoryRecord,
) -> PersistenceResult<()> {
    tokio::task::spawn_blocking(move || store.record(&record))
        .await
        .map_err(|join_error| {
            CoreError::new(
                CoreErrorKind::Internal,
                format!("history persistence join failure: {join_error}"),
            )
        })?
}
