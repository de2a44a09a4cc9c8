use crate::models::{JobAction, OperationKey};
use crate::tracking::{OperationTracker, TrackerEvent, TrackerResult};

impl OperationTracker {
    /// Requests remote cancellation, then drops local tracking for `key`
    /// whatever the remote answered. A failed remote call is reported through
    /// the event stream and the returned error; the remote job may keep running
    /// untracked. Sources without remote cancellation only lose local tracking.
    pub async fn cancel(&self, key: &OperationKey) -> TrackerResult<()> {
        let remote = if self.source.supports(key.category, JobAction::Cancel) {
            tracing::info!(category = %key.category, subject = %key.subject, "requesting remote job cancellation");
            self.source.cancel(key.clone()).await
        } else {
            tracing::debug!(category = %key.category, subject = %key.subject, "source cannot cancel remotely; dropping local tracking");
            Ok(())
        };

        let snapshot = self.release(key);
        self.emit(TrackerEvent::Cancelled {
            key: key.clone(),
            snapshot,
        });

        match remote {
            Ok(()) => Ok(()),
            Err(error) => {
                let error = error.attributed(key.category, key.subject.to_string(), JobAction::Cancel);
                tracing::warn!(
                    category = %key.category,
                    subject = %key.subject,
                    kind = ?error.kind,
                    message = %error.message,
                    "remote cancellation failed; local tracking dropped anyway"
                );
                self.emit(TrackerEvent::CancelFailed {
                    key: key.clone(),
                    message: error.message.clone(),
                });
                Err(error)
            }
        }
    }
}
