use std::time::{Duration, SystemTime};

use crate::models::{LaunchId, OperationKey, OperationStatus};
use crate::remote::{JobStatusReport, RemoteResult};
use crate::tracking::{OperationTracker, TimerHandle, TimerKind, TrackerEvent};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(super) enum PollStep {
    Continue,
    Stop,
}

/// Polls until a terminal status, a lost job, or the entry stops belonging to
/// `launch`. Each tick awaits its response before the next sleep begins.
pub(super) async fn run(
    tracker: OperationTracker,
    key: OperationKey,
    launch: LaunchId,
    interval: Duration,
) {
    let _lease = tracker.lease(TimerKind::Poller, &key, launch);
    loop {
        tokio::time::sleep(interval).await;
        let observed = tracker.source.status(key.clone()).await;
        if tracker.apply_observation(&key, launch, observed) == PollStep::Stop {
            break;
        }
    }
}

pub(super) async fn expire_after(
    tracker: OperationTracker,
    key: OperationKey,
    launch: LaunchId,
    grace: Duration,
) {
    let _lease = tracker.lease(TimerKind::Expiry, &key, launch);
    tokio::time::sleep(grace).await;
    tracker.expire(&key, launch);
}

impl OperationTracker {
    pub(super) fn apply_observation(
        &self,
        key: &OperationKey,
        launch: LaunchId,
        observed: RemoteResult<Option<JobStatusReport>>,
    ) -> PollStep {
        let Ok(mut state) = self.lock_state() else {
            return PollStep::Stop;
        };
        if state.registry.owner(key) != Some(launch) {
            tracing::debug!(
                category = %key.category,
                subject = %key.subject,
                launch = launch.0,
                "discarding status for operation that is no longer tracked"
            );
            return PollStep::Stop;
        }

        let report = match observed {
            Ok(Some(report)) => report,
            Ok(None) => {
                state.registry.remove(key);
                state.release_timer(TimerKind::Poller, key, launch);
                drop(state);
                tracing::info!(
                    category = %key.category,
                    subject = %key.subject,
                    "remote job disappeared; dropping operation"
                );
                self.emit(TrackerEvent::Lost {
                    key: key.clone(),
                    reason: "remote job no longer exists".to_string(),
                });
                return PollStep::Stop;
            }
            Err(error) => {
                state.registry.remove(key);
                state.release_timer(TimerKind::Poller, key, launch);
                drop(state);
                tracing::warn!(
                    category = %key.category,
                    subject = %key.subject,
                    kind = ?error.kind,
                    message = %error.message,
                    "status poll failed; dropping operation"
                );
                self.emit(TrackerEvent::Lost {
                    key: key.clone(),
                    reason: error.message,
                });
                return PollStep::Stop;
            }
        };

        let terminal = report.status.is_terminal();
        let now = SystemTime::now();
        let log_limit = self.config.log_tail_limit;
        let Some(snapshot) = state
            .registry
            .update(key, launch, |snapshot| {
                snapshot.status = report.status;
                snapshot.progress.absorb(report.progress, log_limit);
                if report.status == OperationStatus::Completed {
                    snapshot.progress.percent = 100;
                }
                snapshot.updated_at = now;
                if terminal {
                    snapshot.error = report.error;
                    snapshot.finished_at = Some(now);
                }
            })
            .cloned()
        else {
            return PollStep::Stop;
        };

        if !terminal {
            drop(state);
            self.emit(TrackerEvent::Progress { snapshot });
            return PollStep::Continue;
        }

        state.release_timer(TimerKind::Poller, key, launch);
        if !state.closed {
            let grace = self.config.timing(key.category).grace_window;
            let expiry = tokio::spawn(expire_after(self.clone(), key.clone(), launch, grace));
            state.expiries.insert(
                key.clone(),
                TimerHandle {
                    launch,
                    abort: expiry.abort_handle(),
                },
            );
        }
        drop(state);

        tracing::info!(
            category = %key.category,
            subject = %key.subject,
            status = snapshot.status.as_str(),
            error = snapshot.error.as_deref().unwrap_or(""),
            "operation reached terminal status"
        );
        self.emit(TrackerEvent::Finished { snapshot });
        PollStep::Stop
    }

    fn expire(&self, key: &OperationKey, launch: LaunchId) {
        let expired = {
            let mut state = self.state_unpoisoned();
            let owned = state
                .registry
                .get(key)
                .is_some_and(|snapshot| snapshot.launch == launch && snapshot.is_terminal());
            if owned {
                state.registry.remove(key);
            }
            state.release_timer(TimerKind::Expiry, key, launch);
            owned
        };

        if expired {
            tracing::debug!(category = %key.category, subject = %key.subject, "grace window elapsed");
            self.emit(TrackerEvent::Expired { key: key.clone() });
        }
    }
}
