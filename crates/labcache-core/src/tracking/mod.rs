mod cancellation;
mod launcher;
mod poller;
pub mod presenter;
pub mod registry;
mod resumption;

pub use launcher::StartReport;
pub use presenter::{ProgressRow, ProgressView, summarize_progress};
pub use registry::{OperationRegistry, UpsertOutcome};
pub use resumption::ResumeReport;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use tokio::sync::broadcast;
use tokio::task::AbortHandle;

use crate::config::TrackerConfig;
use crate::models::{
    CoreError, CoreErrorKind, JobAction, LaunchId, OperationCategory, OperationKey,
    OperationProgress, OperationSnapshot, OperationStatus,
};
use crate::remote::JobSource;

pub type TrackerResult<T> = Result<T, CoreError>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum TrackingOrigin {
    /// A start call created a new remote job.
    Launch,
    /// A start call found the job already running remotely.
    Discovered,
    /// The session-start scan found the job already running remotely.
    Resumed,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TrackerEvent {
    Tracking {
        snapshot: OperationSnapshot,
        origin: TrackingOrigin,
    },
    Progress {
        snapshot: OperationSnapshot,
    },
    /// Terminal status observed. Subscribers own follow-up work such as
    /// refreshing cached-item listings.
    Finished {
        snapshot: OperationSnapshot,
    },
    Expired {
        key: OperationKey,
    },
    Lost {
        key: OperationKey,
        reason: String,
    },
    Cancelled {
        key: OperationKey,
        snapshot: Option<OperationSnapshot>,
    },
    CancelFailed {
        key: OperationKey,
        message: String,
    },
}

impl TrackerEvent {
    pub fn key(&self) -> &OperationKey {
        match self {
            Self::Tracking { snapshot, .. }
            | Self::Progress { snapshot }
            | Self::Finished { snapshot } => &snapshot.key,
            Self::Expired { key }
            | Self::Lost { key, .. }
            | Self::Cancelled { key, .. }
            | Self::CancelFailed { key, .. } => key,
        }
    }
}

/// Owns the operation registry and every timer task attached to it.
///
/// Cloning yields another handle to the same session. The state mutex is
/// never held across an await, so registry mutations are applied one at a
/// time in the order they reach the lock.
#[derive(Clone)]
pub struct OperationTracker {
    source: Arc<dyn JobSource>,
    config: Arc<TrackerConfig>,
    state: Arc<Mutex<TrackerState>>,
    events: broadcast::Sender<TrackerEvent>,
}

#[derive(Default)]
struct TrackerState {
    next_launch: u64,
    registry: OperationRegistry,
    pollers: HashMap<OperationKey, TimerHandle>,
    expiries: HashMap<OperationKey, TimerHandle>,
    resumed: bool,
    closed: bool,
}

struct TimerHandle {
    launch: LaunchId,
    abort: AbortHandle,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum TimerKind {
    Poller,
    Expiry,
}

impl TrackerState {
    fn timers(&mut self, kind: TimerKind) -> &mut HashMap<OperationKey, TimerHandle> {
        match kind {
            TimerKind::Poller => &mut self.pollers,
            TimerKind::Expiry => &mut self.expiries,
        }
    }

    fn release_timer(&mut self, kind: TimerKind, key: &OperationKey, launch: LaunchId) {
        let timers = self.timers(kind);
        if timers.get(key).is_some_and(|handle| handle.launch == launch) {
            timers.remove(key);
        }
    }
}

/// Frees a timer slot when the owning task exits, whichever way it exits.
struct TimerLease {
    state: Arc<Mutex<TrackerState>>,
    kind: TimerKind,
    key: OperationKey,
    launch: LaunchId,
}

impl Drop for TimerLease {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.release_timer(self.kind, &self.key, self.launch);
    }
}

/// Tears the session down when dropped.
pub struct SessionGuard {
    tracker: OperationTracker,
}

impl SessionGuard {
    pub fn tracker(&self) -> &OperationTracker {
        &self.tracker
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.tracker.shutdown();
    }
}

impl OperationTracker {
    pub fn new(source: Arc<dyn JobSource>, config: TrackerConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            source,
            config: Arc::new(config),
            state: Arc::new(Mutex::new(TrackerState::default())),
            events,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    pub fn session_guard(&self) -> SessionGuard {
        SessionGuard {
            tracker: self.clone(),
        }
    }

    pub fn snapshot(&self, key: &OperationKey) -> Option<OperationSnapshot> {
        self.state_unpoisoned().registry.get(key).cloned()
    }

    pub fn list_active(&self, category: OperationCategory) -> Vec<OperationSnapshot> {
        self.state_unpoisoned()
            .registry
            .list_active(category)
            .into_iter()
            .cloned()
            .collect()
    }

    /// True while a poller is attached to `key`.
    pub fn is_busy(&self, key: &OperationKey) -> bool {
        self.state_unpoisoned().pollers.contains_key(key)
    }

    pub fn tracked_count(&self) -> usize {
        self.state_unpoisoned().registry.len()
    }

    pub fn live_timer_count(&self) -> usize {
        let state = self.state_unpoisoned();
        state.pollers.len() + state.expiries.len()
    }

    pub fn view(&self) -> ProgressView {
        ProgressView::from_registry(&self.state_unpoisoned().registry)
    }

    /// Stops every poller and grace timer, clears the registry and refuses
    /// further starts or resumption.
    pub fn shutdown(&self) {
        let handles: Vec<TimerHandle> = {
            let mut state = self.state_unpoisoned();
            if state.closed {
                return;
            }
            state.closed = true;
            state.registry.clear();
            let pollers = std::mem::take(&mut state.pollers);
            let expiries = std::mem::take(&mut state.expiries);
            pollers.into_values().chain(expiries.into_values()).collect()
        };

        tracing::debug!(timers = handles.len(), "tearing down tracking session");
        for handle in handles {
            handle.abort.abort();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state_unpoisoned().closed
    }
}

impl OperationTracker {
    /// Seeds a fresh entry for `key` and attaches a poller. Returns `Ok(None)`
    /// when a live poller already owns the key.
    fn track(
        &self,
        key: &OperationKey,
        status: OperationStatus,
        progress: OperationProgress,
        origin: TrackingOrigin,
    ) -> TrackerResult<Option<OperationSnapshot>> {
        let (snapshot, stale_expiry) = {
            let mut state = self.lock_state()?;
            if state.closed {
                return Err(session_closed(key, action_for_origin(origin)));
            }
            if state.pollers.contains_key(key) {
                return Ok(None);
            }

            let stale_expiry = state.expiries.remove(key).map(|handle| handle.abort);
            state.registry.remove(key);

            let launch = LaunchId(state.next_launch);
            state.next_launch = state.next_launch.saturating_add(1);

            let now = SystemTime::now();
            let snapshot = OperationSnapshot {
                key: key.clone(),
                launch,
                status,
                progress,
                error: None,
                started_at: now,
                updated_at: now,
                finished_at: None,
            };
            state.registry.upsert(snapshot.clone());

            let interval = self.config.timing(key.category).poll_interval;
            let poller = tokio::spawn(poller::run(self.clone(), key.clone(), launch, interval));
            state.pollers.insert(
                key.clone(),
                TimerHandle {
                    launch,
                    abort: poller.abort_handle(),
                },
            );

            (snapshot, stale_expiry)
        };

        if let Some(stale) = stale_expiry {
            stale.abort();
        }

        tracing::info!(
            category = %key.category,
            subject = %key.subject,
            launch = snapshot.launch.0,
            origin = ?origin,
            "tracking operation"
        );
        self.emit(TrackerEvent::Tracking {
            snapshot: snapshot.clone(),
            origin,
        });
        Ok(Some(snapshot))
    }

    /// Drops the entry and both timers for `key`. Returns the removed entry.
    fn release(&self, key: &OperationKey) -> Option<OperationSnapshot> {
        let (removed, handles) = {
            let mut state = self.state_unpoisoned();
            let removed = state.registry.remove(key);
            let handles: Vec<TimerHandle> = [state.pollers.remove(key), state.expiries.remove(key)]
                .into_iter()
                .flatten()
                .collect();
            (removed, handles)
        };

        for handle in handles {
            handle.abort.abort();
        }
        removed
    }

    fn lease(&self, kind: TimerKind, key: &OperationKey, launch: LaunchId) -> TimerLease {
        TimerLease {
            state: self.state.clone(),
            kind,
            key: key.clone(),
            launch,
        }
    }

    fn ensure_supported(&self, key: &OperationKey, action: JobAction) -> TrackerResult<()> {
        if self.source.supports(key.category, action) {
            return Ok(());
        }
        Err(CoreError {
            category: Some(key.category),
            subject: Some(key.subject.to_string()),
            action: Some(action),
            kind: CoreErrorKind::UnsupportedCapability,
            message: format!("'{}' does not support {action:?}", key.category),
        })
    }

    fn emit(&self, event: TrackerEvent) {
        // No subscribers is fine; events are advisory.
        let _ = self.events.send(event);
    }

    fn lock_state(&self) -> TrackerResult<MutexGuard<'_, TrackerState>> {
        self.state.lock().map_err(|_| CoreError {
            category: None,
            subject: None,
            action: None,
            kind: CoreErrorKind::Internal,
            message: "operation tracker mutex poisoned".to_string(),
        })
    }

    fn state_unpoisoned(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn action_for_origin(origin: TrackingOrigin) -> JobAction {
    match origin {
        TrackingOrigin::Launch | TrackingOrigin::Discovered => JobAction::Start,
        TrackingOrigin::Resumed => JobAction::Status,
    }
}

fn session_closed(key: &OperationKey, action: JobAction) -> CoreError {
    CoreError {
        category: Some(key.category),
        subject: Some(key.subject.to_string()),
        action: Some(action),
        kind: CoreErrorKind::SessionClosed,
        message: "tracking session has been shut down".to_string(),
    }
}
