#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use labcache_core::models::{
    CoreError, CoreErrorKind, JobAction, OperationCategory, OperationKey, OperationProgress,
    OperationStatus, ProgressDetail, SubjectKey,
};
use labcache_core::registry::category_descriptor;
use labcache_core::remote::{
    ActiveJob, JobFuture, JobSource, JobStatusReport, StartOutcome, StartRequest,
};
use labcache_core::tracking::TrackerEvent;
use tokio::sync::broadcast;

#[derive(Clone, Debug)]
pub enum StatusStep {
    Report(JobStatusReport),
    Missing,
    Fail(CoreErrorKind),
}

#[derive(Default)]
struct Script {
    start_outcomes: HashMap<OperationKey, StartOutcome>,
    start_error: Option<CoreErrorKind>,
    statuses: HashMap<OperationKey, VecDeque<StatusStep>>,
    status_delay: Option<Duration>,
    cancel_error: Option<String>,
    cancel_unsupported: bool,
    active: HashMap<OperationCategory, Vec<ActiveJob>>,
    list_errors: HashMap<OperationCategory, CoreErrorKind>,
    bulk_listing: Option<HashSet<OperationCategory>>,
}

#[derive(Default)]
struct Calls {
    start: usize,
    status: HashMap<OperationKey, usize>,
    cancel: usize,
    list_active: usize,
}

/// In-process stand-in for the remote job service. Status steps are consumed
/// in order; the last one repeats.
#[derive(Default)]
pub struct ScriptedJobSource {
    script: Mutex<Script>,
    calls: Mutex<Calls>,
}

impl ScriptedJobSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start_outcome(self, key: &OperationKey, outcome: StartOutcome) -> Self {
        self.script
            .lock()
            .unwrap()
            .start_outcomes
            .insert(key.clone(), outcome);
        self
    }

    pub fn with_start_error(self, kind: CoreErrorKind) -> Self {
        self.script.lock().unwrap().start_error = Some(kind);
        self
    }

    pub fn with_statuses(self, key: &OperationKey, steps: Vec<StatusStep>) -> Self {
        self.script
            .lock()
            .unwrap()
            .statuses
            .insert(key.clone(), steps.into());
        self
    }

    pub fn with_status_delay(self, delay: Duration) -> Self {
        self.script.lock().unwrap().status_delay = Some(delay);
        self
    }

    pub fn with_cancel_error(self, message: &str) -> Self {
        self.script.lock().unwrap().cancel_error = Some(message.to_string());
        self
    }

    pub fn without_cancel(self) -> Self {
        self.script.lock().unwrap().cancel_unsupported = true;
        self
    }

    pub fn with_active(self, category: OperationCategory, jobs: Vec<ActiveJob>) -> Self {
        self.script.lock().unwrap().active.insert(category, jobs);
        self
    }

    pub fn with_list_error(self, category: OperationCategory, kind: CoreErrorKind) -> Self {
        self.script.lock().unwrap().list_errors.insert(category, kind);
        self
    }

    /// Overrides which categories answer bulk listing queries.
    pub fn with_bulk_listing(self, categories: &[OperationCategory]) -> Self {
        self.script.lock().unwrap().bulk_listing = Some(categories.iter().copied().collect());
        self
    }

    pub fn start_calls(&self) -> usize {
        self.calls.lock().unwrap().start
    }

    pub fn status_calls(&self, key: &OperationKey) -> usize {
        self.calls
            .lock()
            .unwrap()
            .status
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_status_calls(&self) -> usize {
        self.calls.lock().unwrap().status.values().sum()
    }

    pub fn cancel_calls(&self) -> usize {
        self.calls.lock().unwrap().cancel
    }

    pub fn list_active_calls(&self) -> usize {
        self.calls.lock().unwrap().list_active
    }
}

impl JobSource for ScriptedJobSource {
    fn start(&self, request: StartRequest) -> JobFuture<StartOutcome> {
        self.calls.lock().unwrap().start += 1;
        let script = self.script.lock().unwrap();
        let result = match script.start_error {
            Some(kind) => Err(CoreError::new(kind, "job service unreachable")),
            None => Ok(script
                .start_outcomes
                .get(&request.key())
                .cloned()
                .unwrap_or(StartOutcome::Started { detail: None })),
        };
        Box::pin(async move { result })
    }

    fn status(&self, key: OperationKey) -> JobFuture<Option<JobStatusReport>> {
        *self
            .calls
            .lock()
            .unwrap()
            .status
            .entry(key.clone())
            .or_default() += 1;

        let mut script = self.script.lock().unwrap();
        let delay = script.status_delay;
        let step = match script.statuses.get_mut(&key) {
            Some(steps) if steps.len() > 1 => steps.pop_front(),
            Some(steps) => steps.front().cloned(),
            None => None,
        };
        let result = match step {
            Some(StatusStep::Report(report)) => Ok(Some(report)),
            Some(StatusStep::Fail(kind)) => Err(CoreError::new(kind, "status request failed")),
            Some(StatusStep::Missing) | None => Ok(None),
        };
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            result
        })
    }

    fn cancel(&self, _key: OperationKey) -> JobFuture<()> {
        self.calls.lock().unwrap().cancel += 1;
        let result = match self.script.lock().unwrap().cancel_error.clone() {
            Some(message) => Err(CoreError::new(CoreErrorKind::RemoteRejected, message)),
            None => Ok(()),
        };
        Box::pin(async move { result })
    }

    fn list_active(&self, category: OperationCategory) -> JobFuture<Vec<ActiveJob>> {
        self.calls.lock().unwrap().list_active += 1;
        let script = self.script.lock().unwrap();
        let result = match script.list_errors.get(&category) {
            Some(kind) => Err(CoreError::new(*kind, "listing request failed")),
            None => Ok(script.active.get(&category).cloned().unwrap_or_default()),
        };
        Box::pin(async move { result })
    }

    fn supports(&self, category: OperationCategory, action: JobAction) -> bool {
        if action == JobAction::Cancel && self.script.lock().unwrap().cancel_unsupported {
            return false;
        }
        if action == JobAction::ListActive
            && let Some(bulk) = &self.script.lock().unwrap().bulk_listing
        {
            return bulk.contains(&category);
        }
        category_descriptor(category).supports(action)
    }
}

pub fn key(category: OperationCategory, name: &str) -> OperationKey {
    OperationKey::new(category, SubjectKey::new(name))
}

pub fn active(category: OperationCategory, percent: u8, detail: ProgressDetail) -> StatusStep {
    let mut progress = OperationProgress::initial(category);
    progress.percent = percent;
    progress.detail = detail;
    StatusStep::Report(JobStatusReport {
        status: OperationStatus::Active,
        progress,
        error: None,
    })
}

pub fn report(category: OperationCategory, status: OperationStatus) -> JobStatusReport {
    JobStatusReport {
        status,
        progress: OperationProgress::initial(category),
        error: None,
    }
}

pub fn completed(category: OperationCategory) -> StatusStep {
    StatusStep::Report(report(category, OperationStatus::Completed))
}

pub fn failed(category: OperationCategory, message: &str) -> StatusStep {
    let mut failed = report(category, OperationStatus::Failed);
    failed.error = Some(message.to_string());
    StatusStep::Report(failed)
}

pub fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

pub fn drain(events: &mut broadcast::Receiver<TrackerEvent>) -> Vec<TrackerEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
