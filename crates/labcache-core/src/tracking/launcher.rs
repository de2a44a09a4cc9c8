use crate::models::{
    CoreError, CoreErrorKind, JobAction, OperationProgress, OperationSnapshot, OperationStatus,
};
use crate::remote::{StartOutcome, StartRequest};
use crate::tracking::{OperationTracker, TrackerResult, TrackingOrigin};

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StartReport {
    Started {
        snapshot: OperationSnapshot,
    },
    /// The job was already running. `attached` is true when this call had to
    /// begin tracking it because no local tracker existed yet.
    AlreadyActive {
        attached: bool,
        detail: Option<String>,
    },
    AlreadySatisfied {
        detail: Option<String>,
    },
}

impl OperationTracker {
    pub async fn start(&self, request: StartRequest) -> TrackerResult<StartReport> {
        request.validate()?;
        let key = request.key();
        self.ensure_supported(&key, JobAction::Start)?;
        if self.is_closed() {
            return Err(super::session_closed(&key, JobAction::Start));
        }

        tracing::info!(category = %key.category, subject = %key.subject, "requesting remote job start");
        let outcome = self
            .source
            .start(request)
            .await
            .map_err(|error| error.attributed(key.category, key.subject.to_string(), JobAction::Start))?;

        match outcome {
            StartOutcome::AlreadySatisfied { detail } => {
                tracing::info!(
                    category = %key.category,
                    subject = %key.subject,
                    "remote reports nothing to do"
                );
                Ok(StartReport::AlreadySatisfied { detail })
            }
            StartOutcome::Unsupported { detail } => Err(CoreError {
                category: Some(key.category),
                subject: Some(key.subject.to_string()),
                action: Some(JobAction::Start),
                kind: CoreErrorKind::UnsupportedSource,
                message: detail
                    .unwrap_or_else(|| format!("no direct download source is available for '{key}'")),
            }),
            StartOutcome::AlreadyActive { detail } => {
                let attached = self
                    .track(
                        &key,
                        OperationStatus::Active,
                        OperationProgress::initial(key.category),
                        TrackingOrigin::Discovered,
                    )?
                    .is_some();
                Ok(StartReport::AlreadyActive { attached, detail })
            }
            StartOutcome::Started { detail } => {
                match self.track(
                    &key,
                    OperationStatus::Active,
                    OperationProgress::initial(key.category),
                    TrackingOrigin::Launch,
                )? {
                    Some(snapshot) => Ok(StartReport::Started { snapshot }),
                    None => {
                        tracing::warn!(
                            category = %key.category,
                            subject = %key.subject,
                            "remote started a job that is already tracked; keeping existing tracker"
                        );
                        Ok(StartReport::AlreadyActive {
                            attached: false,
                            detail,
                        })
                    }
                }
            }
        }
    }
}
