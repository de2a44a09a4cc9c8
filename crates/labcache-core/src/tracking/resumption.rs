use crate::models::{Catalog, CoreError, JobAction, OperationCategory, OperationKey};
use crate::registry::all_categories;
use crate::remote::JobStatusReport;
use crate::tracking::{OperationTracker, TrackerResult, TrackingOrigin};

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ResumeReport {
    pub resumed: Vec<OperationKey>,
    pub already_tracked: usize,
    /// Remote requests issued by the scan.
    pub requests: usize,
    pub failures: Vec<CoreError>,
}

impl OperationTracker {
    /// Re-attaches pollers to jobs that were already running when the session
    /// began. Runs once per session; later calls return an empty report.
    ///
    /// Categories whose source can list active work are queried in bulk; the
    /// rest cost one status request per catalog entry.
    pub async fn resume(&self, catalog: &Catalog) -> TrackerResult<ResumeReport> {
        {
            let mut state = self.lock_state()?;
            if state.resumed || state.closed {
                tracing::debug!(closed = state.closed, "skipping session resumption");
                return Ok(ResumeReport::default());
            }
            state.resumed = true;
        }

        let mut report = ResumeReport::default();
        for descriptor in all_categories() {
            let category = descriptor.category;
            if self.source.supports(category, JobAction::ListActive) {
                self.resume_from_listing(category, &mut report).await;
            } else if self.source.supports(category, JobAction::Status) {
                self.resume_from_catalog(category, catalog, &mut report).await;
            }
        }

        tracing::info!(
            resumed = report.resumed.len(),
            already_tracked = report.already_tracked,
            requests = report.requests,
            failures = report.failures.len(),
            "session resumption finished"
        );
        Ok(report)
    }

    async fn resume_from_listing(&self, category: OperationCategory, report: &mut ResumeReport) {
        report.requests += 1;
        match self.source.list_active(category).await {
            Ok(jobs) => {
                for job in jobs {
                    if job.report.status.is_terminal() {
                        continue;
                    }
                    self.adopt(OperationKey::new(category, job.subject), job.report, report);
                }
            }
            Err(error) => {
                let error = error.attributed(category, "*", JobAction::ListActive);
                tracing::warn!(
                    category = %category,
                    message = %error.message,
                    "active job listing failed during resumption"
                );
                report.failures.push(error);
            }
        }
    }

    async fn resume_from_catalog(
        &self,
        category: OperationCategory,
        catalog: &Catalog,
        report: &mut ResumeReport,
    ) {
        for key in catalog.subjects(category) {
            if self.is_busy(key) {
                report.already_tracked += 1;
                continue;
            }

            report.requests += 1;
            match self.source.status(key.clone()).await {
                Ok(Some(status)) if !status.status.is_terminal() => {
                    self.adopt(key.clone(), status, report);
                }
                Ok(_) => {}
                Err(error) => {
                    let error =
                        error.attributed(category, key.subject.to_string(), JobAction::Status);
                    tracing::warn!(
                        category = %category,
                        subject = %key.subject,
                        message = %error.message,
                        "status check failed during resumption"
                    );
                    report.failures.push(error);
                }
            }
        }
    }

    fn adopt(&self, key: OperationKey, status: JobStatusReport, report: &mut ResumeReport) {
        match self.track(&key, status.status, status.progress, TrackingOrigin::Resumed) {
            Ok(Some(_)) => report.resumed.push(key),
            Ok(None) => report.already_tracked += 1,
            Err(error) => report.failures.push(error),
        }
    }
}
