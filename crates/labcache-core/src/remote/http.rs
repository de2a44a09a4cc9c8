use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::ApiConfig;
use crate::models::{
    CoreError, CoreErrorKind, JobAction, OperationCategory, OperationKey, OperationProgress,
    OperationStatus, ProgressDetail, SubjectKey,
};
use crate::remote::{
    ActiveJob, JobFuture, JobSource, JobStatusReport, RemoteResult, StartOutcome, StartRequest,
};

/// JSON-over-HTTP binding of [`JobSource`]. Calls block on ureq, so each one
/// runs on the tokio blocking pool.
#[derive(Clone)]
pub struct HttpJobSource {
    client: Arc<HttpClient>,
}

struct HttpClient {
    agent: ureq::Agent,
    base_url: String,
    token: Option<String>,
}

enum HttpReply {
    Body(String),
    NotFound,
}

impl HttpJobSource {
    pub fn new(api: &ApiConfig) -> Self {
        Self {
            client: Arc::new(HttpClient {
                agent: ureq::AgentBuilder::new().build(),
                base_url: api.base_url.trim().trim_end_matches('/').to_string(),
                token: api.token.clone(),
            }),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.client.base_url
    }
}

impl HttpClient {
    fn endpoint(&self, category: OperationCategory, suffix: &str) -> String {
        format!(
            "{}/api/v1/jobs/{}{suffix}",
            self.base_url,
            category_slug(category)
        )
    }

    fn send(&self, request: ureq::Request, body: Option<&Value>) -> RemoteResult<HttpReply> {
        let request = match &self.token {
            Some(token) => request.set("Authorization", &format!("Bearer {token}")),
            None => request,
        };
        let result = match body {
            Some(body) => request
                .set("Content-Type", "application/json")
                .send_string(&body.to_string()),
            None => request.call(),
        };

        match result {
            Ok(response) => response.into_string().map(HttpReply::Body).map_err(|error| {
                transport_error(format!("failed to read response body: {error}"))
            }),
            Err(ureq::Error::Status(404, _)) => Ok(HttpReply::NotFound),
            Err(ureq::Error::Status(code, response)) => {
                let text = response.into_string().unwrap_or_default();
                Err(CoreError::new(
                    CoreErrorKind::RemoteRejected,
                    format!("remote returned HTTP {code}: {}", text.trim()),
                ))
            }
            Err(ureq::Error::Transport(transport)) => Err(transport_error(transport.to_string())),
        }
    }

    fn start(&self, request: &StartRequest) -> RemoteResult<StartOutcome> {
        let url = self.endpoint(request.category(), "");
        match self.send(self.agent.post(&url), Some(&start_body(request)))? {
            HttpReply::Body(raw) => parse_start_response(&raw),
            HttpReply::NotFound => Err(not_found(&url)),
        }
    }

    fn status(&self, key: &OperationKey) -> RemoteResult<Option<JobStatusReport>> {
        let url = self.endpoint(key.category, "/status");
        let mut request = self.agent.get(&url).query("subject", &key.subject.name);
        if let Some(arch) = &key.subject.arch {
            request = request.query("arch", arch);
        }
        match self.send(request, None)? {
            HttpReply::Body(raw) => parse_status_response(&raw).map(Some),
            HttpReply::NotFound => Ok(None),
        }
    }

    fn cancel(&self, key: &OperationKey) -> RemoteResult<()> {
        let url = self.endpoint(key.category, "/cancel");
        let body = json!({
            "subject": key.subject.name,
            "arch": key.subject.arch,
        });
        match self.send(self.agent.post(&url), Some(&body))? {
            HttpReply::Body(_) => Ok(()),
            HttpReply::NotFound => Err(CoreError::new(
                CoreErrorKind::RemoteRejected,
                format!("no remote job to cancel for '{key}'"),
            )),
        }
    }

    fn list_active(&self, category: OperationCategory) -> RemoteResult<Vec<ActiveJob>> {
        let url = self.endpoint(category, "/active");
        match self.send(self.agent.get(&url), None)? {
            HttpReply::Body(raw) => parse_active_jobs(&raw),
            HttpReply::NotFound => Err(not_found(&url)),
        }
    }
}

impl JobSource for HttpJobSource {
    fn start(&self, request: StartRequest) -> JobFuture<StartOutcome> {
        let client = self.client.clone();
        let key = request.key();
        run_blocking(key.category, key.subject.to_string(), JobAction::Start, move || {
            client.start(&request)
        })
    }

    fn status(&self, key: OperationKey) -> JobFuture<Option<JobStatusReport>> {
        let client = self.client.clone();
        run_blocking(key.category, key.subject.to_string(), JobAction::Status, move || {
            client.status(&key)
        })
    }

    fn cancel(&self, key: OperationKey) -> JobFuture<()> {
        let client = self.client.clone();
        run_blocking(key.category, key.subject.to_string(), JobAction::Cancel, move || {
            client.cancel(&key)
        })
    }

    fn list_active(&self, category: OperationCategory) -> JobFuture<Vec<ActiveJob>> {
        let client = self.client.clone();
        run_blocking(category, "*", JobAction::ListActive, move || {
            client.list_active(category)
        })
    }
}

fn run_blocking<T: Send + 'static>(
    category: OperationCategory,
    subject: impl Into<String>,
    action: JobAction,
    call: impl FnOnce() -> RemoteResult<T> + Send + 'static,
) -> JobFuture<T> {
    let subject = subject.into();
    Box::pin(async move {
        tokio::task::spawn_blocking(call)
            .await
            .map_err(|join_error| {
                CoreError::new(
                    CoreErrorKind::Internal,
                    format!("remote call join failure: {join_error}"),
                )
            })?
            .map_err(|error| error.attributed(category, subject, action))
    })
}

pub fn category_slug(category: OperationCategory) -> &'static str {
    match category {
        OperationCategory::ImagePull => "image-pulls",
        OperationCategory::ImageBuild => "image-builds",
        OperationCategory::LinuxIso => "linux-isos",
        OperationCategory::WindowsIso => "windows-isos",
        OperationCategory::CustomIso => "custom-isos",
    }
}

fn start_body(request: &StartRequest) -> Value {
    match request {
        StartRequest::ImagePull { reference } => json!({ "reference": reference.trim() }),
        StartRequest::ImageBuild { tag, definition } => {
            json!({ "tag": tag.trim(), "definition": definition })
        }
        StartRequest::OsIso {
            version,
            arch,
            source_url,
            ..
        } => json!({
            "version": version.trim(),
            "arch": arch.as_deref().map(str::trim),
            "source_url": source_url.as_deref().map(str::trim),
        }),
        StartRequest::CustomIso {
            filename,
            source_url,
        } => json!({ "filename": filename.trim(), "source_url": source_url.trim() }),
    }
}

#[derive(Deserialize)]
struct StartWire {
    status: String,
    #[serde(default)]
    detail: Option<String>,
}

#[derive(Deserialize)]
struct CounterWire {
    completed: u32,
    total: u32,
}

#[derive(Deserialize)]
struct BytesWire {
    transferred: u64,
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Deserialize)]
struct StepsWire {
    current: u32,
    total: u32,
}

#[derive(Deserialize)]
struct StatusWire {
    status: String,
    #[serde(default)]
    percent: Option<f64>,
    #[serde(default)]
    layers: Option<CounterWire>,
    #[serde(default)]
    bytes: Option<BytesWire>,
    #[serde(default)]
    steps: Option<StepsWire>,
    /// Recent build output, newest last. Each poll carries the full tail, not
    /// a delta.
    #[serde(default)]
    log: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ActiveJobWire {
    subject: String,
    #[serde(default)]
    arch: Option<String>,
    #[serde(flatten)]
    state: StatusWire,
}

pub fn parse_start_response(raw: &str) -> RemoteResult<StartOutcome> {
    let wire: StartWire = parse_json(raw, "start response")?;
    let detail = wire.detail.filter(|value| !value.trim().is_empty());
    match normalize(&wire.status).as_str() {
        "started" => Ok(StartOutcome::Started { detail }),
        "already_active" => Ok(StartOutcome::AlreadyActive { detail }),
        "already_satisfied" => Ok(StartOutcome::AlreadySatisfied { detail }),
        "unsupported" => Ok(StartOutcome::Unsupported { detail }),
        other => Err(parse_error(format!("unknown start status '{other}'"))),
    }
}

pub fn parse_status_response(raw: &str) -> RemoteResult<JobStatusReport> {
    let wire: StatusWire = parse_json(raw, "status response")?;
    report_from_wire(wire)
}

pub fn parse_active_jobs(raw: &str) -> RemoteResult<Vec<ActiveJob>> {
    let wires: Vec<ActiveJobWire> = parse_json(raw, "active job list")?;
    wires
        .into_iter()
        .map(|wire| {
            Ok(ActiveJob {
                subject: SubjectKey::with_arch(wire.subject, wire.arch),
                report: report_from_wire(wire.state)?,
            })
        })
        .collect()
}

fn report_from_wire(wire: StatusWire) -> RemoteResult<JobStatusReport> {
    let status = normalize(&wire.status)
        .parse::<OperationStatus>()
        .map_err(|_| parse_error(format!("unknown job status '{}'", wire.status)))?;

    let detail = if let Some(layers) = wire.layers {
        ProgressDetail::Layers {
            completed: layers.completed,
            total: layers.total,
        }
    } else if let Some(bytes) = wire.bytes {
        ProgressDetail::Bytes {
            transferred: bytes.transferred,
            total: bytes.total,
        }
    } else if let Some(steps) = wire.steps {
        ProgressDetail::Steps {
            current: steps.current,
            total: steps.total,
        }
    } else {
        ProgressDetail::Unknown
    };

    let percent = match wire.percent {
        Some(value) if value.is_finite() => value.clamp(0.0, 100.0).round() as u8,
        _ => derived_percent(&detail, status),
    };

    Ok(JobStatusReport {
        status,
        progress: OperationProgress {
            percent,
            detail,
            log_tail: wire.log,
        },
        error: wire.error.filter(|_| status == OperationStatus::Failed),
    })
}

fn derived_percent(detail: &ProgressDetail, status: OperationStatus) -> u8 {
    if status == OperationStatus::Completed {
        return 100;
    }
    let (done, total) = match detail {
        ProgressDetail::Layers { completed, total } => (u64::from(*completed), u64::from(*total)),
        ProgressDetail::Bytes {
            transferred,
            total: Some(total),
        } => (*transferred, *total),
        ProgressDetail::Steps { current, total } => (u64::from(*current), u64::from(*total)),
        ProgressDetail::Bytes { total: None, .. } | ProgressDetail::Unknown => return 0,
    };
    if total == 0 {
        return 0;
    }
    (done.min(total) * 100 / total) as u8
}

fn normalize(raw: &str) -> String {
    raw.trim().to_ascii_lowercase().replace('-', "_")
}

fn parse_json<T: for<'de> Deserialize<'de>>(raw: &str, what: &str) -> RemoteResult<T> {
    serde_json::from_str(raw).map_err(|error| parse_error(format!("invalid {what}: {error}")))
}

fn parse_error(message: String) -> CoreError {
    CoreError::new(CoreErrorKind::ParseFailure, message)
}

fn transport_error(message: String) -> CoreError {
    CoreError::new(CoreErrorKind::Transport, message)
}

fn not_found(url: &str) -> CoreError {
    CoreError::new(
        CoreErrorKind::RemoteRejected,
        format!("remote endpoint '{url}' not found"),
    )
}
