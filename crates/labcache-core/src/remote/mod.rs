pub mod http;

pub use http::HttpJobSource;

use std::future::Future;
use std::pin::Pin;

use crate::models::{
    CoreError, CoreErrorKind, JobAction, OperationCategory, OperationKey, OperationProgress,
    OperationStatus, SubjectKey,
};
use crate::registry::category_descriptor;

pub type RemoteResult<T> = Result<T, CoreError>;

pub type JobFuture<T> = Pin<Box<dyn Future<Output = RemoteResult<T>> + Send>>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum IsoFamily {
    Linux,
    Windows,
}

impl IsoFamily {
    pub fn category(self) -> OperationCategory {
        match self {
            Self::Linux => OperationCategory::LinuxIso,
            Self::Windows => OperationCategory::WindowsIso,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StartRequest {
    ImagePull {
        reference: String,
    },
    ImageBuild {
        tag: String,
        definition: String,
    },
    OsIso {
        family: IsoFamily,
        version: String,
        arch: Option<String>,
        source_url: Option<String>,
    },
    CustomIso {
        filename: String,
        source_url: String,
    },
}

impl StartRequest {
    pub fn category(&self) -> OperationCategory {
        match self {
            Self::ImagePull { .. } => OperationCategory::ImagePull,
            Self::ImageBuild { .. } => OperationCategory::ImageBuild,
            Self::OsIso { family, .. } => family.category(),
            Self::CustomIso { .. } => OperationCategory::CustomIso,
        }
    }

    pub fn key(&self) -> OperationKey {
        let subject = match self {
            Self::ImagePull { reference } => SubjectKey::new(reference.trim()),
            Self::ImageBuild { tag, .. } => SubjectKey::new(tag.trim()),
            Self::OsIso { version, arch, .. } => {
                SubjectKey::with_arch(version.trim(), arch.as_ref().map(|a| a.trim().to_string()))
            }
            Self::CustomIso { filename, .. } => SubjectKey::new(filename.trim()),
        };
        OperationKey::new(self.category(), subject)
    }

    pub fn validate(&self) -> RemoteResult<()> {
        let key = self.key();
        if key.subject.name.is_empty() {
            return Err(invalid_request(&key, "subject identifier must not be empty"));
        }

        match self {
            Self::ImageBuild { definition, .. } if definition.trim().is_empty() => Err(
                invalid_request(&key, "image build definition must not be empty"),
            ),
            Self::OsIso {
                source_url: Some(url),
                ..
            } if !is_http_url(url) => Err(invalid_request(
                &key,
                "custom ISO source must be an http(s) URL",
            )),
            Self::CustomIso { source_url, .. } if !is_http_url(source_url) => Err(
                invalid_request(&key, "custom ISO source must be an http(s) URL"),
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StartOutcome {
    Started { detail: Option<String> },
    AlreadyActive { detail: Option<String> },
    AlreadySatisfied { detail: Option<String> },
    Unsupported { detail: Option<String> },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobStatusReport {
    pub status: OperationStatus,
    pub progress: OperationProgress,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ActiveJob {
    pub subject: SubjectKey,
    pub report: JobStatusReport,
}

/// Boundary to the remote job-execution service.
///
/// `status` resolves to `Ok(None)` when the service has no job for the key.
pub trait JobSource: Send + Sync {
    fn start(&self, request: StartRequest) -> JobFuture<StartOutcome>;

    fn status(&self, key: OperationKey) -> JobFuture<Option<JobStatusReport>>;

    fn cancel(&self, key: OperationKey) -> JobFuture<()>;

    fn list_active(&self, category: OperationCategory) -> JobFuture<Vec<ActiveJob>>;

    fn supports(&self, category: OperationCategory, action: JobAction) -> bool {
        category_descriptor(category).supports(action)
    }
}

fn is_http_url(raw: &str) -> bool {
    let trimmed = raw.trim();
    trimmed.starts_with("http://") || trimmed.starts_with("https://")
}

fn invalid_request(key: &OperationKey, message: &str) -> CoreError {
    CoreError {
        category: Some(key.category),
        subject: Some(key.subject.to_string()),
        action: Some(JobAction::Start),
        kind: CoreErrorKind::InvalidInput,
        message: message.to_string(),
    }
}
