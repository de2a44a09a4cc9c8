use thiserror::Error;

use crate::models::{JobAction, OperationCategory};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    InvalidInput,
    UnsupportedCapability,
    UnsupportedSource,
    Transport,
    RemoteRejected,
    ParseFailure,
    SessionClosed,
    StorageFailure,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub category: Option<OperationCategory>,
    pub subject: Option<String>,
    pub action: Option<JobAction>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            category: None,
            subject: None,
            action: None,
            kind,
            message: message.into(),
        }
    }

    /// Fills in attribution fields the producer left empty.
    pub fn attributed(
        self,
        category: OperationCategory,
        subject: impl Into<String>,
        action: JobAction,
    ) -> Self {
        Self {
            category: self.category.or(Some(category)),
            subject: self.subject.or_else(|| Some(subject.into())),
            action: self.action.or(Some(action)),
            kind: self.kind,
            message: self.message,
        }
    }
}
