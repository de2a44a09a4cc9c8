use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OperationCategory {
    ImagePull,
    ImageBuild,
    LinuxIso,
    WindowsIso,
    CustomIso,
}

impl OperationCategory {
    pub const ALL: [OperationCategory; 5] = [
        OperationCategory::ImagePull,
        OperationCategory::ImageBuild,
        OperationCategory::LinuxIso,
        OperationCategory::WindowsIso,
        OperationCategory::CustomIso,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ImagePull => "image-pull",
            Self::ImageBuild => "image-build",
            Self::LinuxIso => "linux-iso",
            Self::WindowsIso => "windows-iso",
            Self::CustomIso => "custom-iso",
        }
    }
}

impl Display for OperationCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationCategory {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == raw)
            .ok_or(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum JobAction {
    Start,
    Status,
    Cancel,
    ListActive,
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct SubjectKey {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
}

impl SubjectKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arch: None,
        }
    }

    pub fn with_arch(name: impl Into<String>, arch: Option<String>) -> Self {
        Self {
            name: name.into(),
            arch: arch.filter(|value| !value.trim().is_empty()),
        }
    }
}

impl Display for SubjectKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.arch {
            Some(arch) => write!(f, "{} ({arch})", self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct OperationKey {
    pub category: OperationCategory,
    #[serde(flatten)]
    pub subject: SubjectKey,
}

impl OperationKey {
    pub fn new(category: OperationCategory, subject: SubjectKey) -> Self {
        Self { category, subject }
    }
}

impl Display for OperationKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.category, self.subject)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl FromStr for OperationStatus {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProgressDetail {
    Unknown,
    Layers { completed: u32, total: u32 },
    Bytes { transferred: u64, total: Option<u64> },
    Steps { current: u32, total: u32 },
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OperationProgress {
    pub percent: u8,
    pub detail: ProgressDetail,
    pub log_tail: Vec<String>,
}

impl OperationProgress {
    pub fn initial(category: OperationCategory) -> Self {
        let detail = match category {
            OperationCategory::ImagePull => ProgressDetail::Layers {
                completed: 0,
                total: 0,
            },
            OperationCategory::ImageBuild => ProgressDetail::Steps {
                current: 0,
                total: 0,
            },
            OperationCategory::LinuxIso
            | OperationCategory::WindowsIso
            | OperationCategory::CustomIso => ProgressDetail::Bytes {
                transferred: 0,
                total: None,
            },
        };

        Self {
            percent: 0,
            detail,
            log_tail: Vec::new(),
        }
    }

    /// Replaces counters and the log tail with `next`, keeping the newest
    /// `limit` lines. An empty incoming tail leaves the previous one visible.
    pub fn absorb(&mut self, next: OperationProgress, limit: usize) {
        self.percent = next.percent.min(100);
        if next.detail != ProgressDetail::Unknown {
            self.detail = next.detail;
        }
        if !next.log_tail.is_empty() {
            let skip = next.log_tail.len().saturating_sub(limit);
            self.log_tail = next.log_tail.into_iter().skip(skip).collect();
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct LaunchId(pub u64);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OperationSnapshot {
    pub key: OperationKey,
    pub launch: LaunchId,
    pub status: OperationStatus,
    pub progress: OperationProgress,
    pub error: Option<String>,
    pub started_at: SystemTime,
    pub updated_at: SystemTime,
    pub finished_at: Option<SystemTime>,
}

impl OperationSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
