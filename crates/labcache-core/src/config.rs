use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{CoreError, CoreErrorKind, OperationCategory};
use crate::registry::category_descriptor;

pub const ENV_LABCACHE_CONFIG: &str = "LABCACHE_CONFIG";
pub const ENV_LABCACHE_API_URL: &str = "LABCACHE_API_URL";
pub const ENV_LABCACHE_API_TOKEN: &str = "LABCACHE_API_TOKEN";

const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_LOG_TAIL_LIMIT: usize = 50;
const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct LabcacheConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_url")]
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_url(),
            token: None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub timings: BTreeMap<OperationCategory, TimingOverride>,
    #[serde(default = "default_log_tail_limit")]
    pub log_tail_limit: usize,
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            timings: BTreeMap::new(),
            log_tail_limit: DEFAULT_LOG_TAIL_LIMIT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct TimingOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grace_window_ms: Option<u64>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CategoryTiming {
    pub poll_interval: Duration,
    pub grace_window: Duration,
}

impl TrackerConfig {
    pub fn timing(&self, category: OperationCategory) -> CategoryTiming {
        let descriptor = category_descriptor(category);
        let overrides = self.timings.get(&category).copied().unwrap_or_default();
        CategoryTiming {
            poll_interval: overrides
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(descriptor.poll_interval),
            grace_window: overrides
                .grace_window_ms
                .map(Duration::from_millis)
                .unwrap_or(descriptor.grace_window),
        }
    }

    pub fn with_timing(
        mut self,
        category: OperationCategory,
        poll_interval: Duration,
        grace_window: Duration,
    ) -> Self {
        self.timings.insert(
            category,
            TimingOverride {
                poll_interval_ms: Some(duration_millis(poll_interval)),
                grace_window_ms: Some(duration_millis(grace_window)),
            },
        );
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.log_tail_limit == 0 {
            return Err(config_error("tracker.log_tail_limit must be greater than zero"));
        }
        if self.event_capacity == 0 {
            return Err(config_error("tracker.event_capacity must be greater than zero"));
        }
        for (category, timing) in &self.timings {
            if timing.poll_interval_ms == Some(0) {
                return Err(config_error(format!(
                    "tracker.timings.{category}.poll_interval_ms must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}

impl LabcacheConfig {
    /// Reads the explicit path, else `LABCACHE_CONFIG`, else defaults, then
    /// applies API environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, CoreError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(ENV_LABCACHE_CONFIG).map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            config_error(format!(
                "failed to read config file '{}': {error}",
                path.display()
            ))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        serde_json::from_str(raw).map_err(|error| CoreError {
            category: None,
            subject: None,
            action: None,
            kind: CoreErrorKind::ParseFailure,
            message: format!("invalid config document: {error}"),
        })
    }

    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_LABCACHE_API_URL).filter(|value| !value.trim().is_empty()) {
            self.api.base_url = url.trim().to_string();
        }
        if let Some(token) = lookup(ENV_LABCACHE_API_TOKEN).filter(|value| !value.is_empty()) {
            self.api.token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let url = self.api.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(config_error(format!(
                "api.base_url must be an http(s) URL, got '{url}'"
            )));
        }
        self.tracker.validate()
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_log_tail_limit() -> usize {
    DEFAULT_LOG_TAIL_LIMIT
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn config_error(message: impl Into<String>) -> CoreError {
    CoreError::new(CoreErrorKind::InvalidInput, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = LabcacheConfig::from_json("{}").unwrap();
        assert_eq!(config, LabcacheConfig::default());
        assert_eq!(config.api.base_url, DEFAULT_API_URL);
        assert_eq!(
            config.tracker.timing(OperationCategory::ImagePull),
            CategoryTiming {
                poll_interval: Duration::from_millis(1000),
                grace_window: Duration::from_millis(5000),
            }
        );
    }

    #[test]
    fn per_category_override_only_replaces_given_fields() {
        let config = LabcacheConfig::from_json(
            r#"{"tracker":{"timings":{"image-build":{"poll_interval_ms":500}}}}"#,
        )
        .unwrap();

        let build = config.tracker.timing(OperationCategory::ImageBuild);
        assert_eq!(build.poll_interval, Duration::from_millis(500));
        assert_eq!(build.grace_window, Duration::from_millis(10_000));
        assert_eq!(
            config.tracker.timing(OperationCategory::LinuxIso).poll_interval,
            Duration::from_millis(2000)
        );
    }

    #[test]
    fn environment_overrides_api_settings() {
        let mut config = LabcacheConfig::default();
        config.apply_env_overrides(|name| match name {
            ENV_LABCACHE_API_URL => Some(" https://lab.example:9443 ".to_string()),
            ENV_LABCACHE_API_TOKEN => Some("secret".to_string()),
            _ => None,
        });

        assert_eq!(config.api.base_url, "https://lab.example:9443");
        assert_eq!(config.api.token.as_deref(), Some("secret"));
        config.validate().unwrap();
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let config = LabcacheConfig::from_json(
            r#"{"tracker":{"timings":{"custom-iso":{"poll_interval_ms":0}}}}"#,
        )
        .unwrap();
        let error = config.validate().unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::InvalidInput);
        assert!(error.message.contains("custom-iso"));
    }

    #[test]
    fn non_http_base_url_is_rejected() {
        let mut config = LabcacheConfig::default();
        config.api.base_url = "ftp://lab".to_string();
        assert_eq!(
            config.validate().unwrap_err().kind,
            CoreErrorKind::InvalidInput
        );
    }
}
