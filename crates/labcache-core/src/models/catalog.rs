use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::models::{CoreError, CoreErrorKind, OperationCategory, OperationKey};

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub entries: Vec<OperationKey>,
}

impl Catalog {
    pub fn new(entries: impl IntoIterator<Item = OperationKey>) -> Self {
        let mut catalog = Self::default();
        for entry in entries {
            catalog.push(entry);
        }
        catalog
    }

    pub fn push(&mut self, key: OperationKey) {
        if !self.entries.contains(&key) {
            self.entries.push(key);
        }
    }

    pub fn subjects(&self, category: OperationCategory) -> impl Iterator<Item = &OperationKey> {
        self.entries
            .iter()
            .filter(move |entry| entry.category == category)
    }

    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        let parsed: Catalog = serde_json::from_str(raw).map_err(|error| {
            CoreError::new(
                CoreErrorKind::ParseFailure,
                format!("invalid catalog document: {error}"),
            )
        })?;
        Ok(Self::new(parsed.entries))
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            CoreError::new(
                CoreErrorKind::InvalidInput,
                format!("failed to read catalog '{}': {error}", path.display()),
            )
        })?;
        Self::from_json(&raw)
    }
}
