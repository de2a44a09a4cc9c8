use crate::models::{
    OperationCategory, OperationKey, OperationProgress, OperationStatus, ProgressDetail,
};
use crate::registry::category_descriptor;
use crate::tracking::OperationRegistry;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProgressRow {
    pub key: OperationKey,
    pub category_label: &'static str,
    pub status: OperationStatus,
    pub percent: u8,
    pub summary: String,
    pub error: Option<String>,
    pub last_log_line: Option<String>,
}

/// Read-only projection of the registry, ordered by category then subject.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ProgressView {
    pub rows: Vec<ProgressRow>,
}

impl ProgressView {
    pub fn from_registry(registry: &OperationRegistry) -> Self {
        let rows = registry
            .iter()
            .map(|snapshot| ProgressRow {
                key: snapshot.key.clone(),
                category_label: category_descriptor(snapshot.key.category).display_name,
                status: snapshot.status,
                percent: snapshot.progress.percent,
                summary: summarize_progress(&snapshot.progress),
                error: snapshot.error.clone(),
                last_log_line: snapshot.progress.log_tail.last().cloned(),
            })
            .collect();
        Self { rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.rows
            .iter()
            .filter(|row| !row.status.is_terminal())
            .count()
    }

    pub fn rows_for(&self, category: OperationCategory) -> impl Iterator<Item = &ProgressRow> {
        self.rows
            .iter()
            .filter(move |row| row.key.category == category)
    }
}

pub fn summarize_progress(progress: &OperationProgress) -> String {
    match &progress.detail {
        ProgressDetail::Layers { completed, total } if *total > 0 => {
            format!("{completed}/{total} layers")
        }
        ProgressDetail::Steps { current, total } if *total > 0 => {
            format!("step {current}/{total}")
        }
        ProgressDetail::Bytes {
            transferred,
            total: Some(total),
        } if *total > 0 => format!("{} / {}", format_bytes(*transferred), format_bytes(*total)),
        ProgressDetail::Bytes {
            transferred,
            total: None,
        } if *transferred > 0 => format!("{} downloaded", format_bytes(*transferred)),
        _ if progress.percent > 0 => format!("{}%", progress.percent),
        _ => "starting".to_string(),
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}
