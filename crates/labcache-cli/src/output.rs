use std::time::SystemTime;

use labcache_core::models::{HistoryRecord, OperationSnapshot};
use labcache_core::tracking::{ProgressView, TrackerEvent, summarize_progress};
use serde_json::{Value, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub(crate) fn detail_suffix(detail: Option<&str>) -> String {
    detail.map(|detail| format!(" ({detail})")).unwrap_or_default()
}

pub(crate) fn print_snapshot(snapshot: &OperationSnapshot) {
    let mut line = format!(
        "{:<12} {:<32} {:<9} {:>3}%  {}",
        snapshot.key.category.as_str(),
        snapshot.key.subject.to_string(),
        snapshot.status.as_str(),
        snapshot.progress.percent,
        summarize_progress(&snapshot.progress),
    );
    if let Some(error) = &snapshot.error {
        line.push_str(&format!("  error: {error}"));
    }
    println!("{line}");
}

pub(crate) fn print_view(view: &ProgressView) {
    if view.is_empty() {
        println!("no tracked operations");
        return;
    }
    for row in &view.rows {
        println!(
            "{:<22} {:<32} {:<9} {:>3}%  {}{}",
            row.category_label,
            row.key.subject.to_string(),
            row.status.as_str(),
            row.percent,
            row.summary,
            row.last_log_line
                .as_deref()
                .map(|line| format!("  | {line}"))
                .unwrap_or_default(),
        );
    }
}

pub(crate) fn print_event(event: &TrackerEvent) {
    match event {
        TrackerEvent::Tracking { snapshot, .. }
        | TrackerEvent::Progress { snapshot }
        | TrackerEvent::Finished { snapshot } => print_snapshot(snapshot),
        TrackerEvent::Lost { key, reason } => println!("lost {key}: {reason}"),
        TrackerEvent::Cancelled { key, .. } => println!("cancelled {key}"),
        TrackerEvent::CancelFailed { key, message } => {
            eprintln!("cancel of {key} failed remotely: {message}");
        }
        TrackerEvent::Expired { .. } => {}
    }
}

pub(crate) fn print_history(records: &[HistoryRecord]) {
    if records.is_empty() {
        println!("no recorded operations");
        return;
    }
    for record in records {
        println!(
            "{:<25} {:<12} {:<32} {:<9} {}",
            format_time(record.finished_at),
            record.key.category.as_str(),
            record.key.subject.to_string(),
            record.status.as_str(),
            record.error.as_deref().unwrap_or(""),
        );
    }
}

pub(crate) fn history_json(records: &[HistoryRecord]) -> Value {
    Value::Array(
        records
            .iter()
            .map(|record| {
                json!({
                    "category": record.key.category,
                    "subject": record.key.subject.name,
                    "arch": record.key.subject.arch,
                    "status": record.status.as_str(),
                    "error": record.error,
                    "started_at": format_time(record.started_at),
                    "finished_at": format_time(record.finished_at),
                })
            })
            .collect(),
    )
}

fn format_time(value: SystemTime) -> String {
    OffsetDateTime::from(value)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "-".to_string())
}
