mod support;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use labcache_core::config::TrackerConfig;
use labcache_core::models::{
    CoreErrorKind, HistoryRecord, OperationCategory, OperationKey, OperationStatus, SubjectKey,
};
use labcache_core::persistence::{MigrationStore, OperationHistoryStore, spawn_history_recorder};
use labcache_core::remote::StartRequest;
use labcache_core::sqlite::{SqliteHistoryStore, current_schema_version, migration, migrations};
use labcache_core::tracking::OperationTracker;

use support::{ScriptedJobSource, completed, failed, key, ms};

fn test_db_path(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("labcache-{test_name}-{nanos}.sqlite3"))
}

fn record(name: &str, status: OperationStatus, finished_secs: u64) -> HistoryRecord {
    HistoryRecord {
        key: OperationKey::new(
            OperationCategory::WindowsIso,
            SubjectKey::with_arch(name, Some("arm64".to_string())),
        ),
        status,
        error: None,
        started_at: UNIX_EPOCH + Duration::from_secs(finished_secs - 60),
        finished_at: UNIX_EPOCH + Duration::from_secs(finished_secs),
    }
}

#[test]
fn migration_versions_are_strictly_increasing() {
    let mut previous = 0;
    for entry in migrations() {
        assert!(entry.version > previous);
        assert!(!entry.up_sql.trim().is_empty());
        previous = entry.version;
    }
    assert_eq!(
        migration(current_schema_version()).map(|entry| entry.version),
        Some(current_schema_version())
    );
}

#[test]
fn migrations_move_forward_only() {
    let store = SqliteHistoryStore::new(test_db_path("migrations"));
    assert_eq!(store.current_version().unwrap(), 0);

    store.migrate_to_latest().unwrap();
    assert_eq!(store.current_version().unwrap(), current_schema_version());
    // Re-applying the current version is a no-op.
    store.migrate_to_latest().unwrap();
    assert_eq!(store.current_version().unwrap(), current_schema_version());

    let downgrade = store.apply_migration(0).unwrap_err();
    assert_eq!(downgrade.kind, CoreErrorKind::StorageFailure);
    assert!(downgrade.message.contains("downgrade"));
    assert_eq!(store.current_version().unwrap(), current_schema_version());

    let error = store
        .apply_migration(current_schema_version() + 1)
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::StorageFailure);
}

#[test]
fn recording_before_migration_fails() {
    let store = SqliteHistoryStore::new(test_db_path("unmigrated"));
    let error = store
        .record(&record("11-23H2", OperationStatus::Completed, 1_000))
        .unwrap_err();
    assert_eq!(error.kind, CoreErrorKind::StorageFailure);
    assert!(error.message.contains("record"));
}

#[test]
fn history_lists_newest_first_with_limit() {
    let store = SqliteHistoryStore::new(test_db_path("ordering"));
    store.migrate_to_latest().unwrap();

    let mut failed = record("10-22H2", OperationStatus::Failed, 2_000);
    failed.error = Some("download interrupted".to_string());
    store
        .record(&record("11-23H2", OperationStatus::Completed, 1_000))
        .unwrap();
    store.record(&failed).unwrap();
    store
        .record(&record("11-24H2", OperationStatus::Cancelled, 3_000))
        .unwrap();

    let recent = store.list_recent(2).unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].key.subject.name, "11-24H2");
    assert_eq!(recent[0].status, OperationStatus::Cancelled);
    assert_eq!(recent[1], failed);
    assert_eq!(recent[1].key.subject.arch.as_deref(), Some("arm64"));

    assert!(store.list_recent(0).unwrap().is_empty());
    assert_eq!(store.list_recent(10).unwrap().len(), 3);
}

async fn wait_for_history(store: &SqliteHistoryStore, expected: usize) -> Vec<HistoryRecord> {
    for _ in 0..200 {
        let recent = store.list_recent(10).unwrap();
        if recent.len() >= expected {
            return recent;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    store.list_recent(10).unwrap()
}

#[tokio::test]
async fn recorder_persists_finished_and_cancelled_operations() {
    let store = Arc::new(SqliteHistoryStore::new(test_db_path("recorder")));
    store.migrate_to_latest().unwrap();

    let frr = key(OperationCategory::ImageBuild, "lab/frr:9");
    let nginx = key(OperationCategory::ImagePull, "library/nginx");
    let source = Arc::new(
        ScriptedJobSource::new()
            .with_statuses(&frr, vec![failed(OperationCategory::ImageBuild, "exit code 2")])
            .with_statuses(&nginx, vec![completed(OperationCategory::ImagePull)]),
    );
    let config = TrackerConfig::default()
        .with_timing(OperationCategory::ImageBuild, ms(10), ms(10))
        .with_timing(OperationCategory::ImagePull, ms(60_000), ms(10));
    let tracker = OperationTracker::new(source, config);
    let recorder = spawn_history_recorder(&tracker, store.clone());

    tracker
        .start(StartRequest::ImageBuild {
            tag: "lab/frr:9".to_string(),
            definition: "FROM alpine".to_string(),
        })
        .await
        .unwrap();
    tracker
        .start(StartRequest::ImagePull {
            reference: "library/nginx".to_string(),
        })
        .await
        .unwrap();
    tracker.cancel(&nginx).await.unwrap();

    let history = wait_for_history(&store, 2).await;
    assert_eq!(history.len(), 2);

    let build = history.iter().find(|entry| entry.key == frr).unwrap();
    assert_eq!(build.status, OperationStatus::Failed);
    assert_eq!(build.error.as_deref(), Some("exit code 2"));

    let pull = history.iter().find(|entry| entry.key == nginx).unwrap();
    assert_eq!(pull.status, OperationStatus::Cancelled);

    tracker.shutdown();
    drop(tracker);
    tokio::time::timeout(Duration::from_secs(5), recorder)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn cancelling_inside_grace_window_keeps_the_finished_row() {
    let store = Arc::new(SqliteHistoryStore::new(test_db_path("grace-cancel")));
    store.migrate_to_latest().unwrap();

    let nginx = key(OperationCategory::ImagePull, "library/nginx");
    let source = Arc::new(
        ScriptedJobSource::new().with_statuses(&nginx, vec![completed(OperationCategory::ImagePull)]),
    );
    let config = TrackerConfig::default().with_timing(
        OperationCategory::ImagePull,
        ms(10),
        ms(60_000),
    );
    let tracker = OperationTracker::new(source, config);
    let recorder = spawn_history_recorder(&tracker, store.clone());

    tracker
        .start(StartRequest::ImagePull {
            reference: "library/nginx".to_string(),
        })
        .await
        .unwrap();
    let history = wait_for_history(&store, 1).await;
    assert_eq!(history.len(), 1);
    assert!(tracker.snapshot(&nginx).unwrap().is_terminal());

    tracker.cancel(&nginx).await.unwrap();
    assert!(tracker.snapshot(&nginx).is_none());

    tracker.shutdown();
    drop(tracker);
    tokio::time::timeout(Duration::from_secs(5), recorder)
        .await
        .unwrap()
        .unwrap();

    let history = store.list_recent(10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].key, nginx);
    assert_eq!(history[0].status, OperationStatus::Completed);
}
