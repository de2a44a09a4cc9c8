use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, Row, params};

use crate::models::{
    CoreError, CoreErrorKind, HistoryRecord, OperationCategory, OperationKey, OperationStatus,
    SubjectKey,
};
use crate::persistence::{MigrationStore, OperationHistoryStore, PersistenceResult};
use crate::sqlite::migrations::{current_schema_version, migration};

const HISTORY_COLUMNS: &str =
    "category, subject, arch, status, error, started_at_unix_ms, finished_at_unix_ms";

/// History database at a fixed path. Each call opens its own connection so the
/// store can be shared with blocking tasks without a pool.
pub struct SqliteHistoryStore {
    database_path: PathBuf,
}

impl SqliteHistoryStore {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn migrate_to_latest(&self) -> PersistenceResult<()> {
        self.apply_migration(current_schema_version())
    }

    fn connect<T>(
        &self,
        operation: &str,
        work: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> PersistenceResult<T> {
        if let Some(parent) = self.database_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|error| {
                storage_error(operation, format!("cannot create '{}': {error}", parent.display()))
            })?;
        }
        let mut connection = Connection::open(&self.database_path)
            .map_err(|error| storage_error(operation, error.to_string()))?;
        work(&mut connection).map_err(|error| storage_error(operation, error.to_string()))
    }
}

impl MigrationStore for SqliteHistoryStore {
    fn current_version(&self) -> PersistenceResult<i64> {
        self.connect("current_version", |connection| schema_version(connection))
    }

    /// Moves the schema forward to `target_version`. Downgrades are refused.
    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()> {
        let latest = current_schema_version();
        if !(0..=latest).contains(&target_version) {
            return Err(storage_error(
                "apply_migration",
                format!("target version {target_version} is outside 0..={latest}"),
            ));
        }

        let current = self.current_version()?;
        if target_version < current {
            return Err(storage_error(
                "apply_migration",
                format!("cannot downgrade schema from version {current} to {target_version}"),
            ));
        }

        self.connect("apply_migration", |connection| {
            for version in (current + 1)..=target_version {
                let step = migration(version)
                    .ok_or_else(|| conversion_error(format!("migration {version} is missing")))?;
                let transaction = connection.transaction()?;
                transaction.execute_batch(step.up_sql)?;
                transaction.pragma_update(None, "user_version", step.version)?;
                transaction.commit()?;
                tracing::debug!(version = step.version, name = step.name, "applied history migration");
            }
            Ok(())
        })
    }
}

impl OperationHistoryStore for SqliteHistoryStore {
    fn record(&self, record: &HistoryRecord) -> PersistenceResult<()> {
        self.connect("record", |connection| {
            require_schema(connection)?;
            connection.execute(
                &format!(
                    "INSERT INTO operation_history ({HISTORY_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                ),
                params![
                    record.key.category.as_str(),
                    record.key.subject.name,
                    record.key.subject.arch,
                    record.status.as_str(),
                    record.error,
                    unix_millis(record.started_at)?,
                    unix_millis(record.finished_at)?,
                ],
            )?;
            Ok(())
        })
    }

    fn list_recent(&self, limit: usize) -> PersistenceResult<Vec<HistoryRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.connect("list_recent", |connection| {
            require_schema(connection)?;
            let mut statement = connection.prepare(&format!(
                "SELECT {HISTORY_COLUMNS} FROM operation_history \
                 ORDER BY finished_at_unix_ms DESC, record_id DESC LIMIT ?1"
            ))?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let records = statement
                .query_map([limit], history_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
    }
}

fn schema_version(connection: &Connection) -> rusqlite::Result<i64> {
    connection.pragma_query_value(None, "user_version", |row| row.get(0))
}

fn require_schema(connection: &Connection) -> rusqlite::Result<()> {
    if schema_version(connection)? < current_schema_version() {
        return Err(conversion_error(
            "history schema is not migrated; run migrate_to_latest first",
        ));
    }
    Ok(())
}

fn history_row(row: &Row<'_>) -> rusqlite::Result<HistoryRecord> {
    let category: String = row.get(0)?;
    let status: String = row.get(3)?;
    let category = category
        .parse::<OperationCategory>()
        .map_err(|()| conversion_error(format!("unknown operation category '{category}'")))?;
    let status = status
        .parse::<OperationStatus>()
        .map_err(|()| conversion_error(format!("unknown operation status '{status}'")))?;

    Ok(HistoryRecord {
        key: OperationKey::new(category, SubjectKey::with_arch(row.get::<_, String>(1)?, row.get(2)?)),
        status,
        error: row.get(4)?,
        started_at: from_unix_millis(row.get(5)?),
        finished_at: from_unix_millis(row.get(6)?),
    })
}

fn unix_millis(value: SystemTime) -> rusqlite::Result<i64> {
    let elapsed = value
        .duration_since(UNIX_EPOCH)
        .map_err(|_| conversion_error("timestamp precedes the unix epoch"))?;
    i64::try_from(elapsed.as_millis()).map_err(|_| conversion_error("timestamp out of range"))
}

fn from_unix_millis(value: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(u64::try_from(value).unwrap_or(0))
}

fn conversion_error(message: impl Into<String>) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(message.into())))
}

fn storage_error(operation: &str, message: String) -> CoreError {
    CoreError::new(
        CoreErrorKind::StorageFailure,
        format!("history store '{operation}' failed: {message}"),
    )
}
