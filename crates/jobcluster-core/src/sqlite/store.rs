use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, Params, Row, params};

use crate::models::{
    AppliedReplication, ApplicationId, ArtifactEntry, ArtifactManifest, ArtifactRole, CoreError,
    CoreErrorKind, DeploymentRecord, DeploymentReport, JobOutcome, SerializedFailure,
    StagedArtifact, TerminationState,
};
use crate::persistence::{DeploymentLedger, MigrationStore, PersistenceResult};
use crate::sqlite::migrations::{SqliteMigration, current_schema_version, migration, migrations};

const MIGRATIONS_TABLE: &str = "jobcluster_schema_migrations";

const DEPLOYMENT_COLUMNS: &str = "
application_id, job_name, staging_dir, replication, replication_source, outcome,
failure_payload, termination, teardown_error, error_message, started_at_unix,
finished_at_unix, cleaned_at_unix";

/// `DeploymentLedger` backed by a local SQLite file. Each call opens its own
/// connection, so the ledger can be shared across threads freely.
pub struct SqliteDeploymentLedger {
    database_path: PathBuf,
}

impl SqliteDeploymentLedger {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: database_path.into(),
        }
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn planned_migrations(&self, from_version: i64) -> Vec<&'static SqliteMigration> {
        migrations()
            .iter()
            .filter(|entry| entry.version > from_version)
            .collect()
    }

    pub fn migrate_to_latest(&self) -> PersistenceResult<()> {
        self.apply_migration(current_schema_version())
    }

    fn with_connection<T>(
        &self,
        operation_name: &str,
        operation: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> PersistenceResult<T> {
        let mut connection = open_connection(&self.database_path)
            .map_err(|error| ledger_error(operation_name, error))?;
        operation(&mut connection).map_err(|error| ledger_error(operation_name, error))
    }
}

impl MigrationStore for SqliteDeploymentLedger {
    fn current_version(&self) -> PersistenceResult<i64> {
        self.with_connection("current_version", |connection| {
            ensure_migrations_table(connection)?;
            read_current_version(connection)
        })
    }

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()> {
        if target_version < 0 || target_version > current_schema_version() {
            return Err(ledger_error_text(
                "apply_migration",
                format!("invalid migration target version '{target_version}'"),
            ));
        }

        self.with_connection("apply_migration", |connection| {
            ensure_migrations_table(connection)?;
            let current_version = read_current_version(connection)?;

            if target_version == current_version {
                // Re-running the DDL repairs a database whose version row
                // survived but whose tables did not.
                for version in 1..=target_version {
                    execute_batch_tolerant(connection, defined_migration(version)?.up_sql)?;
                }
                return Ok(());
            }

            if target_version > current_version {
                for version in (current_version + 1)..=target_version {
                    apply_up_migration(connection, defined_migration(version)?)?;
                }
            } else {
                for version in ((target_version + 1)..=current_version).rev() {
                    apply_down_migration(connection, defined_migration(version)?)?;
                }
            }
            Ok(())
        })
    }
}

impl DeploymentLedger for SqliteDeploymentLedger {
    fn record_started(&self, job_name: &str, manifest: &ArtifactManifest) -> PersistenceResult<()> {
        self.with_connection("record_started", |connection| {
            ensure_schema_ready(connection)?;
            let application_id = manifest.application_id.to_string();
            let transaction = connection.transaction()?;
            transaction.execute(
                "
INSERT INTO deployments (
    application_id, job_name, staging_dir, replication, replication_source, started_at_unix
) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT(application_id) DO UPDATE SET
    job_name = excluded.job_name,
    staging_dir = excluded.staging_dir,
    replication = excluded.replication,
    replication_source = excluded.replication_source,
    outcome = NULL,
    failure_payload = NULL,
    termination = NULL,
    teardown_error = NULL,
    error_message = NULL,
    started_at_unix = excluded.started_at_unix,
    finished_at_unix = NULL
",
                params![
                    application_id,
                    job_name,
                    manifest.staging_dir,
                    i64::from(manifest.replication.factor()),
                    manifest.replication.source_str(),
                    to_unix_seconds(SystemTime::now())?,
                ],
            )?;

            transaction.execute(
                "DELETE FROM staged_artifacts WHERE application_id = ?1",
                [application_id.as_str()],
            )?;
            {
                let mut statement = transaction.prepare(
                    "
INSERT INTO staged_artifacts (
    application_id, position, remote_name, role, local_path, remote_path, sha256, len,
    modification_time
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
",
                )?;
                for (position, artifact) in manifest.artifacts.iter().enumerate() {
                    statement.execute(params![
                        application_id,
                        to_i64(position)?,
                        artifact.entry.remote_name,
                        artifact.entry.role.as_str(),
                        artifact.entry.local_path.to_string_lossy().into_owned(),
                        artifact.remote_path,
                        artifact.sha256,
                        u64_to_i64(artifact.len)?,
                        u64_to_i64(artifact.modification_time)?,
                    ])?;
                }
            }
            transaction.commit()?;
            Ok(())
        })
    }

    fn record_completed(&self, report: &DeploymentReport) -> PersistenceResult<()> {
        self.with_connection("record_completed", |connection| {
            ensure_schema_ready(connection)?;
            let updated = connection.execute(
                "
UPDATE deployments
SET outcome = ?2, failure_payload = ?3, termination = ?4, teardown_error = ?5,
    error_message = NULL, finished_at_unix = ?6
WHERE application_id = ?1
",
                params![
                    report.application_id.to_string(),
                    report.outcome.as_str(),
                    report.outcome.failure().map(SerializedFailure::as_bytes),
                    report.termination.as_str(),
                    report.teardown_error.as_ref().map(ToString::to_string),
                    to_unix_seconds(SystemTime::now())?,
                ],
            )?;
            if updated == 0 {
                return Err(ledger_error_sqlite("deployment was not found for completion"));
            }
            Ok(())
        })
    }

    fn record_aborted(
        &self,
        application_id: &ApplicationId,
        error: &CoreError,
        termination: Option<TerminationState>,
        teardown_error: Option<&CoreError>,
    ) -> PersistenceResult<()> {
        self.with_connection("record_aborted", |connection| {
            ensure_schema_ready(connection)?;
            let updated = connection.execute(
                "
UPDATE deployments
SET termination = ?2, teardown_error = ?3, error_message = ?4, finished_at_unix = ?5
WHERE application_id = ?1
",
                params![
                    application_id.to_string(),
                    termination.map(TerminationState::as_str),
                    teardown_error.map(ToString::to_string),
                    error.to_string(),
                    to_unix_seconds(SystemTime::now())?,
                ],
            )?;
            if updated == 0 {
                return Err(ledger_error_sqlite("deployment was not found for abort"));
            }
            Ok(())
        })
    }

    fn mark_cleaned(&self, application_id: &ApplicationId) -> PersistenceResult<bool> {
        self.with_connection("mark_cleaned", |connection| {
            ensure_schema_ready(connection)?;
            let updated = connection.execute(
                "UPDATE deployments SET cleaned_at_unix = ?2 WHERE application_id = ?1",
                params![
                    application_id.to_string(),
                    to_unix_seconds(SystemTime::now())?
                ],
            )?;
            Ok(updated > 0)
        })
    }

    fn deployment(
        &self,
        application_id: &ApplicationId,
    ) -> PersistenceResult<Option<DeploymentRecord>> {
        self.with_connection("deployment", |connection| {
            ensure_schema_ready(connection)?;
            let mut records = query_deployments(
                connection,
                &format!("SELECT {DEPLOYMENT_COLUMNS} FROM deployments WHERE application_id = ?1"),
                [application_id.to_string()],
            )?;
            Ok(records.pop())
        })
    }

    fn list_recent(&self, limit: usize) -> PersistenceResult<Vec<DeploymentRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.with_connection("list_recent", |connection| {
            ensure_schema_ready(connection)?;
            query_deployments(
                connection,
                &format!(
                    "SELECT {DEPLOYMENT_COLUMNS} FROM deployments
                     ORDER BY started_at_unix DESC, application_id DESC
                     LIMIT ?1"
                ),
                [to_i64(limit)?],
            )
        })
    }

    fn list_requiring_inspection(&self) -> PersistenceResult<Vec<DeploymentRecord>> {
        self.with_connection("list_requiring_inspection", |connection| {
            ensure_schema_ready(connection)?;
            query_deployments(
                connection,
                &format!(
                    "SELECT {DEPLOYMENT_COLUMNS} FROM deployments
                     WHERE teardown_error IS NOT NULL OR termination = 'running'
                     ORDER BY started_at_unix DESC, application_id DESC"
                ),
                [],
            )
        })
    }
}

fn query_deployments<P: Params>(
    connection: &Connection,
    sql: &str,
    params: P,
) -> rusqlite::Result<Vec<DeploymentRecord>> {
    let mut statement = connection.prepare(sql)?;
    let mut records = statement
        .query_map(params, read_deployment_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for record in &mut records {
        record.artifacts = load_artifacts(connection, &record.application_id)?;
    }
    Ok(records)
}

fn read_deployment_row(row: &Row<'_>) -> rusqlite::Result<DeploymentRecord> {
    let application_raw: String = row.get(0)?;
    let replication_raw: i64 = row.get(3)?;
    let replication_source: String = row.get(4)?;
    let outcome_raw: Option<String> = row.get(5)?;
    let failure_payload: Option<Vec<u8>> = row.get(6)?;
    let termination_raw: Option<String> = row.get(7)?;
    let started_at_unix: i64 = row.get(10)?;
    let finished_at_unix: Option<i64> = row.get(11)?;
    let cleaned_at_unix: Option<i64> = row.get(12)?;

    let factor = u16::try_from(replication_raw)
        .map_err(|_| ledger_error_sqlite("replication factor out of range in sqlite record"))?;
    let replication = AppliedReplication::from_parts(&replication_source, factor).ok_or_else(
        || {
            ledger_error_sqlite(&format!(
                "unknown replication source '{replication_source}' in sqlite record"
            ))
        },
    )?;

    Ok(DeploymentRecord {
        application_id: parse_application_id(&application_raw)?,
        job_name: row.get(1)?,
        staging_dir: row.get(2)?,
        replication,
        artifacts: Vec::new(),
        outcome: outcome_raw
            .as_deref()
            .map(|raw| parse_outcome(raw, failure_payload))
            .transpose()?,
        termination: termination_raw
            .as_deref()
            .map(parse_termination)
            .transpose()?,
        teardown_error: row.get(8)?,
        error: row.get(9)?,
        started_at: from_unix_seconds(started_at_unix)?,
        finished_at: finished_at_unix.map(from_unix_seconds).transpose()?,
        cleaned_at: cleaned_at_unix.map(from_unix_seconds).transpose()?,
    })
}

fn load_artifacts(
    connection: &Connection,
    application_id: &ApplicationId,
) -> rusqlite::Result<Vec<StagedArtifact>> {
    let mut statement = connection.prepare(
        "
SELECT remote_name, role, local_path, remote_path, sha256, len, modification_time
FROM staged_artifacts
WHERE application_id = ?1
ORDER BY position ASC
",
    )?;
    let rows = statement.query_map([application_id.to_string()], |row| {
        let remote_name: String = row.get(0)?;
        let role_raw: String = row.get(1)?;
        let local_path: String = row.get(2)?;
        let len: i64 = row.get(5)?;
        let modification_time: i64 = row.get(6)?;

        let role = role_raw.parse::<ArtifactRole>().map_err(|_| {
            ledger_error_sqlite(&format!("unknown artifact role '{role_raw}' in sqlite record"))
        })?;
        Ok(StagedArtifact {
            entry: ArtifactEntry::new(local_path, role).remote_name(remote_name),
            remote_path: row.get(3)?,
            sha256: row.get(4)?,
            len: i64_to_u64(len)?,
            modification_time: i64_to_u64(modification_time)?,
        })
    })?;
    rows.collect()
}

fn open_connection(database_path: &Path) -> rusqlite::Result<Connection> {
    if let Some(parent) = database_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|error| rusqlite::Error::ToSqlConversionFailure(Box::new(error)))?;
    }
    Connection::open(database_path)
}

fn ensure_migrations_table(connection: &Connection) -> rusqlite::Result<()> {
    connection.execute_batch(&format!(
        "
CREATE TABLE IF NOT EXISTS {MIGRATIONS_TABLE} (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at_unix INTEGER NOT NULL
);
"
    ))
}

fn ensure_schema_ready(connection: &Connection) -> rusqlite::Result<()> {
    ensure_migrations_table(connection)?;
    if read_current_version(connection)? <= 0 {
        return Err(ledger_error_sqlite(
            "database schema is not initialized; apply migrations before recording deployments",
        ));
    }
    Ok(())
}

fn read_current_version(connection: &Connection) -> rusqlite::Result<i64> {
    connection.query_row(
        &format!("SELECT COALESCE(MAX(version), 0) FROM {MIGRATIONS_TABLE}"),
        [],
        |row| row.get(0),
    )
}

fn defined_migration(version: i64) -> rusqlite::Result<&'static SqliteMigration> {
    migration(version).ok_or_else(|| {
        ledger_error_sqlite(&format!("migration version '{version}' is not defined"))
    })
}

fn apply_up_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    execute_batch_tolerant(&transaction, migration.up_sql)?;
    transaction.execute(
        &format!(
            "INSERT INTO {MIGRATIONS_TABLE} (version, name, applied_at_unix)
             VALUES (?1, ?2, strftime('%s', 'now'))"
        ),
        (migration.version, migration.name),
    )?;
    transaction.commit()
}

/// `ALTER TABLE ADD COLUMN` is not idempotent in SQLite; a duplicate column
/// means the migration already ran.
fn execute_batch_tolerant(connection: &Connection, sql: &str) -> rusqlite::Result<()> {
    match connection.execute_batch(sql) {
        Ok(()) => Ok(()),
        Err(error) if error.to_string().contains("duplicate column name") => Ok(()),
        Err(error) => Err(error),
    }
}

fn apply_down_migration(
    connection: &mut Connection,
    migration: &SqliteMigration,
) -> rusqlite::Result<()> {
    let transaction = connection.transaction()?;
    transaction.execute_batch(migration.down_sql)?;
    transaction.execute(
        &format!("DELETE FROM {MIGRATIONS_TABLE} WHERE version = ?1"),
        [migration.version],
    )?;
    transaction.commit()
}

fn parse_application_id(raw: &str) -> rusqlite::Result<ApplicationId> {
    raw.parse::<ApplicationId>().map_err(|_| {
        ledger_error_sqlite(&format!("malformed application id '{raw}' in sqlite record"))
    })
}

fn parse_outcome(raw: &str, failure_payload: Option<Vec<u8>>) -> rusqlite::Result<JobOutcome> {
    match raw {
        "succeeded" => Ok(JobOutcome::Succeeded),
        "failed" => Ok(JobOutcome::Failed(SerializedFailure::new(
            failure_payload.unwrap_or_default(),
        ))),
        _ => Err(ledger_error_sqlite(&format!(
            "unknown job outcome '{raw}' in sqlite record"
        ))),
    }
}

fn parse_termination(raw: &str) -> rusqlite::Result<TerminationState> {
    raw.parse::<TerminationState>().map_err(|_| {
        ledger_error_sqlite(&format!("unknown termination state '{raw}' in sqlite record"))
    })
}

fn to_unix_seconds(value: SystemTime) -> rusqlite::Result<i64> {
    let duration = value.duration_since(UNIX_EPOCH).map_err(|error| {
        ledger_error_sqlite(&format!("time before unix epoch is not supported: {error}"))
    })?;
    i64::try_from(duration.as_secs())
        .map_err(|_| ledger_error_sqlite("unix timestamp seconds exceed i64 range"))
}

fn from_unix_seconds(value: i64) -> rusqlite::Result<SystemTime> {
    let seconds = u64::try_from(value)
        .map_err(|_| ledger_error_sqlite("negative unix timestamps are not supported"))?;
    Ok(UNIX_EPOCH + Duration::from_secs(seconds))
}

fn u64_to_i64(value: u64) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|_| ledger_error_sqlite("value exceeds i64 range"))
}

fn i64_to_u64(value: i64) -> rusqlite::Result<u64> {
    u64::try_from(value).map_err(|_| ledger_error_sqlite("negative value in sqlite record"))
}

fn to_i64(value: usize) -> rusqlite::Result<i64> {
    i64::try_from(value).map_err(|_| ledger_error_sqlite("value exceeds i64 range"))
}

fn ledger_error(operation: &str, error: rusqlite::Error) -> CoreError {
    ledger_error_text(operation, error.to_string())
}

fn ledger_error_sqlite(message: &str) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::other(message.to_string())))
}

fn ledger_error_text(operation: &str, message: impl AsRef<str>) -> CoreError {
    CoreError {
        application: None,
        stage: None,
        kind: CoreErrorKind::StorageFailure,
        message: format!("deployment ledger '{operation}' failed: {}", message.as_ref()),
    }
}
