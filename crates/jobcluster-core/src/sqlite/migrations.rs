#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SqliteMigration {
    pub version: i64,
    pub name: &'static str,
    pub up_sql: &'static str,
    pub down_sql: &'static str,
}

const MIGRATION_0001: SqliteMigration = SqliteMigration {
    version: 1,
    name: "initial_deployment_ledger",
    up_sql: r#"
CREATE TABLE IF NOT EXISTS deployments (
    application_id TEXT PRIMARY KEY,
    job_name TEXT NOT NULL,
    staging_dir TEXT NOT NULL,
    replication INTEGER NOT NULL,
    replication_source TEXT NOT NULL,
    outcome TEXT,
    failure_payload BLOB,
    termination TEXT,
    teardown_error TEXT,
    error_message TEXT,
    started_at_unix INTEGER NOT NULL,
    finished_at_unix INTEGER
);

CREATE INDEX IF NOT EXISTS idx_deployments_started
    ON deployments (started_at_unix DESC);

CREATE TABLE IF NOT EXISTS staged_artifacts (
    application_id TEXT NOT NULL,
    position INTEGER NOT NULL,
    remote_name TEXT NOT NULL,
    role TEXT NOT NULL,
    local_path TEXT NOT NULL,
    remote_path TEXT NOT NULL,
    sha256 TEXT NOT NULL,
    len INTEGER NOT NULL,
    modification_time INTEGER NOT NULL,
    PRIMARY KEY (application_id, remote_name)
);
"#,
    down_sql: r#"
DROP TABLE IF EXISTS staged_artifacts;
DROP INDEX IF EXISTS idx_deployments_started;
DROP TABLE IF EXISTS deployments;
"#,
};

const MIGRATION_0002: SqliteMigration = SqliteMigration {
    version: 2,
    name: "add_cleanup_tracking",
    up_sql: r#"
ALTER TABLE deployments ADD COLUMN cleaned_at_unix INTEGER;
"#,
    down_sql: r#"
ALTER TABLE deployments DROP COLUMN cleaned_at_unix;
"#,
};

const MIGRATIONS: [SqliteMigration; 2] = [MIGRATION_0001, MIGRATION_0002];

pub fn migrations() -> &'static [SqliteMigration] {
    &MIGRATIONS
}

pub fn migration(version: i64) -> Option<&'static SqliteMigration> {
    MIGRATIONS.iter().find(|entry| entry.version == version)
}

pub fn current_schema_version() -> i64 {
    MIGRATIONS.last().map(|entry| entry.version).unwrap_or(0)
}
