use crate::models::{
    ApplicationId, ArtifactManifest, CoreError, DeploymentRecord, DeploymentReport,
    TerminationState,
};

pub type PersistenceResult<T> = Result<T, CoreError>;

pub trait MigrationStore: Send + Sync {
    fn current_version(&self) -> PersistenceResult<i64>;

    fn apply_migration(&self, target_version: i64) -> PersistenceResult<()>;
}

/// Durable history of deployments, kept so clusters and staging directories
/// left behind by failed teardowns can be found later.
pub trait DeploymentLedger: Send + Sync {
    /// Records a staged deployment before its cluster is created.
    fn record_started(&self, job_name: &str, manifest: &ArtifactManifest) -> PersistenceResult<()>;

    fn record_completed(&self, report: &DeploymentReport) -> PersistenceResult<()>;

    /// Records a deployment that ended with an error instead of a report.
    /// `termination` is `None` when no cluster was ever created.
    fn record_aborted(
        &self,
        application_id: &ApplicationId,
        error: &CoreError,
        termination: Option<TerminationState>,
        teardown_error: Option<&CoreError>,
    ) -> PersistenceResult<()>;

    /// Returns whether a record was marked.
    fn mark_cleaned(&self, application_id: &ApplicationId) -> PersistenceResult<bool>;

    fn deployment(&self, application_id: &ApplicationId)
    -> PersistenceResult<Option<DeploymentRecord>>;

    fn list_recent(&self, limit: usize) -> PersistenceResult<Vec<DeploymentRecord>>;

    fn list_requiring_inspection(&self) -> PersistenceResult<Vec<DeploymentRecord>>;
}
