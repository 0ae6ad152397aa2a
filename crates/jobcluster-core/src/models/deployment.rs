use std::time::SystemTime;

use crate::models::{
    AppliedReplication, ApplicationId, ArtifactManifest, CoreError, JobOutcome, StagedArtifact,
    TerminationState,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DeploymentStage {
    Configuration,
    Allocation,
    Staging,
    ClusterCreation,
    Submission,
    ResultWait,
    Termination,
    Ledger,
}

/// What one deployment call observed, end to end.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeploymentReport {
    pub application_id: ApplicationId,
    pub manifest: ArtifactManifest,
    pub outcome: JobOutcome,
    pub termination: TerminationState,
    /// Set when the cluster could not be force-killed; it may need manual inspection.
    pub teardown_error: Option<CoreError>,
}

impl DeploymentReport {
    pub fn requires_inspection(&self) -> bool {
        self.teardown_error.is_some() || !self.termination.is_terminal()
    }
}

/// Ledger entry for one deployment. Fields after `artifacts` stay empty
/// until the deployment concludes or aborts.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeploymentRecord {
    pub application_id: ApplicationId,
    pub job_name: String,
    pub staging_dir: String,
    pub replication: AppliedReplication,
    pub artifacts: Vec<StagedArtifact>,
    pub outcome: Option<JobOutcome>,
    pub termination: Option<TerminationState>,
    pub teardown_error: Option<String>,
    /// Why the deployment aborted before producing a report.
    pub error: Option<String>,
    pub started_at: SystemTime,
    pub finished_at: Option<SystemTime>,
    pub cleaned_at: Option<SystemTime>,
}

impl DeploymentRecord {
    pub fn requires_inspection(&self) -> bool {
        self.teardown_error.is_some() || self.termination == Some(TerminationState::Running)
    }
}
