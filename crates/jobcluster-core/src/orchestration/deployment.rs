use std::path::PathBuf;
use std::sync::Arc;

use crate::config::DeploymentConfiguration;
use crate::models::{
    ApplicationId, ArtifactEntry, ArtifactManifest, CoreError, DeploymentReport, DeploymentStage,
    JobSpecification,
};
use crate::orchestration::deployer::{ClusterDeployer, DeployFailure};
use crate::orchestration::staging::ArtifactStager;
use crate::orchestration::supervisor::{LifecycleSupervisor, SupervisionReport};
use crate::orchestration::watcher::JobResultWatcher;
use crate::orchestration::{
    DeploymentCancellationToken, OrchestrationResult, cancelled_error, run_blocking,
    run_blocking_bounded,
};
use crate::persistence::DeploymentLedger;
use crate::platform::PlatformClient;
use crate::storage::StorageClient;

/// One job to run on its own cluster, with the files the cluster launches from.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeploymentRequest {
    pub job: JobSpecification,
    pub bundle: PathBuf,
    pub libraries: Vec<PathBuf>,
}

impl DeploymentRequest {
    pub fn new(job: JobSpecification, bundle: impl Into<PathBuf>) -> Self {
        Self {
            job,
            bundle: bundle.into(),
            libraries: Vec::new(),
        }
    }

    pub fn library(mut self, library: impl Into<PathBuf>) -> Self {
        self.libraries.push(library.into());
        self
    }

    /// Bundle first, then libraries, then the job's own jars.
    pub fn artifact_entries(&self) -> Vec<ArtifactEntry> {
        std::iter::once(ArtifactEntry::bundle(&self.bundle))
            .chain(self.libraries.iter().map(ArtifactEntry::library))
            .chain(self.job.dependency_jars.iter().map(ArtifactEntry::user_jar))
            .collect()
    }
}

/// Runs deployments end to end: allocate, stage, launch, submit, await the
/// result, then shut the cluster down.
#[derive(Clone)]
pub struct DeploymentRuntime {
    platform: Arc<dyn PlatformClient>,
    stager: ArtifactStager,
    deployer: ClusterDeployer,
    ledger: Option<Arc<dyn DeploymentLedger>>,
}

impl DeploymentRuntime {
    pub fn new(storage: Arc<dyn StorageClient>, platform: Arc<dyn PlatformClient>) -> Self {
        Self {
            stager: ArtifactStager::new(storage),
            deployer: ClusterDeployer::new(platform.clone()),
            platform,
            ledger: None,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn DeploymentLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn stager(&self) -> &ArtifactStager {
        &self.stager
    }

    pub async fn deploy(
        &self,
        config: &DeploymentConfiguration,
        request: DeploymentRequest,
    ) -> OrchestrationResult<DeploymentReport> {
        self.deploy_with_cancellation(config, request, &DeploymentCancellationToken::new())
            .await
    }

    /// Deploys one job. A failed job is reported in `DeploymentReport::outcome`,
    /// and a failed forced kill in `DeploymentReport::teardown_error`; errors are
    /// reserved for deployments that never produced an outcome. Once a cluster
    /// exists it is killed and released on every error path, and dropping the
    /// returned future does the same.
    pub async fn deploy_with_cancellation(
        &self,
        config: &DeploymentConfiguration,
        request: DeploymentRequest,
        cancellation: &DeploymentCancellationToken,
    ) -> OrchestrationResult<DeploymentReport> {
        let entries = request.artifact_entries();
        let job = Arc::new(request.job);

        let platform = self.platform.clone();
        let application_id = run_blocking_bounded(
            DeploymentStage::Allocation,
            None,
            config.ask_timeout,
            move || platform.new_application(),
        )
        .await?;
        tracing::info!(
            application_id = %application_id,
            job_name = %job.name,
            "allocated application"
        );

        let manifest = self
            .stager
            .stage(
                &application_id,
                &config.staging_prefix,
                entries,
                config.replication,
            )
            .await?;
        if cancellation.is_cancelled() {
            return Err(cancelled_error(&application_id, DeploymentStage::Staging));
        }
        self.record_started(&job.name, &manifest).await?;

        let supervisor = LifecycleSupervisor::from_config(self.platform.clone(), config);
        let deployed = match self
            .deployer
            .deploy(config, job, &manifest, &supervisor)
            .await
        {
            Ok(deployed) => deployed,
            Err(DeployFailure { error, teardown }) => {
                self.record_aborted(&application_id, &error, teardown.as_ref())
                    .await;
                return Err(error);
            }
        };

        if cancellation.is_cancelled() {
            let error = cancelled_error(&application_id, DeploymentStage::Submission);
            let teardown = supervisor.terminate_now(deployed.guard).await;
            self.record_aborted(&application_id, &error, Some(&teardown))
                .await;
            return Err(error);
        }

        let watcher = JobResultWatcher::new(config.result_timeout);
        let outcome = match watcher
            .await_outcome(&application_id, deployed.job, cancellation)
            .await
        {
            Ok(outcome) => outcome,
            Err(error) => {
                let teardown = supervisor.terminate_now(deployed.guard).await;
                self.record_aborted(&application_id, &error, Some(&teardown))
                    .await;
                return Err(error);
            }
        };

        let supervision = supervisor.conclude(deployed.guard).await;
        let report = DeploymentReport {
            application_id,
            manifest,
            outcome,
            termination: supervision.termination,
            teardown_error: supervision.teardown_error,
        };
        self.record_completed(&report).await;
        Ok(report)
    }

    pub async fn verify(&self, manifest: &ArtifactManifest) -> OrchestrationResult<()> {
        self.stager.verify(manifest).await
    }

    /// Deletes an application's staging directory and marks it cleaned in the ledger.
    pub async fn cleanup(
        &self,
        application_id: &ApplicationId,
        prefix: &str,
    ) -> OrchestrationResult<bool> {
        let removed = self.stager.remove(application_id, prefix).await?;
        if let Some(ledger) = self.ledger.clone() {
            let id = application_id.clone();
            run_blocking(DeploymentStage::Ledger, Some(application_id), move || {
                ledger.mark_cleaned(&id)
            })
            .await?;
        }
        Ok(removed)
    }

    // A deployment that cannot be recorded does not start.
    async fn record_started(
        &self,
        job_name: &str,
        manifest: &ArtifactManifest,
    ) -> OrchestrationResult<()> {
        let Some(ledger) = self.ledger.clone() else {
            return Ok(());
        };
        let job_name = job_name.to_string();
        let manifest_copy = manifest.clone();
        run_blocking(
            DeploymentStage::Ledger,
            Some(&manifest.application_id),
            move || ledger.record_started(&job_name, &manifest_copy),
        )
        .await
    }

    async fn record_completed(&self, report: &DeploymentReport) {
        let Some(ledger) = self.ledger.clone() else {
            return;
        };
        let report_copy = report.clone();
        if let Err(error) = run_blocking(
            DeploymentStage::Ledger,
            Some(&report.application_id),
            move || ledger.record_completed(&report_copy),
        )
        .await
        {
            tracing::warn!(
                application_id = %report.application_id,
                error = %error,
                "failed to record deployment completion"
            );
        }
    }

    async fn record_aborted(
        &self,
        application_id: &ApplicationId,
        error: &CoreError,
        teardown: Option<&SupervisionReport>,
    ) {
        let Some(ledger) = self.ledger.clone() else {
            return;
        };
        let id = application_id.clone();
        let error_copy = error.clone();
        let termination = teardown.map(|report| report.termination);
        let teardown_error = teardown.and_then(|report| report.teardown_error.clone());
        if let Err(ledger_error) = run_blocking(
            DeploymentStage::Ledger,
            Some(application_id),
            move || ledger.record_aborted(&id, &error_copy, termination, teardown_error.as_ref()),
        )
        .await
        {
            tracing::warn!(
                application_id = %application_id,
                error = %ledger_error,
                "failed to record aborted deployment"
            );
        }
    }
}
