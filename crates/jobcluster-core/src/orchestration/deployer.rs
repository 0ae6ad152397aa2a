use std::sync::Arc;

use crate::config::{ClasspathInclusion, DeploymentConfiguration};
use crate::models::{
    ArtifactManifest, ArtifactRole, ClusterRequest, ClusterSpecification, CoreError,
    CoreErrorKind, DeploymentStage, JobSpecification,
};
use crate::orchestration::supervisor::{ClusterGuard, LifecycleSupervisor, SupervisionReport};
use crate::orchestration::{OrchestrationResult, run_blocking, run_blocking_bounded};
use crate::platform::{PlatformClient, RunningJob};

/// A launched cluster with the job submitted to it.
pub struct DeployedCluster {
    pub guard: ClusterGuard,
    pub job: Box<dyn RunningJob>,
}

/// Why `ClusterDeployer::deploy` failed, with the teardown report when a
/// cluster had already been created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeployFailure {
    pub error: CoreError,
    pub teardown: Option<SupervisionReport>,
}

impl From<DeployFailure> for CoreError {
    fn from(failure: DeployFailure) -> Self {
        failure.error
    }
}

/// Launches the per-job cluster from a staged manifest and submits the job.
#[derive(Clone)]
pub struct ClusterDeployer {
    platform: Arc<dyn PlatformClient>,
}

impl ClusterDeployer {
    pub fn new(platform: Arc<dyn PlatformClient>) -> Self {
        Self { platform }
    }

    pub fn cluster_specification(
        config: &DeploymentConfiguration,
        job: &JobSpecification,
    ) -> ClusterSpecification {
        let slots = config.slots_per_worker.max(1);
        let parallelism = job.parallelism.max(1);
        ClusterSpecification {
            master_memory_mb: config.master_memory.mebibytes(),
            worker_memory_mb: config.worker_memory.mebibytes(),
            slots_per_worker: slots,
            worker_count: parallelism.div_ceil(slots),
        }
    }

    /// Splits staged artifacts into the system classpath and the user
    /// classpath according to the inclusion policy. The bundle always comes last
    /// on the system classpath.
    pub fn classpath(
        inclusion: ClasspathInclusion,
        manifest: &ArtifactManifest,
    ) -> (Vec<String>, Vec<String>) {
        let mut libraries = names(manifest, ArtifactRole::Library);
        libraries.sort();
        let mut user_jars = names(manifest, ArtifactRole::UserJar);

        let mut system = match inclusion {
            ClasspathInclusion::Disabled => libraries,
            ClasspathInclusion::First => {
                user_jars.extend(libraries);
                std::mem::take(&mut user_jars)
            }
            ClasspathInclusion::Last => {
                let mut combined = libraries;
                combined.append(&mut user_jars);
                combined
            }
            ClasspathInclusion::Order => {
                let mut combined = libraries;
                combined.append(&mut user_jars);
                combined.sort();
                combined
            }
        };
        system.extend(names(manifest, ArtifactRole::Bundle));
        (system, user_jars)
    }

    pub fn cluster_request(
        config: &DeploymentConfiguration,
        job: &JobSpecification,
        manifest: &ArtifactManifest,
    ) -> ClusterRequest {
        let (system_classpath, user_classpath) =
            Self::classpath(config.classpath_inclusion, manifest);
        ClusterRequest {
            application_id: manifest.application_id.clone(),
            name: job.name.clone(),
            specification: Self::cluster_specification(config, job),
            staging_dir: manifest.staging_dir.clone(),
            artifacts: manifest.artifacts.clone(),
            system_classpath,
            user_classpath,
            startup_timeout: config.startup_timeout,
        }
    }

    /// Launches the cluster. An error means no cluster was left behind.
    ///
    /// No outer timeout applies here: the platform bounds startup with the
    /// request's own timeout and cleans up after itself. The guard is built on
    /// the blocking thread, so a cluster that comes up after this future was
    /// dropped is still torn down.
    pub async fn create_cluster(
        &self,
        request: ClusterRequest,
    ) -> OrchestrationResult<ClusterGuard> {
        let platform = self.platform.clone();
        let application_id = request.application_id.clone();
        let guard = run_blocking(
            DeploymentStage::ClusterCreation,
            Some(&application_id),
            move || {
                let handle = platform.create_cluster(&request)?;
                Ok(ClusterGuard::new(handle, platform))
            },
        )
        .await
        .map_err(into_deployment_error)?;

        tracing::info!(
            application_id = %application_id,
            endpoint = %guard.handle().endpoint,
            "cluster is accepting work"
        );
        Ok(guard)
    }

    pub async fn submit_job(
        &self,
        guard: &ClusterGuard,
        job: Arc<JobSpecification>,
        ask_timeout: std::time::Duration,
    ) -> OrchestrationResult<Box<dyn RunningJob>> {
        let platform = self.platform.clone();
        let handle = guard.shared_handle();
        let job_name = job.name.clone();
        let running = run_blocking_bounded(
            DeploymentStage::Submission,
            Some(guard.application_id()),
            ask_timeout,
            move || platform.submit_job(&handle, &job),
        )
        .await
        .map_err(into_deployment_error)?;

        tracing::info!(
            application_id = %guard.application_id(),
            job_id = %running.job_id().0,
            job_name = %job_name,
            "submitted job"
        );
        Ok(running)
    }

    /// Creates the cluster and submits the job. If submission fails the
    /// cluster is killed and released before the error is returned.
    pub async fn deploy(
        &self,
        config: &DeploymentConfiguration,
        job: Arc<JobSpecification>,
        manifest: &ArtifactManifest,
        supervisor: &LifecycleSupervisor,
    ) -> Result<DeployedCluster, DeployFailure> {
        let request = Self::cluster_request(config, &job, manifest);
        let guard = self
            .create_cluster(request)
            .await
            .map_err(|error| DeployFailure {
                error,
                teardown: None,
            })?;

        match self.submit_job(&guard, job, config.ask_timeout).await {
            Ok(job) => Ok(DeployedCluster { guard, job }),
            Err(error) => {
                tracing::warn!(
                    application_id = %guard.application_id(),
                    error = %error,
                    "job submission failed; tearing down cluster"
                );
                let teardown = supervisor.terminate_now(guard).await;
                Err(DeployFailure {
                    error,
                    teardown: Some(teardown),
                })
            }
        }
    }
}

fn names(manifest: &ArtifactManifest, role: ArtifactRole) -> Vec<String> {
    manifest
        .with_role(role)
        .map(|artifact| artifact.entry.remote_name.clone())
        .collect()
}

// A platform call that outlives `ask_timeout` is a deployment failure too.
fn into_deployment_error(error: CoreError) -> CoreError {
    match error.kind {
        CoreErrorKind::Internal | CoreErrorKind::Cancelled => error,
        _ => CoreError {
            kind: CoreErrorKind::Deployment,
            ..error
        },
    }
}

#[cfg(test)]
mod tests {
    use super::ClusterDeployer;
    use crate::config::{ClasspathInclusion, DeploymentConfiguration, MemorySize};
    use crate::models::{
        AppliedReplication, ApplicationId, ArtifactEntry, ArtifactManifest, JobId,
        JobSpecification, StagedArtifact,
    };

    fn staged(entry: ArtifactEntry) -> StagedArtifact {
        StagedArtifact {
            remote_path: format!("/staging/{}", entry.remote_name),
            entry,
            sha256: String::new(),
            len: 1,
            modification_time: 0,
        }
    }

    fn manifest() -> ArtifactManifest {
        ArtifactManifest {
            application_id: ApplicationId::new(1, 1),
            staging_dir: "/staging".to_string(),
            artifacts: vec![
                staged(ArtifactEntry::bundle("/local/dist.jar")),
                staged(ArtifactEntry::library("/local/zeta.jar")),
                staged(ArtifactEntry::user_jar("/local/job.jar")),
                staged(ArtifactEntry::library("/local/alpha.jar")),
            ],
            replication: AppliedReplication::StorageDefault(3),
        }
    }

    #[test]
    fn worker_count_rounds_parallelism_up_to_whole_workers() {
        let config = DeploymentConfiguration {
            slots_per_worker: 4,
            master_memory: MemorySize::from_mebibytes(768),
            ..DeploymentConfiguration::default()
        };
        let job = JobSpecification::new(JobId("j".to_string()), "job", Vec::new()).parallelism(9);

        let spec = ClusterDeployer::cluster_specification(&config, &job);
        assert_eq!(spec.worker_count, 3);
        assert_eq!(spec.slots_per_worker, 4);
        assert_eq!(spec.master_memory_mb, 768);
        assert_eq!(spec.worker_memory_mb, 1728);
    }

    #[test]
    fn disabled_inclusion_keeps_user_jars_off_the_system_classpath() {
        let (system, user) = ClusterDeployer::classpath(ClasspathInclusion::Disabled, &manifest());
        assert_eq!(system, vec!["alpha.jar", "zeta.jar", "dist.jar"]);
        assert_eq!(user, vec!["job.jar"]);
    }

    #[test]
    fn inclusion_policies_position_user_jars() {
        let manifest = manifest();

        let (first, user) = ClusterDeployer::classpath(ClasspathInclusion::First, &manifest);
        assert_eq!(first, vec!["job.jar", "alpha.jar", "zeta.jar", "dist.jar"]);
        assert!(user.is_empty());

        let (last, _) = ClusterDeployer::classpath(ClasspathInclusion::Last, &manifest);
        assert_eq!(last, vec!["alpha.jar", "zeta.jar", "job.jar", "dist.jar"]);

        let (order, _) = ClusterDeployer::classpath(ClasspathInclusion::Order, &manifest);
        assert_eq!(order, vec!["alpha.jar", "job.jar", "zeta.jar", "dist.jar"]);
    }
}
