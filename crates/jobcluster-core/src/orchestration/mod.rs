pub mod deployer;
pub mod deployment;
pub mod in_memory;
pub mod staging;
pub mod supervisor;
pub mod watcher;

pub use deployer::{ClusterDeployer, DeployFailure, DeployedCluster};
pub use deployment::{DeploymentRequest, DeploymentRuntime};
pub use in_memory::{
    InMemoryPlatform, InMemoryStorage, PlatformCallCounts, PlatformScript, SimulatedApplication,
    StorageCallCounts,
};
pub use staging::ArtifactStager;
pub use supervisor::{ClusterGuard, LifecycleSupervisor, SupervisionReport};
pub use watcher::JobResultWatcher;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

use crate::models::{ApplicationId, CoreError, CoreErrorKind, DeploymentStage};

pub type OrchestrationResult<T> = Result<T, CoreError>;

/// Shared flag a caller uses to abandon an in-flight deployment.
#[derive(Clone, Debug, Default)]
pub struct DeploymentCancellationToken {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl DeploymentCancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Runs a blocking collaborator call on the blocking pool and attributes any
/// error to the application and stage.
pub(crate) async fn run_blocking<T, F>(
    stage: DeploymentStage,
    application: Option<&ApplicationId>,
    operation: F,
) -> OrchestrationResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> OrchestrationResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(operation)
        .await
        .map_err(|join_error| CoreError {
            application: application.cloned(),
            stage: Some(stage),
            kind: CoreErrorKind::Internal,
            message: format!("{stage:?} join failure: {join_error}"),
        })?
        .map_err(|error| error.attribute(application, stage))
}

/// Like `run_blocking`, failing with `Timeout` when the call outlives `limit`.
/// The blocking call itself is not interrupted.
pub(crate) async fn run_blocking_bounded<T, F>(
    stage: DeploymentStage,
    application: Option<&ApplicationId>,
    limit: Duration,
    operation: F,
) -> OrchestrationResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> OrchestrationResult<T> + Send + 'static,
{
    tokio::time::timeout(limit, run_blocking(stage, application, operation))
        .await
        .map_err(|_| CoreError {
            application: application.cloned(),
            stage: Some(stage),
            kind: CoreErrorKind::Timeout,
            message: format!("{stage:?} did not complete within {}ms", limit.as_millis()),
        })?
}

pub(crate) fn cancelled_error(application: &ApplicationId, stage: DeploymentStage) -> CoreError {
    CoreError {
        application: Some(application.clone()),
        stage: Some(stage),
        kind: CoreErrorKind::Cancelled,
        message: "deployment cancelled by caller".to_string(),
    }
}
