use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::DeploymentConfiguration;
use crate::models::{
    ApplicationId, ApplicationStatus, ClusterHandle, CoreError, CoreErrorKind, DeploymentStage,
    TerminationState,
};
use crate::orchestration::run_blocking_bounded;
use crate::platform::PlatformClient;

/// Sole owner of a live cluster handle. The connection is released exactly
/// once: by the supervisor, or on drop. Dropping a guard the supervisor never
/// saw also force-kills the cluster, synchronously, so the kill is not lost
/// when the drop comes from runtime shutdown.
pub struct ClusterGuard {
    handle: Arc<ClusterHandle>,
    platform: Arc<dyn PlatformClient>,
    released: bool,
}

impl ClusterGuard {
    pub(crate) fn new(handle: ClusterHandle, platform: Arc<dyn PlatformClient>) -> Self {
        Self {
            handle: Arc::new(handle),
            platform,
            released: false,
        }
    }

    pub fn handle(&self) -> &ClusterHandle {
        &self.handle
    }

    pub fn application_id(&self) -> &ApplicationId {
        &self.handle.application_id
    }

    pub(crate) fn shared_handle(&self) -> Arc<ClusterHandle> {
        self.handle.clone()
    }

    fn release(mut self) {
        self.platform.release(&self.handle);
        self.released = true;
        tracing::debug!(
            application_id = %self.handle.application_id,
            "released cluster connection"
        );
    }
}

impl Drop for ClusterGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        tracing::warn!(
            application_id = %self.handle.application_id,
            "cluster abandoned before teardown; force-killing"
        );
        if let Err(error) = self.platform.force_kill(&self.handle) {
            tracing::error!(
                application_id = %self.handle.application_id,
                error = %error,
                "failed to kill abandoned cluster; manual inspection required"
            );
        }
        self.platform.release(&self.handle);
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SupervisionReport {
    pub termination: TerminationState,
    /// Set when the forced kill failed; the cluster may still be running.
    pub teardown_error: Option<CoreError>,
    pub polls: u32,
}

/// Waits for a cluster to shut down on its own and force-kills it when it
/// does not within the deadline.
#[derive(Clone)]
pub struct LifecycleSupervisor {
    platform: Arc<dyn PlatformClient>,
    poll_interval: Duration,
    deadline: Duration,
    call_timeout: Duration,
}

impl LifecycleSupervisor {
    pub fn new(
        platform: Arc<dyn PlatformClient>,
        poll_interval: Duration,
        deadline: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            platform,
            poll_interval,
            deadline,
            call_timeout,
        }
    }

    pub fn from_config(
        platform: Arc<dyn PlatformClient>,
        config: &DeploymentConfiguration,
    ) -> Self {
        Self::new(
            platform,
            config.termination_poll_interval,
            config.termination_deadline,
            config.ask_timeout,
        )
    }

    /// Polls until the cluster reports finished or the deadline passes, then
    /// kills it once if needed. The guard is always released before returning.
    pub async fn conclude(&self, guard: ClusterGuard) -> SupervisionReport {
        let handle = guard.shared_handle();
        let application_id = handle.application_id.clone();
        let deadline = Instant::now() + self.deadline;
        let mut polls = 0;
        let mut termination = TerminationState::Running;

        loop {
            polls += 1;
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self
                .query_status(&handle, self.call_timeout.min(remaining))
                .await
            {
                Ok(ApplicationStatus::Finished) => {
                    termination = TerminationState::Finished;
                    break;
                }
                Ok(ApplicationStatus::Running) => {}
                Err(error) => {
                    tracing::warn!(
                        application_id = %application_id,
                        error = %error,
                        "status query failed; treating cluster as running"
                    );
                }
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }

        let mut teardown_error = None;
        if termination == TerminationState::Running {
            tracing::warn!(
                application_id = %application_id,
                deadline = ?self.deadline,
                polls,
                "cluster did not finish before the deadline; force-killing"
            );
            match self.force_kill(&handle).await {
                Ok(()) => termination = TerminationState::Killed,
                Err(error) => teardown_error = Some(error),
            }
        }

        guard.release();
        tracing::info!(
            application_id = %application_id,
            termination = termination.as_str(),
            polls,
            "cluster lifecycle concluded"
        );
        SupervisionReport {
            termination,
            teardown_error,
            polls,
        }
    }

    /// Kills the cluster without waiting for it to finish and releases the guard.
    pub async fn terminate_now(&self, guard: ClusterGuard) -> SupervisionReport {
        let handle = guard.shared_handle();
        let (termination, teardown_error) = match self.force_kill(&handle).await {
            Ok(()) => (TerminationState::Killed, None),
            Err(error) => (TerminationState::Running, Some(error)),
        };
        guard.release();
        tracing::info!(
            application_id = %handle.application_id,
            termination = termination.as_str(),
            "cluster terminated early"
        );
        SupervisionReport {
            termination,
            teardown_error,
            polls: 0,
        }
    }

    // `limit` never reaches past the deadline, so a hung status call cannot
    // delay the kill.
    async fn query_status(
        &self,
        handle: &Arc<ClusterHandle>,
        limit: Duration,
    ) -> Result<ApplicationStatus, CoreError> {
        let platform = self.platform.clone();
        let target = handle.clone();
        run_blocking_bounded(
            DeploymentStage::Termination,
            Some(&handle.application_id),
            limit,
            move || platform.query_status(&target),
        )
        .await
    }

    async fn force_kill(&self, handle: &Arc<ClusterHandle>) -> Result<(), CoreError> {
        let platform = self.platform.clone();
        let target = handle.clone();
        let application_id = handle.application_id.clone();
        run_blocking_bounded(
            DeploymentStage::Termination,
            Some(&application_id),
            self.call_timeout,
            move || platform.force_kill(&target),
        )
        .await
        .map_err(|error| {
            tracing::error!(
                application_id = %application_id,
                error = %error,
                "failed to force-kill cluster; manual inspection required"
            );
            CoreError {
                kind: CoreErrorKind::Teardown,
                message: format!(
                    "failed to kill cluster {application_id}; manual inspection required: {}",
                    error.message
                ),
                ..error
            }
        })
    }
}
