use std::time::Duration;

use crate::models::{ApplicationId, CoreError, CoreErrorKind, DeploymentStage, JobOutcome};
use crate::orchestration::{DeploymentCancellationToken, OrchestrationResult, cancelled_error};
use crate::platform::RunningJob;

/// Waits for a submitted job's terminal outcome without blocking a runtime thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct JobResultWatcher {
    result_timeout: Option<Duration>,
}

impl JobResultWatcher {
    pub fn new(result_timeout: Option<Duration>) -> Self {
        Self { result_timeout }
    }

    /// Resolves with the job's outcome. A failed job is an `Ok` outcome; only
    /// an unobservable result, a timeout or cancellation is an error.
    pub async fn await_outcome(
        &self,
        application_id: &ApplicationId,
        job: Box<dyn RunningJob>,
        cancellation: &DeploymentCancellationToken,
    ) -> OrchestrationResult<JobOutcome> {
        let job_id = job.job_id().clone();
        let wait = job.wait();
        let limit = async {
            match self.result_timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                tracing::warn!(
                    application_id = %application_id,
                    job_id = %job_id.0,
                    "result wait cancelled"
                );
                return Err(cancelled_error(application_id, DeploymentStage::ResultWait));
            }
            _ = limit => {
                return Err(CoreError {
                    application: Some(application_id.clone()),
                    stage: Some(DeploymentStage::ResultWait),
                    kind: CoreErrorKind::Timeout,
                    message: format!(
                        "job {} produced no result within {}ms",
                        job_id.0,
                        self.result_timeout.unwrap_or_default().as_millis()
                    ),
                });
            }
            outcome = wait => outcome.map_err(|error| {
                error.attribute(Some(application_id), DeploymentStage::ResultWait)
            })?,
        };

        tracing::info!(
            application_id = %application_id,
            job_id = %job_id.0,
            outcome = outcome.as_str(),
            "job reached a terminal state"
        );
        Ok(outcome)
    }
}
