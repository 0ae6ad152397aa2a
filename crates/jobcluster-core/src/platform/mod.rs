pub mod rest;

pub use rest::{RestPlatformClient, RestPlatformConfig};

use std::future::Future;
use std::pin::Pin;

use crate::models::{
    ApplicationId, ApplicationStatus, ClusterHandle, ClusterRequest, CoreError, JobId, JobOutcome,
    JobSpecification,
};

pub type PlatformResult<T> = Result<T, CoreError>;

pub type JobResultFuture = Pin<Box<dyn Future<Output = PlatformResult<JobOutcome>> + Send>>;

/// A submitted job whose terminal outcome has not been observed yet.
pub trait RunningJob: Send {
    fn job_id(&self) -> &JobId;

    /// Resolves once the job reaches a terminal state. Dropping the future
    /// abandons the wait without affecting the job.
    fn wait(self: Box<Self>) -> JobResultFuture;
}

/// Capability interface over the resource-management platform. Calls block;
/// the orchestrator runs them on the blocking pool.
pub trait PlatformClient: Send + Sync {
    /// Reserves an application identifier without launching anything.
    fn new_application(&self) -> PlatformResult<ApplicationId>;

    /// Launches the cluster and waits for it to accept work. On error no
    /// cluster is left running.
    fn create_cluster(&self, request: &ClusterRequest) -> PlatformResult<ClusterHandle>;

    fn submit_job(
        &self,
        handle: &ClusterHandle,
        job: &JobSpecification,
    ) -> PlatformResult<Box<dyn RunningJob>>;

    fn query_status(&self, handle: &ClusterHandle) -> PlatformResult<ApplicationStatus>;

    fn force_kill(&self, handle: &ClusterHandle) -> PlatformResult<()>;

    /// Closes the connection to the cluster. Called exactly once per handle.
    fn release(&self, handle: &ClusterHandle);
}
