pub mod artifact;
pub mod cluster;
pub mod deployment;
pub mod error;
pub mod job;
pub mod termination;

pub use artifact::{
    AppliedReplication, ArtifactEntry, ArtifactManifest, ArtifactRole, StagedArtifact,
};
pub use cluster::{
    ApplicationId, ApplicationStatus, ClusterHandle, ClusterRequest, ClusterSpecification,
};
pub use deployment::{DeploymentRecord, DeploymentReport, DeploymentStage};
pub use error::{CoreError, CoreErrorKind};
pub use job::{
    FailureDecoder, JobFailedError, JobId, JobOutcome, JobSpecification, JsonFailureDecoder,
    RemoteJobError, SerializedFailure, UNDECODABLE_FAILURE_CLASS,
};
pub use termination::TerminationState;
