use thiserror::Error;

use crate::models::{ApplicationId, DeploymentStage};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CoreErrorKind {
    Configuration,
    Staging,
    Deployment,
    Teardown,
    Timeout,
    Cancelled,
    StorageFailure,
    Internal,
}

#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("{kind:?}: {message}")]
pub struct CoreError {
    pub application: Option<ApplicationId>,
    pub stage: Option<DeploymentStage>,
    pub kind: CoreErrorKind,
    pub message: String,
}

impl CoreError {
    /// Fills in the application and stage when the originating layer did not know them.
    pub fn attribute(self, application: Option<&ApplicationId>, stage: DeploymentStage) -> Self {
        CoreError {
            application: self.application.or_else(|| application.cloned()),
            stage: self.stage.or(Some(stage)),
            kind: self.kind,
            message: self.message,
        }
    }
}
