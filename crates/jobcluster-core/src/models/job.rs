use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct JobId(pub String);

/// The job to run on the per-job cluster. The payload is produced upstream and
/// is never inspected here.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobSpecification {
    pub job_id: JobId,
    pub name: String,
    pub parallelism: u32,
    pub payload: Vec<u8>,
    pub dependency_jars: Vec<PathBuf>,
}

impl JobSpecification {
    pub fn new(job_id: JobId, name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            job_id,
            name: name.into(),
            parallelism: 1,
            payload,
            dependency_jars: Vec::new(),
        }
    }

    pub fn parallelism(mut self, parallelism: u32) -> Self {
        self.parallelism = parallelism;
        self
    }

    pub fn add_jar(mut self, jar: impl Into<PathBuf>) -> Self {
        self.dependency_jars.push(jar.into());
        self
    }
}

/// Opaque failure cause reported by the cluster. Decoding is left to the caller.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SerializedFailure {
    payload: Vec<u8>,
}

impl SerializedFailure {
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// Reconstructs the remote error. A payload the decoder cannot read still
    /// yields an error carrying the raw payload text.
    pub fn deserialize_error(&self, decoder: &dyn FailureDecoder) -> RemoteJobError {
        match decoder.decode(&self.payload) {
            Ok(error) => error,
            Err(reason) => {
                tracing::debug!(reason = %reason, "falling back to raw failure payload");
                RemoteJobError {
                    class_name: UNDECODABLE_FAILURE_CLASS.to_string(),
                    message: String::from_utf8_lossy(&self.payload).into_owned(),
                    stack_trace: None,
                    cause: None,
                }
            }
        }
    }
}

pub const UNDECODABLE_FAILURE_CLASS: &str = "undecodable";

/// Deserialization context for remote failures.
pub trait FailureDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<RemoteJobError, String>;
}

/// Decodes the JSON failure documents the cluster's REST endpoint emits.
pub struct JsonFailureDecoder;

impl FailureDecoder for JsonFailureDecoder {
    fn decode(&self, payload: &[u8]) -> Result<RemoteJobError, String> {
        serde_json::from_slice(payload).map_err(|error| error.to_string())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct RemoteJobError {
    #[serde(rename = "class")]
    pub class_name: String,
    #[serde(default)]
    pub message: String,
    #[serde(rename = "stack-trace", default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<RemoteJobError>>,
}

impl Display for RemoteJobError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.class_name, self.message)
    }
}

impl Error for RemoteJobError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause.as_deref().map(|cause| cause as &(dyn Error + 'static))
    }
}

#[derive(Debug, Error)]
#[error("job failed")]
pub struct JobFailedError {
    #[source]
    pub cause: RemoteJobError,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JobOutcome {
    Succeeded,
    Failed(SerializedFailure),
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn failure(&self) -> Option<&SerializedFailure> {
        match self {
            Self::Succeeded => None,
            Self::Failed(failure) => Some(failure),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
        }
    }

    /// Turns a failed outcome into an error whose source is the decoded cause.
    pub fn into_result(self, decoder: &dyn FailureDecoder) -> Result<(), JobFailedError> {
        match self {
            Self::Succeeded => Ok(()),
            Self::Failed(failure) => Err(JobFailedError {
                cause: failure.deserialize_error(decoder),
            }),
        }
    }
}
