use std::fmt::{Display, Formatter};
use std::time::Duration;

use crate::models::StagedArtifact;

/// Identifier the resource-management platform assigns to one cluster instance.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ApplicationId {
    cluster_timestamp: u64,
    sequence: u32,
}

impl ApplicationId {
    pub fn new(cluster_timestamp: u64, sequence: u32) -> Self {
        Self {
            cluster_timestamp,
            sequence,
        }
    }

    pub fn cluster_timestamp(&self) -> u64 {
        self.cluster_timestamp
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl Display for ApplicationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "application_{}_{:04}",
            self.cluster_timestamp, self.sequence
        )
    }
}

impl std::str::FromStr for ApplicationId {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let rest = value.strip_prefix("application_").ok_or(())?;
        let (timestamp, sequence) = rest.split_once('_').ok_or(())?;
        if sequence.is_empty() || !sequence.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(());
        }
        Ok(Self {
            cluster_timestamp: timestamp.parse().map_err(|_| ())?,
            sequence: sequence.parse().map_err(|_| ())?,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ApplicationStatus {
    Running,
    Finished,
}

/// Resources requested for one per-job cluster.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClusterSpecification {
    pub master_memory_mb: u64,
    pub worker_memory_mb: u64,
    pub slots_per_worker: u32,
    pub worker_count: u32,
}

/// Everything the platform needs to launch the cluster for an allocated application.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClusterRequest {
    pub application_id: ApplicationId,
    pub name: String,
    pub specification: ClusterSpecification,
    pub staging_dir: String,
    pub artifacts: Vec<StagedArtifact>,
    pub system_classpath: Vec<String>,
    pub user_classpath: Vec<String>,
    pub startup_timeout: Duration,
}

/// Live connection to a running cluster. Owned by a `ClusterGuard` for the
/// duration of one deployment call.
#[derive(Debug, Eq, PartialEq)]
pub struct ClusterHandle {
    pub application_id: ApplicationId,
    pub endpoint: String,
}

#[cfg(test)]
mod tests {
    use super::ApplicationId;

    #[test]
    fn application_id_round_trips_through_display() {
        let id = ApplicationId::new(1_700_000_000_000, 7);
        let rendered = id.to_string();

        assert_eq!(rendered, "application_1700000000000_0007");
        assert_eq!(rendered.parse::<ApplicationId>(), Ok(id));
    }

    #[test]
    fn wide_sequences_keep_all_digits() {
        let id: ApplicationId = "application_42_12345".parse().unwrap();
        assert_eq!(id.sequence(), 12345);
        assert_eq!(id.to_string(), "application_42_12345");
    }

    #[test]
    fn malformed_application_ids_are_rejected() {
        for raw in [
            "",
            "application_",
            "application_12",
            "app_12_0001",
            "application_x_0001",
            "application_12_-1",
        ] {
            assert!(raw.parse::<ApplicationId>().is_err(), "{raw} should not parse");
        }
    }
}
