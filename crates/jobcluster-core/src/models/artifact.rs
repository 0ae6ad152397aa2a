use std::path::{Path, PathBuf};

use crate::models::ApplicationId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ArtifactRole {
    /// The executable bundle the cluster master launches from.
    Bundle,
    /// Supporting libraries shipped alongside the bundle.
    Library,
    /// Jars attached to the job specification.
    UserJar,
}

impl ArtifactRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bundle => "bundle",
            Self::Library => "library",
            Self::UserJar => "user_jar",
        }
    }
}

impl std::str::FromStr for ArtifactRole {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "bundle" => Ok(Self::Bundle),
            "library" => Ok(Self::Library),
            "user_jar" => Ok(Self::UserJar),
            _ => Err(()),
        }
    }
}

/// One local file to stage and the name it gets inside the staging directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArtifactEntry {
    pub local_path: PathBuf,
    pub remote_name: String,
    pub role: ArtifactRole,
}

impl ArtifactEntry {
    pub fn new(local_path: impl Into<PathBuf>, role: ArtifactRole) -> Self {
        let local_path = local_path.into();
        let remote_name = file_name(&local_path);
        Self {
            local_path,
            remote_name,
            role,
        }
    }

    pub fn bundle(local_path: impl Into<PathBuf>) -> Self {
        Self::new(local_path, ArtifactRole::Bundle)
    }

    pub fn library(local_path: impl Into<PathBuf>) -> Self {
        Self::new(local_path, ArtifactRole::Library)
    }

    pub fn user_jar(local_path: impl Into<PathBuf>) -> Self {
        Self::new(local_path, ArtifactRole::UserJar)
    }

    pub fn remote_name(mut self, remote_name: impl Into<String>) -> Self {
        self.remote_name = remote_name.into();
        self
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// The replication factor staging actually left in effect, and where it came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AppliedReplication {
    Configured(u16),
    StorageDefault(u16),
}

impl AppliedReplication {
    pub fn factor(self) -> u16 {
        match self {
            Self::Configured(factor) | Self::StorageDefault(factor) => factor,
        }
    }

    pub fn is_configured(self) -> bool {
        matches!(self, Self::Configured(_))
    }

    pub fn source_str(self) -> &'static str {
        match self {
            Self::Configured(_) => "configured",
            Self::StorageDefault(_) => "storage_default",
        }
    }

    pub fn from_parts(source: &str, factor: u16) -> Option<Self> {
        match source {
            "configured" => Some(Self::Configured(factor)),
            "storage_default" => Some(Self::StorageDefault(factor)),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StagedArtifact {
    pub entry: ArtifactEntry,
    pub remote_path: String,
    pub sha256: String,
    pub len: u64,
    pub modification_time: u64,
}

/// Result of staging: every artifact placed under the application's staging
/// directory, in the order they were requested.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArtifactManifest {
    pub application_id: ApplicationId,
    pub staging_dir: String,
    pub artifacts: Vec<StagedArtifact>,
    pub replication: AppliedReplication,
}

impl ArtifactManifest {
    pub fn artifact(&self, remote_name: &str) -> Option<&StagedArtifact> {
        self.artifacts
            .iter()
            .find(|artifact| artifact.entry.remote_name == remote_name)
    }

    pub fn with_role(&self, role: ArtifactRole) -> impl Iterator<Item = &StagedArtifact> {
        self.artifacts
            .iter()
            .filter(move |artifact| artifact.entry.role == role)
    }

    pub fn bundle(&self) -> Option<&StagedArtifact> {
        self.with_role(ArtifactRole::Bundle).next()
    }
}
