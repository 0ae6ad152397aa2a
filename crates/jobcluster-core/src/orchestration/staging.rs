use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::models::{
    AppliedReplication, ApplicationId, ArtifactEntry, ArtifactManifest, CoreError, CoreErrorKind,
    DeploymentStage, StagedArtifact,
};
use crate::orchestration::{OrchestrationResult, run_blocking};
use crate::storage::{self, StorageClient};

/// Uploads deployment artifacts into the per-application staging directory.
#[derive(Clone)]
pub struct ArtifactStager {
    storage: Arc<dyn StorageClient>,
}

impl ArtifactStager {
    pub fn new(storage: Arc<dyn StorageClient>) -> Self {
        Self { storage }
    }

    /// Stages every entry under `<home>/.<prefix>/<application_id>`. When
    /// `replication` is set it is applied to each uploaded file; otherwise the
    /// storage default stays in effect and is reported in the manifest.
    ///
    /// Staging the same application again overwrites its files in place.
    pub async fn stage(
        &self,
        application_id: &ApplicationId,
        prefix: &str,
        entries: Vec<ArtifactEntry>,
        replication: Option<u16>,
    ) -> OrchestrationResult<ArtifactManifest> {
        let storage = self.storage.clone();
        let id = application_id.clone();
        let prefix = prefix.to_string();
        run_blocking(DeploymentStage::Staging, Some(application_id), move || {
            stage_blocking(storage.as_ref(), &id, &prefix, &entries, replication)
        })
        .await
        .map_err(into_staging_error)
    }

    /// Confirms every staged file still exists with the manifest's replication.
    pub async fn verify(&self, manifest: &ArtifactManifest) -> OrchestrationResult<()> {
        let storage = self.storage.clone();
        let manifest = manifest.clone();
        let application_id = manifest.application_id.clone();
        run_blocking(DeploymentStage::Staging, Some(&application_id), move || {
            verify_blocking(storage.as_ref(), &manifest)
        })
        .await
        .map_err(into_staging_error)
    }

    /// Deletes the application's staging directory. Returns whether anything was removed.
    pub async fn remove(
        &self,
        application_id: &ApplicationId,
        prefix: &str,
    ) -> OrchestrationResult<bool> {
        let storage = self.storage.clone();
        let id = application_id.clone();
        let prefix = prefix.to_string();
        run_blocking(DeploymentStage::Staging, Some(application_id), move || {
            let home = storage.home_directory()?;
            let dir = storage::staging_dir(&home, &prefix, &id);
            let removed = storage.delete_recursive(&dir)?;
            tracing::info!(
                application_id = %id,
                staging_dir = %dir,
                removed,
                "removed staging directory"
            );
            Ok(removed)
        })
        .await
        .map_err(into_staging_error)
    }
}

fn stage_blocking(
    storage: &dyn StorageClient,
    application_id: &ApplicationId,
    prefix: &str,
    entries: &[ArtifactEntry],
    replication: Option<u16>,
) -> OrchestrationResult<ArtifactManifest> {
    validate_entries(entries)?;

    let home = storage.home_directory()?;
    let staging_dir = storage::staging_dir(&home, prefix, application_id);
    let applied = match replication {
        Some(factor) => AppliedReplication::Configured(factor),
        None => AppliedReplication::StorageDefault(storage.default_replication()?),
    };

    let mut artifacts = Vec::with_capacity(entries.len());
    for entry in entries {
        let remote_path = storage::remote_path(&staging_dir, &entry.remote_name);
        let sha256 = sha256_file(&entry.local_path).map_err(|error| {
            staging_error(format!(
                "failed to read local artifact '{}': {error}",
                entry.local_path.display()
            ))
        })?;

        storage.upload(&entry.local_path, &remote_path)?;
        if let Some(factor) = replication {
            storage.set_replication(&remote_path, factor)?;
        }
        let status = storage.stat(&remote_path)?.ok_or_else(|| {
            staging_error(format!("uploaded artifact '{remote_path}' is not visible"))
        })?;

        tracing::debug!(
            application_id = %application_id,
            remote_path = %remote_path,
            len = status.len,
            replication = status.replication,
            "uploaded artifact"
        );
        artifacts.push(StagedArtifact {
            entry: entry.clone(),
            remote_path,
            sha256,
            len: status.len,
            modification_time: status.modification_time,
        });
    }

    tracing::info!(
        application_id = %application_id,
        staging_dir = %staging_dir,
        artifacts = artifacts.len(),
        replication = applied.factor(),
        replication_source = applied.source_str(),
        "staged artifacts"
    );

    Ok(ArtifactManifest {
        application_id: application_id.clone(),
        staging_dir,
        artifacts,
        replication: applied,
    })
}

// Local checks run before anything is uploaded.
fn validate_entries(entries: &[ArtifactEntry]) -> OrchestrationResult<()> {
    let mut names = HashSet::new();
    for entry in entries {
        if entry.remote_name.is_empty() || entry.remote_name.contains('/') {
            return Err(staging_error(format!(
                "artifact '{}' has an invalid remote name '{}'",
                entry.local_path.display(),
                entry.remote_name
            )));
        }
        if !names.insert(entry.remote_name.as_str()) {
            return Err(staging_error(format!(
                "more than one artifact would be staged as '{}'",
                entry.remote_name
            )));
        }
        if !entry.local_path.is_file() {
            return Err(staging_error(format!(
                "local artifact '{}' does not exist or is not a file",
                entry.local_path.display()
            )));
        }
    }
    Ok(())
}

fn verify_blocking(
    storage: &dyn StorageClient,
    manifest: &ArtifactManifest,
) -> OrchestrationResult<()> {
    let expected = manifest.replication.factor();
    for artifact in &manifest.artifacts {
        let status = storage.stat(&artifact.remote_path)?.ok_or_else(|| {
            staging_error(format!(
                "staged artifact '{}' is missing",
                artifact.remote_path
            ))
        })?;
        if status.replication != expected {
            return Err(staging_error(format!(
                "staged artifact '{}' has replication {} but {} ({}) was applied",
                artifact.remote_path,
                status.replication,
                expected,
                manifest.replication.source_str()
            )));
        }
        if status.len != artifact.len {
            return Err(staging_error(format!(
                "staged artifact '{}' is {} bytes but {} were uploaded",
                artifact.remote_path, status.len, artifact.len
            )));
        }
    }
    Ok(())
}

fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn into_staging_error(error: CoreError) -> CoreError {
    match error.kind {
        CoreErrorKind::StorageFailure => CoreError {
            kind: CoreErrorKind::Staging,
            ..error
        },
        _ => error,
    }
}

fn staging_error(message: String) -> CoreError {
    CoreError {
        application: None,
        stage: Some(DeploymentStage::Staging),
        kind: CoreErrorKind::Staging,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::{sha256_file, validate_entries};
    use crate::models::{ArtifactEntry, CoreErrorKind};

    fn temp_file(name: &str, contents: &[u8]) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "jobcluster-staging-unit-{}-{name}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn sha256_matches_known_digest() {
        let path = temp_file("abc.txt", b"abc");
        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn duplicate_remote_names_are_rejected_before_upload() {
        let first = temp_file("first.jar", b"1");
        let second = temp_file("second.jar", b"2");
        let entries = vec![
            ArtifactEntry::library(&first).remote_name("lib.jar"),
            ArtifactEntry::library(&second).remote_name("lib.jar"),
        ];

        let error = validate_entries(&entries).unwrap_err();
        assert_eq!(error.kind, CoreErrorKind::Staging);
        assert!(error.message.contains("lib.jar"));
    }

    #[test]
    fn nested_remote_names_are_rejected() {
        let path = temp_file("nested.jar", b"n");
        let entries = vec![ArtifactEntry::library(&path).remote_name("lib/nested.jar")];

        assert!(validate_entries(&entries).is_err());
    }
}
