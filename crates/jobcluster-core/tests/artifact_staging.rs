use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use jobcluster_core::models::{
    AppliedReplication, ApplicationId, ArtifactEntry, ArtifactRole, CoreErrorKind,
};
use jobcluster_core::orchestration::{ArtifactStager, InMemoryStorage};

const HOME: &str = "/user/flink";

fn workspace(test_name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("jobcluster-{test_name}-{nanos}"));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn entries(dir: &Path) -> Vec<ArtifactEntry> {
    vec![
        ArtifactEntry::bundle(write(dir, "dist.jar", b"bundle bytes")),
        ArtifactEntry::library(write(dir, "lib-a.jar", b"library a")),
        ArtifactEntry::user_jar(write(dir, "job.jar", b"user code")),
    ]
}

fn application() -> ApplicationId {
    ApplicationId::new(1_700_000_000_000, 1)
}

#[tokio::test]
async fn configured_replication_is_applied_to_every_staged_file() {
    let dir = workspace("staging-configured");
    let storage = Arc::new(InMemoryStorage::new(HOME, 3));
    let stager = ArtifactStager::new(storage.clone());

    let manifest = stager
        .stage(&application(), "jobcluster", entries(&dir), Some(4))
        .await
        .unwrap();

    assert_eq!(manifest.replication, AppliedReplication::Configured(4));
    assert_eq!(
        manifest.staging_dir,
        "/user/flink/.jobcluster/application_1700000000000_0001"
    );
    assert_eq!(manifest.artifacts.len(), 3);
    for artifact in &manifest.artifacts {
        let status = storage.file_status(&artifact.remote_path).unwrap();
        assert_eq!(status.replication, 4, "{}", artifact.remote_path);
        assert_eq!(status.len, artifact.len);
        assert!(artifact.remote_path.starts_with(&manifest.staging_dir));
    }
    assert_eq!(storage.call_counts().set_replication, 3);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn unset_replication_leaves_storage_default_and_reports_it() {
    let dir = workspace("staging-default");
    let storage = Arc::new(InMemoryStorage::new(HOME, 3));
    let stager = ArtifactStager::new(storage.clone());

    let manifest = stager
        .stage(&application(), "jobcluster", entries(&dir), None)
        .await
        .unwrap();

    assert_eq!(manifest.replication, AppliedReplication::StorageDefault(3));
    assert!(!manifest.replication.is_configured());
    for artifact in &manifest.artifacts {
        assert_eq!(storage.file_status(&artifact.remote_path).unwrap().replication, 3);
    }
    assert_eq!(storage.call_counts().set_replication, 0);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn manifest_preserves_roles_digests_and_contents() {
    let dir = workspace("staging-manifest");
    let storage = Arc::new(InMemoryStorage::new(HOME, 3));
    let stager = ArtifactStager::new(storage.clone());

    let manifest = stager
        .stage(&application(), "jobcluster", entries(&dir), None)
        .await
        .unwrap();

    let bundle = manifest.bundle().unwrap();
    assert_eq!(bundle.entry.remote_name, "dist.jar");
    assert_eq!(
        storage.contents(&bundle.remote_path).unwrap(),
        b"bundle bytes".to_vec()
    );
    assert_eq!(bundle.sha256.len(), 64);
    assert_eq!(manifest.with_role(ArtifactRole::UserJar).count(), 1);
    assert!(manifest.artifact("lib-a.jar").is_some());

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn restaging_overwrites_in_place() {
    let dir = workspace("staging-idempotent");
    let storage = Arc::new(InMemoryStorage::new(HOME, 3));
    let stager = ArtifactStager::new(storage.clone());

    let first = stager
        .stage(&application(), "jobcluster", entries(&dir), Some(2))
        .await
        .unwrap();
    let paths_after_first = storage.paths();
    let second = stager
        .stage(&application(), "jobcluster", entries(&dir), Some(2))
        .await
        .unwrap();

    assert_eq!(storage.paths(), paths_after_first);
    assert_eq!(first.staging_dir, second.staging_dir);
    for (before, after) in first.artifacts.iter().zip(&second.artifacts) {
        assert_eq!(before.remote_path, after.remote_path);
        assert_eq!(before.sha256, after.sha256);
        assert!(after.modification_time > before.modification_time);
    }

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn missing_local_file_fails_before_any_upload() {
    let dir = workspace("staging-missing");
    let storage = Arc::new(InMemoryStorage::new(HOME, 3));
    let stager = ArtifactStager::new(storage.clone());
    let mut requested = entries(&dir);
    requested.push(ArtifactEntry::library(dir.join("absent.jar")));

    let error = stager
        .stage(&application(), "jobcluster", requested, Some(4))
        .await
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::Staging);
    assert_eq!(error.application, Some(application()));
    assert!(error.message.contains("absent.jar"));
    assert_eq!(storage.call_counts().uploads, 0);

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn replication_above_storage_maximum_fails_staging() {
    let dir = workspace("staging-above-max");
    let storage = Arc::new(InMemoryStorage::new(HOME, 3).with_max_replication(10));
    let stager = ArtifactStager::new(storage);

    let error = stager
        .stage(&application(), "jobcluster", entries(&dir), Some(11))
        .await
        .unwrap_err();

    assert_eq!(error.kind, CoreErrorKind::Staging);
    assert!(error.message.contains("exceeds maximum"));

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn verify_detects_replication_drift_and_missing_files() {
    let dir = workspace("staging-verify");
    let storage = Arc::new(InMemoryStorage::new(HOME, 3));
    let stager = ArtifactStager::new(storage.clone());
    let manifest = stager
        .stage(&application(), "jobcluster", entries(&dir), Some(4))
        .await
        .unwrap();

    stager.verify(&manifest).await.unwrap();

    let library = manifest.artifact("lib-a.jar").unwrap();
    assert!(storage.overwrite_replication(&library.remote_path, 1));
    let drift = stager.verify(&manifest).await.unwrap_err();
    assert_eq!(drift.kind, CoreErrorKind::Staging);
    assert!(drift.message.contains("replication 1"));

    assert!(storage.remove_file(&library.remote_path));
    let missing = stager.verify(&manifest).await.unwrap_err();
    assert!(missing.message.contains("missing"));

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn remove_deletes_only_the_application_directory() {
    let dir = workspace("staging-remove");
    let storage = Arc::new(InMemoryStorage::new(HOME, 3));
    let stager = ArtifactStager::new(storage.clone());
    let other = ApplicationId::new(1_700_000_000_000, 2);
    stager
        .stage(&application(), "jobcluster", entries(&dir), None)
        .await
        .unwrap();
    let kept = stager
        .stage(&other, "jobcluster", entries(&dir), None)
        .await
        .unwrap();

    assert!(stager.remove(&application(), "jobcluster").await.unwrap());
    assert!(!stager.remove(&application(), "jobcluster").await.unwrap());

    let remaining = storage.paths();
    assert_eq!(remaining.len(), kept.artifacts.len());
    assert!(remaining.iter().all(|path| path.starts_with(&kept.staging_dir)));

    let _ = std::fs::remove_dir_all(dir);
}
