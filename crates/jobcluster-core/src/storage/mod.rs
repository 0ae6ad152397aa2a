pub mod webhdfs;

pub use webhdfs::{WebHdfsConfig, WebHdfsStorage};

use std::path::Path;

use crate::models::{ApplicationId, CoreError};

pub type StorageResult<T> = Result<T, CoreError>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FileStatus {
    pub len: u64,
    pub replication: u16,
    pub modification_time: u64,
}

/// Capability interface over the shared distributed filesystem. Calls block;
/// the orchestrator runs them on the blocking pool.
pub trait StorageClient: Send + Sync {
    fn home_directory(&self) -> StorageResult<String>;

    /// Replication the storage cluster applies to files written without an explicit factor.
    fn default_replication(&self) -> StorageResult<u16>;

    /// Writes the local file to `remote_path`, replacing any existing file.
    fn upload(&self, local_path: &Path, remote_path: &str) -> StorageResult<()>;

    fn set_replication(&self, remote_path: &str, factor: u16) -> StorageResult<()>;

    fn stat(&self, remote_path: &str) -> StorageResult<Option<FileStatus>>;

    /// Returns whether anything was deleted.
    fn delete_recursive(&self, remote_path: &str) -> StorageResult<bool>;
}

/// `<home>/.<prefix>/<application_id>`
pub fn staging_dir(home: &str, prefix: &str, application_id: &ApplicationId) -> String {
    format!("{}/.{prefix}/{application_id}", home.trim_end_matches('/'))
}

pub fn remote_path(staging_dir: &str, remote_name: &str) -> String {
    format!("{}/{remote_name}", staging_dir.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::{remote_path, staging_dir};
    use crate::models::ApplicationId;

    #[test]
    fn staging_layout_is_keyed_by_application_id() {
        let id = ApplicationId::new(1_700_000_000_000, 3);
        let dir = staging_dir("/user/flink/", "jobcluster", &id);

        assert_eq!(dir, "/user/flink/.jobcluster/application_1700000000000_0003");
        assert_eq!(
            remote_path(&dir, "bundle.jar"),
            "/user/flink/.jobcluster/application_1700000000000_0003/bundle.jar"
        );
    }
}
