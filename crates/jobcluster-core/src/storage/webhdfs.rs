use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::models::{CoreError, CoreErrorKind};
use crate::storage::{FileStatus, StorageClient, StorageResult};

const WEBHDFS_PREFIX: &str = "/webhdfs/v1";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WebHdfsConfig {
    /// Namenode HTTP address, e.g. `http://namenode:9870`.
    pub namenode_url: String,
    pub user: Option<String>,
    pub request_timeout: Duration,
}

impl WebHdfsConfig {
    pub fn new(namenode_url: impl Into<String>) -> Self {
        Self {
            namenode_url: namenode_url.into(),
            user: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

/// `StorageClient` speaking the WebHDFS REST protocol.
pub struct WebHdfsStorage {
    agent: ureq::Agent,
    config: WebHdfsConfig,
}

impl WebHdfsStorage {
    pub fn new(config: WebHdfsConfig) -> Self {
        // Data-node redirects are followed by hand so the upload body is sent once.
        let agent = ureq::AgentBuilder::new()
            .timeout(config.request_timeout)
            .redirects(0)
            .build();
        Self { agent, config }
    }

    fn request(&self, method: &str, path: &str, op: &str) -> ureq::Request {
        let url = format!(
            "{}{WEBHDFS_PREFIX}{}",
            self.config.namenode_url.trim_end_matches('/'),
            path
        );
        let request = self.agent.request(method, &url).query("op", op);
        match &self.config.user {
            Some(user) => request.query("user.name", user),
            None => request,
        }
    }
}

impl StorageClient for WebHdfsStorage {
    fn home_directory(&self) -> StorageResult<String> {
        let response: HomeDirectory = read_json(
            self.request("GET", "/", "GETHOMEDIRECTORY").call(),
            "GETHOMEDIRECTORY",
            "/",
        )?;
        Ok(response.path)
    }

    fn default_replication(&self) -> StorageResult<u16> {
        let response: ServerDefaultsEnvelope = read_json(
            self.request("GET", "/", "GETSERVERDEFAULTS").call(),
            "GETSERVERDEFAULTS",
            "/",
        )?;
        Ok(response.defaults.replication)
    }

    fn upload(&self, local_path: &Path, remote_path: &str) -> StorageResult<()> {
        let data = std::fs::read(local_path).map_err(|error| {
            storage_failure(format!(
                "failed to read local file '{}': {error}",
                local_path.display()
            ))
        })?;

        let location: LocationResponse = read_json(
            self.request("PUT", remote_path, "CREATE")
                .query("overwrite", "true")
                .query("noredirect", "true")
                .call(),
            "CREATE",
            remote_path,
        )?;

        self.agent
            .put(&location.location)
            .set("Content-Type", "application/octet-stream")
            .send_bytes(&data)
            .map_err(|error| http_failure("CREATE", remote_path, error))?;
        Ok(())
    }

    fn set_replication(&self, remote_path: &str, factor: u16) -> StorageResult<()> {
        let response: BooleanResponse = read_json(
            self.request("PUT", remote_path, "SETREPLICATION")
                .query("replication", &factor.to_string())
                .call(),
            "SETREPLICATION",
            remote_path,
        )?;
        if !response.boolean {
            return Err(storage_failure(format!(
                "namenode refused replication {factor} for '{remote_path}'"
            )));
        }
        Ok(())
    }

    fn stat(&self, remote_path: &str) -> StorageResult<Option<FileStatus>> {
        match self.request("GET", remote_path, "GETFILESTATUS").call() {
            Err(ureq::Error::Status(404, _)) => Ok(None),
            result => {
                let envelope: FileStatusEnvelope = read_json(result, "GETFILESTATUS", remote_path)?;
                Ok(Some(FileStatus {
                    len: envelope.file_status.length,
                    replication: envelope.file_status.replication,
                    modification_time: envelope.file_status.modification_time,
                }))
            }
        }
    }

    fn delete_recursive(&self, remote_path: &str) -> StorageResult<bool> {
        let response: BooleanResponse = read_json(
            self.request("DELETE", remote_path, "DELETE")
                .query("recursive", "true")
                .call(),
            "DELETE",
            remote_path,
        )?;
        Ok(response.boolean)
    }
}

fn read_json<T: DeserializeOwned>(
    result: Result<ureq::Response, ureq::Error>,
    operation: &str,
    remote_path: &str,
) -> StorageResult<T> {
    let body = result
        .map_err(|error| http_failure(operation, remote_path, error))?
        .into_string()
        .map_err(|error| {
            storage_failure(format!(
                "{operation} on '{remote_path}' returned an unreadable body: {error}"
            ))
        })?;
    serde_json::from_str(&body).map_err(|error| {
        storage_failure(format!(
            "{operation} on '{remote_path}' returned unexpected JSON: {error}"
        ))
    })
}

fn http_failure(operation: &str, remote_path: &str, error: ureq::Error) -> CoreError {
    match error {
        ureq::Error::Status(code, response) => {
            let detail = response
                .into_string()
                .ok()
                .and_then(|body| serde_json::from_str::<RemoteExceptionEnvelope>(&body).ok())
                .map(|envelope| {
                    format!(
                        "{}: {}",
                        envelope.exception.exception, envelope.exception.message
                    )
                })
                .unwrap_or_else(|| "no remote exception details".to_string());
            storage_failure(format!(
                "{operation} on '{remote_path}' failed with HTTP {code}: {detail}"
            ))
        }
        ureq::Error::Transport(transport) => storage_failure(format!(
            "{operation} on '{remote_path}' failed: {transport}"
        )),
    }
}

fn storage_failure(message: String) -> CoreError {
    CoreError {
        application: None,
        stage: None,
        kind: CoreErrorKind::StorageFailure,
        message,
    }
}

#[derive(Deserialize)]
struct HomeDirectory {
    #[serde(rename = "Path")]
    path: String,
}

#[derive(Deserialize)]
struct ServerDefaultsEnvelope {
    #[serde(rename = "FsServerDefaults")]
    defaults: ServerDefaults,
}

#[derive(Deserialize)]
struct ServerDefaults {
    replication: u16,
}

#[derive(Deserialize)]
struct LocationResponse {
    #[serde(rename = "Location")]
    location: String,
}

#[derive(Deserialize)]
struct BooleanResponse {
    boolean: bool,
}

#[derive(Deserialize)]
struct FileStatusEnvelope {
    #[serde(rename = "FileStatus")]
    file_status: RawFileStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFileStatus {
    length: u64,
    replication: u16,
    #[serde(default)]
    modification_time: u64,
}

#[derive(Deserialize)]
struct RemoteExceptionEnvelope {
    #[serde(rename = "RemoteException")]
    exception: RemoteException,
}

#[derive(Deserialize)]
struct RemoteException {
    #[serde(default)]
    exception: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::{FileStatusEnvelope, RemoteExceptionEnvelope};

    #[test]
    fn file_status_payload_maps_replication_and_length() {
        let body = r#"{"FileStatus":{"accessTime":0,"blockSize":134217728,"group":"supergroup",
            "length":2048,"modificationTime":1700000000123,"owner":"flink","pathSuffix":"",
            "permission":"644","replication":4,"type":"FILE"}}"#;
        let envelope: FileStatusEnvelope = serde_json::from_str(body).unwrap();

        assert_eq!(envelope.file_status.length, 2048);
        assert_eq!(envelope.file_status.replication, 4);
        assert_eq!(envelope.file_status.modification_time, 1_700_000_000_123);
    }

    #[test]
    fn remote_exception_payload_is_readable() {
        let body = r#"{"RemoteException":{"exception":"IOException",
            "javaClassName":"java.io.IOException",
            "message":"Requested replication factor of 600 exceeds maximum of 512"}}"#;
        let envelope: RemoteExceptionEnvelope = serde_json::from_str(body).unwrap();

        assert_eq!(envelope.exception.exception, "IOException");
        assert!(envelope.exception.message.contains("exceeds maximum"));
    }
}
