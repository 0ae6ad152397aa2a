use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::models::{
    ApplicationId, ApplicationStatus, ClusterHandle, ClusterRequest, CoreError, CoreErrorKind,
    JobId, JobOutcome, JobSpecification, SerializedFailure,
};
use crate::platform::{JobResultFuture, PlatformClient, PlatformResult, RunningJob};

const DEFAULT_APPLICATION_TYPE: &str = "jobcluster";
const DEFAULT_LAUNCH_COMMAND: &str =
    "./bin/jobcluster-master 1> <LOG_DIR>/master.out 2> <LOG_DIR>/master.err";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DEFAULT_RESULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const MAX_CONSECUTIVE_RESULT_ERRORS: u32 = 5;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RestPlatformConfig {
    /// Resource manager web address, e.g. `http://resourcemanager:8088`.
    pub resource_manager_url: String,
    /// Filesystem URI the staged paths resolve against, e.g. `hdfs://namenode:8020`.
    pub storage_uri: String,
    pub application_type: String,
    pub queue: Option<String>,
    pub launch_command: String,
    pub request_timeout: Duration,
    pub startup_poll_interval: Duration,
    pub result_poll_interval: Duration,
}

impl RestPlatformConfig {
    pub fn new(resource_manager_url: impl Into<String>, storage_uri: impl Into<String>) -> Self {
        Self {
            resource_manager_url: resource_manager_url.into(),
            storage_uri: storage_uri.into(),
            application_type: DEFAULT_APPLICATION_TYPE.to_string(),
            queue: None,
            launch_command: DEFAULT_LAUNCH_COMMAND.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            startup_poll_interval: DEFAULT_STARTUP_POLL_INTERVAL,
            result_poll_interval: DEFAULT_RESULT_POLL_INTERVAL,
        }
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn launch_command(mut self, launch_command: impl Into<String>) -> Self {
        self.launch_command = launch_command.into();
        self
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }
}

/// `PlatformClient` over the resource manager's cluster REST API. Jobs are
/// submitted to, and results read from, the REST endpoint the cluster master
/// publishes as its tracking URL.
#[derive(Clone)]
pub struct RestPlatformClient {
    agent: ureq::Agent,
    config: Arc<RestPlatformConfig>,
}

impl RestPlatformClient {
    pub fn new(config: RestPlatformConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.request_timeout)
            .build();
        Self {
            agent,
            config: Arc::new(config),
        }
    }

    fn cluster_url(&self, suffix: &str) -> String {
        format!(
            "{}/ws/v1/cluster{suffix}",
            self.config.resource_manager_url.trim_end_matches('/')
        )
    }

    fn application_report(&self, application_id: &ApplicationId) -> PlatformResult<AppReport> {
        let envelope: AppEnvelope = read_json(
            self.agent
                .get(&self.cluster_url(&format!("/apps/{application_id}")))
                .call(),
            "application report",
        )?;
        Ok(envelope.app)
    }

    fn kill_application(&self, application_id: &ApplicationId) -> PlatformResult<()> {
        self.agent
            .put(&self.cluster_url(&format!("/apps/{application_id}/state")))
            .set("Content-Type", "application/json")
            .send_string(&json!({ "state": "KILLED" }).to_string())
            .map_err(|error| platform_failure("kill application", error))?;
        Ok(())
    }

    fn kill_after_failed_start(&self, application_id: &ApplicationId) {
        if let Err(kill_error) = self.kill_application(application_id) {
            tracing::warn!(
                application_id = %application_id,
                message = %kill_error.message,
                "failed to kill cluster after startup failure"
            );
        }
    }

    fn submission_body(&self, request: &ClusterRequest) -> Value {
        let storage_uri = self.config.storage_uri.trim_end_matches('/');
        let local_resources: Vec<Value> = request
            .artifacts
            .iter()
            .map(|artifact| {
                json!({
                    "key": artifact.entry.remote_name,
                    "value": {
                        "resource": format!("{storage_uri}{}", artifact.remote_path),
                        "type": "FILE",
                        "visibility": "APPLICATION",
                        "size": artifact.len,
                        "timestamp": artifact.modification_time,
                    }
                })
            })
            .collect();
        let specification = &request.specification;
        let environment = [
            ("JOBCLUSTER_STAGING_DIR", request.staging_dir.clone()),
            ("JOBCLUSTER_CLASSPATH", request.system_classpath.join(":")),
            ("JOBCLUSTER_USER_CLASSPATH", request.user_classpath.join(":")),
            (
                "JOBCLUSTER_WORKER_MEMORY_MB",
                specification.worker_memory_mb.to_string(),
            ),
            (
                "JOBCLUSTER_SLOTS_PER_WORKER",
                specification.slots_per_worker.to_string(),
            ),
            (
                "JOBCLUSTER_WORKER_COUNT",
                specification.worker_count.to_string(),
            ),
        ]
        .into_iter()
        .map(|(key, value)| json!({ "key": key, "value": value }))
        .collect::<Vec<_>>();

        let mut body = json!({
            "application-id": request.application_id.to_string(),
            "application-name": request.name,
            "application-type": self.config.application_type,
            "am-container-spec": {
                "local-resources": { "entry": local_resources },
                "environment": { "entry": environment },
                "commands": { "command": self.config.launch_command },
            },
            "resource": {
                "memory": specification.master_memory_mb,
                "vCores": 1,
            },
            "max-app-attempts": 1,
            "unmanaged-AM": false,
            "keep-containers-across-application-attempts": false,
        });
        if let Some(queue) = &self.config.queue {
            body["queue"] = json!(queue);
        }
        body
    }

    fn await_running(&self, request: &ClusterRequest) -> PlatformResult<String> {
        let started = Instant::now();
        loop {
            let report = self.application_report(&request.application_id)?;
            match report.state.as_str() {
                "RUNNING" => {
                    if let Some(url) = report.tracking_url.filter(|url| !url.is_empty()) {
                        return Ok(url);
                    }
                }
                "FINISHED" | "FAILED" | "KILLED" => {
                    return Err(deployment_error(format!(
                        "cluster {} stopped during startup in state {}: {}",
                        request.application_id,
                        report.state,
                        report.diagnostics.unwrap_or_default()
                    )));
                }
                _ => {}
            }

            if started.elapsed() >= request.startup_timeout {
                return Err(deployment_error(format!(
                    "cluster {} did not start within {}ms (last state {})",
                    request.application_id,
                    request.startup_timeout.as_millis(),
                    report.state
                )));
            }
            std::thread::sleep(self.config.startup_poll_interval);
        }
    }
}

impl PlatformClient for RestPlatformClient {
    fn new_application(&self) -> PlatformResult<ApplicationId> {
        let response: NewApplication = read_json(
            self.agent
                .post(&self.cluster_url("/apps/new-application"))
                .call(),
            "new application",
        )?;
        response.application_id.parse().map_err(|_| {
            deployment_error(format!(
                "resource manager returned malformed application id '{}'",
                response.application_id
            ))
        })
    }

    fn create_cluster(&self, request: &ClusterRequest) -> PlatformResult<ClusterHandle> {
        let submitted = self
            .agent
            .post(&self.cluster_url("/apps"))
            .set("Content-Type", "application/json")
            .send_string(&self.submission_body(request).to_string());
        if let Err(error) = submitted {
            // Without a response the resource manager may still have accepted it.
            if matches!(error, ureq::Error::Transport(_)) {
                self.kill_after_failed_start(&request.application_id);
            }
            return Err(platform_failure("submit application", error));
        }

        match self.await_running(request) {
            Ok(endpoint) => Ok(ClusterHandle {
                application_id: request.application_id.clone(),
                endpoint: endpoint.trim_end_matches('/').to_string(),
            }),
            Err(error) => {
                self.kill_after_failed_start(&request.application_id);
                Err(error)
            }
        }
    }

    fn submit_job(
        &self,
        handle: &ClusterHandle,
        job: &JobSpecification,
    ) -> PlatformResult<Box<dyn RunningJob>> {
        let response: JobSubmitted = read_json(
            self.agent
                .post(&format!("{}/jobs", handle.endpoint))
                .set("Content-Type", "application/octet-stream")
                .query("jobId", &job.job_id.0)
                .query("jobName", &job.name)
                .query("parallelism", &job.parallelism.to_string())
                .send_bytes(&job.payload),
            "submit job",
        )?;
        tracing::debug!(
            application_id = %handle.application_id,
            job_url = %response.job_url,
            "job accepted by cluster"
        );

        Ok(Box::new(RestRunningJob {
            agent: self.agent.clone(),
            result_url: format!("{}/jobs/{}/execution-result", handle.endpoint, job.job_id.0),
            job_id: job.job_id.clone(),
            poll_interval: self.config.result_poll_interval,
        }))
    }

    fn query_status(&self, handle: &ClusterHandle) -> PlatformResult<ApplicationStatus> {
        let state: AppState = read_json(
            self.agent
                .get(&self.cluster_url(&format!("/apps/{}/state", handle.application_id)))
                .call(),
            "application state",
        )?;
        Ok(match state.state.as_str() {
            "FINISHED" | "FAILED" | "KILLED" => ApplicationStatus::Finished,
            _ => ApplicationStatus::Running,
        })
    }

    fn force_kill(&self, handle: &ClusterHandle) -> PlatformResult<()> {
        self.kill_application(&handle.application_id)
            .map_err(|error| CoreError {
                kind: CoreErrorKind::Teardown,
                ..error
            })
    }

    fn release(&self, handle: &ClusterHandle) {
        tracing::debug!(application_id = %handle.application_id, "released cluster connection");
    }
}

struct RestRunningJob {
    agent: ureq::Agent,
    result_url: String,
    job_id: JobId,
    poll_interval: Duration,
}

impl RunningJob for RestRunningJob {
    fn job_id(&self) -> &JobId {
        &self.job_id
    }

    fn wait(self: Box<Self>) -> JobResultFuture {
        Box::pin(async move {
            let mut consecutive_errors = 0;
            loop {
                let agent = self.agent.clone();
                let url = self.result_url.clone();
                let polled = tokio::task::spawn_blocking(move || {
                    read_json::<ExecutionResult>(agent.get(&url).call(), "job execution result")
                })
                .await
                .map_err(|join_error| CoreError {
                    application: None,
                    stage: None,
                    kind: CoreErrorKind::Internal,
                    message: format!("execution result join failure: {join_error}"),
                })?;

                match polled {
                    Ok(result) => {
                        consecutive_errors = 0;
                        if let Some(outcome) = result.into_outcome() {
                            return Ok(outcome);
                        }
                    }
                    Err(error) => {
                        consecutive_errors += 1;
                        if consecutive_errors >= MAX_CONSECUTIVE_RESULT_ERRORS {
                            return Err(error);
                        }
                        tracing::debug!(
                            job_id = %self.job_id.0,
                            attempt = consecutive_errors,
                            message = %error.message,
                            "execution result not available yet"
                        );
                    }
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        })
    }
}

#[derive(Deserialize)]
struct NewApplication {
    #[serde(rename = "application-id")]
    application_id: String,
}

#[derive(Deserialize)]
struct AppEnvelope {
    app: AppReport,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppReport {
    state: String,
    #[serde(default)]
    tracking_url: Option<String>,
    #[serde(default)]
    diagnostics: Option<String>,
}

#[derive(Deserialize)]
struct AppState {
    state: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobSubmitted {
    job_url: String,
}

#[derive(Deserialize)]
struct ExecutionResult {
    status: ResultStatus,
    #[serde(rename = "job-execution-result", default)]
    job_execution_result: Option<JobExecutionResult>,
}

#[derive(Deserialize)]
struct ResultStatus {
    id: String,
}

#[derive(Deserialize)]
struct JobExecutionResult {
    #[serde(rename = "failure-cause", default)]
    failure_cause: Option<Value>,
}

impl ExecutionResult {
    fn into_outcome(self) -> Option<JobOutcome> {
        if self.status.id != "COMPLETED" {
            return None;
        }
        let failure_cause = self
            .job_execution_result
            .and_then(|result| result.failure_cause)
            .filter(|cause| !cause.is_null());
        Some(match failure_cause {
            None => JobOutcome::Succeeded,
            Some(cause) => JobOutcome::Failed(SerializedFailure::new(
                serde_json::to_vec(&with_message(cause)).unwrap_or_default(),
            )),
        })
    }
}

// Failure causes carry a class and stack trace; the message is the remainder
// of the trace's first line.
fn with_message(mut cause: Value) -> Value {
    if cause.get("message").is_some() {
        return cause;
    }
    let message = cause
        .get("stack-trace")
        .and_then(Value::as_str)
        .and_then(|trace| trace.lines().next())
        .map(|first_line| {
            first_line
                .split_once(": ")
                .map(|(_, message)| message.to_string())
                .unwrap_or_default()
        })
        .unwrap_or_default();
    if let Some(object) = cause.as_object_mut() {
        object.insert("message".to_string(), Value::String(message));
    }
    cause
}

fn read_json<T: DeserializeOwned>(
    result: Result<ureq::Response, ureq::Error>,
    operation: &str,
) -> PlatformResult<T> {
    let body = result
        .map_err(|error| platform_failure(operation, error))?
        .into_string()
        .map_err(|error| deployment_error(format!("{operation} body unreadable: {error}")))?;
    serde_json::from_str(&body)
        .map_err(|error| deployment_error(format!("{operation} returned unexpected JSON: {error}")))
}

fn platform_failure(operation: &str, error: ureq::Error) -> CoreError {
    match error {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            deployment_error(format!("{operation} failed with HTTP {code}: {body}"))
        }
        ureq::Error::Transport(transport) => {
            deployment_error(format!("{operation} failed: {transport}"))
        }
    }
}

fn deployment_error(message: String) -> CoreError {
    CoreError {
        application: None,
        stage: None,
        kind: CoreErrorKind::Deployment,
        message,
    }
}
