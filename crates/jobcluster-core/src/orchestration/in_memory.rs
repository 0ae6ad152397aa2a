use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::oneshot;

use crate::models::{
    ApplicationId, ApplicationStatus, ClusterHandle, ClusterRequest, CoreError, CoreErrorKind,
    JobId, JobOutcome, JobSpecification,
};
use crate::platform::{JobResultFuture, PlatformClient, PlatformResult, RunningJob};
use crate::storage::{FileStatus, StorageClient, StorageResult};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StorageCallCounts {
    pub uploads: u32,
    pub set_replication: u32,
    pub stats: u32,
    pub deletes: u32,
}

/// Filesystem kept in memory. Uploads read real local files.
pub struct InMemoryStorage {
    home: String,
    default_replication: u16,
    max_replication: u16,
    state: Mutex<StorageState>,
}

#[derive(Default)]
struct StorageState {
    files: BTreeMap<String, StoredFile>,
    clock: u64,
    counts: StorageCallCounts,
}

struct StoredFile {
    contents: Vec<u8>,
    replication: u16,
    modification_time: u64,
}

impl InMemoryStorage {
    pub fn new(home: impl Into<String>, default_replication: u16) -> Self {
        Self {
            home: home.into(),
            default_replication,
            max_replication: 512,
            state: Mutex::new(StorageState::default()),
        }
    }

    pub fn with_max_replication(mut self, max_replication: u16) -> Self {
        self.max_replication = max_replication;
        self
    }

    pub fn call_counts(&self) -> StorageCallCounts {
        self.inspect().counts
    }

    pub fn paths(&self) -> Vec<String> {
        self.inspect().files.keys().cloned().collect()
    }

    pub fn contents(&self, remote_path: &str) -> Option<Vec<u8>> {
        self.inspect()
            .files
            .get(remote_path)
            .map(|file| file.contents.clone())
    }

    pub fn file_status(&self, remote_path: &str) -> Option<FileStatus> {
        self.inspect().files.get(remote_path).map(status_of)
    }

    /// Changes a file's replication behind the stager's back.
    pub fn overwrite_replication(&self, remote_path: &str, factor: u16) -> bool {
        match self.inspect().files.get_mut(remote_path) {
            Some(file) => {
                file.replication = factor;
                true
            }
            None => false,
        }
    }

    pub fn remove_file(&self, remote_path: &str) -> bool {
        self.inspect().files.remove(remote_path).is_some()
    }

    fn inspect(&self) -> MutexGuard<'_, StorageState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state(&self) -> StorageResult<MutexGuard<'_, StorageState>> {
        self.state
            .lock()
            .map_err(|_| storage_failure("in-memory storage mutex poisoned".to_string()))
    }
}

impl StorageClient for InMemoryStorage {
    fn home_directory(&self) -> StorageResult<String> {
        Ok(self.home.clone())
    }

    fn default_replication(&self) -> StorageResult<u16> {
        Ok(self.default_replication)
    }

    fn upload(&self, local_path: &Path, remote_path: &str) -> StorageResult<()> {
        let contents = std::fs::read(local_path).map_err(|error| {
            storage_failure(format!(
                "failed to read local file '{}': {error}",
                local_path.display()
            ))
        })?;
        let mut state = self.lock_state()?;
        state.counts.uploads += 1;
        state.clock += 1;
        let modification_time = state.clock;
        state.files.insert(
            remote_path.to_string(),
            StoredFile {
                contents,
                replication: self.default_replication,
                modification_time,
            },
        );
        Ok(())
    }

    fn set_replication(&self, remote_path: &str, factor: u16) -> StorageResult<()> {
        let mut state = self.lock_state()?;
        state.counts.set_replication += 1;
        if factor > self.max_replication {
            return Err(storage_failure(format!(
                "Requested replication factor of {factor} exceeds maximum of {}",
                self.max_replication
            )));
        }
        let file = state
            .files
            .get_mut(remote_path)
            .ok_or_else(|| storage_failure(format!("file does not exist: {remote_path}")))?;
        file.replication = factor;
        Ok(())
    }

    fn stat(&self, remote_path: &str) -> StorageResult<Option<FileStatus>> {
        let mut state = self.lock_state()?;
        state.counts.stats += 1;
        Ok(state.files.get(remote_path).map(status_of))
    }

    fn delete_recursive(&self, remote_path: &str) -> StorageResult<bool> {
        let mut state = self.lock_state()?;
        state.counts.deletes += 1;
        let prefix = format!("{}/", remote_path.trim_end_matches('/'));
        let before = state.files.len();
        state
            .files
            .retain(|path, _| path != remote_path && !path.starts_with(&prefix));
        Ok(state.files.len() != before)
    }
}

fn status_of(file: &StoredFile) -> FileStatus {
    FileStatus {
        len: file.contents.len() as u64,
        replication: file.replication,
        modification_time: file.modification_time,
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

/// How the simulated platform behaves. The default accepts everything, the
/// job succeeds immediately and the cluster reports finished on the first poll.
#[derive(Clone, Debug)]
pub struct PlatformScript {
    pub reject_clusters: Option<String>,
    pub reject_submissions: Option<String>,
    /// `None` holds every job until `InMemoryPlatform::complete_job` is called.
    pub job_outcome: Option<JobOutcome>,
    pub job_delay: Duration,
    /// Blocking delays before the platform answers; they model a slow resource manager.
    pub startup_delay: Duration,
    pub submission_delay: Duration,
    pub status_delay: Duration,
    /// Number of polls answered with running before reporting finished; `None` never finishes.
    pub finish_after_polls: Option<u32>,
    pub status_failure: Option<String>,
    pub kill_failure: Option<String>,
}

impl Default for PlatformScript {
    fn default() -> Self {
        Self {
            reject_clusters: None,
            reject_submissions: None,
            job_outcome: Some(JobOutcome::Succeeded),
            job_delay: Duration::ZERO,
            startup_delay: Duration::ZERO,
            submission_delay: Duration::ZERO,
            status_delay: Duration::ZERO,
            finish_after_polls: Some(0),
            status_failure: None,
            kill_failure: None,
        }
    }
}

impl PlatformScript {
    pub fn reject_clusters(mut self, message: impl Into<String>) -> Self {
        self.reject_clusters = Some(message.into());
        self
    }

    pub fn reject_submissions(mut self, message: impl Into<String>) -> Self {
        self.reject_submissions = Some(message.into());
        self
    }

    pub fn job_outcome(mut self, outcome: JobOutcome) -> Self {
        self.job_outcome = Some(outcome);
        self
    }

    pub fn manual_completion(mut self) -> Self {
        self.job_outcome = None;
        self
    }

    pub fn job_delay(mut self, delay: Duration) -> Self {
        self.job_delay = delay;
        self
    }

    pub fn startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    pub fn submission_delay(mut self, delay: Duration) -> Self {
        self.submission_delay = delay;
        self
    }

    pub fn status_delay(mut self, delay: Duration) -> Self {
        self.status_delay = delay;
        self
    }

    pub fn finish_after_polls(mut self, polls: u32) -> Self {
        self.finish_after_polls = Some(polls);
        self
    }

    pub fn never_finishes(mut self) -> Self {
        self.finish_after_polls = None;
        self
    }

    pub fn status_failure(mut self, message: impl Into<String>) -> Self {
        self.status_failure = Some(message.into());
        self
    }

    pub fn kill_failure(mut self, message: impl Into<String>) -> Self {
        self.kill_failure = Some(message.into());
        self
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PlatformCallCounts {
    pub new_application: u32,
    pub create_cluster: u32,
    pub submit_job: u32,
    pub query_status: u32,
    pub force_kill: u32,
    pub release: u32,
}

/// What the simulated platform saw for one application.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SimulatedApplication {
    pub launched: bool,
    pub finished: bool,
    pub submitted_jobs: Vec<JobId>,
    pub polls: u32,
    pub kills: u32,
    pub releases: u32,
}

/// Resource manager simulated in memory and driven by a `PlatformScript`.
pub struct InMemoryPlatform {
    cluster_timestamp: u64,
    script: PlatformScript,
    state: Mutex<PlatformState>,
}

#[derive(Default)]
struct PlatformState {
    next_sequence: u32,
    counts: PlatformCallCounts,
    applications: HashMap<ApplicationId, SimulatedApplication>,
    requests: Vec<ClusterRequest>,
    pending: HashMap<ApplicationId, oneshot::Sender<JobOutcome>>,
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPlatform {
    pub fn new() -> Self {
        Self::with_script(PlatformScript::default())
    }

    pub fn with_script(script: PlatformScript) -> Self {
        let cluster_timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        Self {
            cluster_timestamp,
            script,
            state: Mutex::new(PlatformState::default()),
        }
    }

    pub fn call_counts(&self) -> PlatformCallCounts {
        self.inspect().counts
    }

    pub fn application(&self, application_id: &ApplicationId) -> Option<SimulatedApplication> {
        self.inspect().applications.get(application_id).cloned()
    }

    pub fn cluster_requests(&self) -> Vec<ClusterRequest> {
        self.inspect().requests.clone()
    }

    /// Delivers the outcome of a job held by `manual_completion`.
    pub fn complete_job(&self, application_id: &ApplicationId, outcome: JobOutcome) -> bool {
        let sender = self.inspect().pending.remove(application_id);
        match sender {
            Some(sender) => sender.send(outcome).is_ok(),
            None => false,
        }
    }

    fn inspect(&self) -> MutexGuard<'_, PlatformState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state(&self) -> PlatformResult<MutexGuard<'_, PlatformState>> {
        self.state.lock().map_err(|_| CoreError {
            application: None,
            stage: None,
            kind: CoreErrorKind::Internal,
            message: "in-memory platform mutex poisoned".to_string(),
        })
    }
}

impl PlatformClient for InMemoryPlatform {
    fn new_application(&self) -> PlatformResult<ApplicationId> {
        let mut state = self.lock_state()?;
        state.counts.new_application += 1;
        state.next_sequence += 1;
        let application_id = ApplicationId::new(self.cluster_timestamp, state.next_sequence);
        state
            .applications
            .insert(application_id.clone(), SimulatedApplication::default());
        Ok(application_id)
    }

    fn create_cluster(&self, request: &ClusterRequest) -> PlatformResult<ClusterHandle> {
        pause(self.script.startup_delay);
        let mut state = self.lock_state()?;
        state.counts.create_cluster += 1;
        state.requests.push(request.clone());
        if let Some(message) = &self.script.reject_clusters {
            return Err(platform_error(&request.application_id, message.clone()));
        }
        let application = state
            .applications
            .get_mut(&request.application_id)
            .ok_or_else(|| {
                platform_error(
                    &request.application_id,
                    "application was never allocated".to_string(),
                )
            })?;
        application.launched = true;
        Ok(ClusterHandle {
            application_id: request.application_id.clone(),
            endpoint: format!("memory://{}", request.application_id),
        })
    }

    fn submit_job(
        &self,
        handle: &ClusterHandle,
        job: &JobSpecification,
    ) -> PlatformResult<Box<dyn RunningJob>> {
        pause(self.script.submission_delay);
        let mut state = self.lock_state()?;
        state.counts.submit_job += 1;
        if let Some(message) = &self.script.reject_submissions {
            return Err(platform_error(&handle.application_id, message.clone()));
        }
        if let Some(application) = state.applications.get_mut(&handle.application_id) {
            application.submitted_jobs.push(job.job_id.clone());
        }

        let result = match &self.script.job_outcome {
            Some(outcome) => ScriptedResult::Ready(outcome.clone()),
            None => {
                let (sender, receiver) = oneshot::channel();
                state.pending.insert(handle.application_id.clone(), sender);
                ScriptedResult::Manual(receiver)
            }
        };
        Ok(Box::new(SimulatedJob {
            application_id: handle.application_id.clone(),
            job_id: job.job_id.clone(),
            delay: self.script.job_delay,
            result,
        }))
    }

    fn query_status(&self, handle: &ClusterHandle) -> PlatformResult<ApplicationStatus> {
        pause(self.script.status_delay);
        let mut state = self.lock_state()?;
        state.counts.query_status += 1;
        let application = state
            .applications
            .entry(handle.application_id.clone())
            .or_default();
        application.polls += 1;
        if let Some(message) = &self.script.status_failure {
            return Err(platform_error(&handle.application_id, message.clone()));
        }
        if !application.finished {
            if let Some(running_polls) = self.script.finish_after_polls {
                application.finished = application.polls > running_polls;
            }
        }
        Ok(if application.finished {
            ApplicationStatus::Finished
        } else {
            ApplicationStatus::Running
        })
    }

    fn force_kill(&self, handle: &ClusterHandle) -> PlatformResult<()> {
        let mut state = self.lock_state()?;
        state.counts.force_kill += 1;
        let application = state
            .applications
            .entry(handle.application_id.clone())
            .or_default();
        application.kills += 1;
        if let Some(message) = &self.script.kill_failure {
            return Err(platform_error(&handle.application_id, message.clone()));
        }
        application.finished = true;
        Ok(())
    }

    fn release(&self, handle: &ClusterHandle) {
        let mut state = self.inspect();
        state.counts.release += 1;
        state
            .applications
            .entry(handle.application_id.clone())
            .or_default()
            .releases += 1;
    }
}

enum ScriptedResult {
    Ready(JobOutcome),
    Manual(oneshot::Receiver<JobOutcome>),
}

struct SimulatedJob {
    application_id: ApplicationId,
    job_id: JobId,
    delay: Duration,
    result: ScriptedResult,
}

impl RunningJob for SimulatedJob {
    fn job_id(&self) -> &JobId {
        &self.job_id
    }

    fn wait(self: Box<Self>) -> JobResultFuture {
        let job = *self;
        Box::pin(async move {
            if !job.delay.is_zero() {
                tokio::time::sleep(job.delay).await;
            }
            match job.result {
                ScriptedResult::Ready(outcome) => Ok(outcome),
                ScriptedResult::Manual(receiver) => receiver.await.map_err(|_| {
                    platform_error(
                        &job.application_id,
                        format!("result channel for job {} closed", job.job_id.0),
                    )
                }),
            }
        })
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        std::thread::sleep(delay);
    }
}

fn platform_error(application_id: &ApplicationId, message: String) -> CoreError {
    CoreError {
        application: Some(application_id.clone()),
        stage: None,
        kind: CoreErrorKind::Deployment,
        message,
    }
}
