pub mod duration;
pub mod memory;

pub use duration::parse_duration;
pub use memory::MemorySize;

use std::time::Duration;

use crate::models::{CoreError, CoreErrorKind, DeploymentStage};

pub const MASTER_MEMORY_KEY: &str = "jobmanager.memory.process.size";
pub const WORKER_MEMORY_KEY: &str = "taskmanager.memory.process.size";
pub const SLOTS_PER_WORKER_KEY: &str = "taskmanager.numberOfTaskSlots";
pub const FILE_REPLICATION_KEY: &str = "yarn.file-replication";
pub const ASK_TIMEOUT_KEY: &str = "akka.ask.timeout";
pub const CLASSPATH_INCLUSION_KEY: &str = "yarn.classpath.include-user-jar";
pub const TERMINATION_POLL_INTERVAL_KEY: &str = "deployment.termination.poll-interval";
pub const TERMINATION_DEADLINE_KEY: &str = "deployment.termination.deadline";
pub const STARTUP_TIMEOUT_KEY: &str = "deployment.startup.timeout";
pub const STAGING_PREFIX_KEY: &str = "deployment.staging.prefix";
pub const RESULT_TIMEOUT_KEY: &str = "deployment.result.timeout";

const DEFAULT_MASTER_MEMORY: MemorySize = MemorySize::from_mebibytes(1600);
const DEFAULT_WORKER_MEMORY: MemorySize = MemorySize::from_mebibytes(1728);
const DEFAULT_SLOTS_PER_WORKER: u32 = 1;
const DEFAULT_ASK_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_TERMINATION_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_TERMINATION_DEADLINE: Duration = Duration::from_secs(10);
const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_STAGING_PREFIX: &str = "jobcluster";

pub type ConfigResult<T> = Result<T, CoreError>;

/// Whether the job's own jars go on the cluster's system classpath, and where.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ClasspathInclusion {
    Disabled,
    First,
    Last,
    Order,
}

impl ClasspathInclusion {
    pub fn includes_user_artifacts(self) -> bool {
        self != Self::Disabled
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "DISABLED",
            Self::First => "FIRST",
            Self::Last => "LAST",
            Self::Order => "ORDER",
        }
    }
}

impl std::str::FromStr for ClasspathInclusion {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DISABLED" => Ok(Self::Disabled),
            "FIRST" => Ok(Self::First),
            "LAST" => Ok(Self::Last),
            "ORDER" => Ok(Self::Order),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeploymentConfiguration {
    pub master_memory: MemorySize,
    pub worker_memory: MemorySize,
    pub slots_per_worker: u32,
    /// `None` leaves the storage cluster's own default in effect.
    pub replication: Option<u16>,
    pub ask_timeout: Duration,
    pub classpath_inclusion: ClasspathInclusion,
    pub termination_poll_interval: Duration,
    pub termination_deadline: Duration,
    pub startup_timeout: Duration,
    pub staging_prefix: String,
    /// Upper bound on waiting for the job result; `None` waits until the job ends.
    pub result_timeout: Option<Duration>,
}

impl Default for DeploymentConfiguration {
    fn default() -> Self {
        Self {
            master_memory: DEFAULT_MASTER_MEMORY,
            worker_memory: DEFAULT_WORKER_MEMORY,
            slots_per_worker: DEFAULT_SLOTS_PER_WORKER,
            replication: None,
            ask_timeout: DEFAULT_ASK_TIMEOUT,
            classpath_inclusion: ClasspathInclusion::Disabled,
            termination_poll_interval: DEFAULT_TERMINATION_POLL_INTERVAL,
            termination_deadline: DEFAULT_TERMINATION_DEADLINE,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            staging_prefix: DEFAULT_STAGING_PREFIX.to_string(),
            result_timeout: None,
        }
    }
}

impl DeploymentConfiguration {
    /// Applies raw key/value overrides on top of the defaults. Unknown keys are
    /// ignored; a malformed or out-of-range value fails the whole resolution.
    pub fn resolve<K, V>(overrides: impl IntoIterator<Item = (K, V)>) -> ConfigResult<Self>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in overrides {
            config.apply(key.as_ref(), value.as_ref())?;
        }
        Ok(config)
    }

    fn apply(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        match key {
            MASTER_MEMORY_KEY => self.master_memory = parse_memory(key, value)?,
            WORKER_MEMORY_KEY => self.worker_memory = parse_memory(key, value)?,
            SLOTS_PER_WORKER_KEY => self.slots_per_worker = parse_positive_u32(key, value)?,
            FILE_REPLICATION_KEY => self.replication = parse_replication(key, value)?,
            ASK_TIMEOUT_KEY => self.ask_timeout = parse_positive_duration(key, value)?,
            CLASSPATH_INCLUSION_KEY => {
                self.classpath_inclusion = value.parse().map_err(|_| {
                    configuration_error(
                        key,
                        format!("expected one of DISABLED, FIRST, LAST, ORDER but got '{value}'"),
                    )
                })?
            }
            TERMINATION_POLL_INTERVAL_KEY => {
                self.termination_poll_interval = parse_positive_duration(key, value)?
            }
            TERMINATION_DEADLINE_KEY => {
                self.termination_deadline = parse_positive_duration(key, value)?
            }
            STARTUP_TIMEOUT_KEY => self.startup_timeout = parse_positive_duration(key, value)?,
            STAGING_PREFIX_KEY => self.staging_prefix = parse_staging_prefix(key, value)?,
            RESULT_TIMEOUT_KEY => {
                self.result_timeout = match value.trim() {
                    "" | "-1" => None,
                    _ => Some(parse_positive_duration(key, value)?),
                }
            }
            _ => {
                tracing::debug!(key = %key, "ignoring unknown configuration key");
            }
        }
        Ok(())
    }
}

fn parse_memory(key: &str, value: &str) -> ConfigResult<MemorySize> {
    let size = MemorySize::parse(value).map_err(|message| configuration_error(key, message))?;
    if size.mebibytes() == 0 {
        return Err(configuration_error(
            key,
            format!("memory size '{value}' must be at least one mebibyte"),
        ));
    }
    Ok(size)
}

fn parse_positive_u32(key: &str, value: &str) -> ConfigResult<u32> {
    match value.trim().parse::<i64>() {
        Ok(parsed) if parsed > 0 && parsed <= i64::from(u32::MAX) => Ok(parsed as u32),
        Ok(parsed) => Err(configuration_error(
            key,
            format!("expected a positive integer but got '{parsed}'"),
        )),
        Err(_) => Err(configuration_error(
            key,
            format!("expected an integer but got '{value}'"),
        )),
    }
}

// -1 and the empty string both mean "use the storage cluster default".
fn parse_replication(key: &str, value: &str) -> ConfigResult<Option<u16>> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == "-1" {
        return Ok(None);
    }
    match trimmed.parse::<i64>() {
        Ok(parsed) if parsed > 0 && parsed <= i64::from(u16::MAX) => Ok(Some(parsed as u16)),
        Ok(parsed) => Err(configuration_error(
            key,
            format!("replication factor must be positive but got '{parsed}'"),
        )),
        Err(_) => Err(configuration_error(
            key,
            format!("expected an integer replication factor but got '{value}'"),
        )),
    }
}

fn parse_positive_duration(key: &str, value: &str) -> ConfigResult<Duration> {
    let duration = parse_duration(value).map_err(|message| configuration_error(key, message))?;
    if duration.is_zero() {
        return Err(configuration_error(
            key,
            format!("duration '{value}' must be greater than zero"),
        ));
    }
    Ok(duration)
}

fn parse_staging_prefix(key: &str, value: &str) -> ConfigResult<String> {
    let prefix = value.trim().trim_start_matches('.');
    if prefix.is_empty() || prefix.contains('/') {
        return Err(configuration_error(
            key,
            format!("staging prefix '{value}' must be a single non-empty path segment"),
        ));
    }
    Ok(prefix.to_string())
}

fn configuration_error(key: &str, message: String) -> CoreError {
    CoreError {
        application: None,
        stage: Some(DeploymentStage::Configuration),
        kind: CoreErrorKind::Configuration,
        message: format!("invalid value for '{key}': {message}"),
    }
}
