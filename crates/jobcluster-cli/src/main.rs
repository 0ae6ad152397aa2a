//! `jobcluster` deploys one job onto a dedicated cluster and tears it down afterwards.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use jobcluster_core::config::DeploymentConfiguration;
use jobcluster_core::models::{
    ApplicationId, ArtifactManifest, DeploymentRecord, DeploymentReport, JobId, JobSpecification,
    JsonFailureDecoder,
};
use jobcluster_core::orchestration::{
    DeploymentCancellationToken, DeploymentRequest, DeploymentRuntime,
};
use jobcluster_core::persistence::DeploymentLedger;
use jobcluster_core::platform::{RestPlatformClient, RestPlatformConfig};
use jobcluster_core::sqlite::SqliteDeploymentLedger;
use jobcluster_core::storage::{WebHdfsConfig, WebHdfsStorage};

#[derive(Debug, Parser)]
#[command(name = "jobcluster", version, about, long_about = None)]
struct Cli {
    /// JSON object of configuration keys, applied before `-D` overrides.
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Configuration override, `key=value`. Later values win.
    #[arg(short = 'D', value_name = "KEY=VALUE", global = true)]
    define: Vec<String>,

    /// Deployment ledger database.
    #[arg(
        long,
        env = "JOBCLUSTER_LEDGER",
        default_value = "jobcluster.sqlite3",
        global = true
    )]
    ledger: PathBuf,

    #[command(flatten)]
    endpoints: Endpoints,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct Endpoints {
    /// Namenode HTTP address.
    #[arg(
        long,
        env = "JOBCLUSTER_NAMENODE_URL",
        default_value = "http://localhost:9870",
        global = true
    )]
    namenode_url: String,

    /// Filesystem URI staged paths resolve against.
    #[arg(
        long,
        env = "JOBCLUSTER_STORAGE_URI",
        default_value = "hdfs://localhost:8020",
        global = true
    )]
    storage_uri: String,

    /// Resource manager web address.
    #[arg(
        long,
        env = "JOBCLUSTER_RESOURCE_MANAGER_URL",
        default_value = "http://localhost:8088",
        global = true
    )]
    resource_manager_url: String,

    #[arg(long, env = "JOBCLUSTER_USER", global = true)]
    user: Option<String>,

    #[arg(long, env = "JOBCLUSTER_QUEUE", global = true)]
    queue: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stage artifacts, run the job on a fresh cluster and tear it down.
    Deploy(DeployArgs),
    /// Check that a recorded deployment's staged files are still intact.
    Verify {
        #[arg(value_parser = parse_application_id)]
        application_id: ApplicationId,
    },
    /// Delete a deployment's staging directory.
    Cleanup {
        #[arg(value_parser = parse_application_id)]
        application_id: ApplicationId,
    },
    /// Show recorded deployments.
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Only deployments whose cluster may still be running.
        #[arg(long)]
        inspect: bool,
    },
}

#[derive(Debug, Args)]
struct DeployArgs {
    /// Job name shown on the cluster.
    #[arg(long)]
    name: String,

    /// Job identifier; defaults to the name.
    #[arg(long)]
    job_id: Option<String>,

    /// Cluster distribution bundle.
    #[arg(long)]
    bundle: PathBuf,

    #[arg(long = "library")]
    libraries: Vec<PathBuf>,

    /// User jar the job's code lives in.
    #[arg(long = "jar")]
    jars: Vec<PathBuf>,

    #[arg(long, default_value_t = 1)]
    parallelism: u32,

    /// Serialized job graph.
    #[arg(long)]
    payload: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = resolve_configuration(cli.config.as_deref(), &cli.define)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli, config))
}

async fn run(cli: Cli, config: DeploymentConfiguration) -> Result<()> {
    let ledger = Arc::new(SqliteDeploymentLedger::new(&cli.ledger));
    ledger
        .migrate_to_latest()
        .with_context(|| format!("failed to migrate ledger {}", cli.ledger.display()))?;
    let runtime = build_runtime(&cli.endpoints, &config, ledger.clone());

    match cli.command {
        Command::Deploy(args) => deploy(&runtime, &config, args).await,
        Command::Verify { application_id } => {
            let record = recorded(ledger.as_ref(), &application_id)?;
            runtime.verify(&manifest_from_record(record)).await?;
            println!("{application_id}: staged artifacts intact");
            Ok(())
        }
        Command::Cleanup { application_id } => {
            let removed = runtime
                .cleanup(&application_id, &config.staging_prefix)
                .await?;
            if removed {
                println!("{application_id}: staging directory removed");
            } else {
                println!("{application_id}: nothing to remove");
            }
            Ok(())
        }
        Command::History { limit, inspect } => {
            let records = if inspect {
                ledger.list_requiring_inspection()?
            } else {
                ledger.list_recent(limit)?
            };
            for record in &records {
                println!("{}", history_line(record));
            }
            Ok(())
        }
    }
}

fn build_runtime(
    endpoints: &Endpoints,
    config: &DeploymentConfiguration,
    ledger: Arc<dyn DeploymentLedger>,
) -> DeploymentRuntime {
    let mut storage = WebHdfsConfig::new(&endpoints.namenode_url);
    if let Some(user) = &endpoints.user {
        storage = storage.user(user);
    }

    let mut platform =
        RestPlatformConfig::new(&endpoints.resource_manager_url, &endpoints.storage_uri)
            .request_timeout(config.ask_timeout);
    if let Some(queue) = &endpoints.queue {
        platform = platform.queue(queue);
    }

    DeploymentRuntime::new(
        Arc::new(WebHdfsStorage::new(storage)),
        Arc::new(RestPlatformClient::new(platform)),
    )
    .with_ledger(ledger)
}

async fn deploy(
    runtime: &DeploymentRuntime,
    config: &DeploymentConfiguration,
    args: DeployArgs,
) -> Result<()> {
    let payload = match &args.payload {
        Some(path) => std::fs::read(path)
            .with_context(|| format!("failed to read payload {}", path.display()))?,
        None => Vec::new(),
    };
    let job_id = JobId(args.job_id.unwrap_or_else(|| args.name.clone()));
    let mut job = JobSpecification::new(job_id, args.name, payload).parallelism(args.parallelism);
    for jar in args.jars {
        job = job.add_jar(jar);
    }
    let mut request = DeploymentRequest::new(job, args.bundle);
    for library in args.libraries {
        request = request.library(library);
    }

    let cancellation = DeploymentCancellationToken::new();
    let on_interrupt = cancellation.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received; cancelling deployment");
            on_interrupt.cancel();
        }
    });

    let report = runtime
        .deploy_with_cancellation(config, request, &cancellation)
        .await?;
    print_report(&report);

    if let Some(error) = &report.teardown_error {
        bail!("{error}");
    }
    report
        .outcome
        .into_result(&JsonFailureDecoder)
        .map_err(|error| anyhow::anyhow!("{}: {}", error, error.cause))
}

fn print_report(report: &DeploymentReport) {
    println!("application:  {}", report.application_id);
    println!("staging dir:  {}", report.manifest.staging_dir);
    println!(
        "replication:  {} ({})",
        report.manifest.replication.factor(),
        report.manifest.replication.source_str()
    );
    println!("outcome:      {}", report.outcome.as_str());
    println!("termination:  {}", report.termination.as_str());
}

/// Reads the JSON config file, then layers `-D` overrides on top.
fn resolve_configuration(
    path: Option<&Path>,
    defines: &[String],
) -> Result<DeploymentConfiguration> {
    let mut entries = Vec::new();
    if let Some(path) = path {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let values: BTreeMap<String, serde_json::Value> = serde_json::from_str(&raw)
            .with_context(|| format!("config {} is not a JSON object", path.display()))?;
        for (key, value) in values {
            let value = match value {
                serde_json::Value::String(text) => text,
                other => other.to_string(),
            };
            entries.push((key, value));
        }
    }
    for define in defines {
        let Some((key, value)) = define.split_once('=') else {
            bail!("override '{define}' is not of the form key=value");
        };
        entries.push((key.trim().to_string(), value.trim().to_string()));
    }
    Ok(DeploymentConfiguration::resolve(entries)?)
}

fn parse_application_id(raw: &str) -> Result<ApplicationId, String> {
    raw.parse()
        .map_err(|()| format!("'{raw}' is not an application id like application_1700000000000_0001"))
}

fn recorded(
    ledger: &dyn DeploymentLedger,
    application_id: &ApplicationId,
) -> Result<DeploymentRecord> {
    ledger
        .deployment(application_id)?
        .with_context(|| format!("no deployment recorded for {application_id}"))
}

fn manifest_from_record(record: DeploymentRecord) -> ArtifactManifest {
    ArtifactManifest {
        application_id: record.application_id,
        staging_dir: record.staging_dir,
        artifacts: record.artifacts,
        replication: record.replication,
    }
}

fn history_line(record: &DeploymentRecord) -> String {
    let state = match (&record.outcome, &record.error) {
        (Some(outcome), _) => outcome.as_str(),
        (None, Some(_)) => "aborted",
        (None, None) => "in-flight",
    };
    let mut line = format!(
        "{}  {}  {}  {}",
        record.application_id,
        format_time(record.started_at),
        record.job_name,
        state
    );
    if let Some(termination) = record.termination {
        line.push_str(&format!("  cluster {}", termination.as_str()));
    }
    if record.cleaned_at.is_some() {
        line.push_str("  cleaned");
    }
    if record.requires_inspection() {
        line.push_str("  INSPECT");
    }
    line
}

fn format_time(at: SystemTime) -> String {
    OffsetDateTime::from(at)
        .format(&Rfc3339)
        .unwrap_or_else(|_| format!("{at:?}"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn defines_override_config_file_values() {
        let path =
            std::env::temp_dir().join(format!("jobcluster-cli-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{"yarn.file-replication": 2, "akka.ask.timeout": "5 s"}"#,
        )
        .unwrap();

        let config =
            resolve_configuration(Some(&path), &["yarn.file-replication=7".to_string()]).unwrap();
        assert_eq!(config.replication, Some(7));
        assert_eq!(config.ask_timeout, Duration::from_secs(5));

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn malformed_define_is_rejected() {
        assert!(resolve_configuration(None, &["no-separator".to_string()]).is_err());
    }

    #[test]
    fn application_ids_are_validated() {
        let id = parse_application_id("application_1700000000000_0042").unwrap();
        assert_eq!(id, ApplicationId::new(1_700_000_000_000, 42));
        assert!(parse_application_id("container_1").is_err());
    }

    #[test]
    fn deploy_arguments_parse() {
        let cli = Cli::parse_from([
            "jobcluster",
            "-D",
            "taskmanager.numberOfTaskSlots=2",
            "deploy",
            "--name",
            "wordcount",
            "--bundle",
            "dist.jar",
            "--jar",
            "job.jar",
            "--parallelism",
            "4",
        ]);
        assert_eq!(cli.define, vec!["taskmanager.numberOfTaskSlots=2"]);
        match cli.command {
            Command::Deploy(args) => {
                assert_eq!(args.name, "wordcount");
                assert_eq!(args.jars, vec![PathBuf::from("job.jar")]);
                assert_eq!(args.parallelism, 4);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
