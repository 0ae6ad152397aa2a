use std::time::Duration;

use jobcluster_core::config::{
    ASK_TIMEOUT_KEY, CLASSPATH_INCLUSION_KEY, ClasspathInclusion, DeploymentConfiguration,
    FILE_REPLICATION_KEY, MASTER_MEMORY_KEY, MemorySize, RESULT_TIMEOUT_KEY, SLOTS_PER_WORKER_KEY,
    STAGING_PREFIX_KEY, TERMINATION_DEADLINE_KEY, TERMINATION_POLL_INTERVAL_KEY,
    WORKER_MEMORY_KEY,
};
use jobcluster_core::models::{CoreErrorKind, DeploymentStage};

fn resolve(pairs: &[(&str, &str)]) -> DeploymentConfiguration {
    DeploymentConfiguration::resolve(pairs.iter().copied()).unwrap()
}

#[test]
fn empty_overrides_yield_documented_defaults() {
    let config = resolve(&[]);

    assert_eq!(config.master_memory, MemorySize::from_mebibytes(1600));
    assert_eq!(config.worker_memory, MemorySize::from_mebibytes(1728));
    assert_eq!(config.slots_per_worker, 1);
    assert_eq!(config.replication, None);
    assert_eq!(config.ask_timeout, Duration::from_secs(10));
    assert_eq!(config.classpath_inclusion, ClasspathInclusion::Disabled);
    assert_eq!(config.termination_poll_interval, Duration::from_millis(100));
    assert_eq!(config.termination_deadline, Duration::from_secs(10));
    assert_eq!(config.startup_timeout, Duration::from_secs(60));
    assert_eq!(config.staging_prefix, "jobcluster");
    assert_eq!(config.result_timeout, None);
}

#[test]
fn overrides_replace_individual_defaults() {
    let config = resolve(&[
        (MASTER_MEMORY_KEY, "768m"),
        (WORKER_MEMORY_KEY, "2g"),
        (SLOTS_PER_WORKER_KEY, "4"),
        (FILE_REPLICATION_KEY, "4"),
        (ASK_TIMEOUT_KEY, "30 s"),
        (CLASSPATH_INCLUSION_KEY, "order"),
        (TERMINATION_POLL_INTERVAL_KEY, "250"),
        (TERMINATION_DEADLINE_KEY, "2 min"),
        (STAGING_PREFIX_KEY, ".flink"),
        (RESULT_TIMEOUT_KEY, "1h"),
    ]);

    assert_eq!(config.master_memory.mebibytes(), 768);
    assert_eq!(config.worker_memory.mebibytes(), 2048);
    assert_eq!(config.slots_per_worker, 4);
    assert_eq!(config.replication, Some(4));
    assert_eq!(config.ask_timeout, Duration::from_secs(30));
    assert_eq!(config.classpath_inclusion, ClasspathInclusion::Order);
    assert_eq!(config.termination_poll_interval, Duration::from_millis(250));
    assert_eq!(config.termination_deadline, Duration::from_secs(120));
    assert_eq!(config.staging_prefix, "flink");
    assert_eq!(config.result_timeout, Some(Duration::from_secs(3600)));
}

#[test]
fn negative_one_and_empty_replication_mean_storage_default() {
    assert_eq!(resolve(&[(FILE_REPLICATION_KEY, "-1")]).replication, None);
    assert_eq!(resolve(&[(FILE_REPLICATION_KEY, "")]).replication, None);
}

#[test]
fn later_overrides_win() {
    let config = resolve(&[(FILE_REPLICATION_KEY, "2"), (FILE_REPLICATION_KEY, "5")]);
    assert_eq!(config.replication, Some(5));
}

#[test]
fn unknown_keys_are_ignored() {
    let config = resolve(&[("metrics.reporter", "jmx")]);
    assert_eq!(config, DeploymentConfiguration::default());
}

#[test]
fn malformed_values_fail_with_configuration_errors() {
    let cases = [
        (FILE_REPLICATION_KEY, "three"),
        (FILE_REPLICATION_KEY, "0"),
        (FILE_REPLICATION_KEY, "-4"),
        (FILE_REPLICATION_KEY, "70000"),
        (SLOTS_PER_WORKER_KEY, "0"),
        (SLOTS_PER_WORKER_KEY, "many"),
        (MASTER_MEMORY_KEY, "lots"),
        (MASTER_MEMORY_KEY, "512k"),
        (ASK_TIMEOUT_KEY, "0 s"),
        (TERMINATION_DEADLINE_KEY, "soon"),
        (CLASSPATH_INCLUSION_KEY, "MIDDLE"),
        (STAGING_PREFIX_KEY, "a/b"),
        (STAGING_PREFIX_KEY, "."),
    ];

    for (key, value) in cases {
        let error = DeploymentConfiguration::resolve([(key, value)])
            .expect_err(&format!("{key}={value} should be rejected"));
        assert_eq!(error.kind, CoreErrorKind::Configuration, "{key}={value}");
        assert_eq!(error.stage, Some(DeploymentStage::Configuration));
        assert!(error.message.contains(key), "{}", error.message);
    }
}
