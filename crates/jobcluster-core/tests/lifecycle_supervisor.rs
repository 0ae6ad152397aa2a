use std::sync::Arc;
use std::time::{Duration, Instant};

use jobcluster_core::models::{
    ApplicationId, ClusterRequest, ClusterSpecification, CoreErrorKind, TerminationState,
};
use jobcluster_core::orchestration::{
    ClusterDeployer, ClusterGuard, InMemoryPlatform, LifecycleSupervisor, PlatformScript,
};
use jobcluster_core::platform::PlatformClient;

const CALL_TIMEOUT: Duration = Duration::from_secs(5);

fn request(application_id: ApplicationId) -> ClusterRequest {
    ClusterRequest {
        staging_dir: format!("/user/flink/.jobcluster/{application_id}"),
        application_id,
        name: "supervised".to_string(),
        specification: ClusterSpecification {
            master_memory_mb: 1600,
            worker_memory_mb: 1728,
            slots_per_worker: 1,
            worker_count: 1,
        },
        artifacts: Vec::new(),
        system_classpath: Vec::new(),
        user_classpath: Vec::new(),
        startup_timeout: Duration::from_secs(60),
    }
}

async fn launch(platform: &Arc<InMemoryPlatform>) -> ClusterGuard {
    let application_id = platform.new_application().unwrap();
    ClusterDeployer::new(platform.clone())
        .create_cluster(request(application_id))
        .await
        .unwrap()
}

fn supervisor(
    platform: &Arc<InMemoryPlatform>,
    poll_interval: Duration,
    deadline: Duration,
) -> LifecycleSupervisor {
    LifecycleSupervisor::new(platform.clone(), poll_interval, deadline, CALL_TIMEOUT)
}

#[tokio::test]
async fn cluster_finishing_before_deadline_is_never_killed() {
    let platform = Arc::new(InMemoryPlatform::with_script(
        PlatformScript::default().finish_after_polls(3),
    ));
    let guard = launch(&platform).await;
    let application_id = guard.application_id().clone();

    let report = supervisor(&platform, Duration::from_millis(5), Duration::from_secs(5))
        .conclude(guard)
        .await;

    assert_eq!(report.termination, TerminationState::Finished);
    assert_eq!(report.teardown_error, None);
    assert_eq!(report.polls, 4);

    let counts = platform.call_counts();
    assert_eq!(counts.force_kill, 0);
    assert_eq!(counts.release, 1);
    assert_eq!(platform.application(&application_id).unwrap().polls, 4);
}

#[tokio::test]
async fn cluster_still_running_at_deadline_is_killed_exactly_once() {
    let platform = Arc::new(InMemoryPlatform::with_script(
        PlatformScript::default().never_finishes(),
    ));
    let guard = launch(&platform).await;
    let application_id = guard.application_id().clone();

    let report = supervisor(&platform, Duration::from_millis(10), Duration::from_millis(100))
        .conclude(guard)
        .await;

    assert_eq!(report.termination, TerminationState::Killed);
    assert_eq!(report.teardown_error, None);
    assert!(report.polls >= 2);

    let simulated = platform.application(&application_id).unwrap();
    assert_eq!(simulated.kills, 1);
    assert_eq!(simulated.releases, 1);
}

#[tokio::test]
async fn supervision_is_bounded_by_deadline_plus_one_poll_interval() {
    let platform = Arc::new(InMemoryPlatform::with_script(
        PlatformScript::default().never_finishes(),
    ));
    let guard = launch(&platform).await;
    let poll_interval = Duration::from_millis(50);
    let deadline = Duration::from_millis(200);

    let started = Instant::now();
    let report = supervisor(&platform, poll_interval, deadline)
        .conclude(guard)
        .await;
    let elapsed = started.elapsed();

    assert_eq!(report.termination, TerminationState::Killed);
    assert!(elapsed >= deadline, "returned after {elapsed:?}");
    assert!(
        elapsed < deadline + poll_interval + Duration::from_millis(500),
        "returned after {elapsed:?}"
    );
}

#[tokio::test]
async fn failed_kill_is_reported_without_failing_supervision() {
    let platform = Arc::new(InMemoryPlatform::with_script(
        PlatformScript::default()
            .never_finishes()
            .kill_failure("resource manager unreachable"),
    ));
    let guard = launch(&platform).await;
    let application_id = guard.application_id().clone();

    let report = supervisor(&platform, Duration::from_millis(10), Duration::from_millis(50))
        .conclude(guard)
        .await;

    assert_eq!(report.termination, TerminationState::Running);
    let teardown_error = report.teardown_error.expect("kill failure should be reported");
    assert_eq!(teardown_error.kind, CoreErrorKind::Teardown);
    assert_eq!(teardown_error.application, Some(application_id.clone()));
    assert!(teardown_error.message.contains("resource manager unreachable"));

    let simulated = platform.application(&application_id).unwrap();
    assert_eq!(simulated.kills, 1);
    assert_eq!(simulated.releases, 1);
}

#[tokio::test]
async fn status_query_failures_count_as_running() {
    let platform = Arc::new(InMemoryPlatform::with_script(
        PlatformScript::default().status_failure("status endpoint returned 503"),
    ));
    let guard = launch(&platform).await;

    let report = supervisor(&platform, Duration::from_millis(10), Duration::from_millis(60))
        .conclude(guard)
        .await;

    assert_eq!(report.termination, TerminationState::Killed);
    assert_eq!(platform.call_counts().force_kill, 1);
}

#[tokio::test]
async fn hung_status_query_does_not_delay_the_kill_past_the_deadline() {
    let platform = Arc::new(InMemoryPlatform::with_script(
        PlatformScript::default()
            .never_finishes()
            .status_delay(Duration::from_millis(1500)),
    ));
    let guard = launch(&platform).await;
    let application_id = guard.application_id().clone();

    let started = Instant::now();
    let report = supervisor(&platform, Duration::from_millis(50), Duration::from_millis(200))
        .conclude(guard)
        .await;
    let elapsed = started.elapsed();

    assert_eq!(report.termination, TerminationState::Killed);
    assert!(elapsed < Duration::from_millis(750), "took {elapsed:?}");
    let simulated = platform.application(&application_id).unwrap();
    assert_eq!(simulated.kills, 1);
    assert_eq!(simulated.releases, 1);
}

#[tokio::test]
async fn terminate_now_kills_without_polling() {
    let platform = Arc::new(InMemoryPlatform::new());
    let guard = launch(&platform).await;

    let report = supervisor(&platform, Duration::from_millis(10), Duration::from_secs(10))
        .terminate_now(guard)
        .await;

    assert_eq!(report.termination, TerminationState::Killed);
    assert_eq!(report.polls, 0);
    let counts = platform.call_counts();
    assert_eq!(counts.query_status, 0);
    assert_eq!(counts.force_kill, 1);
    assert_eq!(counts.release, 1);
}

#[tokio::test]
async fn dropped_guard_kills_and_releases_the_cluster() {
    let platform = Arc::new(InMemoryPlatform::new());
    let guard = launch(&platform).await;
    let application_id = guard.application_id().clone();

    drop(guard);

    let simulated = platform.application(&application_id).unwrap();
    assert_eq!(simulated.kills, 1);
    assert_eq!(simulated.releases, 1);
}

#[test]
fn dropped_guard_outside_a_runtime_tears_down_inline() {
    let platform = Arc::new(InMemoryPlatform::new());
    let guard = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(launch(&platform));

    drop(guard);

    let counts = platform.call_counts();
    assert_eq!(counts.force_kill, 1);
    assert_eq!(counts.release, 1);
}
