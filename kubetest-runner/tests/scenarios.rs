//! End-to-end runs against the in-memory cluster

use kubetest_cluster::{MemoryCluster, Script};
use kubetest_core::domain::job::{JobKind, JobSpec, JobStatus};
use kubetest_core::domain::workload::Phase;
use kubetest_core::registry::{Entry, EntryFuture, SuiteRegistry};
use kubetest_runner::coordinator::log_reporters;
use kubetest_runner::status::RecordingRender;
use kubetest_runner::{
    Coordinator, HarnessConfig, History, Runner, RunnerError, RunnerOptions, StatusReporter,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn pass() -> EntryFuture {
    Box::pin(async { Ok(()) })
}

fn options() -> RunnerOptions {
    RunnerOptions {
        poll_interval: Duration::from_millis(1),
        ..RunnerOptions::workers(&HarnessConfig::default())
    }
}

fn registry(suites: &[&str]) -> SuiteRegistry {
    suites
        .iter()
        .fold(SuiteRegistry::builder(), |builder, suite| {
            builder.test_suite(suite, [Entry::new("ping", pass)])
        })
        .build()
}

fn coordinator(cluster: Arc<MemoryCluster>, suites: &[&str]) -> Coordinator {
    Coordinator::new(
        cluster,
        Arc::new(registry(suites)),
        options(),
        CancellationToken::new(),
    )
    .with_reporters(log_reporters(Duration::ZERO))
}

#[tokio::test]
async fn first_non_zero_exit_code_wins() {
    let cluster = Arc::new(MemoryCluster::new());
    for (suite, exit_code) in [("a", 0), ("b", 0), ("c", 2), ("d", 0)] {
        cluster.set_script(format!("t-x-{}", suite), Script::completes(exit_code, ""));
    }
    let request = JobSpec::new(JobKind::Test, "img").with_test_id("t-x");

    let outcome = coordinator(cluster.clone(), &["a", "b", "c", "d"])
        .run(&request, |_| tokio::io::sink())
        .await;

    assert!(outcome.error.is_none());
    assert_eq!(outcome.process_exit_code(), 2);
    assert_eq!(cluster.submitted().len(), 4);
}

#[tokio::test]
async fn first_error_short_circuits() {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.set_default_script(Script::hangs());
    cluster.set_script("t-x-c", Script::rejected("quota exceeded"));
    let request = JobSpec::new(JobKind::Test, "img").with_test_id("t-x");

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        coordinator(cluster, &["a", "b", "c", "d", "e"]).run(&request, |_| tokio::io::sink()),
    )
    .await
    .expect("aggregation must not wait for hung jobs");

    match outcome.error {
        Some(RunnerError::Aggregation { ref test_id, ref source }) => {
            assert_eq!(test_id, "t-x-c");
            assert!(matches!(**source, RunnerError::Submission { resource: "job", .. }));
        }
        other => panic!("expected the rejected job's error, got {:?}", other),
    }
    assert_eq!(outcome.process_exit_code(), 1);
}

#[tokio::test]
async fn request_without_suite_fans_out() {
    let cluster = Arc::new(MemoryCluster::new());
    let request = JobSpec::new(JobKind::Test, "img").with_test_id("t-ab12");

    let outcome = coordinator(cluster.clone(), &["smoke", "ha"])
        .run(&request, |_| tokio::io::sink())
        .await;

    assert!(outcome.success());
    let mut names: Vec<String> = cluster.submitted().into_iter().map(|w| w.name).collect();
    names.sort();
    assert_eq!(names, vec!["t-ab12-ha", "t-ab12-smoke"]);
}

#[tokio::test]
async fn request_with_suite_runs_one_worker() {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.set_script("t-1-smoke", Script::completes(3, "1 passed, 1 failed"));
    let request = JobSpec::new(JobKind::Test, "img")
        .with_test_id("t-1")
        .with_suite("smoke");

    let outcome = coordinator(cluster.clone(), &["smoke", "ha"])
        .run(&request, |_| tokio::io::sink())
        .await;

    assert!(outcome.error.is_none());
    assert_eq!(outcome.process_exit_code(), 3);
    let names: Vec<String> = cluster.submitted().into_iter().map(|w| w.name).collect();
    assert_eq!(names, vec!["t-1-smoke"]);
}

#[tokio::test]
async fn coordinator_and_worker_are_listed_apart() {
    let cluster = Arc::new(MemoryCluster::new());
    let request = JobSpec::new(JobKind::Test, "img")
        .with_test_id("t-1")
        .with_suite("smoke");

    // What the operator submits
    let operator = RunnerOptions {
        poll_interval: Duration::from_millis(1),
        ..RunnerOptions::coordinator(&HarnessConfig::default())
    };
    let runner = Runner::new(cluster.clone(), operator, CancellationToken::new());
    let mut status = StatusReporter::new(RecordingRender::new(), Duration::ZERO);
    runner.run(&request, &mut status, &mut tokio::io::sink()).await.unwrap();

    // What the coordinator submits in turn
    let outcome = coordinator(cluster.clone(), &["smoke"])
        .run(&request, |_| tokio::io::sink())
        .await;
    assert!(outcome.success());

    let history = History::new(cluster);
    assert_eq!(history.list_tests().await.unwrap().len(), 2);
    let by_id = history.tests_by_id().await.unwrap();
    assert_eq!(by_id.keys().collect::<Vec<_>>(), vec!["t-1", "t-1-smoke"]);
}

#[tokio::test]
async fn killed_container_reports_exit_and_message() {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.set_script("t-oom", Script::completes(137, "oom"));
    let runner = Runner::new(cluster, options(), CancellationToken::new());
    let mut status = StatusReporter::new(RecordingRender::new(), Duration::ZERO);
    let spec = JobSpec::new(JobKind::Test, "img")
        .with_test_id("t-oom")
        .with_suite("smoke");

    let result = runner
        .run(&spec, &mut status, &mut tokio::io::sink())
        .await
        .unwrap();

    assert_eq!(result.status, JobStatus::Failed);
    assert_eq!(result.exit_code, 137);
    assert_eq!(result.message, "oom");
}

#[tokio::test]
async fn very_fast_job_is_followed() {
    let cluster = Arc::new(MemoryCluster::new());
    let script = Script::exits_immediately(0, "1 passed, 0 failed").with_output("✓ ping\n");
    cluster.set_script("t-fast", script);
    let runner = Runner::new(cluster, options(), CancellationToken::new());
    let mut status = StatusReporter::new(RecordingRender::new(), Duration::ZERO);
    let spec = JobSpec::new(JobKind::Test, "img")
        .with_test_id("t-fast")
        .with_suite("smoke");
    let mut output = Vec::new();

    let result = runner.run(&spec, &mut status, &mut output).await.unwrap();

    assert!(result.success());
    assert_eq!(output, "✓ ping\n".as_bytes());
}

#[tokio::test]
async fn cancellation_stops_waiting() {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.set_script("t-stuck", Script::hangs());
    let cancel = CancellationToken::new();
    let runner = Runner::new(cluster, options(), cancel.clone());
    let mut status = StatusReporter::new(RecordingRender::new(), Duration::ZERO);
    let spec = JobSpec::new(JobKind::Test, "img")
        .with_test_id("t-stuck")
        .with_suite("smoke");

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });
    let err = runner
        .run(&spec, &mut status, &mut tokio::io::sink())
        .await
        .unwrap_err();
    trigger.await.unwrap();

    assert!(matches!(err, RunnerError::Cancelled));
}

#[tokio::test]
async fn history_filters_by_kind() {
    let cluster = Arc::new(MemoryCluster::new());
    let runner = Runner::new(cluster.clone(), options(), CancellationToken::new());

    for i in 0..3 {
        let spec = JobSpec::new(JobKind::Test, "img")
            .with_test_id(format!("t-{}", i))
            .with_suite("smoke");
        let mut status = StatusReporter::new(RecordingRender::new(), Duration::ZERO);
        runner.run(&spec, &mut status, &mut tokio::io::sink()).await.unwrap();
    }
    for i in 0..2 {
        let spec = JobSpec::new(JobKind::Benchmark, "img")
            .with_test_id(format!("b-{}", i))
            .with_suite("map");
        let mut status = StatusReporter::new(RecordingRender::new(), Duration::ZERO);
        runner.run(&spec, &mut status, &mut tokio::io::sink()).await.unwrap();
    }

    let history = History::new(cluster);
    let tests = history.list_tests().await.unwrap();
    let benchmarks = history.list_benchmarks().await.unwrap();

    assert_eq!(tests.len(), 3);
    assert_eq!(benchmarks.len(), 2);
    assert!(tests.iter().all(|r| r.kind == Some(JobKind::Test)));
    assert!(benchmarks.iter().all(|r| r.kind == Some(JobKind::Benchmark)));
    assert!(tests.iter().all(|r| r.status == JobStatus::Succeeded));

    let by_id = history.tests_by_id().await.unwrap();
    assert!(by_id.contains_key("t-1"));
    assert_eq!(history.get(JobKind::Benchmark, "b-1").await.unwrap().test_id, "b-1");
    assert!(matches!(
        history.get(JobKind::Test, "b-1").await,
        Err(RunnerError::WorkloadNotFound(_))
    ));
}

#[tokio::test]
async fn observed_phases_never_regress() {
    let cluster = Arc::new(MemoryCluster::new());
    cluster.set_script("t-1", Script::completes(0, ""));
    let runner = Runner::new(cluster.clone(), options(), CancellationToken::new());
    let mut status = StatusReporter::new(RecordingRender::new(), Duration::ZERO);
    let spec = JobSpec::new(JobKind::Test, "img")
        .with_test_id("t-1")
        .with_suite("smoke");

    runner.run(&spec, &mut status, &mut tokio::io::sink()).await.unwrap();

    let phases = cluster.observed_phases("t-1");
    assert_eq!(phases.first(), Some(&Phase::Pending));
    assert_eq!(phases.last(), Some(&Phase::Succeeded));
    assert!(phases.windows(2).all(|w| w[0].can_transition_to(w[1])));
}
