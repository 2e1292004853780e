//! Retry controller and executor behavior under a paused clock.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use assert_matches::assert_matches;
use deployd_core::error::CoreError;
use deployd_core::fatal_signatures::FailureClassifier;
use deployd_core::ownership::FileOwner;
use deployd_core::retry::{RetryPolicy, RetryState};
use deployd_core::scenario::Scenario;
use deployd_migrate::executor::{ExecutorError, MigrationExecutor};
use deployd_migrate::layout::MigrationLayout;
use deployd_migrate::retry::{RetryController, RetryError};
use tokio_util::sync::CancellationToken;

use common::{failed, ok, FakeTool};

#[tokio::test(start_paused = true)]
async fn backs_off_between_attempts_but_not_after_the_last() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let layout = MigrationLayout::new(dir.path(), "py");
    let tool = FakeTool::new("c1\n", "c2\n").with_upgrades(vec![
        failed("connection reset by peer"),
        failed("connection reset by peer"),
        failed("connection reset by peer"),
    ]);
    let classifier = FailureClassifier::default();
    let policy = RetryPolicy::new(3, Duration::from_secs(5)).expect("valid policy");

    let executor = MigrationExecutor::new(&tool, &layout, FileOwner::default());
    let mut controller = RetryController::new(executor, &classifier, policy);
    assert_eq!(controller.state(), RetryState::Idle);

    let start = tokio::time::Instant::now();
    let outcome = controller.run(Scenario::PendingUpgrade).await.expect("runs");

    assert_eq!(outcome.state, RetryState::RetryExhausted);
    assert_eq!(controller.state(), RetryState::RetryExhausted);
    assert_eq!(outcome.attempts.len(), 3);
    assert_eq!(outcome.backoffs, 2);
    assert_eq!(start.elapsed(), Duration::from_secs(10));
    let indices: Vec<u32> = outcome.attempts.iter().map(|a| a.index).collect();
    assert_eq!(indices, vec![1, 2, 3]);
}

#[tokio::test(start_paused = true)]
async fn recovers_after_a_transient_failure() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let layout = MigrationLayout::new(dir.path(), "py");
    let tool = FakeTool::new("c1\n", "c2\n")
        .with_upgrades(vec![failed("Lost connection to server"), ok("Running upgrade c1 -> c2")]);
    let classifier = FailureClassifier::default();

    let executor = MigrationExecutor::new(&tool, &layout, FileOwner::default());
    let mut controller = RetryController::new(executor, &classifier, RetryPolicy::default());
    let outcome = controller.run(Scenario::PendingUpgrade).await.expect("runs");

    assert_eq!(outcome.state, RetryState::Succeeded);
    assert_eq!(outcome.attempts.len(), 2);
    assert_eq!(outcome.backoffs, 1);
    assert!(outcome.attempts[1].classification.is_none());
}

#[tokio::test(start_paused = true)]
async fn fatal_failure_never_sleeps() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let layout = MigrationLayout::new(dir.path(), "py");
    let tool = FakeTool::new("c1\n", "c2\n")
        .with_upgrades(vec![failed("Multiple head revisions are present for given argument 'head'")]);
    let classifier = FailureClassifier::default();

    let executor = MigrationExecutor::new(&tool, &layout, FileOwner::default());
    let mut controller = RetryController::new(executor, &classifier, RetryPolicy::default());
    let start = tokio::time::Instant::now();
    let outcome = controller.run(Scenario::UndeterminedProceed).await.expect("runs");

    assert_eq!(outcome.state, RetryState::FatalAborted);
    assert_eq!(outcome.backoffs, 0);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

/// Shutdown during a backoff ends the run without another attempt.
#[tokio::test(start_paused = true)]
async fn shutdown_cuts_backoff_short() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let layout = MigrationLayout::new(dir.path(), "py");
    let tool = FakeTool::new("c1\n", "c2\n").with_upgrades(vec![
        failed("Lost connection to MySQL server during query"),
        ok("Running upgrade c1 -> c2"),
    ]);
    let classifier = FailureClassifier::default();
    let shutdown = CancellationToken::new();

    let executor = MigrationExecutor::new(&tool, &layout, FileOwner::default());
    let mut controller =
        RetryController::new(executor, &classifier, RetryPolicy::default()).with_shutdown(shutdown.clone());

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.cancel();
    });
    let start = tokio::time::Instant::now();
    let err = controller
        .run(Scenario::PendingUpgrade)
        .await
        .expect_err("interrupted");
    trigger.await.expect("trigger");

    assert_matches!(err, RetryError::Interrupted { ref attempts } if attempts.len() == 1);
    assert_eq!(tool.upgrade_calls.load(Ordering::SeqCst), 1);
    assert_eq!(start.elapsed(), Duration::from_secs(1));
}

/// Shutdown before the first attempt leaves the database untouched.
#[tokio::test(start_paused = true)]
async fn shutdown_before_first_attempt_runs_nothing() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let layout = MigrationLayout::new(dir.path(), "py");
    let tool = FakeTool::new("c1\n", "c2\n");
    let classifier = FailureClassifier::default();
    let shutdown = CancellationToken::new();
    shutdown.cancel();

    let executor = MigrationExecutor::new(&tool, &layout, FileOwner::default());
    let mut controller =
        RetryController::new(executor, &classifier, RetryPolicy::default()).with_shutdown(shutdown);
    let err = controller
        .run(Scenario::PendingUpgrade)
        .await
        .expect_err("interrupted");

    assert_matches!(err, RetryError::Interrupted { ref attempts } if attempts.is_empty());
    assert_eq!(tool.writes(), 0);
}

/// Additional signatures turn an otherwise transient failure fatal.
#[tokio::test(start_paused = true)]
async fn extra_signatures_extend_fatal_set() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let layout = MigrationLayout::new(dir.path(), "py");
    let tool = FakeTool::new("c1\n", "c2\n").with_upgrades(vec![failed("Duplicate column name 'slug'")]);
    let classifier = FailureClassifier::default().with_substrings(["duplicate column name"]);

    let executor = MigrationExecutor::new(&tool, &layout, FileOwner::default());
    let mut controller = RetryController::new(executor, &classifier, RetryPolicy::default());
    let outcome = controller.run(Scenario::PendingUpgrade).await.expect("runs");

    assert_eq!(outcome.state, RetryState::FatalAborted);
    assert_eq!(tool.upgrade_calls.load(Ordering::SeqCst), 1);
}

/// A bootstrap that fails after generation does not generate again.
#[tokio::test(start_paused = true)]
async fn bootstrap_retry_generates_once() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let layout = MigrationLayout::new(dir.path(), "py");
    let tool = FakeTool::new("", "")
        .generating(dir.path().join("ab12_initial_schema.py"))
        .with_upgrades(vec![failed("Can't connect to MySQL server on 'db'")]);
    let classifier = FailureClassifier::default();

    let executor = MigrationExecutor::new(&tool, &layout, FileOwner::default());
    let mut controller = RetryController::new(executor, &classifier, RetryPolicy::default());
    let outcome = controller
        .run(Scenario::BootstrapNewDeployment)
        .await
        .expect("runs");

    assert_eq!(outcome.state, RetryState::Succeeded);
    assert_eq!(tool.generate_calls.load(Ordering::SeqCst), 1);
    assert_eq!(tool.upgrade_calls.load(Ordering::SeqCst), 2);
    assert!(outcome.attempts[0].output.contains("$ generate (exit 0)"));
    assert!(!outcome.attempts[1].output.contains("$ generate"));
}

#[tokio::test]
async fn executor_reports_generated_files() {
    let dir = tempfile::tempdir().expect("create temp dir");
    std::fs::write(dir.path().join("__init__.py"), "").expect("write init");
    let layout = MigrationLayout::new(dir.path(), "py");
    let generated = dir.path().join("ab12_initial_schema.py");
    let tool = FakeTool::new("", "").generating(generated.clone());

    let mut executor = MigrationExecutor::new(&tool, &layout, FileOwner::default());
    let attempt = executor
        .execute(Scenario::BootstrapNewDeployment, 1)
        .await
        .expect("executes");

    assert!(attempt.succeeded());
    assert_eq!(executor.generated_files(), &[generated]);
    assert!(attempt.output.contains("$ upgrade (exit 0)"));
}

/// An unreadable migrations directory ends the attempt before generation.
#[tokio::test]
async fn executor_records_unlistable_directory() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let not_a_dir = dir.path().join("versions");
    std::fs::write(&not_a_dir, "").expect("write file");
    let layout = MigrationLayout::new(&not_a_dir, "py");
    let tool = FakeTool::new("", "");

    let mut executor = MigrationExecutor::new(&tool, &layout, FileOwner::default());
    let attempt = executor
        .execute(Scenario::BootstrapNewDeployment, 1)
        .await
        .expect("executes");

    assert!(!attempt.succeeded());
    assert_eq!(attempt.exit_code, -1);
    assert!(attempt.output.contains("could not list existing migrations"));
    assert_eq!(tool.writes(), 0);
}

#[tokio::test]
async fn executor_refuses_non_executable_scenarios() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let layout = MigrationLayout::new(dir.path(), "py");
    let tool = FakeTool::new("", "");

    let mut executor = MigrationExecutor::new(&tool, &layout, FileOwner::default());
    for scenario in [Scenario::NoPendingChanges, Scenario::InitializedWithNoFiles] {
        let err = executor.execute(scenario, 1).await.expect_err("refused");
        assert_matches!(err, ExecutorError::NotExecutable(CoreError::NotExecutable(s)) if s == scenario);
    }
    assert_eq!(tool.writes(), 0);
}
