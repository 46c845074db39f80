//! Runs tests, extracts failures and reconciles them with the tracker.

use crate::config::{ConfigError, RunConfig};
use crate::error::{AppError, AppResult};
use crate::reconcile::{OutcomeStatus, ReconcileObserver, ReconcileOutcome, Reconciler, TracingObserver};
use runner::{run_tests, TestRun};
use tracing::{debug, info};
use tracker::{GitHubTracker, IssueTracker};

/// What a clean pass did
#[derive(Debug, Clone)]
pub struct PassSummary {
    /// Failed tests extracted from the run
    pub failed_tests: usize,
    pub outcome: ReconcileOutcome,
}

/// Full pass: run the test command, then [`run_with`] a GitHub tracker.
pub async fn run(config: &RunConfig) -> AppResult<PassSummary> {
    let test_run = run_tests(&config.command).await?;

    if let Some(path) = &config.json_file {
        debug!("Writing test output to {}", path.display());
        tokio::fs::write(path, &test_run.stdout).await?;
    }

    let tracker = GitHubTracker::new(config.github.clone(), config.access.clone())?;
    run_with(config, &test_run, &tracker, &TracingObserver).await
}

/// Reconcile a finished test run against `tracker`.
///
/// Returns [`AppError::RegressionsFound`] when a failing test has no open
/// issue, after any requested issues have been filed.
pub async fn run_with(
    config: &RunConfig,
    test_run: &TestRun,
    tracker: &dyn IssueTracker,
    observer: &dyn ReconcileObserver,
) -> AppResult<PassSummary> {
    if config.post && !tracker.can_write() {
        return Err(ConfigError::PostWithoutAuth.into());
    }

    let failures = test_run.failed_tests(config.format, config.junit_file.as_deref())?;
    info!(
        "{} failed test(s) in run (exit code {}, {:.1?})",
        failures.len(),
        test_run.exit_code,
        test_run.duration
    );

    let outcome = Reconciler::new(tracker, observer)
        .run_pass(&failures, config.post)
        .await?;

    let reconciliation = &outcome.reconciliation;
    info!(
        "{} new, {} still failing, {} solved; {} issue(s) created, {} closed",
        reconciliation.new_issues.len(),
        reconciliation.still_failing.len(),
        reconciliation.solved_issues.len(),
        outcome.created.len(),
        outcome.closed.len()
    );

    match outcome.status() {
        OutcomeStatus::RegressionsFound { count } => Err(AppError::RegressionsFound {
            count,
            filed: outcome.created.len(),
        }),
        OutcomeStatus::Clean => Ok(PassSummary {
            failed_tests: failures.len(),
            outcome,
        }),
    }
}
