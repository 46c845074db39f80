//! Reconciliation of failing tests against open tracker issues.
//!
//! A pass fetches the open test-failure issues, splits the current failures
//! into new and already-tracked ones, finds tracked issues whose test no
//! longer fails, and optionally files/closes issues to match:
//!
//! `Start -> Fetched -> Diffed -> [Posting -> Posted | Aborted] -> Done`
//!
//! Create and close calls run one at a time, new issues first. The first
//! failing call aborts the pass; whatever was already created or closed stays
//! that way on the tracker and is reported in the error.

use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use tracker::{FailedTest, IssueTracker, TestIdentity, TrackedIssue, TrackerError};

/// Where a reconciliation pass currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassState {
    Start,
    Fetched { tracked: usize },
    Diffed { new: usize, solved: usize },
    Posting,
    Posted,
    Aborted,
    Done,
}

/// Tracker mutation a pass can issue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Fetch,
    Create,
    Close,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Fetch => write!(f, "fetch"),
            Operation::Create => write!(f, "create"),
            Operation::Close => write!(f, "close"),
        }
    }
}

/// Something that happened during a pass, handed to the observer
#[derive(Debug)]
pub enum ReconcileEvent<'a> {
    StateChanged(PassState),
    NewFailure(&'a FailedTest),
    StillFailing(&'a FailedTest),
    Solved(&'a TrackedIssue),
    IssueCreated(&'a TrackedIssue),
    IssueClosed(&'a TrackedIssue),
    CallFailed {
        operation: Operation,
        title: Option<&'a str>,
        error: &'a TrackerError,
    },
}

/// Receives diagnostics from the reconciler in place of a global logger.
pub trait ReconcileObserver: Send + Sync {
    fn on_event(&self, event: &ReconcileEvent<'_>);
}

/// Observer that writes every event to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ReconcileObserver for TracingObserver {
    fn on_event(&self, event: &ReconcileEvent<'_>) {
        match event {
            ReconcileEvent::StateChanged(state) => debug!("Reconciliation state: {:?}", state),
            ReconcileEvent::NewFailure(test) => warn!("NEW failed test found: {}", test.title),
            ReconcileEvent::StillFailing(test) => match test.issue {
                Some(number) => debug!("Still failing: {} (#{})", test.title, number),
                None => debug!("Still failing: {}", test.title),
            },
            ReconcileEvent::Solved(issue) => {
                info!("Test passes again: {} (#{})", issue.title, issue.number)
            }
            ReconcileEvent::IssueCreated(issue) => {
                info!("New issue created: #{} {}", issue.number, issue.title)
            }
            ReconcileEvent::IssueClosed(issue) => {
                info!("Issue closed: #{} {}", issue.number, issue.title)
            }
            ReconcileEvent::CallFailed {
                operation,
                title,
                error: err,
            } => error!(
                "Tracker {} call failed for {} ({}): {}",
                operation,
                title.unwrap_or("<all issues>"),
                err.kind(),
                err
            ),
        }
    }
}

/// New, still-failing and solved tests of one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Failing now, no open issue
    pub new_issues: Vec<FailedTest>,
    /// Failing now and already tracked; `issue` holds the issue number
    pub still_failing: Vec<FailedTest>,
    /// Tracked, but no longer failing
    pub solved_issues: Vec<TrackedIssue>,
}

impl Reconciliation {
    pub fn has_regressions(&self) -> bool {
        !self.new_issues.is_empty()
    }

    /// True when nothing needs to be created or closed.
    pub fn is_settled(&self) -> bool {
        self.new_issues.is_empty() && self.solved_issues.is_empty()
    }
}

/// Split current failures and tracked issues by title.
///
/// Output order follows input order. A title repeated in either input is
/// only considered once.
pub fn diff(current: &[FailedTest], tracked: &[TrackedIssue]) -> Reconciliation {
    let tracked_by_title: HashMap<&str, u64> = tracked
        .iter()
        .rev()
        .map(|issue| (issue.title(), issue.number))
        .collect();
    let current_titles: HashSet<&str> = current.iter().map(TestIdentity::title).collect();

    let mut result = Reconciliation::default();
    let mut seen = HashSet::new();

    for test in current {
        if !seen.insert(test.title()) {
            continue;
        }
        match tracked_by_title.get(test.title()) {
            Some(&number) => result.still_failing.push(test.clone().with_issue(number)),
            None => result.new_issues.push(test.clone()),
        }
    }

    let mut seen = HashSet::new();
    for issue in tracked {
        if seen.insert(issue.title()) && !current_titles.contains(issue.title()) {
            result.solved_issues.push(issue.clone());
        }
    }

    result
}

/// Final status of a completed pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Clean,
    RegressionsFound { count: usize },
}

/// Result of a pass that ran to completion
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub reconciliation: Reconciliation,
    /// Issues filed during this pass
    pub created: Vec<TrackedIssue>,
    /// Issues closed during this pass
    pub closed: Vec<TrackedIssue>,
    /// Whether tracker mutations were requested
    pub posted: bool,
}

impl ReconcileOutcome {
    /// Regressions are reported whether or not they were filed.
    pub fn status(&self) -> OutcomeStatus {
        match self.reconciliation.new_issues.len() {
            0 => OutcomeStatus::Clean,
            count => OutcomeStatus::RegressionsFound { count },
        }
    }
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Failed to fetch open issues from {tracker}: {source}")]
    Fetch {
        tracker: &'static str,
        #[source]
        source: TrackerError,
    },

    #[error("Failed to create issue for '{title}' after creating {}: {source}", .created.len())]
    Create {
        title: String,
        /// Issues created before the failing call; they stay open
        created: Vec<TrackedIssue>,
        #[source]
        source: TrackerError,
    },

    #[error("Failed to close issue #{number} for '{title}' after closing {}: {source}", .closed.len())]
    Close {
        title: String,
        number: u64,
        created: Vec<TrackedIssue>,
        /// Issues closed before the failing call; they stay closed
        closed: Vec<TrackedIssue>,
        #[source]
        source: TrackerError,
    },
}

impl ReconcileError {
    /// The tracker error that stopped the pass, as the tracker returned it.
    pub fn tracker_error(&self) -> &TrackerError {
        match self {
            ReconcileError::Fetch { source, .. }
            | ReconcileError::Create { source, .. }
            | ReconcileError::Close { source, .. } => source,
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            ReconcileError::Fetch { .. } => Operation::Fetch,
            ReconcileError::Create { .. } => Operation::Create,
            ReconcileError::Close { .. } => Operation::Close,
        }
    }

    /// (created, closed) counts already applied on the tracker.
    pub fn applied(&self) -> (usize, usize) {
        match self {
            ReconcileError::Fetch { .. } => (0, 0),
            ReconcileError::Create { created, .. } => (created.len(), 0),
            ReconcileError::Close {
                created, closed, ..
            } => (created.len(), closed.len()),
        }
    }
}

/// Drives one reconciliation pass against a tracker.
pub struct Reconciler<'a> {
    tracker: &'a dyn IssueTracker,
    observer: &'a dyn ReconcileObserver,
}

impl<'a> Reconciler<'a> {
    pub fn new(tracker: &'a dyn IssueTracker, observer: &'a dyn ReconcileObserver) -> Self {
        Self { tracker, observer }
    }

    fn emit(&self, event: ReconcileEvent<'_>) {
        self.observer.on_event(&event);
    }

    fn state(&self, state: PassState) {
        self.emit(ReconcileEvent::StateChanged(state));
    }

    /// Fetch the tracker's open issues, then [`reconcile`](Self::reconcile).
    pub async fn run_pass(
        &self,
        current: &[FailedTest],
        post: bool,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        self.state(PassState::Start);

        let tracked = match self.tracker.fetch_open_failure_issues().await {
            Ok(tracked) => tracked,
            Err(source) => {
                self.emit(ReconcileEvent::CallFailed {
                    operation: Operation::Fetch,
                    title: None,
                    error: &source,
                });
                self.state(PassState::Aborted);
                return Err(ReconcileError::Fetch {
                    tracker: self.tracker.tracker_name(),
                    source,
                });
            }
        };
        self.state(PassState::Fetched {
            tracked: tracked.len(),
        });

        self.reconcile(current, &tracked, post).await
    }

    /// Diff `current` against `tracked` and, when `post` is set, create an
    /// issue per new failure and close every solved one.
    ///
    /// New failures are reported to the observer whether or not `post` is
    /// set. Calling this twice with the same inputs issues the same calls
    /// twice; deduplication is left to the tracker.
    pub async fn reconcile(
        &self,
        current: &[FailedTest],
        tracked: &[TrackedIssue],
        post: bool,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let reconciliation = diff(current, tracked);
        self.state(PassState::Diffed {
            new: reconciliation.new_issues.len(),
            solved: reconciliation.solved_issues.len(),
        });

        for test in &reconciliation.new_issues {
            self.emit(ReconcileEvent::NewFailure(test));
        }
        for test in &reconciliation.still_failing {
            self.emit(ReconcileEvent::StillFailing(test));
        }
        for issue in &reconciliation.solved_issues {
            self.emit(ReconcileEvent::Solved(issue));
        }

        let mut created = Vec::new();
        let mut closed = Vec::new();

        if post {
            self.state(PassState::Posting);

            for test in &reconciliation.new_issues {
                match self.tracker.create_issue(test).await {
                    Ok(issue) => {
                        self.emit(ReconcileEvent::IssueCreated(&issue));
                        created.push(issue);
                    }
                    Err(source) => {
                        self.emit(ReconcileEvent::CallFailed {
                            operation: Operation::Create,
                            title: Some(&test.title),
                            error: &source,
                        });
                        self.state(PassState::Aborted);
                        return Err(ReconcileError::Create {
                            title: test.title.clone(),
                            created,
                            source,
                        });
                    }
                }
            }

            for issue in &reconciliation.solved_issues {
                match self.tracker.close_issue(issue).await {
                    Ok(()) => {
                        self.emit(ReconcileEvent::IssueClosed(issue));
                        closed.push(issue.clone());
                    }
                    Err(source) => {
                        self.emit(ReconcileEvent::CallFailed {
                            operation: Operation::Close,
                            title: Some(&issue.title),
                            error: &source,
                        });
                        self.state(PassState::Aborted);
                        return Err(ReconcileError::Close {
                            title: issue.title.clone(),
                            number: issue.number,
                            created,
                            closed,
                            source,
                        });
                    }
                }
            }

            self.state(PassState::Posted);
        }

        self.state(PassState::Done);

        Ok(ReconcileOutcome {
            reconciliation,
            created,
            closed,
            posted: post,
        })
    }
}
