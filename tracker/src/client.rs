use crate::types::{FailedTest, TrackedIssue};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Request timed out: {message}")]
    Timeout { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("Issue not found: #{number}")]
    NotFound { number: u64 },

    #[error("Cannot {operation} without authentication")]
    Unauthenticated { operation: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Tracker API returned {status}: {message}")]
    Api { status: u16, message: String },
}

impl TrackerError {
    /// Short category name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TrackerError::Transport(_) | TrackerError::Timeout { .. } => "transport",
            TrackerError::Serialization(_) => "serialization",
            TrackerError::Authentication { .. } | TrackerError::Unauthenticated { .. } => "auth",
            TrackerError::RateLimit => "rate-limit",
            TrackerError::NotFound { .. } => "not-found",
            TrackerError::InvalidConfig { .. } => "config",
            TrackerError::Api { .. } => "api",
        }
    }
}

pub type TrackerResult<T> = Result<T, TrackerError>;

/// The operations the reconciler needs from an issue tracker.
///
/// `create_issue` must be create-if-absent for every open issue the client
/// has observed (fetched or created) during its lifetime, and closing an
/// issue that is already closed must succeed. Nothing stronger is promised:
/// two processes racing before the tracker's state propagates can still both
/// file the same test.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// Open test-failure issues, deduplicated by title.
    async fn fetch_open_failure_issues(&self) -> TrackerResult<Vec<TrackedIssue>>;

    async fn create_issue(&self, test: &FailedTest) -> TrackerResult<TrackedIssue>;

    async fn close_issue(&self, issue: &TrackedIssue) -> TrackerResult<()>;

    fn tracker_name(&self) -> &'static str;

    /// Whether create/close can succeed at all with this client's access.
    fn can_write(&self) -> bool;
}
