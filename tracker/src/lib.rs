pub mod client;
pub mod config;
pub mod github;
pub mod types;

pub use client::{IssueTracker, TrackerError, TrackerResult};
pub use config::GitHubConfig;
pub use github::{Access, GitHubTracker};
pub use types::{dedup_by_title, FailedTest, TestIdentity, TrackedIssue, MAX_BODY_OUTPUT_LINES};

pub mod prelude {
    pub use crate::client::*;
    pub use crate::config::*;
    pub use crate::github::*;
    pub use crate::types::*;
}
