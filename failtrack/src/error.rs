//! Error taxonomy and process exit codes.

use crate::config::ConfigError;
use crate::reconcile::ReconcileError;
use runner::RunnerError;
use thiserror::Error;
use tracker::TrackerError;

/// Exit codes of the failtrack binary
pub mod codes {
    /// Every failing test already has an open issue
    pub const SUCCESS: u8 = 0;

    /// New failing tests were found (filed or not)
    pub const REGRESSIONS_FOUND: u8 = 1;

    /// Invalid combination of flags or settings
    pub const CONFIG: u8 = 2;

    /// The run itself broke: test command, tracker or filesystem
    pub const OPERATIONAL: u8 = 3;
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Test run failed: {0}")]
    Runner(#[from] RunnerError),

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("New failing test(s) found: {count} ({filed} filed)")]
    RegressionsFound { count: usize, filed: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::RegressionsFound { .. } => codes::REGRESSIONS_FOUND,
            AppError::Config(_) => codes::CONFIG,
            AppError::Tracker(TrackerError::InvalidConfig { .. }) => codes::CONFIG,
            AppError::Runner(RunnerError::UnknownFormat(_) | RunnerError::EmptyCommand) => {
                codes::CONFIG
            }
            AppError::Runner(_)
            | AppError::Tracker(_)
            | AppError::Reconcile(_)
            | AppError::Io(_) => codes::OPERATIONAL,
        }
    }

    /// Regressions are a successful result of the pass, not a breakage.
    pub fn is_regression(&self) -> bool {
        matches!(self, AppError::RegressionsFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let regressions = AppError::RegressionsFound { count: 2, filed: 0 };
        let config = AppError::Config(ConfigError::PostWithoutAuth);
        let operational = AppError::Tracker(TrackerError::RateLimit);

        assert_eq!(regressions.exit_code(), codes::REGRESSIONS_FOUND);
        assert_eq!(config.exit_code(), codes::CONFIG);
        assert_eq!(operational.exit_code(), codes::OPERATIONAL);
        assert!(regressions.is_regression());
        assert!(!operational.is_regression());
    }

    #[test]
    fn test_reconcile_errors_are_operational() {
        let err = AppError::from(ReconcileError::Fetch {
            tracker: "github",
            source: TrackerError::Authentication {
                message: "Bad credentials".to_string(),
            },
        });
        assert_eq!(err.exit_code(), codes::OPERATIONAL);
        assert_eq!(
            err.to_string(),
            "Failed to fetch open issues from github: Authentication failed: Bad credentials"
        );
    }

    #[test]
    fn test_config_like_errors() {
        let err = AppError::from(TrackerError::InvalidConfig {
            message: "bad".to_string(),
        });
        assert_eq!(err.exit_code(), codes::CONFIG);

        let err = AppError::from(RunnerError::CommandFailed {
            command: "go test".to_string(),
            code: 2,
        });
        assert_eq!(err.exit_code(), codes::OPERATIONAL);
    }

    #[test]
    fn test_regression_message() {
        let err = AppError::RegressionsFound { count: 3, filed: 3 };
        assert_eq!(err.to_string(), "New failing test(s) found: 3 (3 filed)");
    }
}
