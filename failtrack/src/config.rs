//! Command-line configuration.

use clap::Parser;
use runner::{ReportFormat, RunnerError, TestCommand};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use tracker::{Access, GitHubConfig};

#[derive(Parser, Debug, Clone)]
#[command(name = "failtrack")]
#[command(version)]
#[command(
    about = "Run a test suite and keep test-failure issues on GitHub in sync with it",
    long_about = "Run a test suite and keep test-failure issues on GitHub in sync with it.\n\n\
        Failing tests without an open issue are reported as regressions (exit code 1) and, \
        with --post, filed as new issues. Open issues whose test passes again are closed.\n\n\
        Formats:\n    \
        go-test-json    go test -json event stream (default)\n    \
        libtest-json    cargo test -- -Z unstable-options --format json\n    \
        junit           JUnit XML file given with --junitfile"
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// GitHub access token
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Owner of the GitHub repository holding the issues
    #[arg(long)]
    pub owner: Option<String>,

    /// GitHub repository holding the issues
    #[arg(long)]
    pub repo: Option<String>,

    /// Create issues for new failures and close issues of passing tests
    #[arg(long)]
    pub post: bool,

    /// Use unauthenticated, read-only access to GitHub
    #[arg(long)]
    pub unauth: bool,

    /// Format of the test output
    #[arg(short, long, env = "FAILTRACK_FORMAT", default_value = "go-test-json")]
    pub format: String,

    /// Run the trailing command as given instead of wrapping it for the format
    #[arg(long)]
    pub raw_command: bool,

    /// Write the captured test output to this file
    #[arg(long, env = "FAILTRACK_JSONFILE")]
    pub jsonfile: Option<PathBuf>,

    /// Read failures from this JUnit XML file
    #[arg(long, env = "FAILTRACK_JUNITFILE")]
    pub junitfile: Option<PathBuf>,

    /// GitHub API base URL
    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    pub api_url: String,

    /// Label that marks tracked test-failure issues
    #[arg(long, default_value = "test-failure")]
    pub label: String,

    /// Kill the test command after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Test command arguments (after `--`)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("can not post issues without authentication")]
    PostWithoutAuth,

    #[error("--post requires an access token (--token or GITHUB_TOKEN)")]
    MissingToken,

    #[error("--owner and --repo are required")]
    MissingRepository,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid test command: {0}")]
    InvalidCommand(String),

    #[error("Invalid tracker configuration: {0}")]
    InvalidTracker(String),

    #[error("--timeout must be greater than 0")]
    InvalidTimeout,
}

/// Validated configuration for one failtrack run
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub command: TestCommand,
    pub format: ReportFormat,
    pub junit_file: Option<PathBuf>,
    pub json_file: Option<PathBuf>,
    pub github: GitHubConfig,
    pub access: Access,
    pub post: bool,
    pub debug: bool,
}

impl RunConfig {
    /// Validates the flags. Every combination that could only fail once the
    /// tracker is contacted is rejected here instead.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let token = cli
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        if cli.post {
            if cli.unauth {
                return Err(ConfigError::PostWithoutAuth);
            }
            if token.is_none() {
                return Err(ConfigError::MissingToken);
            }
        }

        let (owner, repo) = match (cli.owner.as_deref(), cli.repo.as_deref()) {
            (Some(owner), Some(repo)) if !owner.trim().is_empty() && !repo.trim().is_empty() => {
                (owner.trim(), repo.trim())
            }
            _ => return Err(ConfigError::MissingRepository),
        };

        let format: ReportFormat = cli
            .format
            .parse()
            .map_err(|e: RunnerError| ConfigError::InvalidFormat(e.to_string()))?;

        let mut command = TestCommand::for_format(format, &cli.command, cli.raw_command)
            .map_err(|e| ConfigError::InvalidCommand(e.to_string()))?;
        match cli.timeout {
            Some(0) => return Err(ConfigError::InvalidTimeout),
            Some(secs) => command = command.with_timeout(Duration::from_secs(secs)),
            None => {}
        }

        let github = GitHubConfig::new(owner, repo)
            .with_api_url(cli.api_url.clone())
            .with_label(cli.label.clone());
        github.validate().map_err(ConfigError::InvalidTracker)?;

        let access = match token {
            Some(token) if !cli.unauth => Access::Authenticated {
                token: token.to_string(),
            },
            _ => {
                if !cli.unauth {
                    warn!("No access token given, using unauthenticated read-only access");
                }
                Access::Unauthenticated
            }
        };

        Ok(Self {
            command,
            format,
            junit_file: cli.junitfile.clone(),
            json_file: cli.jsonfile.clone(),
            github,
            access,
            post: cli.post,
            debug: cli.debug,
        })
    }
}
