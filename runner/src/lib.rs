//! Test execution for failtrack.
//!
//! This crate runs the configured test command, captures its machine-readable
//! output and turns it into the ordered, title-deduplicated list of failed
//! tests the reconciler works from.

pub mod extract;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use tracker::FailedTest;

pub use extract::{
    extract_failed_tests, parse_go_test_json, parse_junit_xml, parse_libtest_json, ReportFormat,
    MAX_OUTPUT_LINES, PACKAGE_FAILURE_TEST,
};

/// Errors related to running tests and reading their results
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("No test command given")]
    EmptyCommand,

    #[error("Failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with code {code}, which does not indicate test failures")]
    CommandFailed { command: String, code: i32 },

    #[error("'{command}' was terminated by a signal")]
    Terminated { command: String },

    #[error("'{command}' timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("Unknown report format: {0}")]
    UnknownFormat(String),

    #[error("Failed to parse {format} report: {message}")]
    Parse { format: String, message: String },

    #[error("The {format} format reads a report file, but none was given")]
    MissingReport { format: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RunnerResult<T> = Result<T, RunnerError>;

/// Exit codes test runners use for "ran fine, some tests failed".
/// `go test` exits 1, `cargo test` exits 101.
pub const DEFAULT_FAILURE_EXIT_CODES: [i32; 2] = [1, 101];

/// A test command to execute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCommand {
    /// Executable to run
    pub program: String,
    /// Arguments passed to the executable
    pub args: Vec<String>,
    /// Working directory, defaults to the current one
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Exit codes meaning the suite ran and some tests failed
    pub failure_exit_codes: Vec<i32>,
    /// Kill the command if it runs longer than this
    pub timeout: Option<Duration>,
}

impl TestCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            failure_exit_codes: DEFAULT_FAILURE_EXIT_CODES.to_vec(),
            timeout: None,
        }
    }

    /// Builds a command from a full argv, program first.
    pub fn from_argv(argv: &[String]) -> RunnerResult<Self> {
        let (program, args) = argv.split_first().ok_or(RunnerError::EmptyCommand)?;
        if program.trim().is_empty() {
            return Err(RunnerError::EmptyCommand);
        }
        Ok(Self::new(program.clone()).with_args(args.iter().cloned()))
    }

    /// Builds the command for `format`, wrapping `extra_args` in the runner
    /// invocation that produces that format. With `raw` the arguments are
    /// used verbatim.
    pub fn for_format(format: ReportFormat, extra_args: &[String], raw: bool) -> RunnerResult<Self> {
        if raw {
            return Self::from_argv(extra_args);
        }

        match format {
            ReportFormat::GoTestJson => {
                let mut argv = vec!["go".to_string(), "test".to_string(), "-json".to_string()];
                if extra_args.is_empty() {
                    argv.push("./...".to_string());
                } else {
                    argv.extend(extra_args.iter().cloned());
                }
                Self::from_argv(&argv)
            }
            ReportFormat::LibtestJson => {
                let mut argv = vec!["cargo".to_string(), "test".to_string()];
                argv.extend(extra_args.iter().cloned());
                argv.extend(
                    ["--", "-Z", "unstable-options", "--format", "json"]
                        .iter()
                        .map(|s| s.to_string()),
                );
                Self::from_argv(&argv)
            }
            ReportFormat::JUnitXml => Self::from_argv(extra_args),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_failure_exit_codes(mut self, codes: Vec<i32>) -> Self {
        self.failure_exit_codes = codes;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The command line as a single display string
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a completed test command
#[derive(Debug, Clone)]
pub struct TestRun {
    /// Exit code of the command (0 when every test passed)
    pub exit_code: i32,
    /// Captured standard output
    pub stdout: String,
    /// Wall-clock duration of the run
    pub duration: Duration,
}

impl TestRun {
    /// Wraps output that was produced elsewhere, e.g. a saved event log.
    pub fn from_output(stdout: impl Into<String>, exit_code: i32) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            duration: Duration::ZERO,
        }
    }

    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    /// Failed tests of this run. A JUnit report file, when given, takes
    /// precedence over the captured output.
    pub fn failed_tests(
        &self,
        format: ReportFormat,
        junit_file: Option<&Path>,
    ) -> RunnerResult<Vec<FailedTest>> {
        let failures = match junit_file {
            Some(path) => {
                debug!("Reading JUnit report from {}", path.display());
                let xml = std::fs::read_to_string(path)?;
                parse_junit_xml(&xml)?
            }
            None if format == ReportFormat::JUnitXml => {
                return Err(RunnerError::MissingReport {
                    format: format.to_string(),
                })
            }
            None => extract_failed_tests(format, &self.stdout)?,
        };

        if failures.is_empty() && !self.passed() {
            warn!(
                "Test command exited with {} but no failed tests were found in the report",
                self.exit_code
            );
        }

        Ok(failures)
    }
}

/// Run the test command to completion.
///
/// Exit code 0 and any of the command's `failure_exit_codes` produce a
/// [`TestRun`]; any other outcome means the suite could not run and is an
/// error.
pub async fn run_tests(command: &TestCommand) -> RunnerResult<TestRun> {
    let command_line = command.display();
    info!("Running tests: {}", command_line);

    let mut cmd = tokio::process::Command::new(&command.program);
    cmd.args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true);

    if let Some(dir) = &command.working_dir {
        cmd.current_dir(dir);
    }
    for (key, value) in &command.env {
        cmd.env(key, value);
    }

    let started = Instant::now();
    let output = match command.timeout {
        Some(limit) => tokio::time::timeout(limit, cmd.output())
            .await
            .map_err(|_| RunnerError::Timeout {
                command: command_line.clone(),
                timeout: limit,
            })?,
        None => cmd.output().await,
    }
    .map_err(|source| RunnerError::Spawn {
        command: command_line.clone(),
        source,
    })?;
    let duration = started.elapsed();

    let exit_code = output.status.code().ok_or_else(|| RunnerError::Terminated {
        command: command_line.clone(),
    })?;

    if exit_code != 0 && !command.failure_exit_codes.contains(&exit_code) {
        return Err(RunnerError::CommandFailed {
            command: command_line,
            code: exit_code,
        });
    }

    debug!(
        "Test command finished with code {} in {:?}",
        exit_code, duration
    );

    Ok(TestRun {
        exit_code,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        duration,
    })
}
