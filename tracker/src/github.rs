use crate::client::{IssueTracker, TrackerError, TrackerResult};
use crate::config::GitHubConfig;
use crate::types::{dedup_by_title, FailedTest, TrackedIssue};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

/// Upper bound on pages walked while listing issues.
const MAX_PAGES: u32 = 50;

/// How the client talks to GitHub. Chosen once, at construction.
#[derive(Clone)]
pub enum Access {
    Authenticated { token: String },
    Unauthenticated,
}

impl std::fmt::Debug for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Access::Authenticated { .. } => write!(f, "Authenticated {{ token: <redacted> }}"),
            Access::Unauthenticated => write!(f, "Unauthenticated"),
        }
    }
}

#[derive(Deserialize)]
struct GitHubIssue {
    number: u64,
    title: String,
    html_url: Option<String>,
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

impl From<GitHubIssue> for TrackedIssue {
    fn from(issue: GitHubIssue) -> Self {
        TrackedIssue {
            title: issue.title,
            number: issue.number,
            url: issue.html_url,
        }
    }
}

#[derive(Serialize)]
struct CreateIssueRequest<'a> {
    title: &'a str,
    body: String,
    labels: Vec<&'a str>,
}

#[derive(Serialize)]
struct UpdateIssueRequest {
    state: &'static str,
    state_reason: &'static str,
}

pub struct GitHubTracker {
    http_client: reqwest::Client,
    config: GitHubConfig,
    access: Access,
    /// Open issues seen so far, keyed by title.
    known: Mutex<HashMap<String, TrackedIssue>>,
}

impl GitHubTracker {
    pub fn new(config: GitHubConfig, access: Access) -> TrackerResult<Self> {
        config
            .validate()
            .map_err(|message| TrackerError::InvalidConfig { message })?;

        if let Access::Authenticated { token } = &access {
            if token.trim().is_empty() {
                return Err(TrackerError::InvalidConfig {
                    message: "Access token cannot be empty".to_string(),
                });
            }
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "x-github-api-version",
            HeaderValue::from_static("2022-11-28"),
        );

        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| TrackerError::InvalidConfig {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            http_client,
            config,
            access,
            known: Mutex::new(HashMap::new()),
        })
    }

    pub fn authenticated(config: GitHubConfig, token: impl Into<String>) -> TrackerResult<Self> {
        Self::new(
            config,
            Access::Authenticated {
                token: token.into(),
            },
        )
    }

    pub fn unauthenticated(config: GitHubConfig) -> TrackerResult<Self> {
        Self::new(config, Access::Unauthenticated)
    }

    pub fn config(&self) -> &GitHubConfig {
        &self.config
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access {
            Access::Authenticated { token } => request.bearer_auth(token),
            Access::Unauthenticated => request,
        }
    }

    fn require_write(&self, operation: &str) -> TrackerResult<()> {
        match self.access {
            Access::Authenticated { .. } => Ok(()),
            Access::Unauthenticated => Err(TrackerError::Unauthenticated {
                operation: operation.to_string(),
            }),
        }
    }

    fn remember(&self, issue: &TrackedIssue) {
        if let Ok(mut known) = self.known.lock() {
            known
                .entry(issue.title.clone())
                .or_insert_with(|| issue.clone());
        }
    }

    fn known_issue(&self, title: &str) -> Option<TrackedIssue> {
        self.known
            .lock()
            .ok()
            .and_then(|known| known.get(title).cloned())
    }

    fn forget(&self, issue: &TrackedIssue) {
        if let Ok(mut known) = self.known.lock() {
            known.retain(|_, i| i.number != issue.number);
        }
    }

    /// Reads the whole body, then decodes it. Bad JSON is a
    /// [`TrackerError::Serialization`].
    async fn decode<T: DeserializeOwned>(response: Response) -> TrackerResult<T> {
        let body = response.text().await.map_err(Self::handle_http_error)?;
        Ok(serde_json::from_str(&body)?)
    }

    fn handle_http_error(err: reqwest::Error) -> TrackerError {
        if err.is_timeout() {
            TrackerError::Timeout {
                message: err.to_string(),
            }
        } else {
            TrackerError::Transport(err)
        }
    }

    /// Maps a non-success response onto the tracker error taxonomy.
    fn status_error(
        status: StatusCode,
        headers: &HeaderMap,
        body: String,
        issue_number: Option<u64>,
    ) -> TrackerError {
        let rate_limited = headers
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.trim() == "0");

        match status.as_u16() {
            401 => TrackerError::Authentication { message: body },
            403 if rate_limited => TrackerError::RateLimit,
            403 => TrackerError::Authentication { message: body },
            429 => TrackerError::RateLimit,
            404 => match issue_number {
                Some(number) => TrackerError::NotFound { number },
                None => TrackerError::Api {
                    status: 404,
                    message: format!("repository not found: {}", body),
                },
            },
            code => TrackerError::Api {
                status: code,
                message: body,
            },
        }
    }

    async fn send(
        &self,
        request: RequestBuilder,
        issue_number: Option<u64>,
    ) -> TrackerResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(Self::handle_http_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        Err(Self::status_error(status, &headers, body, issue_number))
    }
}

#[async_trait]
impl IssueTracker for GitHubTracker {
    async fn fetch_open_failure_issues(&self) -> TrackerResult<Vec<TrackedIssue>> {
        let url = format!("{}/issues", self.config.repo_url());
        let per_page = self.config.per_page.to_string();
        let mut issues = Vec::new();

        for page in 1..=MAX_PAGES {
            debug!("Fetching open '{}' issues, page {}", self.config.label, page);

            let request = self.http_client.get(&url).query(&[
                ("state", "open"),
                ("labels", self.config.label.as_str()),
                ("per_page", per_page.as_str()),
                ("page", page.to_string().as_str()),
            ]);

            let response = self.send(request, None).await?;
            let batch: Vec<GitHubIssue> = Self::decode(response).await?;
            let batch_len = batch.len();

            issues.extend(
                batch
                    .into_iter()
                    .filter(|issue| issue.pull_request.is_none())
                    .map(TrackedIssue::from),
            );

            if batch_len < self.config.per_page as usize {
                break;
            }
            if page == MAX_PAGES {
                return Err(TrackerError::Api {
                    status: StatusCode::OK.as_u16(),
                    message: format!(
                        "more than {} pages of open '{}' issues, refusing a partial listing",
                        MAX_PAGES, self.config.label
                    ),
                });
            }
        }

        let issues = dedup_by_title(issues);
        for issue in &issues {
            self.remember(issue);
        }

        info!(
            "Found {} open '{}' issue(s) on {}/{}",
            issues.len(),
            self.config.label,
            self.config.owner,
            self.config.repo
        );

        Ok(issues)
    }

    async fn create_issue(&self, test: &FailedTest) -> TrackerResult<TrackedIssue> {
        self.require_write("create issue")?;

        if let Some(existing) = self.known_issue(&test.title) {
            debug!(
                "Issue #{} already open for '{}', not creating another",
                existing.number, test.title
            );
            return Ok(existing);
        }

        let url = format!("{}/issues", self.config.repo_url());
        let body = CreateIssueRequest {
            title: &test.title,
            body: test.issue_body(),
            labels: vec![self.config.label.as_str()],
        };

        let response = self.send(self.http_client.post(&url).json(&body), None).await?;
        let created: GitHubIssue = Self::decode(response).await?;
        let issue = TrackedIssue::from(created);
        self.remember(&issue);

        debug!("Created issue #{} for '{}'", issue.number, issue.title);
        Ok(issue)
    }

    async fn close_issue(&self, issue: &TrackedIssue) -> TrackerResult<()> {
        self.require_write("close issue")?;

        let url = format!("{}/issues/{}", self.config.repo_url(), issue.number);
        let body = UpdateIssueRequest {
            state: "closed",
            state_reason: "completed",
        };

        self.send(self.http_client.patch(&url).json(&body), Some(issue.number))
            .await?;
        self.forget(issue);

        debug!("Closed issue #{} for '{}'", issue.number, issue.title);
        Ok(())
    }

    fn tracker_name(&self) -> &'static str {
        "github"
    }

    fn can_write(&self) -> bool {
        matches!(self.access, Access::Authenticated { .. })
    }
}
