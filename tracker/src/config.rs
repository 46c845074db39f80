use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    pub api_url: String,
    pub owner: String,
    pub repo: String,
    /// Label that marks an issue as a tracked test failure.
    pub label: String,
    pub timeout: Duration,
    pub user_agent: String,
    pub per_page: u32,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            owner: String::new(),
            repo: String::new(),
            label: "test-failure".to_string(),
            timeout: Duration::from_secs(30),
            user_agent: concat!("failtrack/", env!("CARGO_PKG_VERSION")).to_string(),
            per_page: 100,
        }
    }
}

impl GitHubConfig {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            ..Self::default()
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }

    /// `{api_url}/repos/{owner}/{repo}` without a trailing slash.
    pub fn repo_url(&self) -> String {
        format!(
            "{}/repos/{}/{}",
            self.api_url.trim_end_matches('/'),
            self.owner,
            self.repo
        )
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.api_url.is_empty() {
            return Err("API URL cannot be empty".to_string());
        }

        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err("API URL must start with http:// or https://".to_string());
        }

        if self.owner.trim().is_empty() {
            return Err("Repository owner cannot be empty".to_string());
        }

        if self.repo.trim().is_empty() {
            return Err("Repository name cannot be empty".to_string());
        }

        if self.label.trim().is_empty() {
            return Err("Issue label cannot be empty".to_string());
        }

        if !(1..=100).contains(&self.per_page) {
            return Err("Page size must be between 1 and 100".to_string());
        }

        if self.timeout.is_zero() {
            return Err("Timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}
