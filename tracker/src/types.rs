use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Maximum number of output lines carried into an issue body.
pub const MAX_BODY_OUTPUT_LINES: usize = 50;

/// Anything that can be matched against a failing test by title.
pub trait TestIdentity {
    fn title(&self) -> &str;
}

/// One failing test case from the most recent run.
///
/// Equality and hashing only look at `title`. Package, output and any linked
/// issue are carried along for reporting but never change which entity a
/// value refers to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedTest {
    pub title: String,
    pub package: Option<String>,
    pub name: String,
    pub output: Option<String>,
    pub issue: Option<u64>,
}

impl FailedTest {
    pub fn new(title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            name: title.clone(),
            title,
            package: None,
            output: None,
            issue: None,
        }
    }

    /// Builds the title from a package (or suite) and a test name.
    pub fn from_parts(package: impl Into<String>, name: impl Into<String>) -> Self {
        let package = package.into();
        let name = name.into();
        let title = if package.is_empty() {
            name.clone()
        } else {
            format!("{}: {}", package, name)
        };

        Self {
            title,
            package: (!package.is_empty()).then_some(package),
            name,
            output: None,
            issue: None,
        }
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_issue(mut self, number: u64) -> Self {
        self.issue = Some(number);
        self
    }

    /// Markdown body used when filing a new issue for this test.
    pub fn issue_body(&self) -> String {
        let mut body = String::from("Test failure detected by failtrack.\n\n");
        body.push_str(&format!("- **Test:** `{}`\n", self.name));
        if let Some(package) = &self.package {
            body.push_str(&format!("- **Package:** `{}`\n", package));
        }

        if let Some(output) = self.output.as_deref().filter(|o| !o.trim().is_empty()) {
            let lines: Vec<&str> = output.lines().collect();
            let start = lines.len().saturating_sub(MAX_BODY_OUTPUT_LINES);
            body.push_str("\n<details><summary>Output</summary>\n\n```\n");
            if start > 0 {
                body.push_str(&format!("... ({} earlier lines omitted)\n", start));
            }
            for line in &lines[start..] {
                body.push_str(line);
                body.push('\n');
            }
            body.push_str("```\n\n</details>\n");
        }

        body
    }
}

impl PartialEq for FailedTest {
    fn eq(&self, other: &Self) -> bool {
        self.title == other.title
    }
}

impl Eq for FailedTest {}

impl Hash for FailedTest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.title.hash(state);
    }
}

impl TestIdentity for FailedTest {
    fn title(&self) -> &str {
        &self.title
    }
}

/// An open test-failure issue as the tracker reported it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedIssue {
    pub title: String,
    pub number: u64,
    pub url: Option<String>,
}

impl TrackedIssue {
    pub fn new(title: impl Into<String>, number: u64) -> Self {
        Self {
            title: title.into(),
            number,
            url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn as_failed_test(&self) -> FailedTest {
        FailedTest::new(self.title.clone()).with_issue(self.number)
    }
}

impl TestIdentity for TrackedIssue {
    fn title(&self) -> &str {
        &self.title
    }
}

/// Drops later entries whose title was already seen, keeping input order.
pub fn dedup_by_title<T: TestIdentity>(items: Vec<T>) -> Vec<T> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.title().to_string()))
        .collect()
}
