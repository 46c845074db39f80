#![allow(dead_code)]

use async_trait::async_trait;
use failtrack::{PassState, ReconcileEvent, ReconcileObserver};
use std::sync::Mutex;
use tracker::{FailedTest, IssueTracker, TrackedIssue, TrackerError, TrackerResult};

/// Tracker calls as recorded by [`RecordingTracker`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Fetch,
    Create(String),
    Close(u64),
}

/// In-memory tracker that records every call and can be told to fail.
pub struct RecordingTracker {
    open: Mutex<Vec<TrackedIssue>>,
    calls: Mutex<Vec<Call>>,
    next_number: Mutex<u64>,
    fail_fetch: bool,
    fail_create: Option<String>,
    fail_close: Option<u64>,
    writable: bool,
}

impl RecordingTracker {
    pub fn new(open: &[&str]) -> Self {
        let open: Vec<TrackedIssue> = open
            .iter()
            .enumerate()
            .map(|(i, title)| TrackedIssue::new(*title, i as u64 + 1))
            .collect();
        let next = open.len() as u64 + 1;

        Self {
            open: Mutex::new(open),
            calls: Mutex::new(Vec::new()),
            next_number: Mutex::new(next),
            fail_fetch: false,
            fail_create: None,
            fail_close: None,
            writable: true,
        }
    }

    pub fn failing_fetch(mut self) -> Self {
        self.fail_fetch = true;
        self
    }

    pub fn failing_create_for(mut self, title: &str) -> Self {
        self.fail_create = Some(title.to_string());
        self
    }

    pub fn failing_close_for(mut self, number: u64) -> Self {
        self.fail_close = Some(number);
        self
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| !matches!(call, Call::Fetch))
            .count()
    }

    pub fn open_titles(&self) -> Vec<String> {
        self.open
            .lock()
            .unwrap()
            .iter()
            .map(|issue| issue.title.clone())
            .collect()
    }

    pub fn open_issues(&self) -> Vec<TrackedIssue> {
        self.open.lock().unwrap().clone()
    }
}

#[async_trait]
impl IssueTracker for RecordingTracker {
    async fn fetch_open_failure_issues(&self) -> TrackerResult<Vec<TrackedIssue>> {
        self.calls.lock().unwrap().push(Call::Fetch);
        if self.fail_fetch {
            return Err(TrackerError::Authentication {
                message: "Bad credentials".to_string(),
            });
        }
        Ok(self.open_issues())
    }

    async fn create_issue(&self, test: &FailedTest) -> TrackerResult<TrackedIssue> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Create(test.title.clone()));
        if self.fail_create.as_deref() == Some(test.title.as_str()) {
            return Err(TrackerError::Timeout {
                message: "connection reset".to_string(),
            });
        }

        let mut next = self.next_number.lock().unwrap();
        let issue = TrackedIssue::new(test.title.clone(), *next);
        *next += 1;
        self.open.lock().unwrap().push(issue.clone());
        Ok(issue)
    }

    async fn close_issue(&self, issue: &TrackedIssue) -> TrackerResult<()> {
        self.calls.lock().unwrap().push(Call::Close(issue.number));
        if self.fail_close == Some(issue.number) {
            return Err(TrackerError::NotFound {
                number: issue.number,
            });
        }
        self.open
            .lock()
            .unwrap()
            .retain(|open| open.number != issue.number);
        Ok(())
    }

    fn tracker_name(&self) -> &'static str {
        "recording"
    }

    fn can_write(&self) -> bool {
        self.writable
    }
}

/// Observer that keeps a compact log of the events it saw.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn states(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with("state:"))
            .collect()
    }

    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix(prefix).map(str::to_string))
            .collect()
    }
}

impl ReconcileObserver for RecordingObserver {
    fn on_event(&self, event: &ReconcileEvent<'_>) {
        let line = match event {
            ReconcileEvent::StateChanged(state) => format!("state:{}", state_name(state)),
            ReconcileEvent::NewFailure(test) => format!("new:{}", test.title),
            ReconcileEvent::StillFailing(test) => format!("still:{}", test.title),
            ReconcileEvent::Solved(issue) => format!("solved:{}", issue.title),
            ReconcileEvent::IssueCreated(issue) => format!("created:{}", issue.title),
            ReconcileEvent::IssueClosed(issue) => format!("closed:{}", issue.title),
            ReconcileEvent::CallFailed {
                operation, title, ..
            } => format!("failed:{}:{}", operation, title.unwrap_or("-")),
        };
        self.events.lock().unwrap().push(line);
    }
}

fn state_name(state: &PassState) -> &'static str {
    match state {
        PassState::Start => "Start",
        PassState::Fetched { .. } => "Fetched",
        PassState::Diffed { .. } => "Diffed",
        PassState::Posting => "Posting",
        PassState::Posted => "Posted",
        PassState::Aborted => "Aborted",
        PassState::Done => "Done",
    }
}

pub fn failures(titles: &[&str]) -> Vec<FailedTest> {
    titles.iter().map(|title| FailedTest::new(*title)).collect()
}

pub fn titles<T: tracker::TestIdentity>(items: &[T]) -> Vec<String> {
    items.iter().map(|item| item.title().to_string()).collect()
}
