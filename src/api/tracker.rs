use async_trait::async_trait;
use thiserror::Error;

use crate::models::ticket::{Comment, IssuePayload};

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("issue '{0}' not found")]
    NotFound(String),
    #[error("authentication failed (HTTP {0})")]
    AuthFailed(u16),
    #[error("connection error: {0}")]
    Connection(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("operation failed: {0}")]
    Operation(String),
}

impl TrackerError {
    /// Auth, permission and not-found failures will not succeed on a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TrackerError::RateLimited(_) | TrackerError::Connection(_) | TrackerError::Operation(_)
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub issues: Vec<IssuePayload>,
    pub total: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub id: String,
    pub name: String,
    pub to_status: Option<String>,
}

impl Transition {
    pub fn leads_to(&self, status: &str) -> bool {
        self.name.eq_ignore_ascii_case(status)
            || self
                .to_status
                .as_deref()
                .is_some_and(|to| to.eq_ignore_ascii_case(status))
    }
}

/// Everything the assessment pipeline needs from an issue tracker.
#[async_trait]
pub trait IssueTracker: Send + Sync {
    async fn get_issue(&self, key: &str) -> Result<IssuePayload, TrackerError>;

    async fn search_issues(
        &self,
        jql: &str,
        start_at: usize,
        max_results: usize,
    ) -> Result<SearchPage, TrackerError>;

    async fn add_comment(&self, key: &str, body: &str) -> Result<Comment, TrackerError>;

    async fn list_comments(&self, key: &str) -> Result<Vec<Comment>, TrackerError>;

    async fn get_transitions(&self, key: &str) -> Result<Vec<Transition>, TrackerError>;

    async fn transition_issue(&self, key: &str, transition_id: &str) -> Result<(), TrackerError>;

    /// `None` unassigns.
    async fn assign_issue(&self, key: &str, account_id: Option<&str>) -> Result<(), TrackerError>;
}
