use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use super::tracker::{IssueTracker, SearchPage, TrackerError, Transition};
use crate::models::ticket::{is_system_body, Comment, IssuePayload, User};

pub const DRY_RUN_COMMENT_ID: &str = "dry-run-comment-id";

/// Read-through tracker that never mutates the remote system.
///
/// Reads go to the wrapped tracker so assessments see real data; writes are
/// logged and answered with synthetic successes.
pub struct DryRunTracker<T> {
    inner: T,
}

impl<T: IssueTracker> DryRunTracker<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: IssueTracker> IssueTracker for DryRunTracker<T> {
    async fn get_issue(&self, key: &str) -> Result<IssuePayload, TrackerError> {
        self.inner.get_issue(key).await
    }

    async fn search_issues(
        &self,
        jql: &str,
        start_at: usize,
        max_results: usize,
    ) -> Result<SearchPage, TrackerError> {
        self.inner.search_issues(jql, start_at, max_results).await
    }

    async fn add_comment(&self, key: &str, body: &str) -> Result<Comment, TrackerError> {
        info!(ticket = %key, chars = body.len(), "[dry run] would add comment");
        let now = Utc::now();
        Ok(Comment {
            id: DRY_RUN_COMMENT_ID.to_string(),
            body: body.to_string(),
            author: User::named("stalewatch (dry run)"),
            created: now,
            updated: now,
            is_system_comment: is_system_body(body),
        })
    }

    async fn list_comments(&self, key: &str) -> Result<Vec<Comment>, TrackerError> {
        self.inner.list_comments(key).await
    }

    async fn get_transitions(&self, key: &str) -> Result<Vec<Transition>, TrackerError> {
        self.inner.get_transitions(key).await
    }

    async fn transition_issue(&self, key: &str, transition_id: &str) -> Result<(), TrackerError> {
        info!(ticket = %key, transition_id, "[dry run] would transition issue");
        Ok(())
    }

    async fn assign_issue(&self, key: &str, account_id: Option<&str>) -> Result<(), TrackerError> {
        info!(ticket = %key, assignee = ?account_id, "[dry run] would assign issue");
        Ok(())
    }
}
