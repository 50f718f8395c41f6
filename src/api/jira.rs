use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::tracker::{IssueTracker, SearchPage, TrackerError, Transition};
use crate::models::ticket::{Comment, IssuePayload, RawComment, RawCommentPage};

#[derive(Debug, Clone)]
pub enum JiraAuth {
    /// Email + API token (Jira Cloud).
    Basic { email: String, api_token: String },
    /// Personal access token (Jira Server / Data Center).
    Bearer { token: String },
}

pub struct JiraClient {
    client: Client,
    base_url: String,
    auth: JiraAuth,
    max_retries: u32,
    retry_delay: Duration,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    issues: Vec<IssuePayload>,
    #[serde(default)]
    total: Option<usize>,
}

#[derive(Deserialize)]
struct TransitionsResponse {
    #[serde(default)]
    transitions: Vec<RawTransition>,
}

#[derive(Deserialize)]
struct RawTransition {
    id: String,
    name: String,
    #[serde(default)]
    to: Option<RawStatus>,
}

#[derive(Deserialize)]
struct RawStatus {
    name: String,
}

impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            TrackerError::Connection(err.to_string())
        } else if err.is_decode() {
            TrackerError::Operation(format!("unexpected response body: {}", err))
        } else {
            TrackerError::Operation(err.to_string())
        }
    }
}

impl JiraClient {
    pub fn new(base_url: impl Into<String>, auth: JiraAuth) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
            max_retries: 3,
            retry_delay: Duration::from_millis(2000),
        }
    }

    pub fn with_retry_policy(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/rest/api/2{}", self.base_url, path);
        let builder = self
            .client
            .request(method, url)
            .header("Accept", "application/json");
        match &self.auth {
            JiraAuth::Basic { email, api_token } => builder.basic_auth(email, Some(api_token)),
            JiraAuth::Bearer { token } => builder.bearer_auth(token),
        }
    }

    fn issue_path(key: &str, suffix: &str) -> String {
        format!("/issue/{}{}", urlencoding::encode(key), suffix)
    }

    /// Map non-success HTTP statuses onto the tracker error taxonomy.
    async fn check(response: Response, subject: &str) -> Result<Response, TrackerError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::NOT_FOUND => TrackerError::NotFound(subject.to_string()),
            StatusCode::UNAUTHORIZED => TrackerError::AuthFailed(status.as_u16()),
            StatusCode::FORBIDDEN => {
                TrackerError::PermissionDenied(format!("{}: {}", subject, text))
            }
            StatusCode::TOO_MANY_REQUESTS => TrackerError::RateLimited(text),
            _ => TrackerError::Operation(format!("Jira API error ({}): {}", status, text)),
        })
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, TrackerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TrackerError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    let wait = self.retry_delay * 2u32.saturating_pow(attempt);
                    attempt += 1;
                    warn!(
                        operation,
                        attempt,
                        max_retries = self.max_retries,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "Jira call failed, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_issue(&self, key: &str) -> Result<IssuePayload, TrackerError> {
        let response = self
            .request(Method::GET, &Self::issue_path(key, ""))
            .query(&[("expand", "changelog")])
            .send()
            .await?;
        Ok(Self::check(response, key).await?.json().await?)
    }

    async fn fetch_page(
        &self,
        jql: &str,
        start_at: usize,
        max_results: usize,
    ) -> Result<SearchPage, TrackerError> {
        let start_at = start_at.to_string();
        let max_results = max_results.to_string();
        let response = self
            .request(Method::GET, "/search")
            .query(&[
                ("jql", jql),
                ("startAt", start_at.as_str()),
                ("maxResults", max_results.as_str()),
                ("expand", "changelog"),
            ])
            .send()
            .await?;
        let page: SearchResponse = Self::check(response, "search").await?.json().await?;
        Ok(SearchPage {
            issues: page.issues,
            total: page.total,
        })
    }

    async fn post_comment(&self, key: &str, body: &str) -> Result<Comment, TrackerError> {
        let response = self
            .request(Method::POST, &Self::issue_path(key, "/comment"))
            .json(&json!({ "body": body }))
            .send()
            .await?;
        let raw: RawComment = Self::check(response, key).await?.json().await?;
        Ok(Comment::from_raw(&raw, chrono::Utc::now()))
    }

    async fn fetch_comments(&self, key: &str) -> Result<Vec<Comment>, TrackerError> {
        let response = self
            .request(Method::GET, &Self::issue_path(key, "/comment"))
            .send()
            .await?;
        let page: RawCommentPage = Self::check(response, key).await?.json().await?;
        let fetched_at = chrono::Utc::now();
        Ok(page
            .comments
            .iter()
            .map(|raw| Comment::from_raw(raw, fetched_at))
            .collect())
    }

    async fn fetch_transitions(&self, key: &str) -> Result<Vec<Transition>, TrackerError> {
        let response = self
            .request(Method::GET, &Self::issue_path(key, "/transitions"))
            .send()
            .await?;
        let body: TransitionsResponse = Self::check(response, key).await?.json().await?;
        Ok(body
            .transitions
            .into_iter()
            .map(|t| Transition {
                id: t.id,
                name: t.name,
                to_status: t.to.map(|s| s.name),
            })
            .collect())
    }

    async fn post_transition(&self, key: &str, transition_id: &str) -> Result<(), TrackerError> {
        let response = self
            .request(Method::POST, &Self::issue_path(key, "/transitions"))
            .json(&json!({ "transition": { "id": transition_id } }))
            .send()
            .await?;
        Self::check(response, key).await?;
        Ok(())
    }

    async fn put_assignee(&self, key: &str, account_id: Option<&str>) -> Result<(), TrackerError> {
        let response = self
            .request(Method::PUT, &Self::issue_path(key, "/assignee"))
            .json(&json!({ "accountId": account_id }))
            .send()
            .await?;
        Self::check(response, key).await?;
        Ok(())
    }
}

#[async_trait]
impl IssueTracker for JiraClient {
    async fn get_issue(&self, key: &str) -> Result<IssuePayload, TrackerError> {
        debug!(ticket = %key, "fetching issue");
        self.with_retry("get_issue", || self.fetch_issue(key)).await
    }

    async fn search_issues(
        &self,
        jql: &str,
        start_at: usize,
        max_results: usize,
    ) -> Result<SearchPage, TrackerError> {
        debug!(%jql, start_at, max_results, "searching issues");
        self.with_retry("search_issues", || self.fetch_page(jql, start_at, max_results))
            .await
    }

    async fn add_comment(&self, key: &str, body: &str) -> Result<Comment, TrackerError> {
        self.with_retry("add_comment", || self.post_comment(key, body)).await
    }

    async fn list_comments(&self, key: &str) -> Result<Vec<Comment>, TrackerError> {
        self.with_retry("list_comments", || self.fetch_comments(key)).await
    }

    async fn get_transitions(&self, key: &str) -> Result<Vec<Transition>, TrackerError> {
        self.with_retry("get_transitions", || self.fetch_transitions(key))
            .await
    }

    async fn transition_issue(&self, key: &str, transition_id: &str) -> Result<(), TrackerError> {
        self.with_retry("transition_issue", || self.post_transition(key, transition_id))
            .await
    }

    async fn assign_issue(&self, key: &str, account_id: Option<&str>) -> Result<(), TrackerError> {
        self.with_retry("assign_issue", || self.put_assignee(key, account_id))
            .await
    }
}
