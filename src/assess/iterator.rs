use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use super::filters::TicketFilter;
use crate::api::tracker::{IssueTracker, TrackerError};
use crate::models::ticket::IssuePayload;

/// Which tickets a run looks at.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateQuery {
    pub project_key: String,
    pub excluded_statuses: Vec<String>,
}

impl CandidateQuery {
    pub fn new(project_key: impl Into<String>, excluded_statuses: Vec<String>) -> Self {
        Self {
            project_key: project_key.into(),
            excluded_statuses,
        }
    }

    /// Ordered on fields a run never changes. Posting a comment bumps
    /// `updated`, which would shift later pages under an offset cursor.
    pub fn jql(&self) -> String {
        let mut jql = format!("project = \"{}\"", quote(&self.project_key));
        if !self.excluded_statuses.is_empty() {
            let clause: Vec<String> = self
                .excluded_statuses
                .iter()
                .map(|status| format!("status != \"{}\"", quote(status)))
                .collect();
            jql.push_str(&format!(" AND ({})", clause.join(" AND ")));
        }
        jql.push_str(" ORDER BY created ASC, key ASC");
        jql
    }
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Walks the tickets matching a [`CandidateQuery`] page by page.
///
/// Offset, buffer and payload cache belong to this instance alone; one
/// iterator per run.
pub struct ProjectTicketIterator<'a> {
    tracker: &'a dyn IssueTracker,
    query: CandidateQuery,
    jql: String,
    batch_size: usize,
    max_results: Option<usize>,
    filter: Option<Box<dyn TicketFilter + 'a>>,

    start_at: usize,
    buffer: VecDeque<String>,
    cache: HashMap<String, IssuePayload>,
    processed: usize,
    filtered: usize,
    total: Option<usize>,
    exhausted: bool,
}

impl<'a> ProjectTicketIterator<'a> {
    pub fn new(tracker: &'a dyn IssueTracker, query: CandidateQuery, batch_size: usize) -> Self {
        let jql = query.jql();
        Self {
            tracker,
            query,
            jql,
            batch_size: batch_size.max(1),
            max_results: None,
            filter: None,
            start_at: 0,
            buffer: VecDeque::new(),
            cache: HashMap::new(),
            processed: 0,
            filtered: 0,
            total: None,
            exhausted: false,
        }
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn with_filter(mut self, filter: impl TicketFilter + 'a) -> Self {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn jql(&self) -> &str {
        &self.jql
    }

    pub fn project_key(&self) -> &str {
        &self.query.project_key
    }

    /// Keys handed out so far.
    pub fn processed_count(&self) -> usize {
        self.processed
    }

    /// Tickets dropped by the pre-filter so far.
    pub fn filtered_count(&self) -> usize {
        self.filtered
    }

    /// Matching tickets reported by the tracker, capped by `max_results`.
    pub fn total(&self) -> Option<usize> {
        match (self.total, self.max_results) {
            (Some(total), Some(max)) => Some(total.min(max)),
            (total, _) => total,
        }
    }

    fn remaining_quota(&self) -> Option<usize> {
        self.max_results
            .map(|max| max.saturating_sub(self.processed))
    }

    pub async fn next_key(&mut self) -> Result<Option<String>, TrackerError> {
        if self.remaining_quota() == Some(0) {
            return Ok(None);
        }

        // A page where the filter rejected everything is not the end.
        while self.buffer.is_empty() && !self.exhausted {
            self.fetch_batch().await?;
        }

        let Some(key) = self.buffer.pop_front() else {
            return Ok(None);
        };
        self.processed += 1;
        Ok(Some(key))
    }

    async fn fetch_batch(&mut self) -> Result<(), TrackerError> {
        let fetch_count = match self.remaining_quota() {
            Some(remaining) => self.batch_size.min(remaining),
            None => self.batch_size,
        };
        if fetch_count == 0 {
            self.exhausted = true;
            return Ok(());
        }

        let page = self
            .tracker
            .search_issues(&self.jql, self.start_at, fetch_count)
            .await?;
        if self.total.is_none() {
            self.total = page.total;
        }
        if page.issues.is_empty() {
            self.exhausted = true;
            return Ok(());
        }

        let now = Utc::now();
        let fetched = page.issues.len();
        for (offset, issue) in page.issues.into_iter().enumerate() {
            let key = issue
                .key
                .clone()
                .filter(|k| !k.is_empty())
                .unwrap_or_else(|| {
                    format!("{}-unknown-{}", self.query.project_key, self.start_at + offset)
                });

            if let Some(filter) = &self.filter {
                if !filter.passes_at(&issue, now) {
                    debug!(ticket = %key, filter = filter.name(), "filtered out");
                    self.filtered += 1;
                    continue;
                }
            }
            self.cache.insert(key.clone(), issue);
            self.buffer.push_back(key);
        }
        self.start_at += fetched;
        debug!(
            fetched,
            accepted = self.buffer.len(),
            filtered_total = self.filtered,
            start_at = self.start_at,
            "fetched candidate batch"
        );
        Ok(())
    }

    /// Full payload for `key`: from the page cache when present, else fetched.
    pub async fn payload(&self, key: &str) -> Result<IssuePayload, TrackerError> {
        match self.cache.get(key) {
            Some(payload) => Ok(payload.clone()),
            None => self.tracker.get_issue(key).await,
        }
    }

    pub fn is_cached(&self, key: &str) -> bool {
        self.cache.contains_key(key)
    }

    /// Start over from the first page. The tracker-reported total is kept.
    pub fn reset(&mut self) {
        self.start_at = 0;
        self.buffer.clear();
        self.cache.clear();
        self.processed = 0;
        self.filtered = 0;
        self.exhausted = false;
    }
}
