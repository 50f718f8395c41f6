//! Cheap predicates over raw issue payloads, applied before classification.
//!
//! Whenever a field is missing or unreadable the ticket passes: a false
//! pass only costs one classification, a false rejection hides a ticket.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::models::ticket::{parse_timestamp, IssuePayload};

pub trait TicketFilter: Send + Sync {
    fn name(&self) -> &str;

    fn passes_at(&self, issue: &IssuePayload, now: DateTime<Utc>) -> bool;

    fn passes(&self, issue: &IssuePayload) -> bool {
        self.passes_at(issue, Utc::now())
    }
}

/// Passes tickets at least `min_age_days` old.
pub struct MinimumAgeFilter {
    min_age_days: i64,
}

impl MinimumAgeFilter {
    pub fn new(min_age_days: i64) -> Self {
        Self { min_age_days }
    }
}

impl TicketFilter for MinimumAgeFilter {
    fn name(&self) -> &str {
        "minimum_age"
    }

    fn passes_at(&self, issue: &IssuePayload, now: DateTime<Utc>) -> bool {
        match issue.fields.created.as_deref().and_then(parse_timestamp) {
            Some(created) => (now - created).num_days() >= self.min_age_days,
            None => true,
        }
    }
}

/// Passes tickets not updated for at least `min_inactive_days`.
pub struct RecentActivityFilter {
    min_inactive_days: i64,
}

impl RecentActivityFilter {
    pub fn new(min_inactive_days: i64) -> Self {
        Self { min_inactive_days }
    }
}

impl TicketFilter for RecentActivityFilter {
    fn name(&self) -> &str {
        "recent_activity"
    }

    fn passes_at(&self, issue: &IssuePayload, now: DateTime<Utc>) -> bool {
        match issue.fields.updated.as_deref().and_then(parse_timestamp) {
            Some(updated) => (now - updated).num_days() >= self.min_inactive_days,
            None => true,
        }
    }
}

/// Status allow/deny list. A non-empty include set overrides the exclude set.
pub struct StatusFilter {
    include: HashSet<String>,
    exclude: HashSet<String>,
}

impl StatusFilter {
    pub fn excluding<I, S>(statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            include: HashSet::new(),
            exclude: normalise(statuses),
        }
    }

    pub fn including<I, S>(statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            include: normalise(statuses),
            exclude: HashSet::new(),
        }
    }

    pub fn and_excluding<I, S>(mut self, statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.exclude.extend(normalise(statuses));
        self
    }
}

fn normalise<I, S>(statuses: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    statuses
        .into_iter()
        .map(|s| s.as_ref().trim().to_lowercase())
        .collect()
}

impl TicketFilter for StatusFilter {
    fn name(&self) -> &str {
        "status"
    }

    fn passes_at(&self, issue: &IssuePayload, _now: DateTime<Utc>) -> bool {
        let Some(status) = issue.status_name() else {
            return true;
        };
        let status = status.to_lowercase();
        if !self.include.is_empty() {
            return self.include.contains(&status);
        }
        !self.exclude.contains(&status)
    }
}

/// Logical AND of its members; an empty composite passes everything.
#[derive(Default)]
pub struct CompositeFilter {
    filters: Vec<Box<dyn TicketFilter>>,
}

impl CompositeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: impl TicketFilter + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Name of the first member that rejects the issue.
    pub fn rejected_by(&self, issue: &IssuePayload, now: DateTime<Utc>) -> Option<&str> {
        self.filters
            .iter()
            .find(|f| !f.passes_at(issue, now))
            .map(|f| f.name())
    }
}

impl TicketFilter for CompositeFilter {
    fn name(&self) -> &str {
        "composite"
    }

    fn passes_at(&self, issue: &IssuePayload, now: DateTime<Utc>) -> bool {
        self.rejected_by(issue, now).is_none()
    }
}

/// The standard pre-filter for quiescence runs.
pub fn quiescence_prefilter<S: AsRef<str>>(
    min_age_days: i64,
    min_inactive_days: i64,
    excluded_statuses: &[S],
) -> CompositeFilter {
    CompositeFilter::new()
        .with(MinimumAgeFilter::new(min_age_days))
        .with(RecentActivityFilter::new(min_inactive_days))
        .with(StatusFilter::excluding(excluded_statuses.iter().map(|s| s.as_ref())))
}
