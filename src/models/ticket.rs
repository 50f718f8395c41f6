use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Markers that identify comments written by this tool.
///
/// The first entry is stamped onto every comment we post; the others are
/// recognised so older automated comments still count for deduplication.
pub const SYSTEM_MARKERS: [&str; 3] = [
    "[AUTOMATED QUIESCENCE ASSESSMENT]",
    "[Quiescent Ticket System]",
    "[JIRA GOVERNANCE SYSTEM]",
];

const CLOSED_STATUSES: [&str; 4] = ["closed", "done", "resolved", "cancelled"];

pub fn is_system_body(body: &str) -> bool {
    SYSTEM_MARKERS.iter().any(|marker| body.contains(marker))
}

// ---------------------------------------------------------------------------
// Raw payloads, exactly as the Jira REST API hands them to us
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IssuePayload {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub fields: IssueFields,
    #[serde(default)]
    pub changelog: Option<RawChangelog>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct IssueFields {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<Value>,
    #[serde(default)]
    pub status: Option<Named>,
    #[serde(default, rename = "issuetype")]
    pub issue_type: Option<Named>,
    #[serde(default)]
    pub project: Option<ProjectRef>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub labels: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub components: Vec<Named>,
    #[serde(default)]
    pub assignee: Option<RawUser>,
    #[serde(default)]
    pub reporter: Option<RawUser>,
    #[serde(default)]
    pub creator: Option<RawUser>,
    #[serde(default)]
    pub comment: Option<RawCommentPage>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Named {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProjectRef {
    #[serde(default)]
    pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawUser {
    #[serde(rename = "displayName", default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "accountId", default)]
    pub account_id: Option<String>,
    #[serde(rename = "emailAddress", default)]
    pub email_address: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawCommentPage {
    #[serde(default, deserialize_with = "null_as_default")]
    pub comments: Vec<RawComment>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawComment {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub author: Option<RawUser>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub updated: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawChangelog {
    #[serde(default, deserialize_with = "null_as_default")]
    pub histories: Vec<RawHistory>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawHistory {
    #[serde(default)]
    pub author: Option<RawUser>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<RawChangeItem>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawChangeItem {
    #[serde(default)]
    pub field: String,
    #[serde(rename = "fromString", default)]
    pub from_string: Option<String>,
    #[serde(rename = "toString", default)]
    pub to_string: Option<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl IssuePayload {
    pub fn status_name(&self) -> Option<&str> {
        self.fields
            .status
            .as_ref()
            .map(|s| s.name.as_str())
            .filter(|name| !name.is_empty())
    }
}

/// Parse the timestamp formats Jira emits.
///
/// Cloud returns `2024-01-15T10:30:00.000+0000`, which is not RFC 3339
/// because the offset has no colon.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Flatten a description or comment body to plain text.
///
/// REST v2 returns wiki-markup strings; v3 returns Atlassian Document Format
/// trees, whose `text` leaves we concatenate.
pub fn plain_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Object(_) | Value::Array(_) => {
            let mut out = String::new();
            collect_text(value, &mut out);
            out.trim().to_string()
        }
        other => other.to_string(),
    }
}

fn collect_text(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(text)) = map.get("text") {
                out.push_str(text);
            }
            if let Some(content) = map.get("content") {
                collect_text(content, out);
            }
            if matches!(map.get("type"), Some(Value::String(t)) if t == "paragraph") {
                out.push('\n');
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_text(item, out)),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Typed model
// ---------------------------------------------------------------------------

#[derive(Debug, Error, PartialEq)]
pub enum PayloadError {
    #[error("issue payload has no key")]
    MissingKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub display_name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl User {
    pub fn named(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            username: None,
            account_id: None,
            email: None,
        }
    }

    fn from_raw(raw: &RawUser) -> Self {
        let display_name = raw
            .display_name
            .clone()
            .or_else(|| raw.name.clone())
            .or_else(|| raw.email_address.clone())
            .unwrap_or_else(|| "Unknown".to_string());
        Self {
            display_name,
            username: raw.name.clone(),
            account_id: raw.account_id.clone(),
            email: raw.email_address.clone(),
        }
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        match (&self.account_id, &other.account_id) {
            (Some(a), Some(b)) => a == b,
            _ => self.display_name == other.display_name,
        }
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub body: String,
    pub author: User,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub is_system_comment: bool,
}

impl Comment {
    /// Normalise a raw comment. `fallback` stands in for unparsable dates.
    pub fn from_raw(raw: &RawComment, fallback: DateTime<Utc>) -> Self {
        let body = raw.body.as_ref().map(plain_text).unwrap_or_default();
        let created = raw
            .created
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(fallback);
        let updated = raw
            .updated
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(created);
        Self {
            id: raw.id.clone().unwrap_or_default(),
            is_system_comment: is_system_body(&body),
            author: raw
                .author
                .as_ref()
                .map(User::from_raw)
                .unwrap_or_else(|| User::named("Unknown")),
            body,
            created,
            updated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogItem {
    pub field: String,
    pub from_value: Option<String>,
    pub to_value: Option<String>,
    pub author: User,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub key: String,
    pub summary: String,
    pub description: String,
    pub status: String,
    pub issue_type: String,
    pub project_key: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub labels: Vec<String>,
    pub components: Vec<String>,
    pub assignee: Option<User>,
    pub reporter: Option<User>,
    pub creator: Option<User>,
    /// Ordered by creation time.
    pub comments: Vec<Comment>,
    /// Chronological.
    pub changelog: Vec<ChangeLogItem>,
}

impl Ticket {
    /// The single boundary between raw tracker JSON and the typed model.
    pub fn from_payload(payload: &IssuePayload) -> Result<Self, PayloadError> {
        let key = payload
            .key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(PayloadError::MissingKey)?;
        let fields = &payload.fields;

        let parsed_updated = fields.updated.as_deref().and_then(parse_timestamp);
        let created = match fields.created.as_deref().and_then(parse_timestamp) {
            Some(created) => created,
            None => {
                let fallback = parsed_updated.unwrap_or_else(Utc::now);
                warn!(ticket = %key, created = ?fields.created, "no usable created timestamp, using {}", fallback);
                fallback
            }
        };
        // A clock-skewed `updated` is clamped so updated >= created always holds.
        let updated = parsed_updated.unwrap_or(created).max(created);

        let mut comments: Vec<Comment> = fields
            .comment
            .as_ref()
            .map(|page| {
                page.comments
                    .iter()
                    .map(|raw| Comment::from_raw(raw, created))
                    .collect()
            })
            .unwrap_or_default();
        comments.sort_by_key(|c| c.created);

        let mut changelog: Vec<ChangeLogItem> = payload
            .changelog
            .as_ref()
            .map(|log| {
                log.histories
                    .iter()
                    .flat_map(|history| {
                        let author = history
                            .author
                            .as_ref()
                            .map(User::from_raw)
                            .unwrap_or_else(|| User::named("Unknown"));
                        let timestamp = history
                            .created
                            .as_deref()
                            .and_then(parse_timestamp)
                            .unwrap_or(created);
                        history.items.iter().map(move |item| ChangeLogItem {
                            field: item.field.clone(),
                            from_value: item.from_string.clone(),
                            to_value: item.to_string.clone(),
                            author: author.clone(),
                            timestamp,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        changelog.sort_by_key(|item| item.timestamp);

        Ok(Self {
            key,
            summary: fields.summary.clone().unwrap_or_default(),
            description: fields.description.as_ref().map(plain_text).unwrap_or_default(),
            status: payload.status_name().unwrap_or("Unknown").to_string(),
            issue_type: fields
                .issue_type
                .as_ref()
                .map(|t| t.name.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            project_key: fields
                .project
                .as_ref()
                .map(|p| p.key.clone())
                .unwrap_or_default(),
            created,
            updated,
            labels: fields.labels.clone(),
            components: fields.components.iter().map(|c| c.name.clone()).collect(),
            assignee: fields.assignee.as_ref().map(User::from_raw),
            reporter: fields.reporter.as_ref().map(User::from_raw),
            creator: fields.creator.as_ref().map(User::from_raw),
            comments,
            changelog,
        })
    }

    pub fn days_since_update(&self, now: DateTime<Utc>) -> i64 {
        (now - self.updated).num_days()
    }

    pub fn days_since_creation(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created).num_days()
    }

    pub fn is_closed(&self) -> bool {
        let status = self.status.to_lowercase();
        CLOSED_STATUSES.contains(&status.as_str())
    }

    pub fn is_assigned(&self) -> bool {
        self.assignee.is_some()
    }

    pub fn last_comment(&self) -> Option<&Comment> {
        self.comments.iter().max_by_key(|c| c.created)
    }

    pub fn has_system_comment(&self) -> bool {
        self.comments.iter().any(|c| c.is_system_comment)
    }

    /// Most recent of the update stamp, any comment, and any changelog entry.
    pub fn last_activity(&self) -> DateTime<Utc> {
        let comment_activity = self.comments.iter().map(|c| c.updated.max(c.created));
        let change_activity = self.changelog.iter().map(|c| c.timestamp);
        comment_activity
            .chain(change_activity)
            .fold(self.updated, DateTime::max)
    }

    pub fn has_recent_activity(&self, days: i64, now: DateTime<Utc>) -> bool {
        (now - self.last_activity()).num_days() < days
    }

    /// YAML rendering used as the ticket section of LLM prompts.
    pub fn to_prompt_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&PromptView::from(self))
    }
}

#[derive(Serialize)]
struct PromptView<'a> {
    key: &'a str,
    summary: &'a str,
    description: &'a str,
    status: &'a str,
    issue_type: &'a str,
    project: &'a str,
    created_date: String,
    updated_date: String,
    users: PromptUsers,
    labels: &'a [String],
    components: &'a [String],
    comments: Vec<PromptComment<'a>>,
    changelog: Vec<PromptChange<'a>>,
    has_system_comment: bool,
}

#[derive(Serialize)]
struct PromptUsers {
    assignee: String,
    reporter: Option<String>,
    creator: Option<String>,
}

#[derive(Serialize)]
struct PromptComment<'a> {
    id: &'a str,
    author: String,
    created: String,
    updated: String,
    body: &'a str,
    is_system_comment: bool,
}

#[derive(Serialize)]
struct PromptChange<'a> {
    date: String,
    author: String,
    field: &'a str,
    from_value: Option<&'a str>,
    to_value: Option<&'a str>,
}

impl<'a> From<&'a Ticket> for PromptView<'a> {
    fn from(ticket: &'a Ticket) -> Self {
        Self {
            key: &ticket.key,
            summary: &ticket.summary,
            description: &ticket.description,
            status: &ticket.status,
            issue_type: &ticket.issue_type,
            project: &ticket.project_key,
            created_date: ticket.created.to_rfc3339(),
            updated_date: ticket.updated.to_rfc3339(),
            users: PromptUsers {
                assignee: ticket
                    .assignee
                    .as_ref()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| "Unassigned".to_string()),
                reporter: ticket.reporter.as_ref().map(|u| u.to_string()),
                creator: ticket.creator.as_ref().map(|u| u.to_string()),
            },
            labels: &ticket.labels,
            components: &ticket.components,
            comments: ticket
                .comments
                .iter()
                .map(|c| PromptComment {
                    id: &c.id,
                    author: c.author.to_string(),
                    created: c.created.to_rfc3339(),
                    updated: c.updated.to_rfc3339(),
                    body: &c.body,
                    is_system_comment: c.is_system_comment,
                })
                .collect(),
            changelog: ticket
                .changelog
                .iter()
                .map(|c| PromptChange {
                    date: c.timestamp.to_rfc3339(),
                    author: c.author.to_string(),
                    field: &c.field,
                    from_value: c.from_value.as_deref(),
                    to_value: c.to_value.as_deref(),
                })
                .collect(),
            has_system_comment: ticket.has_system_comment(),
        }
    }
}
