use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::models::ticket::{is_system_body, Ticket, User, SYSTEM_MARKERS};

/// Tickets untouched this long get a closing warning in the comment.
const CLOSING_WARNING_DAYS: i64 = 90;
const DEFAULT_DEADLINE_DAYS: i64 = 14;

/// Prefix `body` with the canonical marker unless it already carries one.
pub fn ensure_marker(body: &str) -> String {
    if is_system_body(body) {
        body.to_string()
    } else {
        format!("{}\n\n{}", SYSTEM_MARKERS[0], body)
    }
}

pub fn default_deadline(now: DateTime<Utc>) -> NaiveDate {
    (now + Duration::days(DEFAULT_DEADLINE_DAYS)).date_naive()
}

/// Jira wiki mention: account id on Cloud, username on Server, else plain name.
pub fn mention(user: &User) -> String {
    if let Some(account_id) = &user.account_id {
        format!("[~accountId:{}]", account_id)
    } else if let Some(username) = &user.username {
        format!("[~{}]", username)
    } else {
        user.display_name.clone()
    }
}

pub struct CommentDraft<'a> {
    pub responsible: Option<&'a User>,
    pub justification: &'a str,
    pub suggested_action: &'a str,
    pub deadline: NaiveDate,
}

/// Builds the comment posted on tickets judged by the local rules.
#[derive(Debug, Clone, Default)]
pub struct CommentComposer;

impl CommentComposer {
    pub fn new() -> Self {
        Self
    }

    pub fn compose(&self, ticket: &Ticket, draft: &CommentDraft<'_>, now: DateTime<Utc>) -> String {
        let mut lines: Vec<String> = vec![SYSTEM_MARKERS[0].to_string(), String::new()];

        let mentions = self.mentions(ticket, draft.responsible);
        if !mentions.is_empty() {
            lines.push(format!("Hi {},", mentions.join(", ")));
            lines.push(String::new());
        }

        lines.push(draft.justification.to_string());
        lines.push(String::new());
        lines.push(format!("**Suggested Action**: {}", draft.suggested_action));
        lines.push(format!("**Suggested Deadline**: {}", draft.deadline.format("%Y-%m-%d")));

        if ticket.days_since_update(now) >= CLOSING_WARNING_DAYS {
            lines.push(String::new());
            lines.push(format!(
                "**Note**: If no action is taken by {}, this ticket may be closed.",
                draft.deadline.format("%Y-%m-%d")
            ));
        }

        lines.join("\n")
    }

    fn mentions(&self, ticket: &Ticket, responsible: Option<&User>) -> Vec<String> {
        let mut people: Vec<&User> = Vec::new();
        for user in [responsible, ticket.assignee.as_ref(), ticket.reporter.as_ref()]
            .into_iter()
            .flatten()
        {
            if !people.contains(&user) {
                people.push(user);
            }
        }
        people.into_iter().map(mention).collect()
    }
}
