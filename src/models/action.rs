use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

use super::result::ClassificationResult;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    Comment { body: String },
    StatusTransition { target_status: String },
    Assignment { assignee: String },
    NoAction { reason: String },
}

impl ActionKind {
    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::Comment { .. } => "comment",
            ActionKind::StatusTransition { .. } => "status_transition",
            ActionKind::Assignment { .. } => "assignment",
            ActionKind::NoAction { .. } => "no_action",
        }
    }

    pub fn is_mutating(&self) -> bool {
        !matches!(self, ActionKind::NoAction { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Completed,
    Failed,
    Skipped,
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionStatus::Pending => "pending",
            ActionStatus::Completed => "completed",
            ActionStatus::Failed => "failed",
            ActionStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// A single action proposed for a ticket.
///
/// Starts `Pending` and moves exactly once to `Completed`, `Failed` or
/// `Skipped`. Later transitions are ignored.
#[derive(Debug, Clone, Serialize)]
pub struct ActionRecommendation {
    pub ticket_key: String,
    pub kind: ActionKind,
    pub description: String,
    pub details: Map<String, Value>,
    pub status: ActionStatus,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl ActionRecommendation {
    fn new(ticket_key: &str, kind: ActionKind, description: String) -> Self {
        Self {
            ticket_key: ticket_key.to_string(),
            kind,
            description,
            details: Map::new(),
            status: ActionStatus::Pending,
            created_at: Utc::now(),
            executed_at: None,
            error_message: None,
        }
    }

    pub fn comment(ticket_key: &str, body: impl Into<String>) -> Self {
        Self::new(
            ticket_key,
            ActionKind::Comment { body: body.into() },
            format!("Add comment to {}", ticket_key),
        )
    }

    pub fn transition(ticket_key: &str, target_status: impl Into<String>) -> Self {
        let target_status = target_status.into();
        let description = format!("Transition {} to '{}'", ticket_key, target_status);
        Self::new(ticket_key, ActionKind::StatusTransition { target_status }, description)
    }

    pub fn assignment(ticket_key: &str, assignee: impl Into<String>) -> Self {
        let assignee = assignee.into();
        let description = format!("Assign {} to {}", ticket_key, assignee);
        Self::new(ticket_key, ActionKind::Assignment { assignee }, description)
    }

    pub fn no_action(ticket_key: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let description = format!("No action for {}: {}", ticket_key, reason);
        Self::new(ticket_key, ActionKind::NoAction { reason }, description)
    }

    /// Map a classification to at most one action.
    pub fn from_result(ticket_key: &str, result: &ClassificationResult) -> Self {
        let mut action = if !result.needs_action() {
            Self::no_action(ticket_key, "ticket does not need attention")
        } else if let Some(comment) = result.postable_comment() {
            Self::comment(ticket_key, comment)
        } else {
            Self::no_action(ticket_key, "classification produced no comment")
        };
        action.detail("classification", result.kind().as_str());
        action.detail("responsible_party", result.responsible_party());
        action
    }

    pub fn detail(&mut self, key: &str, value: impl Into<Value>) {
        self.details.insert(key.to_string(), value.into());
    }

    pub fn is_pending(&self) -> bool {
        self.status == ActionStatus::Pending
    }

    fn finish(&mut self, status: ActionStatus, message: Option<String>) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.status = status;
        self.executed_at = Some(Utc::now());
        self.error_message = message;
        true
    }

    pub fn mark_completed(&mut self) -> bool {
        self.finish(ActionStatus::Completed, None)
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) -> bool {
        self.finish(ActionStatus::Failed, Some(message.into()))
    }

    pub fn mark_skipped(&mut self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        self.detail("skip_reason", reason.clone());
        self.finish(ActionStatus::Skipped, Some(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::result::QuiescentAssessment;

    #[test]
    fn test_status_transitions_are_one_shot() {
        let mut action = ActionRecommendation::comment("DEMO-1", "hello");
        assert!(action.is_pending());
        assert!(action.mark_failed("boom"));
        assert!(!action.mark_completed());
        assert_eq!(action.status, ActionStatus::Failed);
        assert_eq!(action.error_message.as_deref(), Some("boom"));
        assert!(action.executed_at.is_some());
    }

    #[test]
    fn test_from_result_builds_comment_when_action_needed() {
        let result = ClassificationResult::Quiescent(QuiescentAssessment {
            is_quiescent: true,
            planned_comment: "Please update".into(),
            ..QuiescentAssessment::default()
        });
        let action = ActionRecommendation::from_result("DEMO-1", &result);
        assert_eq!(action.kind, ActionKind::Comment { body: "Please update".into() });
        assert_eq!(action.details["classification"], "quiescent");
    }

    #[test]
    fn test_from_result_without_action_is_no_action() {
        let result = ClassificationResult::Quiescent(QuiescentAssessment::default());
        let action = ActionRecommendation::from_result("DEMO-2", &result);
        assert!(!action.kind.is_mutating());
        assert_eq!(action.kind.label(), "no_action");
    }

    #[test]
    fn test_blank_comment_does_not_produce_comment_action() {
        let result = ClassificationResult::Quiescent(QuiescentAssessment {
            is_quiescent: true,
            planned_comment: "   ".into(),
            ..QuiescentAssessment::default()
        });
        let action = ActionRecommendation::from_result("DEMO-3", &result);
        assert!(matches!(action.kind, ActionKind::NoAction { .. }));
    }

    #[test]
    fn test_placeholder_comments_are_not_posted() {
        let defaulted = ClassificationResult::Quiescent(QuiescentAssessment {
            is_quiescent: true,
            ..QuiescentAssessment::default()
        });
        let failed = ClassificationResult::Quiescent(QuiescentAssessment {
            is_quiescent: true,
            ..QuiescentAssessment::failed()
        });
        for result in [defaulted, failed] {
            let action = ActionRecommendation::from_result("DEMO-5", &result);
            assert_eq!(action.kind.label(), "no_action");
        }
    }

    #[test]
    fn test_factories_describe_action() {
        assert_eq!(
            ActionRecommendation::transition("DEMO-4", "Blocked").description,
            "Transition DEMO-4 to 'Blocked'"
        );
        assert_eq!(
            ActionRecommendation::assignment("DEMO-4", "ann").kind,
            ActionKind::Assignment { assignee: "ann".into() }
        );
    }
}
