use chrono::{DateTime, Utc};

use super::comment::{default_deadline, CommentComposer, CommentDraft};
use crate::config::settings::AssessmentConfig;
use crate::models::result::{RuleBasedResult, RuleOutcome};
use crate::models::ticket::{Ticket, User};

/// Passing rules needed before a ticket counts as quiescent.
const QUIESCENCE_THRESHOLD: usize = 2;

pub const QUESTION_INDICATORS: [&str; 10] = [
    "?",
    "question",
    "can you",
    "could you",
    "would you",
    "will you",
    "please clarify",
    "please explain",
    "what is",
    "how to",
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleThresholds {
    pub stale_days: i64,
    pub activity_days: i64,
    pub aged_days: i64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            stale_days: 14,
            activity_days: 7,
            aged_days: 90,
        }
    }
}

impl From<&AssessmentConfig> for RuleThresholds {
    fn from(config: &AssessmentConfig) -> Self {
        Self {
            stale_days: config.stale_threshold_days,
            activity_days: config.activity_threshold_days,
            aged_days: config.aged_threshold_days,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RuleCheck {
    Stale { threshold_days: i64 },
    NoRecentActivity { threshold_days: i64 },
    UnresolvedQuestion { indicators: Vec<String> },
    UnassignedWhileOpen,
    AgedAndOpen { threshold_days: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuiescenceRule {
    pub name: String,
    pub description: String,
    /// Carried for reporting; the verdict counts passing rules instead.
    pub weight: f64,
    pub check: RuleCheck,
}

impl QuiescenceRule {
    pub fn new(name: &str, description: &str, check: RuleCheck) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            weight: 1.0,
            check,
        }
    }

    pub fn evaluate(&self, ticket: &Ticket, now: DateTime<Utc>) -> (bool, String) {
        match &self.check {
            RuleCheck::Stale { threshold_days } => {
                let days = ticket.days_since_update(now);
                if days >= *threshold_days {
                    (
                        true,
                        format!(
                            "Ticket has not been updated in {} days (threshold: {})",
                            days, threshold_days
                        ),
                    )
                } else {
                    (
                        false,
                        format!(
                            "Ticket was updated {} days ago, which is within the {} day threshold",
                            days, threshold_days
                        ),
                    )
                }
            }
            RuleCheck::NoRecentActivity { threshold_days } => {
                if ticket.has_recent_activity(*threshold_days, now) {
                    (
                        false,
                        format!("Ticket has had activity within the last {} days", threshold_days),
                    )
                } else {
                    (
                        true,
                        format!("No activity on this ticket in the last {} days", threshold_days),
                    )
                }
            }
            RuleCheck::UnresolvedQuestion { indicators } => {
                let Some(last) = ticket.last_comment() else {
                    return (false, "No comments to check for questions".to_string());
                };
                let body = last.body.to_lowercase();
                if indicators.iter().any(|i| body.contains(i.as_str())) {
                    (
                        true,
                        format!(
                            "Last comment from {} appears to contain unanswered questions",
                            last.author
                        ),
                    )
                } else {
                    (
                        false,
                        "No unanswered questions detected in the latest comments".to_string(),
                    )
                }
            }
            RuleCheck::UnassignedWhileOpen => match &ticket.assignee {
                _ if ticket.is_closed() => (
                    false,
                    "Ticket is closed, so assignee status is not relevant".to_string(),
                ),
                None => (true, "Ticket is open but has no assignee".to_string()),
                Some(assignee) => (false, format!("Ticket is assigned to {}", assignee)),
            },
            RuleCheck::AgedAndOpen { threshold_days } => {
                let age = ticket.days_since_creation(now);
                if age >= *threshold_days && !ticket.is_closed() {
                    (true, format!("Ticket is {} days old and still open", age))
                } else {
                    (
                        false,
                        format!("Ticket age ({} days) doesn't indicate quiescence", age),
                    )
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub is_quiescent: bool,
    pub justification: String,
    pub details: Vec<RuleOutcome>,
}

impl Evaluation {
    pub fn passed(&self, rule: &str) -> bool {
        self.details.iter().any(|d| d.rule == rule && d.passed)
    }
}

/// Deterministic quiescence check that needs no external service.
#[derive(Debug, Clone)]
pub struct QuiescenceEvaluator {
    rules: Vec<QuiescenceRule>,
    composer: CommentComposer,
}

impl Default for QuiescenceEvaluator {
    fn default() -> Self {
        Self::new(&RuleThresholds::default())
    }
}

impl QuiescenceEvaluator {
    pub fn new(thresholds: &RuleThresholds) -> Self {
        Self::with_rules(default_rules(thresholds))
    }

    pub fn with_rules(rules: Vec<QuiescenceRule>) -> Self {
        Self {
            rules,
            composer: CommentComposer::new(),
        }
    }

    pub fn rules(&self) -> &[QuiescenceRule] {
        &self.rules
    }

    pub fn evaluate(&self, ticket: &Ticket, now: DateTime<Utc>) -> Evaluation {
        if ticket.is_closed() {
            return Evaluation {
                is_quiescent: false,
                justification: "Ticket is closed".to_string(),
                details: Vec::new(),
            };
        }

        let details: Vec<RuleOutcome> = self
            .rules
            .iter()
            .map(|rule| {
                let (passed, reason) = rule.evaluate(ticket, now);
                RuleOutcome {
                    rule: rule.name.clone(),
                    description: rule.description.clone(),
                    passed,
                    reason,
                }
            })
            .collect();

        let passing: Vec<&str> = details
            .iter()
            .filter(|d| d.passed)
            .map(|d| d.reason.as_str())
            .collect();

        let is_quiescent = passing.len() >= QUIESCENCE_THRESHOLD;
        let justification = match passing.as_slice() {
            [] => "Ticket shows no signs of being quiescent".to_string(),
            [only] if !is_quiescent => format!(
                "Ticket has one quiescence indicator ({}), but this alone is insufficient",
                only
            ),
            reasons => format!("Ticket appears quiescent because: {}", reasons.join("; ")),
        };

        Evaluation {
            is_quiescent,
            justification,
            details,
        }
    }

    /// Full classification including the comment to post.
    pub fn classify(&self, ticket: &Ticket, now: DateTime<Utc>) -> RuleBasedResult {
        let evaluation = self.evaluate(ticket, now);

        let passed = evaluation.details.iter().filter(|d| d.passed).count();
        let staleness_score = if evaluation.details.is_empty() {
            0.0
        } else {
            passed as f64 / evaluation.details.len() as f64 * 10.0
        };

        let responsible: Option<&User> = ticket.assignee.as_ref().or(ticket.reporter.as_ref());
        let responsible_party = responsible
            .map(|u| u.display_name.clone())
            .unwrap_or_else(|| "Unknown".to_string());

        let suggested_action = suggest_action(&evaluation, ticket);
        let deadline = default_deadline(now);

        let planned_comment = if evaluation.is_quiescent {
            self.composer.compose(
                ticket,
                &CommentDraft {
                    responsible,
                    justification: &evaluation.justification,
                    suggested_action: &suggested_action,
                    deadline,
                },
                now,
            )
        } else {
            String::new()
        };

        RuleBasedResult {
            is_quiescent: evaluation.is_quiescent,
            justification: evaluation.justification,
            rule_outcomes: evaluation.details,
            staleness_score,
            inactivity_days: (now - ticket.last_activity()).num_days().max(0),
            responsible_party,
            suggested_action,
            suggested_deadline: deadline.format("%Y-%m-%d").to_string(),
            planned_comment,
        }
    }
}

fn suggest_action(evaluation: &Evaluation, ticket: &Ticket) -> String {
    if !evaluation.is_quiescent {
        "No action needed".to_string()
    } else if !ticket.is_assigned() {
        "Assign an owner and post a status update".to_string()
    } else if evaluation.passed("unresolved_questions") {
        "Answer the open question in the latest comment".to_string()
    } else {
        "Post a status update, or close the ticket if it is no longer relevant".to_string()
    }
}

pub fn default_rules(thresholds: &RuleThresholds) -> Vec<QuiescenceRule> {
    vec![
        QuiescenceRule::new(
            "stale_ticket",
            "Ticket hasn't been updated recently",
            RuleCheck::Stale {
                threshold_days: thresholds.stale_days,
            },
        ),
        QuiescenceRule::new(
            "no_recent_activity",
            "No recent comments or changes",
            RuleCheck::NoRecentActivity {
                threshold_days: thresholds.activity_days,
            },
        ),
        QuiescenceRule::new(
            "unresolved_questions",
            "Last comment has unanswered questions",
            RuleCheck::UnresolvedQuestion {
                indicators: QUESTION_INDICATORS.iter().map(|s| s.to_string()).collect(),
            },
        ),
        QuiescenceRule::new(
            "unassigned_ticket",
            "Ticket is open but not assigned to anyone",
            RuleCheck::UnassignedWhileOpen,
        ),
        QuiescenceRule::new(
            "aged_ticket",
            "Ticket is very old and still open",
            RuleCheck::AgedAndOpen {
                threshold_days: thresholds.aged_days,
            },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ticket::fixtures::{issue_json, payload};
    use chrono::Duration;
    use serde_json::{json, Value};

    fn build(raw: Value) -> Ticket {
        Ticket::from_payload(&payload(raw)).unwrap()
    }

    fn demo_one(now: DateTime<Utc>) -> Ticket {
        let mut raw = issue_json("DEMO-1", now, 100, 20, "Open");
        raw["fields"]["comment"]["comments"] = json!([{
            "id": "1",
            "body": "Thanks, could you confirm?",
            "author": { "displayName": "Rita Reporter", "accountId": "acc-rita" },
            "created": (now - Duration::days(20)).to_rfc3339()
        }]);
        build(raw)
    }

    #[test]
    fn test_demo_ticket_is_quiescent_with_all_reasons() {
        let now = Utc::now();
        let evaluation = QuiescenceEvaluator::default().evaluate(&demo_one(now), now);

        assert!(evaluation.is_quiescent);
        for reason in [
            "Ticket has not been updated in 20 days (threshold: 14)",
            "No activity on this ticket in the last 7 days",
            "Last comment from Rita Reporter appears to contain unanswered questions",
            "Ticket is open but has no assignee",
        ] {
            assert!(
                evaluation.justification.contains(reason),
                "missing '{}' in '{}'",
                reason,
                evaluation.justification
            );
        }
        assert!(evaluation.justification.starts_with("Ticket appears quiescent because: "));
    }

    #[test]
    fn test_active_assigned_young_ticket_is_not_quiescent() {
        let now = Utc::now();
        for (created, updated) in [(1, 0), (30, 3), (89, 6)] {
            let mut raw = issue_json("DEMO-2", now, created, updated, "In Progress");
            raw["fields"]["assignee"] = json!({ "displayName": "Ann" });
            raw["fields"]["comment"]["comments"] = json!([{
                "body": "any update?",
                "author": { "displayName": "Bo" },
                "created": (now - Duration::days(updated)).to_rfc3339()
            }]);
            let evaluation = QuiescenceEvaluator::default().evaluate(&build(raw), now);
            assert!(!evaluation.is_quiescent, "created {} updated {}", created, updated);
        }
    }

    #[test]
    fn test_single_indicator_is_insufficient() {
        let now = Utc::now();
        let raw = issue_json("DEMO-3", now, 5, 1, "Open");
        let evaluation = QuiescenceEvaluator::default().evaluate(&build(raw), now);
        assert!(!evaluation.is_quiescent);
        assert_eq!(
            evaluation.justification,
            "Ticket has one quiescence indicator (Ticket is open but has no assignee), but this alone is insufficient"
        );
    }

    #[test]
    fn test_no_indicators() {
        let now = Utc::now();
        let mut raw = issue_json("DEMO-4", now, 5, 1, "Open");
        raw["fields"]["assignee"] = json!({ "displayName": "Ann" });
        let evaluation = QuiescenceEvaluator::default().evaluate(&build(raw), now);
        assert_eq!(evaluation.justification, "Ticket shows no signs of being quiescent");
        assert_eq!(evaluation.details.len(), 5);
    }

    #[test]
    fn test_closed_ticket_short_circuits() {
        let now = Utc::now();
        let raw = issue_json("DEMO-5", now, 400, 300, "Resolved");
        let evaluation = QuiescenceEvaluator::default().evaluate(&build(raw), now);
        assert!(!evaluation.is_quiescent);
        assert_eq!(evaluation.justification, "Ticket is closed");
        assert!(evaluation.details.is_empty());
    }

    #[test]
    fn test_only_latest_comment_is_checked_for_questions() {
        let now = Utc::now();
        let mut raw = issue_json("DEMO-6", now, 30, 2, "Open");
        raw["fields"]["comment"]["comments"] = json!([
            { "body": "Done, deployed.", "author": { "displayName": "Ann" },
              "created": (now - Duration::days(2)).to_rfc3339() },
            { "body": "Could you check?", "author": { "displayName": "Bo" },
              "created": (now - Duration::days(5)).to_rfc3339() }
        ]);
        let rule = &default_rules(&RuleThresholds::default())[2];
        let (passed, _) = rule.evaluate(&build(raw), now);
        assert!(!passed);
    }

    #[test]
    fn test_weight_does_not_change_verdict() {
        let now = Utc::now();
        let mut rules = default_rules(&RuleThresholds::default());
        for rule in &mut rules {
            rule.weight = 0.0;
        }
        let evaluation = QuiescenceEvaluator::with_rules(rules).evaluate(&demo_one(now), now);
        assert!(evaluation.is_quiescent);
    }

    #[test]
    fn test_classify_builds_comment_and_scores() {
        let now = Utc::now();
        let result = QuiescenceEvaluator::default().classify(&demo_one(now), now);
        assert!(result.is_quiescent);
        assert_eq!(result.staleness_score, 10.0);
        assert_eq!(result.inactivity_days, 20);
        assert_eq!(result.responsible_party, "Rita Reporter");
        assert_eq!(result.suggested_action, "Assign an owner and post a status update");
        assert!(result.planned_comment.starts_with("[AUTOMATED QUIESCENCE ASSESSMENT]"));
        assert!(result.planned_comment.contains("Hi [~accountId:acc-rita],"));
    }

    #[test]
    fn test_classify_without_quiescence_has_no_comment() {
        let now = Utc::now();
        let raw = issue_json("DEMO-7", now, 5, 1, "Open");
        let result = QuiescenceEvaluator::default().classify(&build(raw), now);
        assert!(!result.is_quiescent);
        assert!(result.planned_comment.is_empty());
        assert_eq!(result.suggested_action, "No action needed");
    }
}
