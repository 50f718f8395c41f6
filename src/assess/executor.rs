use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::comment::ensure_marker;
use crate::api::tracker::{IssueTracker, TrackerError};
use crate::models::action::{ActionKind, ActionRecommendation, ActionStatus};
use crate::models::result::ClassificationResult;

/// Per-run counters. Nothing here survives the process.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub processed: usize,
    pub actioned: usize,
    pub quiescent: usize,
    pub non_quiescent: usize,
    pub assessment_failures: usize,
    pub comments_added: usize,
    pub skipped: usize,
    pub prefiltered: usize,
    pub errors: usize,
}

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub actions: Vec<ActionRecommendation>,
    pub success: bool,
    pub message: String,
}

impl ExecutionOutcome {
    pub fn status(&self) -> Option<ActionStatus> {
        self.actions.first().map(|a| a.status)
    }
}

/// Turns a classification into at most one tracker side effect.
///
/// The executor does not know whether the tracker is live or a dry-run
/// stand-in; in dry-run mode it only tags completed actions.
pub struct ActionExecutor<'a> {
    tracker: &'a dyn IssueTracker,
    lookback_days: i64,
    stats: RunStats,
}

impl<'a> ActionExecutor<'a> {
    pub fn new(tracker: &'a dyn IssueTracker, lookback_days: i64) -> Self {
        Self {
            tracker,
            lookback_days,
            stats: RunStats::default(),
        }
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn note_assessment_failure(&mut self) {
        self.stats.assessment_failures += 1;
    }

    /// A failure outside any single ticket, such as a search that gave up.
    pub fn note_error(&mut self) {
        self.stats.errors += 1;
    }

    /// A ticket that could not be processed at all.
    pub fn note_ticket_error(&mut self) {
        self.stats.processed += 1;
        self.stats.errors += 1;
    }

    pub fn note_prefiltered(&mut self, count: usize) {
        self.stats.prefiltered = count;
    }

    /// True when a marker-bearing comment was posted within the lookback window.
    pub async fn has_recent_system_comment(
        &self,
        key: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, TrackerError> {
        let cutoff = now - Duration::days(self.lookback_days);
        let comments = self.tracker.list_comments(key).await?;
        Ok(comments
            .iter()
            .any(|c| c.is_system_comment && c.created >= cutoff))
    }

    pub async fn execute(
        &mut self,
        key: &str,
        result: &ClassificationResult,
        dry_run: bool,
    ) -> ExecutionOutcome {
        self.execute_at(key, result, dry_run, Utc::now()).await
    }

    pub async fn execute_at(
        &mut self,
        key: &str,
        result: &ClassificationResult,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> ExecutionOutcome {
        if result.needs_action() {
            self.stats.quiescent += 1;
        } else {
            self.stats.non_quiescent += 1;
        }

        let mut action = ActionRecommendation::from_result(key, result);
        let message = self.run_action(&mut action, dry_run, now).await;
        let success = action.status != ActionStatus::Failed;

        self.stats.processed += 1;
        match action.status {
            ActionStatus::Completed => self.stats.actioned += 1,
            ActionStatus::Failed => self.stats.errors += 1,
            _ => self.stats.skipped += 1,
        }

        ExecutionOutcome {
            actions: vec![action],
            success,
            message,
        }
    }

    async fn run_action(
        &mut self,
        action: &mut ActionRecommendation,
        dry_run: bool,
        now: DateTime<Utc>,
    ) -> String {
        let key = action.ticket_key.clone();

        if let ActionKind::NoAction { reason } = &action.kind {
            let reason = reason.clone();
            action.mark_skipped(reason.clone());
            return format!("{}: {}", key, reason);
        }

        match self.has_recent_system_comment(&key, now).await {
            Ok(true) => {
                let reason = format!(
                    "a system comment was already posted in the last {} days",
                    self.lookback_days
                );
                info!(ticket = %key, "skipping, {}", reason);
                action.mark_skipped(reason.clone());
                return format!("{}: {}", key, reason);
            }
            Ok(false) => {}
            Err(e) => {
                // No post without a completed guard check.
                let message = format!("could not check existing comments: {}", e);
                warn!(ticket = %key, error = %e, "idempotency check failed");
                action.mark_failed(message.clone());
                return format!("{}: {}", key, message);
            }
        }

        match self.perform(action).await {
            Ok(()) => {
                if dry_run {
                    action.detail("dry_run", true);
                }
                action.mark_completed();
                debug!(ticket = %key, action = action.kind.label(), dry_run, "action completed");
                action.description.clone()
            }
            Err(e) => {
                error!(ticket = %key, action = action.kind.label(), error = %e, "action failed");
                action.mark_failed(e.to_string());
                format!("{}: {}", action.description, e)
            }
        }
    }

    async fn perform(&mut self, action: &mut ActionRecommendation) -> Result<(), TrackerError> {
        let key = action.ticket_key.clone();
        match action.kind.clone() {
            ActionKind::Comment { body } => {
                let comment = self.tracker.add_comment(&key, &ensure_marker(&body)).await?;
                self.stats.comments_added += 1;
                action.detail("comment_id", comment.id);
            }
            ActionKind::StatusTransition { target_status } => {
                let transitions = self.tracker.get_transitions(&key).await?;
                let transition = transitions
                    .iter()
                    .find(|t| t.leads_to(&target_status))
                    .ok_or_else(|| {
                        TrackerError::Operation(format!(
                            "no transition to '{}' available for {}",
                            target_status, key
                        ))
                    })?;
                self.tracker.transition_issue(&key, &transition.id).await?;
                action.detail("transition_id", transition.id.clone());
            }
            ActionKind::Assignment { assignee } => {
                self.tracker.assign_issue(&key, Some(&assignee)).await?;
            }
            ActionKind::NoAction { .. } => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::dry_run::{DryRunTracker, DRY_RUN_COMMENT_ID};
    use crate::api::tracker::fake::FakeTracker;
    use crate::models::result::QuiescentAssessment;
    use crate::models::ticket::{Comment, User};
    use serde_json::json;

    fn quiescent(comment: &str) -> ClassificationResult {
        ClassificationResult::Quiescent(QuiescentAssessment {
            is_quiescent: true,
            justification: "No updates in 40 days".into(),
            planned_comment: comment.into(),
            ..QuiescentAssessment::default()
        })
    }

    fn system_comment(days_ago: i64) -> Comment {
        let created = Utc::now() - Duration::days(days_ago);
        Comment {
            id: "10".into(),
            body: "[Quiescent Ticket System] ping".into(),
            author: User::named("bot"),
            created,
            updated: created,
            is_system_comment: true,
        }
    }

    #[tokio::test]
    async fn test_posts_marked_comment() {
        let tracker = FakeTracker::default();
        let mut executor = ActionExecutor::new(&tracker, 7);

        let outcome = executor.execute("DEMO-1", &quiescent("Please update"), false).await;
        assert!(outcome.success);
        assert_eq!(outcome.status(), Some(ActionStatus::Completed));
        assert_eq!(outcome.actions[0].details["comment_id"], json!("c-DEMO-1"));

        let posted = tracker.posted();
        assert_eq!(posted.len(), 1);
        assert!(posted[0].1.starts_with("[AUTOMATED QUIESCENCE ASSESSMENT]\n\nPlease update"));

        let stats = executor.stats();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.actioned, 1);
        assert_eq!(stats.quiescent, 1);
        assert_eq!(stats.comments_added, 1);
    }

    #[tokio::test]
    async fn test_recent_system_comment_skips() {
        let tracker = FakeTracker::default();
        tracker.seed_comment("DEMO-1", system_comment(2));
        let mut executor = ActionExecutor::new(&tracker, 7);

        let outcome = executor.execute("DEMO-1", &quiescent("Please update"), false).await;
        assert!(outcome.success);
        assert_eq!(outcome.status(), Some(ActionStatus::Skipped));
        assert!(outcome.actions[0].details.contains_key("skip_reason"));
        assert!(tracker.posted().is_empty());
        assert_eq!(executor.stats().skipped, 1);
        assert_eq!(executor.stats().actioned, 0);
    }

    #[tokio::test]
    async fn test_old_system_comment_does_not_block() {
        let tracker = FakeTracker::default();
        tracker.seed_comment("DEMO-1", system_comment(30));
        let mut executor = ActionExecutor::new(&tracker, 7);

        let outcome = executor.execute("DEMO-1", &quiescent("Please update"), false).await;
        assert_eq!(outcome.status(), Some(ActionStatus::Completed));
        assert_eq!(tracker.posted().len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_completes_without_posting() {
        let tracker = DryRunTracker::new(FakeTracker::default());
        let mut executor = ActionExecutor::new(&tracker, 7);

        let outcome = executor.execute("DEMO-1", &quiescent("Please update"), true).await;
        let action = &outcome.actions[0];
        assert_eq!(action.status, ActionStatus::Completed);
        assert_eq!(action.details["dry_run"], json!(true));
        assert_eq!(action.details["comment_id"], json!(DRY_RUN_COMMENT_ID));
        assert_eq!(executor.stats().comments_added, 1);
    }

    #[tokio::test]
    async fn test_failed_post_is_recorded() {
        let tracker = FakeTracker {
            fail_comments_for: Some("DEMO-1".into()),
            ..FakeTracker::default()
        };
        let mut executor = ActionExecutor::new(&tracker, 7);

        let outcome = executor.execute("DEMO-1", &quiescent("Please update"), false).await;
        assert!(!outcome.success);
        let action = &outcome.actions[0];
        assert_eq!(action.status, ActionStatus::Failed);
        assert!(action.error_message.as_deref().unwrap().contains("permission denied"));
        assert_eq!(executor.stats().errors, 1);
        assert_eq!(executor.stats().comments_added, 0);

        // The next ticket is unaffected.
        let outcome = executor.execute("DEMO-2", &quiescent("Please update"), false).await;
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_not_quiescent_is_skipped() {
        let tracker = FakeTracker::default();
        let mut executor = ActionExecutor::new(&tracker, 7);
        let result = ClassificationResult::Quiescent(QuiescentAssessment::default());

        let outcome = executor.execute("DEMO-1", &result, false).await;
        assert!(outcome.success);
        assert_eq!(outcome.status(), Some(ActionStatus::Skipped));
        assert_eq!(executor.stats().non_quiescent, 1);
        assert!(tracker.posted().is_empty());
    }

    #[tokio::test]
    async fn test_transition_uses_matching_target() {
        let tracker = FakeTracker::default();
        let mut executor = ActionExecutor::new(&tracker, 7);
        let mut action = ActionRecommendation::transition("DEMO-1", "closed");
        executor.perform(&mut action).await.unwrap();
        assert_eq!(action.details["transition_id"], json!("31"));

        let mut action = ActionRecommendation::transition("DEMO-1", "In Review");
        let err = executor.perform(&mut action).await.unwrap_err();
        assert!(matches!(err, TrackerError::Operation(_)));
    }
}
