use chrono::Utc;
use colored::*;
use tracing::{error, info, warn};

use super::executor::{ActionExecutor, ExecutionOutcome, RunStats};
use super::filters::quiescence_prefilter;
use super::iterator::{CandidateQuery, ProjectTicketIterator};
use super::llm::{ClassifyOutcome, LlmClassifier};
use super::prompts::PromptError;
use super::rules::QuiescenceEvaluator;
use crate::api::tracker::IssueTracker;
use crate::config::settings::AssessmentConfig;
use crate::models::action::ActionStatus;
use crate::models::result::ClassificationResult;
use crate::models::ticket::Ticket;

/// The classification stage used for a run.
pub enum Classifier<'a> {
    Rules(QuiescenceEvaluator),
    Llm(LlmClassifier<'a>),
}

impl Classifier<'_> {
    pub fn describe(&self) -> String {
        match self {
            Classifier::Rules(_) => "rule-based".to_string(),
            Classifier::Llm(llm) => format!("{} ({})", llm.model(), llm.template()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub project_key: String,
    pub max_tickets: usize,
    pub batch_size: usize,
    pub dry_run: bool,
    pub prefilter: bool,
    pub excluded_statuses: Vec<String>,
    pub min_age_days: i64,
    pub min_inactive_days: i64,
    pub lookback_days: i64,
}

impl RunOptions {
    pub fn from_config(project_key: impl Into<String>, config: &AssessmentConfig) -> Self {
        Self {
            project_key: project_key.into(),
            max_tickets: config.max_tickets,
            batch_size: config.batch_size,
            dry_run: config.dry_run,
            prefilter: true,
            excluded_statuses: config.excluded_statuses.clone(),
            min_age_days: config.min_age_days,
            min_inactive_days: config.min_inactive_days,
            lookback_days: config.lookback_days,
        }
    }
}

/// Drives one assessment run: candidates, classification, actions.
///
/// Tickets are handled strictly one after another. Only template problems
/// stop a run; everything else is counted and the run moves on.
pub struct Runner<'a> {
    tracker: &'a dyn IssueTracker,
    classifier: Classifier<'a>,
    options: RunOptions,
}

impl<'a> Runner<'a> {
    pub fn new(tracker: &'a dyn IssueTracker, classifier: Classifier<'a>, options: RunOptions) -> Self {
        Self {
            tracker,
            classifier,
            options,
        }
    }

    pub async fn run(&self) -> Result<RunStats, PromptError> {
        if let Classifier::Llm(llm) = &self.classifier {
            llm.preflight()?;
        }

        let query = CandidateQuery::new(&self.options.project_key, self.options.excluded_statuses.clone());
        let mut iter = ProjectTicketIterator::new(self.tracker, query, self.options.batch_size)
            .with_max_results(self.options.max_tickets);
        if self.options.prefilter {
            iter = iter.with_filter(quiescence_prefilter(
                self.options.min_age_days,
                self.options.min_inactive_days,
                &self.options.excluded_statuses[..],
            ));
        }
        let mut executor = ActionExecutor::new(self.tracker, self.options.lookback_days);

        info!(jql = iter.jql(), classifier = %self.classifier.describe(), "starting run");
        self.print_header();

        loop {
            let key = match iter.next_key().await {
                Ok(Some(key)) => key,
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "candidate search failed, ending run");
                    println!("  {} {}", "✗".red().bold(), format!("Search failed: {}", e).red());
                    executor.note_error();
                    break;
                }
            };

            let ticket = match iter.payload(&key).await {
                Ok(payload) => Ticket::from_payload(&payload).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            let ticket = match ticket {
                Ok(ticket) => ticket,
                Err(e) => {
                    error!(ticket = %key, error = %e, "could not load ticket");
                    println!("  {} {}", key.bright_white().bold(), format!("error: {}", e).red());
                    executor.note_ticket_error();
                    continue;
                }
            };

            let result = match &self.classifier {
                Classifier::Rules(evaluator) => {
                    ClassificationResult::RuleBased(evaluator.classify(&ticket, Utc::now()))
                }
                Classifier::Llm(llm) => match llm.classify(&ticket).await? {
                    ClassifyOutcome::Assessed(result) => result,
                    ClassifyOutcome::Recovered { result, reason } => {
                        warn!(ticket = %key, reason = %reason, "assessment failed, using default result");
                        executor.note_assessment_failure();
                        result
                    }
                },
            };

            let outcome = executor.execute(&key, &result, self.options.dry_run).await;
            print_ticket_line(&ticket, &result, &outcome, self.options.dry_run);
        }

        executor.note_prefiltered(iter.filtered_count());
        let stats = executor.stats().clone();
        print_summary(&stats, self.options.dry_run);
        Ok(stats)
    }

    fn print_header(&self) {
        let mode = if self.options.dry_run {
            "DRY RUN".yellow().bold()
        } else {
            "PRODUCTION".red().bold()
        };
        println!(
            "{} {} [{}]",
            "Assessing".cyan().bold(),
            self.options.project_key.bright_white().bold(),
            mode
        );
        println!(
            "  {} {}",
            "classifier:".dimmed(),
            self.classifier.describe().bright_white()
        );
        println!(
            "  {} {}",
            "max tickets:".dimmed(),
            self.options.max_tickets.to_string().bright_white()
        );
        println!();
    }
}

fn print_ticket_line(
    ticket: &Ticket,
    result: &ClassificationResult,
    outcome: &ExecutionOutcome,
    dry_run: bool,
) {
    let verdict = if result.needs_action() {
        "needs attention".yellow()
    } else {
        "ok".green()
    };
    let action = match outcome.status() {
        Some(ActionStatus::Completed) if dry_run => "would comment".cyan(),
        Some(ActionStatus::Completed) => "commented".green().bold(),
        Some(ActionStatus::Failed) => "failed".red().bold(),
        Some(ActionStatus::Skipped) if result.needs_action() => "skipped".dimmed(),
        _ => "".normal(),
    };

    println!(
        "  {} [{}]  {}  {}",
        ticket.key.bright_white().bold(),
        ticket.status,
        verdict,
        action
    );
    if result.needs_action() {
        println!("      {}", result.summary().dimmed());
    }
    if !outcome.success {
        println!("      {}", outcome.message.red());
    }
}

fn print_summary(stats: &RunStats, dry_run: bool) {
    println!();
    println!("{}", "Summary".cyan().bold());
    let rows = [
        ("processed", stats.processed),
        ("needs attention", stats.quiescent),
        ("ok", stats.non_quiescent),
        ("actioned", stats.actioned),
        ("comments added", stats.comments_added),
        ("skipped", stats.skipped),
        ("pre-filtered", stats.prefiltered),
        ("assessment failures", stats.assessment_failures),
        ("errors", stats.errors),
    ];
    for (label, value) in rows {
        let value = value.to_string();
        let value = if label == "errors" && stats.errors > 0 {
            value.red().bold()
        } else {
            value.bright_white()
        };
        println!("  {:<22}{}", format!("{}:", label).dimmed(), value);
    }
    if dry_run {
        println!();
        println!("{}", "Dry run: nothing was changed in Jira.".yellow());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::dry_run::DryRunTracker;
    use crate::api::inference::fake::ScriptedInference;
    use crate::api::inference::InferenceError;
    use crate::api::tracker::fake::{FakeTracker, OrderedTracker};
    use crate::assess::llm::AnalyzerKind;
    use crate::assess::prompts::{FsTemplateStore, PromptRegistry};
    use crate::assess::rules::RuleThresholds;
    use crate::models::ticket::fixtures::{issue_json, payload};
    use crate::models::ticket::{Comment, IssuePayload, User};
    use chrono::Duration;
    use serde_json::json;

    fn demo_one() -> IssuePayload {
        let now = Utc::now();
        let mut raw = issue_json("DEMO-1", now, 100, 20, "Open");
        raw["fields"]["comment"]["comments"] = json!([{
            "id": "1",
            "body": "Thanks, could you confirm?",
            "author": { "displayName": "Rita Reporter", "accountId": "acc-rita" },
            "created": (now - Duration::days(20)).to_rfc3339()
        }]);
        payload(raw)
    }

    fn options(dry_run: bool) -> RunOptions {
        let mut options = RunOptions::from_config("DEMO", &AssessmentConfig::default());
        options.dry_run = dry_run;
        options
    }

    fn rules() -> Classifier<'static> {
        Classifier::Rules(QuiescenceEvaluator::new(&RuleThresholds::default()))
    }

    #[tokio::test]
    async fn test_demo_project_gets_one_comment() {
        let now = Utc::now();
        let tracker = FakeTracker::with_issues(vec![
            demo_one(),
            // Updated yesterday, so the pre-filter drops it.
            payload(issue_json("DEMO-2", now, 100, 1, "Open")),
        ]);

        let stats = Runner::new(&tracker, rules(), options(false)).run().await.unwrap();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.quiescent, 1);
        assert_eq!(stats.comments_added, 1);
        assert_eq!(stats.prefiltered, 1);
        assert_eq!(stats.errors, 0);

        let posted = tracker.posted();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].0, "DEMO-1");
        assert!(posted[0].1.starts_with("[AUTOMATED QUIESCENCE ASSESSMENT]"));
        assert!(posted[0].1.contains("unanswered questions"));
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let tracker = FakeTracker::with_issues(vec![demo_one()]);
        Runner::new(&tracker, rules(), options(false)).run().await.unwrap();

        let (key, body) = tracker.posted()[0].clone();
        let now = Utc::now();
        tracker.seed_comment(
            &key,
            Comment {
                id: "c-1".into(),
                body: body.clone(),
                author: User::named("stalewatch"),
                created: now,
                updated: now,
                is_system_comment: true,
            },
        );

        let stats = Runner::new(&tracker, rules(), options(false)).run().await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.comments_added, 0);
        assert_eq!(tracker.posted().len(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_counts_without_posting() {
        let tracker = DryRunTracker::new(FakeTracker::with_issues(vec![demo_one()]));
        let stats = Runner::new(&tracker, rules(), options(true)).run().await.unwrap();
        assert_eq!(stats.comments_added, 1);
        assert_eq!(stats.actioned, 1);
    }

    #[tokio::test]
    async fn test_llm_failures_degrade_to_defaults() {
        let tracker = FakeTracker::with_issues(vec![demo_one()]);
        let client = ScriptedInference::new(vec![Err(InferenceError("connection refused".into()))]);
        let registry = PromptRegistry::from_store(&FsTemplateStore::builtin_only()).unwrap();
        let classifier = Classifier::Llm(LlmClassifier::new(&client, &registry, AnalyzerKind::Quiescent));

        let stats = Runner::new(&tracker, classifier, options(false)).run().await.unwrap();
        assert_eq!(stats.assessment_failures, 1);
        assert_eq!(stats.non_quiescent, 1);
        assert_eq!(stats.errors, 0);
        assert!(tracker.posted().is_empty());
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_template_aborts_before_any_ticket() {
        let tracker = FakeTracker::with_issues(vec![demo_one()]);
        let client = ScriptedInference::replying("{}");
        let registry = PromptRegistry::new();
        let classifier = Classifier::Llm(LlmClassifier::new(&client, &registry, AnalyzerKind::Quiescent));

        let err = Runner::new(&tracker, classifier, options(false)).run().await.unwrap_err();
        assert!(matches!(err, PromptError::TemplateNotFound(_)));
        assert!(tracker.searches.lock().unwrap().is_empty());
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_broken_payload_counts_as_error_and_continues() {
        let now = Utc::now();
        let mut broken = issue_json("DEMO-1", now, 100, 20, "Open");
        broken.as_object_mut().unwrap().remove("key");
        let tracker = FakeTracker::with_issues(vec![payload(broken), demo_one_as("DEMO-2")]);

        let mut opts = options(false);
        opts.prefilter = false;
        let stats = Runner::new(&tracker, rules(), opts).run().await.unwrap();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.comments_added, 1);
    }

    #[tokio::test]
    async fn test_commenting_does_not_shift_later_pages() {
        let now = Utc::now();
        let issues: Vec<IssuePayload> = (1..=6)
            .map(|n| {
                let mut raw = issue_json(&format!("DEMO-{}", n), now, 100 + n, 20 + n, "Open");
                raw["fields"]["comment"]["comments"] = json!([{
                    "id": "1",
                    "body": "Thanks, could you confirm?",
                    "author": { "displayName": "Rita Reporter", "accountId": "acc-rita" },
                    "created": (now - Duration::days(20 + n)).to_rfc3339()
                }]);
                payload(raw)
            })
            .collect();
        let tracker = OrderedTracker::with_issues(issues);

        let mut opts = options(false);
        opts.batch_size = 2;
        let stats = Runner::new(&tracker, rules(), opts).run().await.unwrap();

        let mut posted = tracker.posted();
        posted.sort();
        assert_eq!(
            posted,
            vec!["DEMO-1", "DEMO-2", "DEMO-3", "DEMO-4", "DEMO-5", "DEMO-6"]
        );
        assert_eq!(stats.processed, 6);
        assert_eq!(stats.comments_added, 6);
    }

    #[tokio::test]
    async fn test_reply_without_comment_posts_nothing() {
        let tracker = FakeTracker::with_issues(vec![demo_one()]);
        let client = ScriptedInference::replying(r#"{"is_quiescent": true, "justification": "x"}"#);
        let registry = PromptRegistry::from_store(&FsTemplateStore::builtin_only()).unwrap();
        let classifier = Classifier::Llm(LlmClassifier::new(&client, &registry, AnalyzerKind::Quiescent));

        let stats = Runner::new(&tracker, classifier, options(false)).run().await.unwrap();
        assert_eq!(stats.quiescent, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.comments_added, 0);
        assert_eq!(stats.errors, 0);
        assert!(tracker.posted().is_empty());
    }

    fn demo_one_as(key: &str) -> IssuePayload {
        let mut issue = demo_one();
        issue.key = Some(key.to_string());
        issue
    }
}
