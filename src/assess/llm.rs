use chrono::{NaiveDate, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, error, warn};

use super::parse::{parse_response, ResponseError};
use super::prompts::{PromptError, PromptRegistry};
use crate::api::inference::{InferenceClient, InferenceError};
use crate::models::result::{ClassificationResult, QualityResult, QuiescentAssessment, ResultKind};
use crate::models::ticket::Ticket;

const QUIESCENT_INSTRUCTION: &str = "You are an expert Jira ticket analyst. Provide JSON output only. \
For all JSON string values, especially in the planned_comment field, format all text as a single line \
with no line breaks. If you need to represent a line break in the planned_comment field, use the \\n \
escape sequence. All special characters in JSON strings must be properly escaped according to JSON \
formatting rules.";

const QUALITY_INSTRUCTION: &str = "You are an expert Jira ticket quality analyst. Provide JSON output only. \
Assess tickets for completeness, clarity, and adherence to best practices. For all JSON string values, \
format text as single lines with \\n for line breaks. All special characters in JSON strings must be \
properly escaped.";

/// Appended to the system instruction for the second attempt.
const STRICT_JSON_SUFFIX: &str = " IMPORTANT: Your previous response contained invalid JSON. Please ensure \
all JSON objects are complete with proper closing braces and that all property names are enclosed in \
double quotes. Do not include any text outside the JSON object. Make sure the output is a complete, \
valid JSON object.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerKind {
    /// Is the ticket stalled?
    #[default]
    Quiescent,
    /// Is the ticket well written?
    Quality,
}

impl AnalyzerKind {
    pub fn template_name(&self) -> &'static str {
        match self {
            AnalyzerKind::Quiescent => "quiescent_assessment",
            AnalyzerKind::Quality => "ticket_quality_assessment",
        }
    }

    pub fn system_instruction(&self) -> &'static str {
        match self {
            AnalyzerKind::Quiescent => QUIESCENT_INSTRUCTION,
            AnalyzerKind::Quality => QUALITY_INSTRUCTION,
        }
    }

    pub fn result_kind(&self) -> ResultKind {
        match self {
            AnalyzerKind::Quiescent => ResultKind::Quiescent,
            AnalyzerKind::Quality => ResultKind::Quality,
        }
    }

    pub fn failed_result(&self) -> ClassificationResult {
        match self {
            AnalyzerKind::Quiescent => ClassificationResult::Quiescent(QuiescentAssessment::failed()),
            AnalyzerKind::Quality => ClassificationResult::Quality(QualityResult::failed()),
        }
    }
}

impl fmt::Display for AnalyzerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalyzerKind::Quiescent => write!(f, "quiescent"),
            AnalyzerKind::Quality => write!(f, "quality"),
        }
    }
}

/// What the classifier produced for one ticket.
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifyOutcome {
    Assessed(ClassificationResult),
    /// The model could not be used; `result` is the safe default.
    Recovered {
        result: ClassificationResult,
        reason: String,
    },
}

impl ClassifyOutcome {
    pub fn result(&self) -> &ClassificationResult {
        match self {
            ClassifyOutcome::Assessed(result) => result,
            ClassifyOutcome::Recovered { result, .. } => result,
        }
    }

    pub fn is_recovered(&self) -> bool {
        matches!(self, ClassifyOutcome::Recovered { .. })
    }
}

#[derive(Debug)]
enum AttemptError {
    Inference(InferenceError),
    Response { error: ResponseError, raw: String },
}

impl AttemptError {
    fn raw(&self) -> &str {
        match self {
            AttemptError::Inference(_) => "",
            AttemptError::Response { raw, .. } => raw,
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Inference(e) => write!(f, "{}", e),
            AttemptError::Response { error, .. } => write!(f, "{}", error),
        }
    }
}

/// Inference-backed classifier.
///
/// A reply that is not valid JSON after repair earns exactly one more
/// attempt with a stricter instruction. Anything else that goes wrong with
/// the model yields [`ClassifyOutcome::Recovered`]. Only template problems
/// are returned as errors.
pub struct LlmClassifier<'a> {
    client: &'a dyn InferenceClient,
    registry: &'a PromptRegistry,
    analyzer: AnalyzerKind,
    template: String,
}

impl<'a> LlmClassifier<'a> {
    pub fn new(
        client: &'a dyn InferenceClient,
        registry: &'a PromptRegistry,
        analyzer: AnalyzerKind,
    ) -> Self {
        Self {
            client,
            registry,
            analyzer,
            template: analyzer.template_name().to_string(),
        }
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    /// Fails when the configured template cannot be rendered.
    pub fn preflight(&self) -> Result<(), PromptError> {
        let template = self.registry.get(&self.template)?;
        let missing = template.missing_variables(&Self::variables(Utc::now().date_naive(), String::new()));
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PromptError::MissingVariables {
                template: self.template.clone(),
                missing,
            })
        }
    }

    fn variables(today: NaiveDate, ticket_yaml: String) -> HashMap<String, String> {
        HashMap::from([
            ("current_date".to_string(), today.format("%Y-%m-%d").to_string()),
            ("ticket_yaml".to_string(), ticket_yaml),
        ])
    }

    pub async fn classify(&self, ticket: &Ticket) -> Result<ClassifyOutcome, PromptError> {
        self.classify_on(ticket, Utc::now().date_naive()).await
    }

    pub async fn classify_on(
        &self,
        ticket: &Ticket,
        today: NaiveDate,
    ) -> Result<ClassifyOutcome, PromptError> {
        let ticket_yaml = match ticket.to_prompt_yaml() {
            Ok(yaml) => yaml,
            Err(e) => return Ok(self.recovered(&ticket.key, format!("could not render ticket: {}", e))),
        };
        let prompt = self
            .registry
            .render(&self.template, &Self::variables(today, ticket_yaml))?;

        let system = self.analyzer.system_instruction();
        let first = match self.attempt(system, &prompt).await {
            Ok(result) => return Ok(ClassifyOutcome::Assessed(result)),
            Err(e) => e,
        };

        let AttemptError::Response {
            error: ResponseError::InvalidJson(_),
            ..
        } = &first
        else {
            error!(ticket = %ticket.key, error = %first, raw = first.raw(), "assessment failed");
            return Ok(self.recovered(&ticket.key, first.to_string()));
        };

        warn!(ticket = %ticket.key, error = %first, "invalid JSON from model, retrying with stricter instructions");
        let strict = format!("{}{}", system, STRICT_JSON_SUFFIX);
        match self.attempt(&strict, &prompt).await {
            Ok(result) => Ok(ClassifyOutcome::Assessed(result)),
            Err(second) => {
                error!(
                    ticket = %ticket.key,
                    error = %second,
                    raw = second.raw(),
                    "assessment failed after retry"
                );
                Ok(self.recovered(&ticket.key, second.to_string()))
            }
        }
    }

    async fn attempt(&self, system: &str, prompt: &str) -> Result<ClassificationResult, AttemptError> {
        let raw = self
            .client
            .generate(system, prompt)
            .await
            .map_err(AttemptError::Inference)?;
        debug!(chars = raw.len(), "model replied");

        let fields = parse_response(&raw).map_err(|error| AttemptError::Response {
            error,
            raw: raw.clone(),
        })?;
        Ok(ClassificationResult::from_fields(self.analyzer.result_kind(), &fields)
            .unwrap_or_else(|| self.analyzer.failed_result()))
    }

    fn recovered(&self, key: &str, reason: String) -> ClassifyOutcome {
        debug!(ticket = %key, "falling back to default result");
        ClassifyOutcome::Recovered {
            result: self.analyzer.failed_result(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::inference::fake::ScriptedInference;
    use crate::assess::prompts::FsTemplateStore;
    use crate::models::ticket::fixtures::{issue_json, payload};

    fn registry() -> PromptRegistry {
        PromptRegistry::from_store(&FsTemplateStore::builtin_only()).unwrap()
    }

    fn ticket() -> Ticket {
        Ticket::from_payload(&payload(issue_json("DEMO-1", Utc::now(), 100, 20, "Open"))).unwrap()
    }

    const VALID: &str = r#"{"is_quiescent": true, "justification": "stalled", "planned_comment": "Please update"}"#;

    #[tokio::test]
    async fn test_fenced_reply_with_missing_fields_uses_defaults() {
        let client = ScriptedInference::replying("```json\n{\"is_quiescent\": true, \"justification\": \"x\"}\n```");
        let registry = registry();
        let classifier = LlmClassifier::new(&client, &registry, AnalyzerKind::Quiescent);

        let outcome = classifier.classify(&ticket()).await.unwrap();
        let ClassifyOutcome::Assessed(ClassificationResult::Quiescent(result)) = outcome else {
            panic!("expected an assessed quiescent result");
        };
        assert!(result.is_quiescent);
        assert_eq!(result.justification, "x");
        assert_eq!(result.responsible_party, "Unknown");
        assert_eq!(result.suggested_deadline, "No deadline suggested");
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_json_is_retried_once_with_stricter_instruction() {
        let client = ScriptedInference::new(vec![
            Ok("{\"is_quiescent\": true, justification: ".to_string()),
            Ok(VALID.to_string()),
        ]);
        let registry = registry();
        let classifier = LlmClassifier::new(&client, &registry, AnalyzerKind::Quiescent);

        let outcome = classifier.classify(&ticket()).await.unwrap();
        assert!(!outcome.is_recovered());
        assert_eq!(outcome.result().planned_comment(), "Please update");

        let systems = client.systems.lock().unwrap();
        assert_eq!(systems.len(), 2);
        assert!(!systems[0].contains("IMPORTANT"));
        assert!(systems[1].ends_with(STRICT_JSON_SUFFIX));
    }

    #[tokio::test]
    async fn test_second_invalid_reply_falls_back() {
        let client = ScriptedInference::new(vec![
            Ok("not json at all".to_string()),
            Ok("still { not json".to_string()),
            Ok(VALID.to_string()),
        ]);
        let registry = registry();
        let classifier = LlmClassifier::new(&client, &registry, AnalyzerKind::Quiescent);

        let outcome = classifier.classify(&ticket()).await.unwrap();
        assert!(matches!(
            &outcome,
            ClassifyOutcome::Recovered { result: ClassificationResult::Quiescent(r), reason }
                if *r == QuiescentAssessment::failed() && reason.starts_with("Invalid JSON response")
        ));
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_service_error_is_not_retried() {
        let client = ScriptedInference::new(vec![
            Err(InferenceError("connection refused".into())),
            Ok(VALID.to_string()),
        ]);
        let registry = registry();
        let classifier = LlmClassifier::new(&client, &registry, AnalyzerKind::Quiescent);

        let outcome = classifier.classify(&ticket()).await.unwrap();
        assert!(outcome.is_recovered());
        assert!(!outcome.result().needs_action());
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_unclosed_fence_is_not_retried() {
        let client = ScriptedInference::new(vec![Ok("```json\n{\"is_quiescent\": true}".into())]);
        let registry = registry();
        let classifier = LlmClassifier::new(&client, &registry, AnalyzerKind::Quiescent);

        let outcome = classifier.classify(&ticket()).await.unwrap();
        assert!(outcome.is_recovered());
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_template_is_fatal() {
        let client = ScriptedInference::replying(VALID);
        let registry = registry();
        let classifier =
            LlmClassifier::new(&client, &registry, AnalyzerKind::Quiescent).with_template("nope");

        assert!(matches!(classifier.preflight(), Err(PromptError::TemplateNotFound(_))));
        assert!(matches!(
            classifier.classify(&ticket()).await,
            Err(PromptError::TemplateNotFound(_))
        ));
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn test_prompt_carries_date_and_ticket() {
        let client = ScriptedInference::replying(VALID);
        let registry = registry();
        let classifier = LlmClassifier::new(&client, &registry, AnalyzerKind::Quiescent);
        let today = NaiveDate::from_ymd_opt(2026, 3, 4).unwrap();

        classifier.classify_on(&ticket(), today).await.unwrap();
        let prompts = client.prompts.lock().unwrap();
        assert!(prompts[0].contains("Today is 2026-03-04."));
        assert!(prompts[0].contains("key: DEMO-1"));
    }

    #[tokio::test]
    async fn test_quality_analyzer_builds_quality_result() {
        let client = ScriptedInference::replying(
            r#"{"needs_improvement": true, "quality_score": 3, "improvement_suggestions": ["Add steps"], "planned_comment": "Please add steps"}"#,
        );
        let registry = registry();
        let classifier = LlmClassifier::new(&client, &registry, AnalyzerKind::Quality);
        assert_eq!(classifier.template(), "ticket_quality_assessment");

        let outcome = classifier.classify(&ticket()).await.unwrap();
        assert!(matches!(outcome.result(), ClassificationResult::Quality(q) if q.quality_score == 3));
        assert_eq!(outcome.result().suggested_action(), "Improve ticket quality: Add steps");
        assert!(client.systems.lock().unwrap()[0].contains("quality analyst"));
    }
}
