use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::assess::parse::Fields;

/// Stand-in comment text when a reply carried none.
pub const NO_COMMENT: &str = "No comment generated";
/// Stand-in comment text when assessment failed outright.
pub const FAILED_COMMENT: &str = "Failed to generate comment";

/// Outcome of a single rule-based check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule: String,
    pub description: String,
    pub passed: bool,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleBasedResult {
    pub is_quiescent: bool,
    pub justification: String,
    #[serde(default)]
    pub rule_outcomes: Vec<RuleOutcome>,
    pub staleness_score: f64,
    pub inactivity_days: i64,
    pub responsible_party: String,
    pub suggested_action: String,
    pub suggested_deadline: String,
    pub planned_comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuiescentAssessment {
    pub is_quiescent: bool,
    pub staleness_score: f64,
    pub inactivity_days: i64,
    pub justification: String,
    pub responsible_party: String,
    pub suggested_action: String,
    pub suggested_deadline: String,
    pub planned_comment: String,
}

impl Default for QuiescentAssessment {
    fn default() -> Self {
        Self {
            is_quiescent: false,
            staleness_score: 0.0,
            inactivity_days: 0,
            justification: "No justification provided".to_string(),
            responsible_party: "Unknown".to_string(),
            suggested_action: "No action suggested".to_string(),
            suggested_deadline: "No deadline suggested".to_string(),
            planned_comment: NO_COMMENT.to_string(),
        }
    }
}

impl QuiescentAssessment {
    /// Result used when the inference stage could not produce an answer.
    pub fn failed() -> Self {
        Self {
            justification: "Failed to assess ticket".to_string(),
            suggested_action: "None".to_string(),
            suggested_deadline: "None".to_string(),
            planned_comment: FAILED_COMMENT.to_string(),
            ..Self::default()
        }
    }

    /// Build from a loosely typed reply; absent or mistyped fields take defaults.
    pub fn from_fields(map: &Map<String, Value>) -> Self {
        let d = Self::default();
        let f = Fields::new(map);
        Self {
            is_quiescent: f.bool_or("is_quiescent", d.is_quiescent),
            staleness_score: f.f64_or("staleness_score", d.staleness_score),
            inactivity_days: f.i64_or("inactivity_days", d.inactivity_days),
            justification: f.string_or("justification", &d.justification),
            responsible_party: f.string_or("responsible_party", &d.responsible_party),
            suggested_action: f.string_or("suggested_action", &d.suggested_action),
            suggested_deadline: f.string_or("suggested_deadline", &d.suggested_deadline),
            planned_comment: f.string_or("planned_comment", &d.planned_comment),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityResult {
    pub needs_improvement: bool,
    pub quality_score: i64,
    pub quality_assessment: String,
    #[serde(default)]
    pub improvement_suggestions: Vec<String>,
    pub responsible_party: String,
    pub suggested_deadline: String,
    pub planned_comment: String,
}

impl Default for QualityResult {
    fn default() -> Self {
        Self {
            needs_improvement: false,
            quality_score: 5,
            quality_assessment: "No assessment provided".to_string(),
            improvement_suggestions: Vec::new(),
            responsible_party: "Unknown".to_string(),
            suggested_deadline: "No deadline suggested".to_string(),
            planned_comment: NO_COMMENT.to_string(),
        }
    }
}

impl QualityResult {
    pub fn failed() -> Self {
        Self {
            quality_assessment: "Failed to assess ticket quality".to_string(),
            suggested_deadline: "None".to_string(),
            planned_comment: FAILED_COMMENT.to_string(),
            ..Self::default()
        }
    }

    pub fn from_fields(map: &Map<String, Value>) -> Self {
        let d = Self::default();
        let f = Fields::new(map);
        Self {
            needs_improvement: f.bool_or("needs_improvement", d.needs_improvement),
            quality_score: f.i64_or("quality_score", d.quality_score).clamp(1, 10),
            quality_assessment: f.string_or("quality_assessment", &d.quality_assessment),
            improvement_suggestions: f.string_list("improvement_suggestions"),
            responsible_party: f.string_or("responsible_party", &d.responsible_party),
            suggested_deadline: f.string_or("suggested_deadline", &d.suggested_deadline),
            planned_comment: f.string_or("planned_comment", &d.planned_comment),
        }
    }

    fn suggested_action(&self) -> String {
        if self.improvement_suggestions.is_empty() {
            return "No specific improvements suggested".to_string();
        }
        let first_two: Vec<&str> = self
            .improvement_suggestions
            .iter()
            .take(2)
            .map(String::as_str)
            .collect();
        format!("Improve ticket quality: {}", first_two.join("; "))
    }
}

/// Discriminator used in the serialised form of a [`ClassificationResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    RuleBased,
    Quiescent,
    Quality,
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::RuleBased => "rule_based",
            ResultKind::Quiescent => "quiescent",
            ResultKind::Quality => "quality",
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResultKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rule_based" => Ok(ResultKind::RuleBased),
            "quiescent" => Ok(ResultKind::Quiescent),
            "quality" => Ok(ResultKind::Quality),
            other => Err(format!("unknown result kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClassificationResult {
    RuleBased(RuleBasedResult),
    Quiescent(QuiescentAssessment),
    Quality(QualityResult),
}

impl ClassificationResult {
    pub fn kind(&self) -> ResultKind {
        match self {
            ClassificationResult::RuleBased(_) => ResultKind::RuleBased,
            ClassificationResult::Quiescent(_) => ResultKind::Quiescent,
            ClassificationResult::Quality(_) => ResultKind::Quality,
        }
    }

    /// Lenient construction from LLM output for the given kind.
    pub fn from_fields(kind: ResultKind, map: &Map<String, Value>) -> Option<Self> {
        match kind {
            ResultKind::Quiescent => Some(Self::Quiescent(QuiescentAssessment::from_fields(map))),
            ResultKind::Quality => Some(Self::Quality(QualityResult::from_fields(map))),
            // Rule-based results are never produced from free-form replies.
            ResultKind::RuleBased => None,
        }
    }

    pub fn needs_action(&self) -> bool {
        match self {
            ClassificationResult::RuleBased(r) => r.is_quiescent,
            ClassificationResult::Quiescent(r) => r.is_quiescent,
            ClassificationResult::Quality(r) => r.needs_improvement,
        }
    }

    pub fn planned_comment(&self) -> &str {
        match self {
            ClassificationResult::RuleBased(r) => &r.planned_comment,
            ClassificationResult::Quiescent(r) => &r.planned_comment,
            ClassificationResult::Quality(r) => &r.planned_comment,
        }
    }

    /// The planned comment, unless it is empty or one of the stand-in texts.
    pub fn postable_comment(&self) -> Option<&str> {
        let comment = self.planned_comment().trim();
        if comment.is_empty() || comment == NO_COMMENT || comment == FAILED_COMMENT {
            None
        } else {
            Some(comment)
        }
    }

    pub fn responsible_party(&self) -> &str {
        match self {
            ClassificationResult::RuleBased(r) => &r.responsible_party,
            ClassificationResult::Quiescent(r) => &r.responsible_party,
            ClassificationResult::Quality(r) => &r.responsible_party,
        }
    }

    pub fn suggested_action(&self) -> String {
        match self {
            ClassificationResult::RuleBased(r) => r.suggested_action.clone(),
            ClassificationResult::Quiescent(r) => r.suggested_action.clone(),
            ClassificationResult::Quality(r) => r.suggested_action(),
        }
    }

    /// Short human summary for terminal output.
    pub fn summary(&self) -> &str {
        match self {
            ClassificationResult::RuleBased(r) => &r.justification,
            ClassificationResult::Quiescent(r) => &r.justification,
            ClassificationResult::Quality(r) => &r.quality_assessment,
        }
    }

    pub fn to_dict(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_dict(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}
