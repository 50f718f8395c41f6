pub mod comment;
pub mod executor;
pub mod filters;
pub mod iterator;
pub mod llm;
pub mod parse;
pub mod prompts;
pub mod rules;
pub mod runner;

pub use llm::{AnalyzerKind, LlmClassifier};
pub use prompts::{FsTemplateStore, PromptRegistry};
pub use rules::{QuiescenceEvaluator, RuleThresholds};
pub use runner::{Classifier, RunOptions, Runner};
