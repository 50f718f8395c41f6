pub mod dry_run;
pub mod inference;
pub mod jira;
pub mod ollama;
pub mod openai;
pub mod tracker;

pub use dry_run::DryRunTracker;
pub use inference::{build_client, InferenceError, Provider};
pub use jira::{JiraAuth, JiraClient};
pub use tracker::{IssueTracker, TrackerError};
