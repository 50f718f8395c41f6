use colored::*;
use std::fmt;

use crate::api::inference::InferenceError;
use crate::api::tracker::TrackerError;
use crate::assess::prompts::PromptError;

/// Errors shown to the operator, each with a hint on how to fix it.
#[derive(Debug)]
pub enum StalewatchError {
    // Configuration errors
    ConfigNotFound,
    ConfigInvalid(String),
    ConfigValidationFailed(String),
    TemplateNotFound(String),
    MissingTemplateVariables { template: String, missing: Vec<String> },

    // Jira errors
    JiraAuthFailed(u16),
    JiraPermissionDenied(String),
    JiraApiError(String),

    // Inference errors
    InferenceUnavailable(String),

    // Network errors
    NetworkError(String),

    Other(String),
}

impl fmt::Display for StalewatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StalewatchError::ConfigNotFound => {
                write!(f, "{}\n", "Configuration not found".red().bold())?;
                write!(f, "   {}\n\n", "Run 'stalewatch init' to set up your configuration".dimmed())?;
                write!(f, "   {}", "stalewatch init".green())
            }
            StalewatchError::ConfigInvalid(msg) => {
                write!(f, "{}\n", "Invalid configuration".red().bold())?;
                write!(f, "   {}\n\n", msg.dimmed())?;
                write!(f, "   To fix:\n")?;
                write!(f, "   1. Check your config file: ~/.stalewatch/config.toml\n")?;
                write!(f, "   2. Check STALEWATCH__* environment overrides\n")?;
                write!(f, "   3. Or reinitialize: {}", "stalewatch init".green())
            }
            StalewatchError::ConfigValidationFailed(msg) => {
                write!(f, "{}\n", "Configuration validation failed".red().bold())?;
                write!(f, "   {}\n\n", msg.dimmed())?;
                write!(f, "   To fix:\n")?;
                write!(f, "   1. Check your API tokens are valid\n")?;
                write!(f, "   2. Verify network connectivity\n")?;
                write!(f, "   3. Reinitialize if needed: {}", "stalewatch init".green())
            }
            StalewatchError::TemplateNotFound(name) => {
                write!(f, "{}\n", format!("Prompt template '{}' not found", name).red().bold())?;
                write!(f, "   {}\n\n", "No template source provides this name".dimmed())?;
                write!(f, "   To fix:\n")?;
                write!(f, "   1. List available templates: {}\n", "stalewatch templates list".green())?;
                write!(f, "   2. Restore the defaults: {}", "stalewatch templates install --force".green())
            }
            StalewatchError::MissingTemplateVariables { template, missing } => {
                write!(f, "{}\n", format!("Template '{}' is missing variables", template).red().bold())?;
                write!(f, "   {}\n\n", missing.join(", ").dimmed())?;
                write!(f, "   To fix:\n")?;
                write!(f, "   1. Remove the variables from required_vars in your template\n")?;
                write!(f, "   2. Or reinstall the defaults: {}", "stalewatch templates install --force".green())
            }

            StalewatchError::JiraAuthFailed(status) => {
                write!(f, "{}\n", format!("Jira authentication failed ({})", status).red().bold())?;
                write!(f, "   {}\n\n", "Your API token may have expired or is invalid".dimmed())?;
                write!(f, "   To fix:\n")?;
                write!(f, "   1. Generate new token: {}\n", "https://id.atlassian.com/manage-profile/security/api-tokens".cyan())?;
                write!(f, "   2. Update config: {}\n", "stalewatch init".green())?;
                write!(f, "   3. Or edit manually: ~/.stalewatch/config.toml")
            }
            StalewatchError::JiraPermissionDenied(msg) => {
                write!(f, "{}\n", "Jira permission denied".red().bold())?;
                write!(f, "   {}\n\n", msg.dimmed())?;
                write!(f, "   To fix:\n")?;
                write!(f, "   1. Verify you can browse this project in Jira\n")?;
                write!(f, "   2. Production runs also need the 'Add Comments' permission")
            }
            StalewatchError::JiraApiError(msg) => {
                write!(f, "{}\n", "Jira API error".red().bold())?;
                write!(f, "   {}\n\n", msg.dimmed())?;
                write!(f, "   Try again or check your network connection")
            }

            StalewatchError::InferenceUnavailable(msg) => {
                write!(f, "{}\n", "Inference service unavailable".red().bold())?;
                write!(f, "   {}\n\n", msg.dimmed())?;
                write!(f, "   To fix:\n")?;
                write!(f, "   1. Start Ollama: {}\n", "ollama serve".green())?;
                write!(f, "   2. Pull the model: {}\n", "ollama pull llama3.2".green())?;
                write!(f, "   3. Or run without it: {}", "stalewatch run --no-llm".green())
            }

            StalewatchError::NetworkError(msg) => {
                write!(f, "{}\n", "Network error".red().bold())?;
                write!(f, "   {}\n\n", msg.dimmed())?;
                write!(f, "   To fix:\n")?;
                write!(f, "   1. Check your internet connection\n")?;
                write!(f, "   2. Verify you can reach the Jira URL\n")?;
                write!(f, "   3. Try again in a moment")
            }

            StalewatchError::Other(msg) => {
                write!(f, "{}\n", "Error".red().bold())?;
                write!(f, "   {}", msg.dimmed())
            }
        }
    }
}

impl std::error::Error for StalewatchError {}

impl From<TrackerError> for StalewatchError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::AuthFailed(status) => StalewatchError::JiraAuthFailed(status),
            TrackerError::PermissionDenied(msg) => StalewatchError::JiraPermissionDenied(msg),
            TrackerError::Connection(msg) => StalewatchError::NetworkError(msg),
            other => StalewatchError::JiraApiError(other.to_string()),
        }
    }
}

impl From<PromptError> for StalewatchError {
    fn from(err: PromptError) -> Self {
        match err {
            PromptError::TemplateNotFound(name) => StalewatchError::TemplateNotFound(name),
            PromptError::MissingVariables { template, missing } => {
                StalewatchError::MissingTemplateVariables { template, missing }
            }
            other => StalewatchError::ConfigInvalid(other.to_string()),
        }
    }
}

impl From<InferenceError> for StalewatchError {
    fn from(err: InferenceError) -> Self {
        StalewatchError::InferenceUnavailable(err.0)
    }
}

impl From<anyhow::Error> for StalewatchError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<StalewatchError>() {
            Ok(known) => known,
            Err(other) => StalewatchError::Other(format!("{:#}", other)),
        }
    }
}
