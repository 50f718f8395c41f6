use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::api::inference::Provider;
use crate::assess::llm::AnalyzerKind;
use crate::errors::StalewatchError;

const ENV_PREFIX: &str = "STALEWATCH";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub jira: JiraConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub assessment: AssessmentConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    /// Email + API token
    #[default]
    Basic,
    /// Personal access token
    Bearer,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JiraConfig {
    pub url: String,
    #[serde(default)]
    pub email: String,
    pub api_token: String,
    #[serde(default)]
    pub project_key: String,
    #[serde(default)]
    pub auth: AuthMethod,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: Provider,
    pub model: String,
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub enabled: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: Provider::Ollama,
            model: "llama3.2:latest".to_string(),
            base_url: "http://localhost:11434".to_string(),
            api_key: None,
            timeout_secs: 60,
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierChoice {
    #[default]
    Llm,
    Rules,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AssessmentConfig {
    pub analyzer: AnalyzerKind,
    pub classifier: ClassifierChoice,
    pub batch_size: usize,
    pub max_tickets: usize,
    pub excluded_statuses: Vec<String>,
    pub min_age_days: i64,
    pub min_inactive_days: i64,
    pub stale_threshold_days: i64,
    pub activity_threshold_days: i64,
    pub aged_threshold_days: i64,
    pub dry_run: bool,
    pub lookback_days: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template_dir: Option<PathBuf>,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            analyzer: AnalyzerKind::Quiescent,
            classifier: ClassifierChoice::Llm,
            batch_size: 50,
            max_tickets: 50,
            excluded_statuses: vec!["Closed".into(), "Done".into(), "Resolved".into()],
            min_age_days: 14,
            min_inactive_days: 7,
            stale_threshold_days: 14,
            activity_threshold_days: 7,
            aged_threshold_days: 90,
            dry_run: true,
            lookback_days: 7,
            template_dir: None,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    2000
}

impl Settings {
    pub fn new(jira: JiraConfig) -> Self {
        Self {
            jira,
            llm: LlmConfig::default(),
            assessment: AssessmentConfig::default(),
        }
    }

    /// Load `~/.stalewatch/config.toml` with `STALEWATCH__SECTION__FIELD` overrides.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            return Err(StalewatchError::ConfigNotFound.into());
        }

        Self::load_layered(&config_path, ENV_PREFIX)
    }

    fn load_layered(path: &Path, env_prefix: &str) -> Result<Self> {
        let layered = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read config file")?;

        layered
            .try_deserialize::<Settings>()
            .map_err(|e| StalewatchError::ConfigInvalid(e.to_string()).into())
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let config_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, config_str).context("Failed to write config file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(config_path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(config_path, perms)?;
        }

        Ok(())
    }

    /// Problems that would make a run fail before touching any ticket.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.jira.url.starts_with("http://") && !self.jira.url.starts_with("https://") {
            problems.push(format!("jira.url '{}' must start with http:// or https://", self.jira.url));
        }
        if self.jira.api_token.trim().is_empty() {
            problems.push("jira.api_token is empty".to_string());
        }
        if self.jira.auth == AuthMethod::Basic && self.jira.email.trim().is_empty() {
            problems.push("jira.email is required for basic auth".to_string());
        }
        if self.assessment.batch_size == 0 {
            problems.push("assessment.batch_size must be at least 1".to_string());
        }
        if self.llm.provider == Provider::OpenAi && self.llm.api_key.is_none() {
            problems.push("llm.api_key is required for the openai provider".to_string());
        }
        problems
    }

    /// Copy with secrets replaced, for display.
    pub fn masked(&self) -> Self {
        let mut copy = self.clone();
        copy.jira.api_token = mask(&copy.jira.api_token);
        copy.llm.api_key = copy.llm.api_key.as_deref().map(mask);
        copy
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    pub fn config_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".stalewatch"))
    }

    pub fn user_templates_dir() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("templates"))
    }
}

fn mask(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", visible)
    }
}
