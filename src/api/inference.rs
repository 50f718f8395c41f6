use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use super::ollama::OllamaClient;
use super::openai::OpenAiClient;
use crate::config::settings::LlmConfig;

/// The single failure category of an inference service.
#[derive(Debug, Error)]
#[error("inference service error: {0}")]
pub struct InferenceError(pub String);

impl From<reqwest::Error> for InferenceError {
    fn from(err: reqwest::Error) -> Self {
        InferenceError(err.to_string())
    }
}

#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Submit a prompt with a system instruction and return the raw reply text.
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, InferenceError>;

    fn model(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Ollama,
    #[value(name = "openai")]
    OpenAi,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Ollama => write!(f, "ollama"),
            Provider::OpenAi => write!(f, "openai"),
        }
    }
}

pub fn build_client(config: &LlmConfig) -> Box<dyn InferenceClient> {
    let timeout = Duration::from_secs(config.timeout_secs);
    match config.provider {
        Provider::Ollama => Box::new(OllamaClient::new(&config.base_url, &config.model, timeout)),
        Provider::OpenAi => Box::new(OpenAiClient::new(
            &config.base_url,
            &config.model,
            config.api_key.clone(),
            timeout,
        )),
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays queued replies and records every system instruction it saw.
    pub struct ScriptedInference {
        replies: Mutex<VecDeque<Result<String, InferenceError>>>,
        pub systems: Mutex<Vec<String>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedInference {
        pub fn new(replies: Vec<Result<String, InferenceError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                systems: Mutex::new(Vec::new()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub fn replying(text: &str) -> Self {
            Self::new(vec![Ok(text.to_string())])
        }

        pub fn calls(&self) -> usize {
            self.systems.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl InferenceClient for ScriptedInference {
        async fn generate(&self, system: &str, prompt: &str) -> Result<String, InferenceError> {
            self.systems.lock().unwrap().push(system.to_string());
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(InferenceError("no scripted reply left".into())))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }
}
