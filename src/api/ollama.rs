use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::inference::{InferenceClient, InferenceError};

pub struct OllamaClient {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl InferenceClient for OllamaClient {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String, InferenceError> {
        let url = format!("{}/api/generate", self.base_url);
        debug!(model = %self.model, prompt_chars = prompt.len(), "calling ollama");

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                system,
                stream: false,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(InferenceError(format!("Ollama error ({}): {}", status, text)));
        }

        let body: GenerateResponse = response.json().await?;
        Ok(body.response)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    #[tokio::test]
    async fn test_generate_sends_system_and_reads_response() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/generate")
            .match_body(Matcher::Json(json!({
                "model": "llama3.2:latest",
                "prompt": "assess this",
                "system": "json only",
                "stream": false
            })))
            .with_status(200)
            .with_body(r#"{"model":"llama3.2:latest","response":"{\"is_quiescent\":false}","done":true}"#)
            .create_async()
            .await;

        let client = OllamaClient::new(&server.url(), "llama3.2:latest", Duration::from_secs(5));
        let reply = client.generate("json only", "assess this").await.unwrap();
        assert_eq!(reply, r#"{"is_quiescent":false}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_inference_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/generate")
            .with_status(500)
            .with_body("model not loaded")
            .create_async()
            .await;

        let client = OllamaClient::new(&server.url(), "llama3.2:latest", Duration::from_secs(5));
        let err = client.generate("s", "p").await.unwrap_err();
        assert!(err.to_string().contains("model not loaded"));
    }
}
