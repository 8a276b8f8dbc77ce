// ollama.rs — Ollama local LLM adapter

use super::LLMAdapter;
use crate::scoring::types::LLMError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const FALLBACK_MODEL: &str = "llama3.2";

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: String,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

pub struct OllamaAdapter {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaAdapter {
    pub fn new(base_url: &str, model: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            client,
            endpoint: format!("{}/api/generate", base_url.trim_end_matches('/')),
            model,
        }
    }

    async fn call_model(&self, model: &str, prompt: &str) -> Result<String, LLMError> {
        let request = OllamaRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            stream: false,
            format: "json".to_string(),
            options: OllamaOptions {
                temperature: 0.2,
                num_predict: 1024,
            },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| LLMError::from_reqwest("ollama", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LLMError::ProviderError(format!(
                "Ollama {} ({}): {}",
                model, status, body
            )));
        }

        let ollama: OllamaResponse = response
            .json()
            .await
            .map_err(|e| LLMError::ProviderError(format!("Ollama parse: {}", e)))?;

        if ollama.response.trim().is_empty() {
            return Err(LLMError::InvalidResponse);
        }

        Ok(ollama.response)
    }
}

#[async_trait]
impl LLMAdapter for OllamaAdapter {
    async fn generate(&self, prompt: &str) -> Result<String, LLMError> {
        match self.call_model(&self.model, prompt).await {
            Ok(text) => Ok(text),
            Err(LLMError::NetworkError(e)) => Err(LLMError::NetworkError(e)),
            Err(e) if self.model != FALLBACK_MODEL => {
                tracing::warn!(
                    "Ollama '{}' failed: {:?}, trying '{}'",
                    self.model,
                    e,
                    FALLBACK_MODEL
                );
                self.call_model(FALLBACK_MODEL, prompt).await
            }
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        "ollama"
    }
}
