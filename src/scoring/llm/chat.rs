// chat.rs — OpenAI-compatible chat completions adapter (Groq, OpenRouter, ...)

use super::LLMAdapter;
use crate::scoring::types::LLMError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const SYSTEM_PROMPT: &str =
    "You are an experienced speaking examiner. You answer with a single JSON object.";

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

pub struct ChatAdapter {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl ChatAdapter {
    /// `base_url` is the API root, e.g. `https://api.groq.com/openai/v1`.
    pub fn new(base_url: &str, model: String, api_key: String, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model,
            api_key,
        }
    }
}

#[async_trait]
impl LLMAdapter for ChatAdapter {
    async fn generate(&self, prompt: &str) -> Result<String, LLMError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            max_tokens: 1024,
            temperature: 0.2,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| LLMError::from_reqwest("chat", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LLMError::ProviderError(format!("chat {}: {}", status, body)));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| LLMError::ProviderError(format!("chat parse: {}", e)))?;

        chat.choices
            .first()
            .map(|c| c.message.content.clone())
            .filter(|c| !c.trim().is_empty())
            .ok_or(LLMError::InvalidResponse)
    }

    fn name(&self) -> &str {
        "chat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn returns_first_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"band\": 7}"}}]
            })))
            .mount(&server)
            .await;

        let adapter = ChatAdapter::new(
            &format!("{}/v1/", server.uri()),
            "model".into(),
            "key".into(),
            Duration::from_secs(5),
        );
        assert_eq!(adapter.generate("rate").await.unwrap(), "{\"band\": 7}");
    }

    #[tokio::test]
    async fn non_success_is_a_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let adapter = ChatAdapter::new(&server.uri(), "m".into(), "k".into(), Duration::from_secs(5));
        assert!(matches!(
            adapter.generate("rate").await,
            Err(LLMError::ProviderError(_))
        ));
    }
}
