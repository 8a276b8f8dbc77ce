// LLM text generation adapters used by the scorer chain

pub mod chat;
pub mod ollama;

use super::types::LLMError;
use async_trait::async_trait;

/// Trait for LLM text generation adapters
#[async_trait]
pub trait LLMAdapter: Send + Sync {
    /// Generate text from prompt
    async fn generate(&self, prompt: &str) -> Result<String, LLMError>;

    /// Provider name
    fn name(&self) -> &str;
}
