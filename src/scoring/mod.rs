// scoring/mod.rs — Language-quality scoring of a transcript against its question

pub mod clarity;
pub mod llm;
mod parse;
mod prompt;
mod types;

pub use parse::{normalize_band, MAX_BAND};
pub use prompt::build_prompt;
pub use types::{CategoryScores, LLMError, LanguageScore, ScoringError, ScoringRequest};

use crate::config::{AppConfig, ScorerKind};
use async_trait::async_trait;
use llm::{chat::ChatAdapter, ollama::OllamaAdapter, LLMAdapter};
use std::time::Duration;

#[async_trait]
pub trait LanguageScorer: Send + Sync {
    async fn score(&self, request: &ScoringRequest) -> Result<LanguageScore, ScoringError>;

    fn name(&self) -> &str;
}

/// Tries each LLM in order; a reply that cannot be read as a score counts as
/// a failure and moves on to the next one.
pub struct ScorerChain {
    providers: Vec<Box<dyn LLMAdapter>>,
}

impl ScorerChain {
    pub fn new(providers: Vec<Box<dyn LLMAdapter>>) -> Self {
        Self { providers }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let timeout = Duration::from_secs(config.scoring.timeout_secs.max(1));
        let mut providers: Vec<Box<dyn LLMAdapter>> = Vec::new();

        for kind in &config.scoring.providers {
            match kind {
                ScorerKind::Chat => match config.scoring_key() {
                    Some(key) => {
                        providers.push(Box::new(ChatAdapter::new(
                            &config.scoring.base_url,
                            config.scoring.model.clone(),
                            key,
                            timeout,
                        )));
                        tracing::info!("Scoring: chat adapter loaded ({})", config.scoring.base_url);
                    }
                    None => tracing::warn!("Scoring: chat adapter skipped, no API key"),
                },
                ScorerKind::Ollama => {
                    providers.push(Box::new(OllamaAdapter::new(
                        &config.scoring.ollama_url,
                        config.scoring.ollama_model.clone(),
                        timeout,
                    )));
                    tracing::info!("Scoring: Ollama adapter loaded (local fallback)");
                }
            }
        }

        tracing::info!("Scorer chain: {} providers available", providers.len());
        Self { providers }
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }
}

#[async_trait]
impl LanguageScorer for ScorerChain {
    async fn score(&self, request: &ScoringRequest) -> Result<LanguageScore, ScoringError> {
        if request.transcript.trim().is_empty() {
            return Err(ScoringError::EmptyTranscript);
        }

        let prompt = build_prompt(request);
        let mut last_error = ScoringError::NoProviders;

        for provider in &self.providers {
            tracing::info!("Scoring: trying provider '{}'...", provider.name());

            match provider.generate(&prompt).await {
                Ok(text) => match parse::parse_score(&text, provider.name()) {
                    Ok(score) => {
                        tracing::info!(
                            "Scoring: '{}' returned band {:.1}",
                            provider.name(),
                            score.band
                        );
                        return Ok(score);
                    }
                    Err(reason) => {
                        tracing::warn!("Scoring: '{}' reply unusable: {}", provider.name(), reason);
                        last_error = ScoringError::Unparseable {
                            provider: provider.name().to_string(),
                            reason,
                        };
                    }
                },
                Err(e) => {
                    tracing::warn!("Scoring: '{}' failed: {:?}", provider.name(), e);
                    last_error = ScoringError::Provider {
                        provider: provider.name().to_string(),
                        source: e,
                    };
                }
            }
        }

        tracing::error!("Scoring: all providers failed");
        Err(last_error)
    }

    fn name(&self) -> &str {
        "scorer-chain"
    }
}
