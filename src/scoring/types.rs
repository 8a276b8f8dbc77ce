use serde::{Deserialize, Serialize};

/// What the language scorer is asked to judge.
#[derive(Debug, Clone)]
pub struct ScoringRequest {
    pub prompt_text: String,
    pub transcript: String,
    /// CEFR label used as a calibration hint.
    pub level: String,
}

/// Criterion bands (0-9) as returned by the scorer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryScores {
    pub task_response: Option<f32>,
    pub coherence: Option<f32>,
    pub lexical_resource: Option<f32>,
    pub grammar: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageScore {
    /// 0-9 in half-point steps.
    pub band: f32,
    pub feedback: String,
    pub categories: Option<CategoryScores>,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub provider: String,
}

/// LLM adapter errors
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Invalid response from LLM")]
    InvalidResponse,

    #[error("Timeout")]
    Timeout,
}

impl LLMError {
    pub(crate) fn from_reqwest(provider: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LLMError::Timeout
        } else {
            LLMError::NetworkError(format!("{}: {}", provider, err))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("No scoring providers configured")]
    NoProviders,

    #[error("Scorer {provider} failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: LLMError,
    },

    #[error("Scorer {provider} returned an unusable score: {reason}")]
    Unparseable { provider: String, reason: String },

    #[error("Nothing to score: transcript is empty")]
    EmptyTranscript,
}
