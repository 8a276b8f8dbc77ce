use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transcript plus acoustic sub-scores for one clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechAssessment {
    pub transcript: String,
    /// Acoustic sub-scores, when the provider measures them (0-100 scale).
    pub fluency: Option<f32>,
    pub pronunciation: Option<f32>,
    pub overall: Option<f32>,
    pub duration_secs: f32,
    /// Provider name (e.g., "assessment", "groq")
    pub provider: String,
}

/// Transcription error types with retry classification
#[derive(Debug, Error)]
pub enum STTError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Request timeout")]
    TimeoutError,

    #[error("Clip too large for provider ({0} bytes)")]
    AudioTooLarge(usize),

    #[error("Invalid audio format")]
    InvalidAudio,

    #[error("Authentication failed")]
    AuthenticationError,

    #[error("Rate limit exceeded")]
    RateLimitError,

    #[error("Server error {0}: {1}")]
    ServerError(u16, String),

    #[error("Response carried no transcript")]
    MissingTranscript,

    #[error("Provider error: {0}")]
    ProviderError(String),
}

impl STTError {
    /// Returns true if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            STTError::NetworkError(_)
                | STTError::TimeoutError
                | STTError::RateLimitError
                | STTError::ServerError(..)
        )
    }

    pub(crate) fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            STTError::TimeoutError
        } else {
            STTError::NetworkError(err.to_string())
        }
    }

    /// Maps a non-success status onto the error taxonomy.
    pub(crate) fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => STTError::AuthenticationError,
            413 => STTError::AudioTooLarge(0),
            415 | 422 => STTError::InvalidAudio,
            429 => STTError::RateLimitError,
            code if status.is_server_error() => STTError::ServerError(code, body),
            code => STTError::ProviderError(format!("HTTP {}: {}", code, body)),
        }
    }
}

impl crate::orchestrator::retry::Retryable for STTError {
    fn is_retryable(&self) -> bool {
        STTError::is_retryable(self)
    }
}
