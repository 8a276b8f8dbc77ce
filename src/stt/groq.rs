// Groq Whisper transcription adapter (fallback, transcript only)

use super::{STTError, SpeechAssessment, SpeechAssessor};
use crate::recording::Recording;
use async_trait::async_trait;
use regex::Regex;
use reqwest::multipart;
use std::sync::OnceLock;
use std::time::Duration;

const GROQ_API_URL: &str = "https://api.groq.com/openai/v1/audio/transcriptions";
const MODEL: &str = "whisper-large-v3";
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;
const LANGUAGE: &str = "en";
const RESPONSE_FORMAT: &str = "text";

pub struct GroqAdapter {
    api_key: String,
    endpoint: String,
    client: reqwest::Client,
}

impl GroqAdapter {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        tracing::info!("Groq adapter initialized");

        Self {
            api_key,
            endpoint: GROQ_API_URL.to_string(),
            client,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn clean_transcript(text: &str) -> String {
        static TS_RE: OnceLock<Option<Regex>> = OnceLock::new();
        let re = TS_RE.get_or_init(|| Regex::new(r"\[\d{2}:\d{2}.*?\]|\(\d{2}:\d{2}\)").ok());
        let stripped = match re {
            Some(re) => re.replace_all(text, "").into_owned(),
            None => text.to_string(),
        };
        stripped.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

#[async_trait]
impl SpeechAssessor for GroqAdapter {
    async fn assess(
        &self,
        recording: &Recording,
        reference: Option<&str>,
    ) -> Result<SpeechAssessment, STTError> {
        if recording.clip.is_empty() {
            return Err(STTError::InvalidAudio);
        }
        if recording.clip.len() > MAX_UPLOAD_BYTES {
            tracing::warn!(
                "Clip too large for Groq: {} bytes > {}",
                recording.clip.len(),
                MAX_UPLOAD_BYTES
            );
            return Err(STTError::AudioTooLarge(recording.clip.len()));
        }

        tracing::info!(
            "Groq STT: transcribing {:.1}s audio for {}...",
            recording.duration_secs,
            recording.question
        );

        let file_part = multipart::Part::bytes(recording.clip.to_vec())
            .file_name(format!("{}.{}", recording.question, recording.encoding.tag()))
            .mime_str(recording.encoding.mime())
            .map_err(|e| STTError::ProviderError(e.to_string()))?;

        let mut form = multipart::Form::new()
            .text("model", MODEL)
            .text("response_format", RESPONSE_FORMAT)
            .text("language", LANGUAGE)
            .part("file", file_part);
        if let Some(reference) = reference {
            form = form.text("prompt", reference.to_string());
        }

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(STTError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            return Err(STTError::from_status(status, error_text));
        }

        let raw_text = resp
            .text()
            .await
            .map_err(|e| STTError::ProviderError(e.to_string()))?;
        let cleaned = Self::clean_transcript(&raw_text);

        if cleaned.is_empty() {
            return Err(STTError::MissingTranscript);
        }

        Ok(SpeechAssessment {
            transcript: cleaned,
            fluency: None,
            pronunciation: None,
            overall: None,
            duration_secs: recording.duration_secs,
            provider: "groq".to_string(),
        })
    }

    fn name(&self) -> &str {
        "Groq Whisper"
    }
}
