// HTTP speech assessment service (primary): transcript plus fluency,
// pronunciation and overall acoustic scores

use super::{STTError, SpeechAssessment, SpeechAssessor};
use crate::recording::Recording;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const LANGUAGE: &str = "en";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AssessmentRequest<'a> {
    audio: String,
    encoding: &'a str,
    language: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_text: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssessmentResponse {
    #[serde(default, alias = "text", alias = "displayText")]
    transcript: Option<String>,
    #[serde(default, alias = "fluencyScore")]
    fluency: Option<f32>,
    #[serde(default, alias = "pronunciationScore", alias = "pronScore")]
    pronunciation: Option<f32>,
    #[serde(default, alias = "overallScore", alias = "accuracyScore")]
    overall: Option<f32>,
}

pub struct HttpAssessmentAdapter {
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpAssessmentAdapter {
    pub fn new(url: String, api_key: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        tracing::info!("Assessment adapter initialized ({})", url);

        Self {
            url,
            api_key,
            client,
        }
    }
}

#[async_trait]
impl SpeechAssessor for HttpAssessmentAdapter {
    async fn assess(
        &self,
        recording: &Recording,
        reference: Option<&str>,
    ) -> Result<SpeechAssessment, STTError> {
        if recording.clip.is_empty() {
            return Err(STTError::InvalidAudio);
        }

        tracing::info!(
            "Assessment: scoring {} ({:.1}s, {})",
            recording.question,
            recording.duration_secs,
            recording.encoding.tag()
        );

        let body = AssessmentRequest {
            audio: BASE64_STANDARD.encode(recording.clip.as_slice()),
            encoding: recording.encoding.tag(),
            language: LANGUAGE,
            reference_text: reference,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let resp = request.send().await.map_err(STTError::from_reqwest)?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            return Err(STTError::from_status(status, error_text));
        }

        let parsed: AssessmentResponse = resp
            .json()
            .await
            .map_err(|e| STTError::ProviderError(format!("Assessment parse: {}", e)))?;

        let transcript = parsed
            .transcript
            .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
            .filter(|t| !t.is_empty())
            .ok_or(STTError::MissingTranscript)?;

        Ok(SpeechAssessment {
            transcript,
            fluency: parsed.fluency,
            pronunciation: parsed.pronunciation,
            overall: parsed.overall,
            duration_secs: recording.duration_secs,
            provider: "assessment".to_string(),
        })
    }

    fn name(&self) -> &str {
        "Speech Assessment"
    }
}
