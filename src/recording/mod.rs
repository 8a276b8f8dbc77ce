//! Recording capture unit.
//!
//! Owns the single audio input of a session. A finished take is trimmed to
//! the question's remaining budget, encoded, measured from the encoded bytes
//! and written to the clip cache before it is handed back.

use crate::audio::{wav, AudioSource, SourceError};
use crate::cache::{CacheError, ClipCache};
use crate::session::QuestionKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Microphone unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Recording is empty or unreadable: {0}")]
    EmptyRecording(String),

    #[error("No capture in progress")]
    NotRecording,

    #[error("Audio source failed: {0}")]
    Source(SourceError),

    #[error("Failed to cache clip: {0}")]
    Cache(#[from] CacheError),
}

impl From<SourceError> for CaptureError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::DeviceUnavailable(msg) => CaptureError::DeviceUnavailable(msg),
            SourceError::NotRecording => CaptureError::NotRecording,
            other => CaptureError::Source(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioEncoding {
    Wav,
    Webm,
    Ogg,
    Mp3,
}

impl AudioEncoding {
    pub fn tag(&self) -> &'static str {
        match self {
            AudioEncoding::Wav => "wav",
            AudioEncoding::Webm => "webm",
            AudioEncoding::Ogg => "ogg",
            AudioEncoding::Mp3 => "mp3",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            AudioEncoding::Wav => "audio/wav",
            AudioEncoding::Webm => "audio/webm",
            AudioEncoding::Ogg => "audio/ogg",
            AudioEncoding::Mp3 => "audio/mpeg",
        }
    }
}

/// One captured take. The clip bytes travel beside the metadata and are not
/// part of its serialized form.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    pub id: Uuid,
    pub question: QuestionKey,
    #[serde(skip)]
    pub clip: Arc<Vec<u8>>,
    pub encoding: AudioEncoding,
    pub duration_secs: f32,
    pub captured_at: DateTime<Utc>,
}

impl Recording {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f32(self.duration_secs.max(0.0))
    }
}

struct ActiveCapture {
    question: QuestionKey,
    budget: Duration,
    started_at: DateTime<Utc>,
}

pub struct CaptureUnit {
    session_id: String,
    source: Box<dyn AudioSource>,
    cache: Arc<ClipCache>,
    active: Option<ActiveCapture>,
}

impl CaptureUnit {
    pub fn new(session_id: impl Into<String>, source: Box<dyn AudioSource>, cache: Arc<ClipCache>) -> Self {
        Self {
            session_id: session_id.into(),
            source,
            cache,
            active: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_question(&self) -> Option<QuestionKey> {
        self.active.as_ref().map(|a| a.question)
    }

    /// Opens the input for `question`. A capture already running is stopped
    /// and returned first, so only one question is ever live.
    pub async fn start(
        &mut self,
        question: QuestionKey,
        budget: Duration,
    ) -> Result<Option<Recording>, CaptureError> {
        let previous = if self.active.is_some() {
            match self.stop().await {
                Ok(recording) => Some(recording),
                Err(CaptureError::EmptyRecording(reason)) => {
                    warn!("Discarded empty take before starting {}: {}", question, reason);
                    None
                }
                Err(e) => return Err(e),
            }
        } else {
            None
        };

        self.source.start()?;
        self.active = Some(ActiveCapture {
            question,
            budget,
            started_at: Utc::now(),
        });
        info!(
            "Capture started for {} on '{}' (budget {:.1}s)",
            question,
            self.source.name(),
            budget.as_secs_f32()
        );
        Ok(previous)
    }

    /// Closes the input and returns the cached take.
    pub async fn stop(&mut self) -> Result<Recording, CaptureError> {
        let active = self.active.take().ok_or(CaptureError::NotRecording)?;
        let mut buffer = self.source.stop()?;

        if buffer.truncate_to(active.budget) {
            info!(
                "Take for {} trimmed to its {:.1}s budget",
                active.question,
                active.budget.as_secs_f32()
            );
        }

        let clip = wav::encode(&buffer);
        let measured = wav::inspect(&clip).map_err(|e| CaptureError::EmptyRecording(e.to_string()))?;
        if measured.frames == 0 || measured.duration_secs <= 0.0 {
            warn!("Take for {} captured no audio", active.question);
            return Err(CaptureError::EmptyRecording(
                "no audio frames were captured".to_string(),
            ));
        }

        let recording = Recording {
            id: Uuid::new_v4(),
            question: active.question,
            clip: Arc::new(clip),
            encoding: AudioEncoding::Wav,
            duration_secs: measured.duration_secs,
            captured_at: active.started_at,
        };
        self.cache.put(&self.session_id, &recording).await?;

        info!(
            "Capture stopped for {}: {:.2}s, {} bytes",
            recording.question,
            recording.duration_secs,
            recording.clip.len()
        );
        Ok(recording)
    }

    /// Stops the input without keeping what was captured.
    pub fn abandon(&mut self) {
        if let Some(active) = self.active.take() {
            if let Err(e) = self.source.stop() {
                warn!("Failed to release input for {}: {}", active.question, e);
            }
            info!("Capture for {} abandoned", active.question);
        }
    }

    /// Clips cached by an earlier run of this session.
    pub async fn recover(&self) -> Result<Vec<Recording>, CaptureError> {
        Ok(self.cache.list(&self.session_id).await?)
    }
}
