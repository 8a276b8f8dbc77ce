// Speech assessment adapters: transcript plus acoustic scoring for one clip

mod assessment;
mod groq;
mod types;

pub use assessment::HttpAssessmentAdapter;
pub use groq::GroqAdapter;
pub use types::{STTError, SpeechAssessment};

use crate::recording::Recording;
use async_trait::async_trait;

/// Unified transcription + acoustic scoring trait
#[async_trait]
pub trait SpeechAssessor: Send + Sync {
    /// Transcribe and score one encoded clip. `reference` is the text the
    /// speaker was expected to say, when there is one.
    async fn assess(
        &self,
        recording: &Recording,
        reference: Option<&str>,
    ) -> Result<SpeechAssessment, STTError>;

    /// Get provider name
    fn name(&self) -> &str;
}
