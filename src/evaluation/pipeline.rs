use super::result::{EvaluationResult, ReasonCode, SubScores};
use crate::recording::Recording;
use crate::scoring::{clarity, LanguageScorer, ScoringError, ScoringRequest};
use crate::stt::{STTError, SpeechAssessor};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Transcription failed: {0}")]
    Transcription(#[from] STTError),

    #[error("Scoring failed: {0}")]
    Scoring(#[from] ScoringError),
}

/// Two stages per recording: transcription with acoustic scoring, then
/// language scoring of the tidied transcript.
pub struct EvaluationPipeline {
    assessor: Arc<dyn SpeechAssessor>,
    scorer: Arc<dyn LanguageScorer>,
    level: String,
}

impl EvaluationPipeline {
    pub fn new(
        assessor: Arc<dyn SpeechAssessor>,
        scorer: Arc<dyn LanguageScorer>,
        level: impl Into<String>,
    ) -> Self {
        Self {
            assessor,
            scorer,
            level: level.into(),
        }
    }

    pub async fn try_evaluate(
        &self,
        recording: &Recording,
        prompt_text: &str,
    ) -> Result<EvaluationResult, PipelineError> {
        // Answers are spontaneous, so there is no reference text to align against.
        let assessment = self.assessor.assess(recording, None).await?;
        let transcript = clarity::transform(&assessment.transcript);

        let score = self
            .scorer
            .score(&ScoringRequest {
                prompt_text: prompt_text.to_string(),
                transcript: transcript.clone(),
                level: self.level.clone(),
            })
            .await?;

        Ok(EvaluationResult {
            question: recording.question,
            recording_id: Some(recording.id),
            transcript,
            band: score.band,
            reason: None,
            reason_detail: None,
            sub_scores: SubScores::from_parts(&assessment, &score),
            feedback: score.feedback,
            strengths: score.strengths,
            improvements: score.improvements,
            duration_secs: recording.duration_secs,
            evaluated_at: Utc::now(),
        })
    }

    /// Never fails: a stage error becomes a zero-band result with an
    /// `evaluation-error` reason.
    pub async fn evaluate(&self, recording: &Recording, prompt_text: &str) -> EvaluationResult {
        match self.try_evaluate(recording, prompt_text).await {
            Ok(result) => {
                info!(
                    "Evaluated {} (recording {}): band {:.1}",
                    result.question, recording.id, result.band
                );
                result
            }
            Err(e) => {
                warn!("Evaluation of {} failed: {}", recording.question, e);
                let mut result = EvaluationResult::zero(
                    recording.question,
                    Some(recording.id),
                    ReasonCode::EvaluationError,
                    Some(e.to_string()),
                );
                result.duration_secs = recording.duration_secs;
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::AudioEncoding;
    use crate::scoring::{CategoryScores, LanguageScore};
    use crate::session::QuestionKey;
    use crate::stt::SpeechAssessment;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct FixedAssessor(Option<&'static str>);

    #[async_trait]
    impl SpeechAssessor for FixedAssessor {
        async fn assess(
            &self,
            recording: &Recording,
            _reference: Option<&str>,
        ) -> Result<SpeechAssessment, STTError> {
            let transcript = self.0.ok_or(STTError::MissingTranscript)?;
            Ok(SpeechAssessment {
                transcript: transcript.to_string(),
                fluency: Some(80.0),
                pronunciation: None,
                overall: Some(70.0),
                duration_secs: recording.duration_secs,
                provider: "fixed".into(),
            })
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct EchoScorer;

    #[async_trait]
    impl LanguageScorer for EchoScorer {
        async fn score(&self, request: &ScoringRequest) -> Result<LanguageScore, ScoringError> {
            Ok(LanguageScore {
                band: 6.5,
                feedback: format!("{} / {}", request.level, request.prompt_text),
                categories: Some(CategoryScores {
                    grammar: Some(6.0),
                    ..Default::default()
                }),
                strengths: vec!["range".into()],
                improvements: Vec::new(),
                provider: "echo".into(),
            })
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    fn recording() -> Recording {
        Recording {
            id: Uuid::new_v4(),
            question: QuestionKey::new(1, 2),
            clip: Arc::new(vec![0; 32]),
            encoding: AudioEncoding::Wav,
            duration_secs: 12.5,
            captured_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn combines_both_stages() {
        let pipeline = EvaluationPipeline::new(
            Arc::new(FixedAssessor(Some("i like   it here"))),
            Arc::new(EchoScorer),
            "C1",
        );
        let rec = recording();
        let result = pipeline.evaluate(&rec, "Do you like your town?").await;

        assert_eq!(result.band, 6.5);
        assert_eq!(result.transcript, "I like it here.");
        assert_eq!(result.feedback, "C1 / Do you like your town?");
        assert_eq!(result.recording_id, Some(rec.id));
        assert_eq!(result.duration_secs, 12.5);
        let sub = result.sub_scores.unwrap();
        assert_eq!(sub.fluency, Some(80.0));
        assert_eq!(sub.categories.grammar, Some(6.0));
        assert!(result.reason.is_none());
    }

    #[tokio::test]
    async fn stage_failure_becomes_zero_with_reason() {
        let pipeline = EvaluationPipeline::new(
            Arc::new(FixedAssessor(None)),
            Arc::new(EchoScorer),
            "B2",
        );
        let rec = recording();

        assert!(matches!(
            pipeline.try_evaluate(&rec, "q").await,
            Err(PipelineError::Transcription(STTError::MissingTranscript))
        ));
        let result = pipeline.evaluate(&rec, "q").await;
        assert_eq!(result.band, 0.0);
        assert_eq!(result.reason, Some(ReasonCode::EvaluationError));
        assert!(result.reason_detail.unwrap().contains("no transcript"));
    }
}
