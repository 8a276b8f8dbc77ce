use crate::scoring::{CategoryScores, LanguageScore};
use crate::session::QuestionKey;
use crate::stt::SpeechAssessment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Why a question scored zero without a real evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonCode {
    NotAttempted,
    EvaluationError,
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReasonCode::NotAttempted => f.write_str("not-attempted"),
            ReasonCode::EvaluationError => f.write_str("evaluation-error"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubScores {
    pub fluency: Option<f32>,
    pub pronunciation: Option<f32>,
    pub acoustic_overall: Option<f32>,
    #[serde(flatten)]
    pub categories: CategoryScores,
}

impl SubScores {
    pub fn from_parts(assessment: &SpeechAssessment, score: &LanguageScore) -> Option<Self> {
        let sub = SubScores {
            fluency: assessment.fluency,
            pronunciation: assessment.pronunciation,
            acoustic_overall: assessment.overall,
            categories: score.categories.clone().unwrap_or_default(),
        };
        if sub == SubScores::default() {
            None
        } else {
            Some(sub)
        }
    }
}

/// Outcome of evaluating one recording. Never mutated; a re-recording
/// produces a new result that replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub question: QuestionKey,
    pub recording_id: Option<Uuid>,
    pub transcript: String,
    pub band: f32,
    pub reason: Option<ReasonCode>,
    pub reason_detail: Option<String>,
    pub feedback: String,
    pub sub_scores: Option<SubScores>,
    pub strengths: Vec<String>,
    pub improvements: Vec<String>,
    pub duration_secs: f32,
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluationResult {
    /// Zero-score placeholder carrying the reason it is zero.
    pub fn zero(
        question: QuestionKey,
        recording_id: Option<Uuid>,
        reason: ReasonCode,
        detail: Option<String>,
    ) -> Self {
        let feedback = match reason {
            ReasonCode::NotAttempted => "No answer was recorded for this question.".to_string(),
            ReasonCode::EvaluationError => {
                "This answer could not be evaluated and was scored 0.".to_string()
            }
        };
        Self {
            question,
            recording_id,
            transcript: String::new(),
            band: 0.0,
            reason: Some(reason),
            reason_detail: detail,
            feedback,
            sub_scores: None,
            strengths: Vec::new(),
            improvements: Vec::new(),
            duration_secs: 0.0,
            evaluated_at: Utc::now(),
        }
    }

    pub fn not_attempted(question: QuestionKey) -> Self {
        Self::zero(question, None, ReasonCode::NotAttempted, None)
    }

    pub fn is_failed(&self) -> bool {
        self.reason == Some(ReasonCode::EvaluationError)
    }
}
