use crate::aggregate::{self, ReasonCode};
use crate::evaluation::{EvaluationResult, SubScores};
use crate::session::paper::InteractionMode;
use crate::session::{Part, QuestionKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// What caused the session to be finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubmitTrigger {
    Explicit,
    TimeExpired,
    Exit,
}

impl fmt::Display for SubmitTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitTrigger::Explicit => f.write_str("explicit submit"),
            SubmitTrigger::TimeExpired => f.write_str("time expired"),
            SubmitTrigger::Exit => f.write_str("exit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResult {
    pub id: String,
    pub number: u16,
    pub text: String,
    pub score: f32,
    pub feedback: String,
    pub transcript: String,
    /// Seconds of audio the score is based on.
    pub duration: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_scores: Option<SubScores>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartResult {
    pub number: u8,
    pub mode: InteractionMode,
    pub score: f32,
    pub questions: Vec<QuestionResult>,
}

/// The document handed to the result store. Frozen once assembled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResult {
    pub session_id: String,
    pub paper_id: String,
    pub total_elapsed_secs: u64,
    pub overall_score: f32,
    pub trigger: SubmitTrigger,
    pub submitted_at: DateTime<Utc>,
    pub parts: Vec<PartResult>,
}

impl SessionResult {
    pub fn question(&self, key: QuestionKey) -> Option<&QuestionResult> {
        self.parts
            .iter()
            .find(|p| p.number == key.part)?
            .questions
            .iter()
            .find(|q| q.number == key.question)
    }

    pub fn question_count(&self) -> usize {
        self.parts.iter().map(|p| p.questions.len()).sum()
    }
}

/// Builds the result tree from whatever evaluations exist. Submit and time
/// expiry both go through here. A recorded question without a result counts
/// as an evaluation error; an unrecorded one as not attempted.
pub fn assemble(
    session_id: &str,
    paper_id: &str,
    parts: &[Part],
    results: &HashMap<QuestionKey, Arc<EvaluationResult>>,
    elapsed: Duration,
    trigger: SubmitTrigger,
) -> SessionResult {
    build(session_id, paper_id, parts, elapsed, trigger, |question| {
        match (results.get(&question.key), &question.recording) {
            (Some(result), _) => result.as_ref().clone(),
            (None, Some(recording)) => EvaluationResult::zero(
                question.key,
                Some(recording.id),
                ReasonCode::EvaluationError,
                Some("recording was never evaluated".to_string()),
            ),
            (None, None) => EvaluationResult::not_attempted(question.key),
        }
    })
}

/// Result tree for an abandoned session: every question is scored zero as
/// not attempted, whatever was recorded.
pub fn assemble_abandoned(
    session_id: &str,
    paper_id: &str,
    parts: &[Part],
    elapsed: Duration,
) -> SessionResult {
    build(session_id, paper_id, parts, elapsed, SubmitTrigger::Exit, |question| {
        EvaluationResult::not_attempted(question.key)
    })
}

fn build<F>(
    session_id: &str,
    paper_id: &str,
    parts: &[Part],
    elapsed: Duration,
    trigger: SubmitTrigger,
    mut result_for: F,
) -> SessionResult
where
    F: FnMut(&crate::session::Question) -> EvaluationResult,
{
    let mut part_results = Vec::with_capacity(parts.len());
    let mut part_scores = Vec::with_capacity(parts.len());

    for part in parts {
        let mut scores = Vec::with_capacity(part.questions.len());
        let mut questions = Vec::with_capacity(part.questions.len());

        for question in &part.questions {
            let result = result_for(question);
            let score = aggregate::question_score(question.key, Some(&result));
            scores.push(score);
            questions.push(QuestionResult {
                id: question.key.to_string(),
                number: question.key.question,
                text: question.text.clone(),
                score: score.band,
                feedback: result.feedback,
                transcript: result.transcript,
                duration: result.duration_secs,
                reason: score.reason,
                reason_detail: result.reason_detail,
                sub_scores: result.sub_scores,
            });
        }

        let part_score = aggregate::part_score(&scores);
        part_scores.push(part_score);
        part_results.push(PartResult {
            number: part.number,
            mode: part.mode,
            score: part_score,
            questions,
        });
    }

    SessionResult {
        session_id: session_id.to_string(),
        paper_id: paper_id.to_string(),
        total_elapsed_secs: elapsed.as_secs(),
        overall_score: aggregate::session_score(&part_scores),
        trigger,
        submitted_at: Utc::now(),
        parts: part_results,
    }
}
