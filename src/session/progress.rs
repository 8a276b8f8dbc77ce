use super::model::{QuestionKey, QuestionStatus};
use super::state::PartPhase;
use crate::submission::SubmissionStatus;
use serde::Serialize;

/// Point-in-time view of a session for display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    pub session_id: String,
    pub part_index: usize,
    pub part_number: u8,
    pub part_count: usize,
    pub phase: PartPhase,
    pub session_remaining_secs: u64,
    pub preparation_remaining_secs: Option<u64>,
    pub recording_remaining_secs: Option<u64>,
    pub questions: Vec<QuestionProgress>,
    pub submission: SubmissionStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionProgress {
    pub key: QuestionKey,
    pub text: String,
    pub status: QuestionStatus,
    pub remaining_budget_secs: u64,
    pub band: Option<f32>,
}

impl SessionProgress {
    pub fn question(&self, key: QuestionKey) -> Option<&QuestionProgress> {
        self.questions.iter().find(|q| q.key == key)
    }
}
