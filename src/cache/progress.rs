use crate::session::QuestionKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reload marker for one session: how far it got and when its clock started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMarker {
    pub session_id: String,
    pub paper_id: String,
    pub part_index: usize,
    pub started_at: DateTime<Utc>,
    pub submitted: bool,
    pub updated_at: DateTime<Utc>,
}

impl ProgressMarker {
    pub fn new(session_id: &str, paper_id: &str, started_at: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.to_string(),
            paper_id: paper_id.to_string(),
            part_index: 0,
            started_at,
            submitted: false,
            updated_at: Utc::now(),
        }
    }

    /// Combines a stored marker with a newer write. Part index and the
    /// submitted flag only move forward; the original start time is kept.
    pub fn merge(&self, newer: &ProgressMarker) -> ProgressMarker {
        ProgressMarker {
            session_id: self.session_id.clone(),
            paper_id: self.paper_id.clone(),
            part_index: self.part_index.max(newer.part_index),
            started_at: self.started_at.min(newer.started_at),
            submitted: self.submitted || newer.submitted,
            updated_at: newer.updated_at.max(self.updated_at),
        }
    }
}

/// Recording time charged to one question across every take, superseded
/// ones included.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetUsage {
    pub question: QuestionKey,
    pub consumed_secs: f32,
}
