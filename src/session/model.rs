use super::paper::{CueCard, InteractionMode, PartSpec};
use super::state::PartPhase;
use crate::config::TimingConfig;
use crate::recording::Recording;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// The number given to the synthetic question of a prepared monologue.
pub const MONOLOGUE_QUESTION: u16 = 1;

/// Identifies one question across the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QuestionKey {
    pub part: u8,
    pub question: u16,
}

impl QuestionKey {
    pub const fn new(part: u8, question: u16) -> Self {
        Self { part, question }
    }
}

impl fmt::Display for QuestionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}-q{}", self.part, self.question)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseKeyError(pub String);

impl fmt::Display for ParseKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid question key '{}'", self.0)
    }
}

impl std::error::Error for ParseKeyError {}

impl FromStr for QuestionKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseKeyError(s.to_string());
        let (part, question) = s.split_once('-').ok_or_else(err)?;
        let part = part
            .strip_prefix('p')
            .and_then(|p| p.parse::<u8>().ok())
            .ok_or_else(err)?;
        let question = question
            .strip_prefix('q')
            .and_then(|q| q.parse::<u16>().ok())
            .ok_or_else(err)?;
        Ok(QuestionKey::new(part, question))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionStatus {
    Unattempted,
    Recorded,
    Evaluating,
    Evaluated,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Question {
    pub key: QuestionKey,
    pub text: String,
    pub budget: Duration,
    /// Captured time across every recording of this question, superseded ones included.
    pub consumed: Duration,
    pub recording: Option<Arc<Recording>>,
}

impl Question {
    pub fn new(key: QuestionKey, text: impl Into<String>, budget: Duration) -> Self {
        Self {
            key,
            text: text.into(),
            budget,
            consumed: Duration::ZERO,
            recording: None,
        }
    }

    pub fn remaining_budget(&self) -> Duration {
        self.budget.saturating_sub(self.consumed)
    }

    pub fn is_attempted(&self) -> bool {
        self.recording.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Part {
    pub number: u8,
    pub mode: InteractionMode,
    pub audio_prompt: Option<String>,
    pub instructions: Option<String>,
    pub cue_card: Option<CueCard>,
    pub preparation: Duration,
    pub questions: Vec<Question>,
    pub phase: PartPhase,
    pub preparation_done: bool,
}

impl Part {
    /// Builds the runtime part, filling budgets from the timing config. A
    /// prepared monologue gets one synthetic question from its cue card.
    pub fn from_spec(spec: &PartSpec, timing: &TimingConfig) -> Self {
        let questions = match (spec.mode, &spec.cue_card) {
            (InteractionMode::PreparedMonologue, Some(card)) => vec![Question::new(
                QuestionKey::new(spec.number, MONOLOGUE_QUESTION),
                card.prompt_text(),
                timing.monologue_budget(),
            )],
            (mode, _) => spec
                .questions
                .iter()
                .map(|q| {
                    let default_budget = if mode == InteractionMode::PreparedMonologue {
                        timing.monologue_budget()
                    } else {
                        timing.question_budget()
                    };
                    Question::new(
                        QuestionKey::new(spec.number, q.number),
                        q.text.clone(),
                        q.budget_secs.map(Duration::from_secs).unwrap_or(default_budget),
                    )
                })
                .collect(),
        };

        let preparation = if spec.mode.has_preparation() {
            spec.preparation_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| timing.preparation())
        } else {
            Duration::ZERO
        };

        Self {
            number: spec.number,
            mode: spec.mode,
            audio_prompt: spec.audio_prompt.clone(),
            instructions: spec.instructions.clone(),
            cue_card: spec.cue_card.clone(),
            preparation,
            questions,
            phase: PartPhase::Idle,
            preparation_done: !spec.mode.has_preparation(),
        }
    }

    pub fn question(&self, number: u16) -> Option<&Question> {
        self.questions.iter().find(|q| q.key.question == number)
    }

    pub fn question_mut(&mut self, number: u16) -> Option<&mut Question> {
        self.questions.iter_mut().find(|q| q.key.question == number)
    }

    pub fn prompt_for(&self, number: u16) -> Option<&str> {
        self.question(number).map(|q| q.text.as_str())
    }
}
