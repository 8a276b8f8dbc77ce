use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaperError {
    #[error("Failed to read test paper: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse test paper: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Test paper has no parts")]
    NoParts,

    #[error("Part {0} has no questions")]
    EmptyPart(u8),

    #[error("Part number {0} appears more than once")]
    DuplicatePart(u8),

    #[error("Question {question} appears more than once in part {part}")]
    DuplicateQuestion { part: u8, question: u16 },

    #[error("Prepared monologue part {0} needs a cue card or exactly one question")]
    MonologueShape(u8),

    #[error("Question {question} in part {part} has a zero recording budget")]
    ZeroBudget { part: u8, question: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InteractionMode {
    DirectQuestions,
    PreparedMonologue,
    DiscussionQuestions,
}

impl InteractionMode {
    pub fn has_preparation(&self) -> bool {
        matches!(self, InteractionMode::PreparedMonologue)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CueCard {
    pub topic: String,
    #[serde(default)]
    pub bullet_points: Vec<String>,
}

impl CueCard {
    /// The text a candidate sees and the scorer is prompted with.
    pub fn prompt_text(&self) -> String {
        if self.bullet_points.is_empty() {
            return self.topic.trim().to_string();
        }
        let bullets = self
            .bullet_points
            .iter()
            .map(|b| format!("- {}", b.trim()))
            .collect::<Vec<_>>()
            .join("\n");
        format!("{}\nYou should say:\n{}", self.topic.trim(), bullets)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSpec {
    pub number: u16,
    pub text: String,
    #[serde(default)]
    pub budget_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartSpec {
    pub number: u8,
    pub mode: InteractionMode,
    #[serde(default)]
    pub audio_prompt: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub preparation_secs: Option<u64>,
    #[serde(default)]
    pub cue_card: Option<CueCard>,
    #[serde(default)]
    pub questions: Vec<QuestionSpec>,
}

/// A test definition as authored, before any timing defaults are applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPaper {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub duration_secs: Option<u64>,
    pub parts: Vec<PartSpec>,
}

impl TestPaper {
    pub fn load(path: &Path) -> Result<Self, PaperError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, PaperError> {
        let paper: TestPaper = serde_json::from_str(raw)?;
        paper.validate()?;
        Ok(paper)
    }

    pub fn validate(&self) -> Result<(), PaperError> {
        if self.parts.is_empty() {
            return Err(PaperError::NoParts);
        }

        let mut part_numbers = HashSet::new();
        for part in &self.parts {
            if !part_numbers.insert(part.number) {
                return Err(PaperError::DuplicatePart(part.number));
            }

            if part.mode == InteractionMode::PreparedMonologue {
                let shaped = match part.cue_card {
                    Some(_) => part.questions.is_empty(),
                    None => part.questions.len() == 1,
                };
                if !shaped {
                    return Err(PaperError::MonologueShape(part.number));
                }
                continue;
            }

            if part.questions.is_empty() {
                return Err(PaperError::EmptyPart(part.number));
            }

            let mut question_numbers = HashSet::new();
            for question in &part.questions {
                if !question_numbers.insert(question.number) {
                    return Err(PaperError::DuplicateQuestion {
                        part: part.number,
                        question: question.number,
                    });
                }
                if question.budget_secs == Some(0) {
                    return Err(PaperError::ZeroBudget {
                        part: part.number,
                        question: question.number,
                    });
                }
            }
        }
        Ok(())
    }
}
