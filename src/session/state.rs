use super::model::QuestionKey;
use super::paper::InteractionMode;
use serde::Serialize;
use std::fmt;

/// Lifecycle of one part.
///
/// Prepared monologues run `Idle -> PreparationCountdown -> Recording ->
/// Evaluating -> Evaluated`. Question parts skip the countdown and may go
/// between `Idle` and `Recording` once per take. `Evaluating` is entered only
/// when the session leaves the part, and nothing leaves `Evaluated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case", tag = "phase")]
pub enum PartPhase {
    Idle,
    PreparationCountdown,
    Recording { question: QuestionKey },
    Evaluating,
    Evaluated,
}

impl PartPhase {
    pub fn can_transition(&self, next: &PartPhase, mode: InteractionMode) -> bool {
        use PartPhase::*;
        match (self, next) {
            (Idle, PreparationCountdown) => mode.has_preparation(),
            (Idle, Recording { .. }) => true,
            (PreparationCountdown, Recording { .. }) => mode.has_preparation(),
            // Preparation is over but the microphone could not be opened.
            (PreparationCountdown, Idle) => mode.has_preparation(),
            (Recording { .. }, Idle) => true,
            (Idle | PreparationCountdown | Recording { .. }, Evaluating) => true,
            (Evaluating, Evaluated) => true,
            _ => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, PartPhase::Evaluating | PartPhase::Evaluated)
    }

    pub fn recording_question(&self) -> Option<QuestionKey> {
        match self {
            PartPhase::Recording { question } => Some(*question),
            _ => None,
        }
    }
}

impl fmt::Display for PartPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartPhase::Idle => f.write_str("idle"),
            PartPhase::PreparationCountdown => f.write_str("preparation"),
            PartPhase::Recording { question } => write!(f, "recording {}", question),
            PartPhase::Evaluating => f.write_str("evaluating"),
            PartPhase::Evaluated => f.write_str("evaluated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: QuestionKey = QuestionKey::new(1, 1);

    #[test]
    fn question_parts_have_no_preparation_phase() {
        let mode = InteractionMode::DirectQuestions;
        assert!(!PartPhase::Idle.can_transition(&PartPhase::PreparationCountdown, mode));
        assert!(PartPhase::Idle.can_transition(&PartPhase::Recording { question: KEY }, mode));
        assert!(PartPhase::Recording { question: KEY }.can_transition(&PartPhase::Idle, mode));
    }

    #[test]
    fn monologue_moves_from_preparation_into_recording() {
        let mode = InteractionMode::PreparedMonologue;
        assert!(PartPhase::Idle.can_transition(&PartPhase::PreparationCountdown, mode));
        assert!(PartPhase::PreparationCountdown
            .can_transition(&PartPhase::Recording { question: KEY }, mode));
        assert!(PartPhase::PreparationCountdown.can_transition(&PartPhase::Idle, mode));
        assert!(!PartPhase::PreparationCountdown
            .can_transition(&PartPhase::Idle, InteractionMode::DirectQuestions));
    }

    #[test]
    fn evaluated_is_terminal() {
        let mode = InteractionMode::DiscussionQuestions;
        assert!(PartPhase::Evaluating.can_transition(&PartPhase::Evaluated, mode));
        for next in [
            PartPhase::Idle,
            PartPhase::Recording { question: KEY },
            PartPhase::Evaluating,
        ] {
            assert!(!PartPhase::Evaluated.can_transition(&next, mode));
        }
        assert!(!PartPhase::Evaluating.can_transition(&PartPhase::Idle, mode));
    }
}
