//! Folds per-question results into part and session scores.
//!
//! Unattempted and failed questions count as zero toward every mean; they
//! are never left out. Means are kept unrounded so the session score is
//! exactly the mean of the part scores.

pub use crate::evaluation::ReasonCode;

use crate::evaluation::EvaluationResult;
use crate::scoring::MAX_BAND;
use crate::session::QuestionKey;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuestionScore {
    pub key: QuestionKey,
    pub band: f32,
    pub reason: Option<ReasonCode>,
}

/// Score of one question given whatever evaluation exists for it.
pub fn question_score(key: QuestionKey, result: Option<&EvaluationResult>) -> QuestionScore {
    match result {
        None => QuestionScore {
            key,
            band: 0.0,
            reason: Some(ReasonCode::NotAttempted),
        },
        Some(result) => QuestionScore {
            key,
            band: clamp_band(result.band),
            reason: result.reason,
        },
    }
}

pub fn part_score(questions: &[QuestionScore]) -> f32 {
    mean(questions.iter().map(|q| q.band))
}

pub fn session_score(part_scores: &[f32]) -> f32 {
    mean(part_scores.iter().copied())
}

/// Nearest half band, for display only.
pub fn display_band(score: f32) -> f32 {
    (clamp_band(score) * 2.0).round() / 2.0
}

fn mean(values: impl Iterator<Item = f32>) -> f32 {
    let (sum, count) = values.fold((0.0f32, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        0.0
    } else {
        clamp_band(sum / count as f32)
    }
}

fn clamp_band(band: f32) -> f32 {
    if band.is_finite() {
        band.clamp(0.0, MAX_BAND)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored(part: u8, question: u16, band: f32) -> EvaluationResult {
        let mut result = EvaluationResult::not_attempted(QuestionKey::new(part, question));
        result.band = band;
        result.reason = None;
        result
    }

    #[test]
    fn three_part_scenario() {
        let p1 = [
            question_score(QuestionKey::new(1, 1), Some(&scored(1, 1, 6.0))),
            question_score(QuestionKey::new(1, 2), Some(&scored(1, 2, 7.0))),
        ];
        let p2 = [question_score(QuestionKey::new(2, 1), Some(&scored(2, 1, 5.5)))];
        let p3 = [
            question_score(QuestionKey::new(3, 1), Some(&scored(3, 1, 6.0))),
            question_score(QuestionKey::new(3, 2), None),
            question_score(QuestionKey::new(3, 3), None),
        ];

        let parts = [part_score(&p1), part_score(&p2), part_score(&p3)];
        assert_eq!(parts, [6.5, 5.5, 2.0]);
        assert!((session_score(&parts) - 14.0 / 3.0).abs() < 1e-6);
        assert_eq!(p3[1].reason, Some(ReasonCode::NotAttempted));
    }

    #[test]
    fn failed_evaluations_count_as_zero_and_keep_their_reason() {
        let failed = EvaluationResult::zero(
            QuestionKey::new(1, 1),
            None,
            ReasonCode::EvaluationError,
            None,
        );
        let scores = [
            question_score(QuestionKey::new(1, 1), Some(&failed)),
            question_score(QuestionKey::new(1, 2), Some(&scored(1, 2, 8.0))),
        ];
        assert_eq!(part_score(&scores), 4.0);
        assert_eq!(scores[0].reason, Some(ReasonCode::EvaluationError));
    }

    #[test]
    fn scores_stay_within_band_range() {
        assert_eq!(part_score(&[]), 0.0);
        assert_eq!(session_score(&[]), 0.0);
        let wild = question_score(QuestionKey::new(1, 1), Some(&scored(1, 1, 42.0)));
        assert_eq!(wild.band, MAX_BAND);
        let nan = question_score(QuestionKey::new(1, 1), Some(&scored(1, 1, f32::NAN)));
        assert_eq!(nan.band, 0.0);

        for bands in [[0.0, 9.0, 4.5], [9.0, 9.0, 9.0], [0.0, 0.0, 0.5]] {
            let part: Vec<_> = bands
                .iter()
                .enumerate()
                .map(|(i, b)| question_score(QuestionKey::new(1, i as u16), Some(&scored(1, i as u16, *b))))
                .collect();
            let score = session_score(&[part_score(&part)]);
            assert!((0.0..=9.0).contains(&score));
        }
        assert_eq!(display_band(14.0 / 3.0), 4.5);
    }
}
