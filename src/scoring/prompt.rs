// Scoring prompt construction

use super::types::ScoringRequest;

/// Upper bound on transcript characters sent to the scorer.
const MAX_TRANSCRIPT_CHARS: usize = 12_000;

pub fn build_prompt(request: &ScoringRequest) -> String {
    let transcript = truncate_chars(&request.transcript, MAX_TRANSCRIPT_CHARS);

    format!(
        "# GOAL\n\
        Rate this spoken answer from an English speaking test on the 0-9 band scale.\n\
        The candidate is aiming for CEFR level {level}.\n\n\
        # QUESTION\n{question}\n\n\
        # TRANSCRIPT\n\"{transcript}\"\n\n\
        # RETURN FORMAT\n\
        Reply with one JSON object and nothing else:\n\
        {{\"band\": <0-9 in steps of 0.5>, \"feedback\": \"<two or three sentences>\", \
        \"categories\": {{\"taskResponse\": <0-9>, \"coherence\": <0-9>, \
        \"lexicalResource\": <0-9>, \"grammar\": <0-9>}}, \
        \"strengths\": [\"...\"], \"improvements\": [\"...\"]}}\n\n\
        # WARNINGS\n\
        - The transcript comes from speech recognition; do not penalise spelling or punctuation.\n\
        - An answer that ignores the question scores at most 4.\n\
        - Do not invent content the candidate did not say.",
        level = request.level,
        question = request.prompt_text.trim(),
        transcript = transcript,
    )
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...[TRUNCATED]", &text[..idx]),
        None => text.to_string(),
    }
}
