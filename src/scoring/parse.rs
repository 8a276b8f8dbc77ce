// Extracts a band score from free-form scorer output

use super::types::{CategoryScores, LanguageScore};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

pub const MAX_BAND: f32 = 9.0;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawScore {
    #[serde(alias = "bandScore", alias = "band_score", alias = "score", alias = "overall")]
    band: f32,
    #[serde(default)]
    feedback: String,
    #[serde(default)]
    categories: Option<RawCategories>,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    improvements: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCategories {
    #[serde(default, alias = "task_response", alias = "fluencyCoherence")]
    task_response: Option<f32>,
    #[serde(default, alias = "coherenceCohesion")]
    coherence: Option<f32>,
    #[serde(default, alias = "lexical_resource", alias = "vocabulary")]
    lexical_resource: Option<f32>,
    #[serde(default, alias = "grammaticalRange", alias = "grammar_accuracy")]
    grammar: Option<f32>,
}

/// Rounds to the nearest half band and clamps into 0-9.
pub fn normalize_band(raw: f32) -> Option<f32> {
    if !raw.is_finite() {
        return None;
    }
    Some(((raw * 2.0).round() / 2.0).clamp(0.0, MAX_BAND))
}

/// Finds the JSON object in a reply that may be wrapped in prose or code
/// fences.
pub fn parse_score(text: &str, provider: &str) -> Result<LanguageScore, String> {
    static JSON_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = JSON_RE
        .get_or_init(|| Regex::new(r"(?s)\{.*\}").ok())
        .as_ref()
        .ok_or_else(|| "score pattern failed to compile".to_string())?;

    let object = re
        .find(text)
        .map(|m| m.as_str())
        .ok_or_else(|| "no JSON object in reply".to_string())?;
    let raw: RawScore =
        serde_json::from_str(object).map_err(|e| format!("malformed score JSON: {}", e))?;

    let band = normalize_band(raw.band).ok_or_else(|| format!("band {} is not a number", raw.band))?;
    let categories = raw.categories.map(|c| CategoryScores {
        task_response: c.task_response.and_then(normalize_band),
        coherence: c.coherence.and_then(normalize_band),
        lexical_resource: c.lexical_resource.and_then(normalize_band),
        grammar: c.grammar.and_then(normalize_band),
    });

    Ok(LanguageScore {
        band,
        feedback: raw.feedback.trim().to_string(),
        categories,
        strengths: clean_list(raw.strengths),
        improvements: clean_list(raw.improvements),
        provider: provider.to_string(),
    })
}

fn clean_list(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
