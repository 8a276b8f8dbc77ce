use super::ProviderConfig;
use crate::config::AppConfig;
use crate::stt::{GroqAdapter, HttpAssessmentAdapter};
use std::time::Duration;

/// Assessment service first (it returns acoustic sub-scores), then Groq
/// Whisper as a transcript-only fallback.
pub fn providers_from_config(config: &AppConfig) -> Vec<ProviderConfig> {
    let mut providers = Vec::new();

    if let Some(url) = config
        .assessment
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
    {
        let timeout_secs = config.assessment.timeout_secs.max(1);
        providers.push(ProviderConfig {
            id: "assessment".to_string(),
            priority: 1,
            adapter: Box::new(HttpAssessmentAdapter::new(
                url.to_string(),
                config.assessment_key(),
                Duration::from_secs(timeout_secs),
            )),
            max_retries: config.assessment.max_retries,
            timeout_secs,
        });
    }

    if let Some(key) = config.groq_key() {
        let timeout_secs = config.groq.timeout_secs.max(1);
        providers.push(ProviderConfig {
            id: "groq".to_string(),
            priority: 2,
            adapter: Box::new(GroqAdapter::new(key, Duration::from_secs(timeout_secs))),
            max_retries: 0,
            timeout_secs,
        });
    }

    tracing::info!(
        "Transcription providers: [{}]",
        providers
            .iter()
            .map(|p| p.id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    providers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::obfuscate_secret;

    #[test]
    fn orders_assessment_before_groq() {
        let mut config = AppConfig::default();
        config.assessment.url = Some("https://assess.example/v1".into());
        config.groq.api_key_obfuscated = Some(obfuscate_secret("gsk_live_key_123"));

        let providers = providers_from_config(&config);
        let ids: Vec<_> = providers.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["assessment", "groq"]);
        assert_eq!(providers[0].max_retries, 1);
    }

    #[test]
    fn non_groq_keys_are_ignored() {
        let mut config = AppConfig::default();
        config.groq.api_key_obfuscated = Some(obfuscate_secret("sk-not-groq"));
        assert!(providers_from_config(&config).is_empty());
    }
}
