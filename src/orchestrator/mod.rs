use crate::config::AppConfig;
use crate::recording::Recording;
use crate::stt::{STTError, SpeechAssessment, SpeechAssessor};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use self::circuit_breaker::CircuitBreaker;
use self::metrics::Metrics;
use self::provider_registry::providers_from_config;
use self::retry::RetryPolicy;

pub mod circuit_breaker;
pub mod metrics;
pub mod provider_registry;
pub mod retry;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("All providers failed")]
    AllProvidersFailed(Vec<(String, STTError)>),

    #[error("No providers available")]
    NoProvidersAvailable,
}

impl From<OrchestratorError> for STTError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::NoProvidersAvailable => {
                STTError::ProviderError("no transcription providers configured".to_string())
            }
            OrchestratorError::AllProvidersFailed(errors) => {
                if !errors.is_empty()
                    && errors
                        .iter()
                        .all(|(_, e)| matches!(e, STTError::MissingTranscript))
                {
                    return STTError::MissingTranscript;
                }
                STTError::ProviderError(
                    errors
                        .iter()
                        .map(|(id, e)| format!("{}: {}", id, e))
                        .collect::<Vec<_>>()
                        .join("; "),
                )
            }
        }
    }
}

pub struct ProviderConfig {
    pub id: String,
    pub priority: u8,
    pub adapter: Box<dyn SpeechAssessor>,
    pub max_retries: u8,
    pub timeout_secs: u64,
}

/// Tries providers in priority order. Breakers and metrics sit behind
/// mutexes so one orchestrator can serve concurrent evaluations.
pub struct FailoverOrchestrator {
    providers: Vec<ProviderConfig>,
    circuit_breakers: Mutex<HashMap<String, CircuitBreaker>>,
    metrics: Mutex<Metrics>,
    retry_base_delay: Duration,
}

impl FailoverOrchestrator {
    pub fn new(mut providers: Vec<ProviderConfig>) -> Self {
        providers.sort_by_key(|p| p.priority);

        let mut circuit_breakers = HashMap::new();
        for provider in &providers {
            circuit_breakers.insert(provider.id.clone(), CircuitBreaker::new());
        }

        Self {
            providers,
            circuit_breakers: Mutex::new(circuit_breakers),
            metrics: Mutex::new(Metrics::new()),
            retry_base_delay: Duration::from_secs(2),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(providers_from_config(config))
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn provider_count(&self) -> usize {
        self.providers.len()
    }

    pub async fn transcribe(
        &self,
        recording: &Recording,
        reference: Option<&str>,
    ) -> Result<SpeechAssessment, OrchestratorError> {
        if self.providers.is_empty() {
            return Err(OrchestratorError::NoProvidersAvailable);
        }

        let mut all_errors = Vec::new();

        for provider in &self.providers {
            if !self.request_allowed(&provider.id) {
                tracing::warn!(
                    "Provider {} skipped: circuit breaker open",
                    provider.id
                );
                all_errors.push((
                    provider.id.clone(),
                    STTError::ProviderError("Circuit breaker open".to_string()),
                ));
                continue;
            }

            tracing::info!(
                "Attempting provider: {} (priority {}) for {}",
                provider.id,
                provider.priority,
                recording.question
            );

            let retry_policy =
                RetryPolicy::new(provider.max_retries).with_base_delay(self.retry_base_delay);
            let mut attempt = 0u8;

            loop {
                match self.try_provider(provider, recording, reference).await {
                    Ok(assessment) => {
                        tracing::info!(
                            "Provider {} succeeded: text_len={}, overall={:?}",
                            provider.id,
                            assessment.transcript.len(),
                            assessment.overall
                        );
                        self.record_outcome(&provider.id, true);
                        return Ok(assessment);
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Provider {} attempt {}/{} failed: {:?}",
                            provider.id,
                            attempt + 1,
                            provider.max_retries + 1,
                            e
                        );

                        if retry_policy.should_retry(attempt, &e) {
                            retry_policy.wait_before_retry(attempt).await;
                            attempt += 1;
                            continue;
                        }

                        self.record_outcome(&provider.id, false);
                        all_errors.push((provider.id.clone(), e));
                        break;
                    }
                }
            }
        }

        tracing::error!("All providers failed: {:?}", all_errors);
        Err(OrchestratorError::AllProvidersFailed(all_errors))
    }

    pub fn get_metrics(&self) -> Metrics {
        self.metrics
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    fn request_allowed(&self, provider_id: &str) -> bool {
        match self.circuit_breakers.lock() {
            Ok(mut breakers) => breakers
                .get_mut(provider_id)
                .map(|cb| cb.is_request_allowed())
                .unwrap_or(true),
            Err(_) => true,
        }
    }

    fn record_outcome(&self, provider_id: &str, success: bool) {
        if let Ok(mut breakers) = self.circuit_breakers.lock() {
            if let Some(cb) = breakers.get_mut(provider_id) {
                if success {
                    cb.record_success();
                } else {
                    cb.record_failure();
                }
            }
        }
        if let Ok(mut metrics) = self.metrics.lock() {
            if success {
                metrics.record_success(provider_id);
            } else {
                metrics.record_failure(provider_id);
            }
        }
    }

    async fn try_provider(
        &self,
        provider: &ProviderConfig,
        recording: &Recording,
        reference: Option<&str>,
    ) -> Result<SpeechAssessment, STTError> {
        let timeout = Duration::from_secs(provider.timeout_secs);

        match tokio::time::timeout(timeout, provider.adapter.assess(recording, reference)).await {
            Ok(result) => result,
            Err(_) => Err(STTError::TimeoutError),
        }
    }
}

#[async_trait]
impl SpeechAssessor for FailoverOrchestrator {
    async fn assess(
        &self,
        recording: &Recording,
        reference: Option<&str>,
    ) -> Result<SpeechAssessment, STTError> {
        Ok(self.transcribe(recording, reference).await?)
    }

    fn name(&self) -> &str {
        "failover"
    }
}
