//! Final result assembly and the single-flight submission gateway.
//!
//! A session's result is stored at most once. Whichever trigger gets here
//! first (submit, time expiry or exit) holds the only permit; a concurrent
//! caller is refused instead of writing a second copy, and nothing can be
//! submitted after a success. The gateway never retries on its own; a
//! failed call leaves it ready for another attempt.

mod result;
mod store;

pub use result::{assemble, assemble_abandoned, PartResult, QuestionResult, SessionResult, SubmitTrigger};
pub use store::{Ack, FileResultStore, HttpResultStore, PersistError, ResultStore};

use crate::config::AppConfig;
use crate::orchestrator::retry::RetryPolicy;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubmissionStatus {
    NotSubmitted,
    Submitting,
    Submitted,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("A submission is already in progress")]
    InFlight,

    #[error("Result has already been submitted")]
    AlreadySubmitted,

    #[error("Result not saved: {0}")]
    Persist(#[from] PersistError),
}

pub struct SubmissionGateway {
    store: Arc<dyn ResultStore>,
    flight: Semaphore,
    status: Mutex<SubmissionStatus>,
    ack: Mutex<Option<Ack>>,
}

impl SubmissionGateway {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self {
            store,
            flight: Semaphore::new(1),
            status: Mutex::new(SubmissionStatus::NotSubmitted),
            ack: Mutex::new(None),
        }
    }

    pub fn status(&self) -> SubmissionStatus {
        *lock(&self.status)
    }

    pub fn ack(&self) -> Option<Ack> {
        lock(&self.ack).clone()
    }

    pub async fn submit(&self, result: SessionResult) -> Result<Ack, SubmitError> {
        let _permit = self.flight.try_acquire().map_err(|_| {
            warn!("Submission of {} refused: another is in flight", result.session_id);
            SubmitError::InFlight
        })?;

        {
            let mut status = lock(&self.status);
            if *status == SubmissionStatus::Submitted {
                warn!("Submission of {} refused: already stored", result.session_id);
                return Err(SubmitError::AlreadySubmitted);
            }
            *status = SubmissionStatus::Submitting;
        }

        info!(
            "Submitting session {} via {} store ({}, overall {:.2}, {} questions)",
            result.session_id,
            self.store.name(),
            result.trigger,
            result.overall_score,
            result.question_count()
        );

        match self.store.persist(&result).await {
            Ok(ack) => {
                *lock(&self.status) = SubmissionStatus::Submitted;
                *lock(&self.ack) = Some(ack.clone());
                info!("Session {} submitted", result.session_id);
                Ok(ack)
            }
            Err(e) => {
                *lock(&self.status) = SubmissionStatus::NotSubmitted;
                error!("Session {} submission failed: {}", result.session_id, e);
                Err(e.into())
            }
        }
    }
}

/// The remote store when a URL is configured, otherwise result files under
/// `<home>/results`.
pub fn store_from_config(config: &AppConfig, home: &Path) -> Arc<dyn ResultStore> {
    match &config.persistence.url {
        Some(url) => {
            let policy = RetryPolicy::new(config.persistence.max_retries)
                .with_base_delay(Duration::from_millis(config.persistence.retry_base_millis));
            Arc::new(HttpResultStore::new(
                url.clone(),
                config.persistence_token(),
                Duration::from_secs(config.persistence.timeout_secs.max(1)),
                policy,
            ))
        }
        None => {
            let dir = home.join("results");
            info!("No persistence URL configured, writing results to {}", dir.display());
            Arc::new(FileResultStore::new(dir))
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
