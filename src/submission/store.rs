// Result persistence backends: the remote results API and a local file
// store used when no backend is configured

use super::result::SessionResult;
use crate::cache::{write_atomic, CacheError};
use crate::orchestrator::retry::{RetryPolicy, Retryable};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Acknowledgement of a stored result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub result_id: Option<String>,
    pub location: String,
    pub attempts: u8,
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Server error {0}: {1}")]
    Server(u16, String),

    #[error("Result rejected with HTTP {0}: {1}")]
    Rejected(u16, String),

    #[error("Failed to encode result: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to write result: {0}")]
    Storage(String),
}

impl PersistError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PersistError::Timeout
        } else {
            PersistError::Network(err.to_string())
        }
    }

    fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            429 => PersistError::RateLimited,
            code if status.is_server_error() => PersistError::Server(code, body),
            code => PersistError::Rejected(code, body),
        }
    }
}

impl Retryable for PersistError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            PersistError::Network(_)
                | PersistError::Timeout
                | PersistError::RateLimited
                | PersistError::Server(..)
        )
    }
}

impl From<CacheError> for PersistError {
    fn from(err: CacheError) -> Self {
        PersistError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for PersistError {
    fn from(err: std::io::Error) -> Self {
        PersistError::Storage(err.to_string())
    }
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn persist(&self, result: &SessionResult) -> Result<Ack, PersistError>;

    fn name(&self) -> &str;
}

#[derive(Deserialize)]
struct StoreResponse {
    #[serde(default, alias = "resultId", alias = "_id")]
    id: Option<String>,
}

pub struct HttpResultStore {
    url: String,
    token: Option<String>,
    policy: RetryPolicy,
    client: reqwest::Client,
}

impl HttpResultStore {
    pub fn new(url: String, token: Option<String>, timeout: Duration, policy: RetryPolicy) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        tracing::info!(
            "Result store initialized ({}, up to {} retries)",
            url,
            policy.max_retries()
        );

        Self {
            url,
            token,
            policy,
            client,
        }
    }

    async fn post_once(&self, result: &SessionResult) -> Result<Option<String>, PersistError> {
        let mut request = self
            .client
            .post(&self.url)
            .header(IDEMPOTENCY_HEADER, result.session_id.as_str())
            .json(result);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await.map_err(PersistError::from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PersistError::from_status(status, body));
        }

        // The backend may acknowledge with an empty body.
        let body = resp.text().await.unwrap_or_default();
        Ok(serde_json::from_str::<StoreResponse>(&body)
            .ok()
            .and_then(|r| r.id))
    }
}

#[async_trait]
impl ResultStore for HttpResultStore {
    /// Retries transport failures with backoff. The idempotency key lets the
    /// backend drop a write that landed before its response was lost.
    async fn persist(&self, result: &SessionResult) -> Result<Ack, PersistError> {
        let mut attempt: u8 = 0;
        loop {
            match self.post_once(result).await {
                Ok(result_id) => {
                    tracing::info!(
                        "Result for session {} stored (attempt {})",
                        result.session_id,
                        attempt + 1
                    );
                    return Ok(Ack {
                        result_id,
                        location: self.url.clone(),
                        attempts: attempt + 1,
                    });
                }
                Err(e) if self.policy.should_retry(attempt, &e) => {
                    tracing::warn!(
                        "Storing result for session {} failed: {}",
                        result.session_id,
                        e
                    );
                    self.policy.wait_before_retry(attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        "Result for session {} not saved after {} attempts: {}",
                        result.session_id,
                        attempt + 1,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Writes each result once to `<dir>/<session_id>.json`.
pub struct FileResultStore {
    dir: PathBuf,
}

impl FileResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, session_id: &str) -> Result<PathBuf, PersistError> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(CacheError::InvalidKey(session_id.to_string()).into());
        }
        Ok(self.dir.join(format!("{}.json", session_id)))
    }
}

#[async_trait]
impl ResultStore for FileResultStore {
    async fn persist(&self, result: &SessionResult) -> Result<Ack, PersistError> {
        let path = self.path_for(&result.session_id)?;
        let location = path.display().to_string();

        if fs::try_exists(&path).await? {
            tracing::warn!(
                "Result for session {} already written, keeping the first one",
                result.session_id
            );
        } else {
            fs::create_dir_all(&self.dir).await?;
            let json = serde_json::to_vec_pretty(result)?;
            write_atomic(&path, &json).await?;
            tracing::info!("Result for session {} written to {}", result.session_id, location);
        }

        Ok(Ack {
            result_id: Some(result.session_id.clone()),
            location,
            attempts: 1,
        })
    }

    fn name(&self) -> &str {
        "file"
    }
}
