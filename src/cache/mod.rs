//! Durable local cache for captured clips.
//!
//! Clips are written under `<root>/<session_id>/` as a `.wav` file plus a
//! `.json` sidecar carrying the recording metadata, so a restarted process
//! can find every recording that was captured but never evaluated.
//! Evaluations of parts already left are kept beside them so a reload does
//! not have to score those clips again. The cache is a recovery aid only,
//! never the system of record.

mod progress;

pub use progress::{BudgetUsage, ProgressMarker};

use crate::evaluation::EvaluationResult;
use crate::recording::Recording;
use crate::session::QuestionKey;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

const CLIP_EXTENSION: &str = "wav";
const META_EXTENSION: &str = "json";
const PROGRESS_FILE: &str = "progress.json";
const RESULTS_FILE: &str = "results.json";
const USAGE_FILE: &str = "usage.json";

/// Errors that can occur during cache operations.
#[derive(Error, Debug)]
pub enum CacheError {
    /// I/O error occurred during filesystem operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Session identifiers become directory names and must stay path-safe.
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Debug, Clone)]
pub struct ClipCache {
    root: PathBuf,
}

impl ClipCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stores the clip and its metadata. The clip is fully written before the
    /// sidecar appears, so a listed entry always has its audio.
    pub async fn put(&self, session_id: &str, recording: &Recording) -> Result<()> {
        let dir = self.session_dir(session_id)?;
        fs::create_dir_all(&dir).await?;

        let stem = recording.question.to_string();
        write_atomic(&dir.join(format!("{}.{}", stem, CLIP_EXTENSION)), &recording.clip).await?;
        let meta = serde_json::to_vec_pretty(recording)?;
        write_atomic(&dir.join(format!("{}.{}", stem, META_EXTENSION)), &meta).await?;

        debug!(
            "Cached clip {} for session {} ({} bytes)",
            stem,
            session_id,
            recording.clip.len()
        );
        Ok(())
    }

    pub async fn get(&self, session_id: &str, question: QuestionKey) -> Result<Option<Recording>> {
        let dir = self.session_dir(session_id)?;
        let stem = question.to_string();
        let meta_path = dir.join(format!("{}.{}", stem, META_EXTENSION));
        let clip_path = dir.join(format!("{}.{}", stem, CLIP_EXTENSION));

        let meta = match fs::read(&meta_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let clip = match fs::read(&clip_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Clip metadata without audio for {} in {}", stem, session_id);
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let mut recording: Recording = serde_json::from_slice(&meta)?;
        recording.clip = Arc::new(clip);
        Ok(Some(recording))
    }

    /// Every recoverable clip of a session, ordered by question.
    pub async fn list(&self, session_id: &str) -> Result<Vec<Recording>> {
        let dir = self.session_dir(session_id)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut recordings = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CLIP_EXTENSION) {
                continue;
            }
            let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<QuestionKey>().ok())
            else {
                continue;
            };
            match self.get(session_id, key).await {
                Ok(Some(recording)) => recordings.push(recording),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable cached clip {}: {}", key, e),
            }
        }

        recordings.sort_by_key(|r| r.question);
        Ok(recordings)
    }

    pub async fn remove(&self, session_id: &str, question: QuestionKey) -> Result<()> {
        let dir = self.session_dir(session_id)?;
        let stem = question.to_string();
        for ext in [META_EXTENSION, CLIP_EXTENSION] {
            match fs::remove_file(dir.join(format!("{}.{}", stem, ext))).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Drops every cached clip of the session but keeps its progress marker.
    pub async fn clear_clips(&self, session_id: &str) -> Result<()> {
        for recording in self.list(session_id).await? {
            self.remove(session_id, recording.question).await?;
        }
        Ok(())
    }

    pub async fn load_progress(&self, session_id: &str) -> Result<Option<ProgressMarker>> {
        let path = self.session_dir(session_id)?.join(PROGRESS_FILE);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Persists the marker. The stored part index never decreases, whatever
    /// the caller passes in.
    pub async fn save_progress(&self, marker: &ProgressMarker) -> Result<ProgressMarker> {
        let dir = self.session_dir(&marker.session_id)?;
        fs::create_dir_all(&dir).await?;

        let merged = match self.load_progress(&marker.session_id).await? {
            Some(existing) => existing.merge(marker),
            None => marker.clone(),
        };
        let json = serde_json::to_vec_pretty(&merged)?;
        write_atomic(&dir.join(PROGRESS_FILE), &json).await?;
        Ok(merged)
    }

    /// Stores finished evaluations, replacing any earlier entry per question.
    pub async fn save_results(&self, session_id: &str, results: &[EvaluationResult]) -> Result<()> {
        let dir = self.session_dir(session_id)?;
        fs::create_dir_all(&dir).await?;

        let mut stored = self.load_results(session_id).await?;
        for result in results {
            stored.retain(|r| r.question != result.question);
            stored.push(result.clone());
        }
        stored.sort_by_key(|r| r.question);

        let json = serde_json::to_vec_pretty(&stored)?;
        write_atomic(&dir.join(RESULTS_FILE), &json).await?;
        debug!("Cached {} evaluations for session {}", stored.len(), session_id);
        Ok(())
    }

    pub async fn load_results(&self, session_id: &str) -> Result<Vec<EvaluationResult>> {
        let path = self.session_dir(session_id)?.join(RESULTS_FILE);
        match fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Records the time a question has used so far. Stored usage only grows.
    pub async fn save_usage(&self, session_id: &str, usage: BudgetUsage) -> Result<()> {
        let dir = self.session_dir(session_id)?;
        fs::create_dir_all(&dir).await?;

        let mut stored = self.load_usage(session_id).await?;
        match stored.iter_mut().find(|u| u.question == usage.question) {
            Some(existing) => existing.consumed_secs = existing.consumed_secs.max(usage.consumed_secs),
            None => stored.push(usage),
        }
        stored.sort_by_key(|u| u.question);

        let json = serde_json::to_vec_pretty(&stored)?;
        write_atomic(&dir.join(USAGE_FILE), &json).await
    }

    pub async fn load_usage(&self, session_id: &str) -> Result<Vec<BudgetUsage>> {
        let path = self.session_dir(session_id)?.join(USAGE_FILE);
        match fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn session_dir(&self, session_id: &str) -> Result<PathBuf> {
        let valid = !session_id.is_empty()
            && session_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(CacheError::InvalidKey(session_id.to_string()));
        }
        Ok(self.root.join(session_id))
    }
}

pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp, path).await?;
    Ok(())
}
