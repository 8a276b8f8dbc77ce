//! Task-result store for background evaluations.
//!
//! Each question has at most one slot. A slot is either a running task for a
//! specific recording or the finished result for it. Scheduling the same
//! recording twice reuses the existing slot; scheduling a different
//! recording aborts the old task and replaces the slot, and a finished task
//! only writes back if its recording still owns the slot.

use super::pipeline::EvaluationPipeline;
use super::result::EvaluationResult;
use crate::recording::Recording;
use crate::session::QuestionKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Pending,
    Ready,
    Failed,
}

enum Slot {
    Pending {
        recording_id: Uuid,
        done: watch::Receiver<Option<Arc<EvaluationResult>>>,
        task: JoinHandle<()>,
    },
    Done(Arc<EvaluationResult>),
}

impl Slot {
    fn recording_id(&self) -> Option<Uuid> {
        match self {
            Slot::Pending { recording_id, .. } => Some(*recording_id),
            Slot::Done(result) => result.recording_id,
        }
    }
}

type Slots = Arc<Mutex<HashMap<QuestionKey, Slot>>>;

pub struct EvaluationStore {
    pipeline: Arc<EvaluationPipeline>,
    slots: Slots,
}

impl EvaluationStore {
    pub fn new(pipeline: Arc<EvaluationPipeline>) -> Self {
        Self {
            pipeline,
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Schedules evaluation of `recording` in the background. Returns false
    /// when that recording is already pending or evaluated.
    pub fn spawn(&self, recording: Arc<Recording>, prompt_text: String) -> bool {
        let key = recording.question;
        let mut slots = lock(&self.slots);

        if let Some(existing) = slots.get(&key) {
            if existing.recording_id() == Some(recording.id) {
                debug!("Evaluation of {} already scheduled for {}", key, recording.id);
                return false;
            }
        }
        if let Some(Slot::Pending { task, .. }) = slots.remove(&key) {
            info!("Superseding pending evaluation of {}", key);
            task.abort();
        }

        let (tx, rx) = watch::channel(None);
        let pipeline = self.pipeline.clone();
        let store = self.slots.clone();
        let recording_id = recording.id;

        let task = tokio::spawn(async move {
            let result = Arc::new(pipeline.evaluate(&recording, &prompt_text).await);
            {
                let mut slots = lock(&store);
                let owns_slot = matches!(
                    slots.get(&key),
                    Some(Slot::Pending { recording_id: id, .. }) if *id == recording_id
                );
                if owns_slot {
                    slots.insert(key, Slot::Done(result.clone()));
                } else {
                    debug!("Dropping stale evaluation of {} ({})", key, recording_id);
                }
            }
            let _ = tx.send(Some(result));
        });

        slots.insert(
            key,
            Slot::Pending {
                recording_id,
                done: rx,
                task,
            },
        );
        true
    }

    /// Waits for the question's evaluation, if one exists.
    pub async fn join(&self, key: QuestionKey) -> Option<Arc<EvaluationResult>> {
        loop {
            let mut done = {
                let slots = lock(&self.slots);
                match slots.get(&key)? {
                    Slot::Done(result) => return Some(result.clone()),
                    Slot::Pending { done, .. } => done.clone(),
                }
            };

            match done.wait_for(|r| r.is_some()).await {
                Ok(_) => {
                    // The slot may have been superseded meanwhile, so read it back.
                    let slots = lock(&self.slots);
                    if let Some(Slot::Done(result)) = slots.get(&key) {
                        return Some(result.clone());
                    }
                }
                Err(_) => {
                    // Task aborted: either superseded or invalidated.
                    if lock(&self.slots).get(&key).is_none() {
                        return None;
                    }
                }
            }
            tokio::task::yield_now().await;
        }
    }

    pub async fn join_all(&self, keys: &[QuestionKey]) -> HashMap<QuestionKey, Arc<EvaluationResult>> {
        let mut results = HashMap::new();
        for key in keys {
            if let Some(result) = self.join(*key).await {
                results.insert(*key, result);
            }
        }
        results
    }

    /// Forgets whatever is stored for the question, aborting a running task.
    pub fn invalidate(&self, key: QuestionKey) {
        if let Some(Slot::Pending { task, .. }) = lock(&self.slots).remove(&key) {
            task.abort();
        }
    }

    pub fn state(&self, key: QuestionKey) -> Option<SlotState> {
        lock(&self.slots).get(&key).map(|slot| match slot {
            Slot::Pending { .. } => SlotState::Pending,
            Slot::Done(result) if result.is_failed() => SlotState::Failed,
            Slot::Done(_) => SlotState::Ready,
        })
    }

    pub fn get(&self, key: QuestionKey) -> Option<Arc<EvaluationResult>> {
        match lock(&self.slots).get(&key) {
            Some(Slot::Done(result)) => Some(result.clone()),
            _ => None,
        }
    }

    /// Seeds a finished result, e.g. one recovered from the clip cache.
    pub fn insert_ready(&self, result: EvaluationResult) {
        let key = result.question;
        if let Some(Slot::Pending { task, .. }) =
            lock(&self.slots).insert(key, Slot::Done(Arc::new(result)))
        {
            task.abort();
        }
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.slots)
            .values()
            .filter(|slot| matches!(slot, Slot::Pending { .. }))
            .count()
    }

    pub fn abort_all(&self) {
        for (_, slot) in lock(&self.slots).drain() {
            if let Slot::Pending { task, .. } = slot {
                task.abort();
            }
        }
    }
}

impl Drop for EvaluationStore {
    fn drop(&mut self) {
        self.abort_all();
    }
}

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<QuestionKey, Slot>> {
    // A panic while holding the guard cannot leave a slot half-written.
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::AudioEncoding;
    use crate::scoring::{LanguageScore, LanguageScorer, ScoringError, ScoringRequest};
    use crate::stt::{STTError, SpeechAssessment, SpeechAssessor};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Takes a second per call and echoes the clip length as the transcript.
    struct SlowAssessor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SpeechAssessor for SlowAssessor {
        async fn assess(
            &self,
            recording: &Recording,
            _reference: Option<&str>,
        ) -> Result<SpeechAssessment, STTError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            if recording.clip.is_empty() {
                return Err(STTError::InvalidAudio);
            }
            Ok(SpeechAssessment {
                transcript: format!("clip of {} bytes", recording.clip.len()),
                fluency: None,
                pronunciation: None,
                overall: None,
                duration_secs: recording.duration_secs,
                provider: "slow".into(),
            })
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    struct LengthScorer;

    #[async_trait]
    impl LanguageScorer for LengthScorer {
        async fn score(&self, request: &ScoringRequest) -> Result<LanguageScore, ScoringError> {
            Ok(LanguageScore {
                band: (request.transcript.len() % 10) as f32,
                feedback: String::new(),
                categories: None,
                strengths: Vec::new(),
                improvements: Vec::new(),
                provider: "length".into(),
            })
        }

        fn name(&self) -> &str {
            "length"
        }
    }

    fn store() -> (EvaluationStore, Arc<SlowAssessor>) {
        let assessor = Arc::new(SlowAssessor {
            calls: AtomicUsize::new(0),
        });
        let pipeline = EvaluationPipeline::new(assessor.clone(), Arc::new(LengthScorer), "B2");
        (EvaluationStore::new(Arc::new(pipeline)), assessor)
    }

    fn recording(key: QuestionKey, bytes: usize) -> Arc<Recording> {
        Arc::new(Recording {
            id: Uuid::new_v4(),
            question: key,
            clip: Arc::new(vec![0; bytes]),
            encoding: AudioEncoding::Wav,
            duration_secs: 1.0,
            captured_at: Utc::now(),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_spawn_for_same_recording_runs_once() {
        let (store, assessor) = store();
        let key = QuestionKey::new(1, 1);
        let rec = recording(key, 10);

        assert!(store.spawn(rec.clone(), "q".into()));
        assert!(!store.spawn(rec.clone(), "q".into()));
        assert_eq!(store.state(key), Some(SlotState::Pending));

        let first = store.join(key).await.unwrap();
        assert!(!store.spawn(rec.clone(), "q".into()));
        let second = store.join(key).await.unwrap();

        assert_eq!(assessor.calls.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.state(key), Some(SlotState::Ready));
    }

    #[tokio::test(start_paused = true)]
    async fn re_recording_supersedes_the_pending_result() {
        let (store, _) = store();
        let key = QuestionKey::new(2, 1);
        let old = recording(key, 10);
        let new = recording(key, 12);

        store.spawn(old.clone(), "q".into());
        tokio::time::sleep(Duration::from_millis(100)).await;
        store.spawn(new.clone(), "q".into());

        let result = store.join(key).await.unwrap();
        assert_eq!(result.recording_id, Some(new.id));
        assert_eq!(result.transcript, "Clip of 12 bytes.");
        assert_eq!(store.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_evaluation_is_stored_as_failed() {
        let (store, _) = store();
        let key = QuestionKey::new(3, 1);
        store.spawn(recording(key, 0), "q".into());

        let result = store.join(key).await.unwrap();
        assert!(result.is_failed());
        assert_eq!(store.state(key), Some(SlotState::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn invalidated_question_joins_to_nothing() {
        let (store, _) = store();
        let key = QuestionKey::new(1, 2);
        store.spawn(recording(key, 5), "q".into());
        store.invalidate(key);

        assert!(store.join(key).await.is_none());
        assert!(store.state(key).is_none());

        let results = store.join_all(&[key, QuestionKey::new(9, 9)]).await;
        assert!(results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn evaluations_run_concurrently() {
        let (store, _) = store();
        let start = tokio::time::Instant::now();
        let keys: Vec<_> = (1..=3).map(|q| QuestionKey::new(1, q)).collect();
        for key in &keys {
            store.spawn(recording(*key, 8), "q".into());
        }

        let results = store.join_all(&keys).await;
        assert_eq!(results.len(), 3);
        assert!(start.elapsed() < Duration::from_millis(1500));
    }
}
