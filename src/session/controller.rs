//! Session controller: owns the part sequence, the capture unit, the
//! countdown clocks and the background evaluations of one session.
//!
//! Clock callbacks only queue `SessionEvent`s; every state change happens in
//! `handle_event` or in a user operation, so there is one writer for all of
//! the session's state. Parts are visited in order and a part that has been
//! left is closed for good, including after a reload.

use super::events::{PhaseChange, SessionEvent, SessionNotice};
use super::model::{Part, Question, QuestionKey, QuestionStatus};
use super::paper::{PaperError, TestPaper};
use super::progress::{QuestionProgress, SessionProgress};
use super::state::PartPhase;
use crate::audio::AudioSource;
use crate::cache::{BudgetUsage, CacheError, ClipCache, ProgressMarker};
use crate::config::TimingConfig;
use crate::evaluation::{EvaluationPipeline, EvaluationResult, EvaluationStore, SlotState};
use crate::recording::{CaptureError, CaptureUnit, Recording};
use crate::submission::{self, Ack, SubmissionGateway, SubmitError, SubmitTrigger};
use crate::timer::{ClockHandle, ClockKind, TimerSubsystem};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

const PHASE_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid test paper: {0}")]
    Paper(#[from] PaperError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("Session cache error: {0}")]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error("Question {0} does not exist")]
    UnknownQuestion(QuestionKey),

    #[error("Question {0} has no recording time left")]
    BudgetExhausted(QuestionKey),

    #[error("Part {0} is closed")]
    PartClosed(u8),

    #[error("Cannot go back from part {current} to part {requested}")]
    BackwardNavigation { current: u8, requested: u8 },

    #[error("There is no part at position {0}")]
    UnknownPart(usize),

    #[error("Already on the last part")]
    LastPart,

    #[error("No recording in progress")]
    NotRecording,

    #[error("Session has not started")]
    NotStarted,

    #[error("Session has already started")]
    AlreadyStarted,

    #[error("Session is finished")]
    Finished,

    #[error("No saved progress for session {0}")]
    UnknownSession(String),

    #[error("Session {0} was already submitted")]
    AlreadySubmitted(String),

    #[error("Session {session} belongs to paper '{expected}', not '{found}'")]
    PaperMismatch {
        session: String,
        expected: String,
        found: String,
    },

    #[error("Part {part} cannot go from {from} to {to}")]
    InvalidTransition {
        part: u8,
        from: PartPhase,
        to: PartPhase,
    },
}

/// Collaborators a controller is built from.
pub struct SessionDeps {
    pub source: Box<dyn AudioSource>,
    pub pipeline: Arc<EvaluationPipeline>,
    pub gateway: Arc<SubmissionGateway>,
    pub cache: Arc<ClipCache>,
    pub timing: TimingConfig,
}

#[derive(Debug, Default, Clone, Copy)]
struct Clocks {
    session: Option<ClockHandle>,
    preparation: Option<ClockHandle>,
    recording: Option<ClockHandle>,
}

impl Clocks {
    fn owns(&self, handle: ClockHandle) -> bool {
        [self.session, self.preparation, self.recording].contains(&Some(handle))
    }
}

pub struct SessionController {
    session_id: String,
    paper_id: String,
    parts: Vec<Part>,
    current: usize,
    capture: CaptureUnit,
    evaluations: EvaluationStore,
    timers: TimerSubsystem,
    clocks: Clocks,
    cache: Arc<ClipCache>,
    gateway: Arc<SubmissionGateway>,
    eager_evaluation: bool,
    session_total: Duration,
    started_at: Option<DateTime<Utc>>,
    closing: bool,
    finished: bool,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<SessionEvent>>,
    phases: broadcast::Sender<PhaseChange>,
}

impl SessionController {
    /// Prepares a fresh session for `paper`. Nothing runs until `start`.
    pub fn new(paper: &TestPaper, deps: SessionDeps) -> Result<Self, SessionError> {
        Self::build(paper, deps, Uuid::new_v4().to_string())
    }

    fn build(paper: &TestPaper, deps: SessionDeps, session_id: String) -> Result<Self, SessionError> {
        paper.validate()?;

        let parts = paper
            .parts
            .iter()
            .map(|spec| Part::from_spec(spec, &deps.timing))
            .collect();
        let session_total = paper
            .duration_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| deps.timing.session_duration());
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (phases, _) = broadcast::channel(PHASE_CHANNEL_CAPACITY);

        Ok(Self {
            capture: CaptureUnit::new(session_id.clone(), deps.source, deps.cache.clone()),
            evaluations: EvaluationStore::new(deps.pipeline),
            timers: TimerSubsystem::new(deps.timing.tick_interval()),
            clocks: Clocks::default(),
            cache: deps.cache,
            gateway: deps.gateway,
            eager_evaluation: deps.timing.eager_evaluation,
            session_id,
            paper_id: paper.id.clone(),
            parts,
            current: 0,
            session_total,
            started_at: None,
            closing: false,
            finished: false,
            events_tx,
            events_rx: Some(events_rx),
            phases,
        })
    }

    /// Reopens a session from its progress marker after a restart. Cached
    /// clips are reattached to their questions and evaluated again unless a
    /// matching result was saved; the session clock keeps counting from the
    /// original start time.
    pub async fn open(paper: &TestPaper, deps: SessionDeps, session_id: &str) -> Result<Self, SessionError> {
        let marker = deps
            .cache
            .load_progress(session_id)
            .await?
            .ok_or_else(|| SessionError::UnknownSession(session_id.to_string()))?;
        if marker.submitted {
            return Err(SessionError::AlreadySubmitted(session_id.to_string()));
        }
        if marker.paper_id != paper.id {
            return Err(SessionError::PaperMismatch {
                session: session_id.to_string(),
                expected: marker.paper_id,
                found: paper.id.clone(),
            });
        }

        let mut controller = Self::build(paper, deps, session_id.to_string())?;
        controller.current = marker.part_index.min(controller.parts.len().saturating_sub(1));
        for part in &mut controller.parts[..controller.current] {
            part.phase = PartPhase::Evaluated;
            part.preparation_done = true;
        }

        let mut saved: HashMap<QuestionKey, EvaluationResult> = controller
            .cache
            .load_results(session_id)
            .await?
            .into_iter()
            .map(|r| (r.question, r))
            .collect();

        let usage: HashMap<QuestionKey, Duration> = controller
            .cache
            .load_usage(session_id)
            .await?
            .into_iter()
            .map(|u| (u.question, Duration::from_secs_f32(u.consumed_secs.max(0.0))))
            .collect();

        let recovered = controller.capture.recover().await?;
        for recording in recovered {
            let key = recording.question;
            let Some(part_index) = controller.part_index_of(key) else {
                warn!("Ignoring cached clip for unknown question {}", key);
                continue;
            };
            if part_index > controller.current {
                warn!("Ignoring cached clip for {} beyond the saved position", key);
                continue;
            }
            let recording = Arc::new(recording);
            let part = &mut controller.parts[part_index];
            part.preparation_done = true;
            let Some(question) = part.question_mut(key.question) else {
                continue;
            };
            let charged = usage.get(&key).copied().unwrap_or(Duration::ZERO);
            question.consumed = charged.max(recording.duration()).min(question.budget);
            question.recording = Some(recording.clone());
            let prompt = question.text.clone();

            match saved.remove(&key) {
                Some(result) if result.recording_id == Some(recording.id) => {
                    controller.evaluations.insert_ready(result);
                }
                // Clips of the current part wait for its boundary unless scoring is eager.
                _ if part_index < controller.current || controller.eager_evaluation => {
                    controller.evaluations.spawn(recording, prompt);
                }
                _ => {}
            }
        }

        let elapsed = (Utc::now() - marker.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let remaining = controller.session_total.saturating_sub(elapsed);
        controller.started_at = Some(marker.started_at);
        controller.start_session_clock(remaining);

        info!(
            "Session {} reopened at part {} with {:.0}s left ({} evaluations pending)",
            controller.session_id,
            controller.parts[controller.current].number,
            remaining.as_secs_f32(),
            controller.evaluations.pending_count()
        );
        controller.enter_current_part()?;
        Ok(controller)
    }

    /// Starts the session clock and enters the first part.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        if self.started_at.is_some() {
            return Err(SessionError::AlreadyStarted);
        }
        let started_at = Utc::now();
        self.started_at = Some(started_at);

        let marker = ProgressMarker::new(&self.session_id, &self.paper_id, started_at);
        self.cache.save_progress(&marker).await?;

        self.start_session_clock(self.session_total);
        info!(
            "Session {} started on paper '{}' ({} parts, {:.0}s)",
            self.session_id,
            self.paper_id,
            self.parts.len(),
            self.session_total.as_secs_f32()
        );
        self.enter_current_part()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn current_part_index(&self) -> usize {
        self.current
    }

    pub fn current_part(&self) -> &Part {
        &self.parts[self.current]
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn recording_question(&self) -> Option<QuestionKey> {
        self.capture.active_question()
    }

    pub fn result(&self, key: QuestionKey) -> Option<Arc<EvaluationResult>> {
        self.evaluations.get(key)
    }

    /// Phase changes of every part from now on.
    pub fn subscribe_phases(&self) -> broadcast::Receiver<PhaseChange> {
        self.phases.subscribe()
    }

    pub fn take_event_receiver(&mut self) -> Option<mpsc::UnboundedReceiver<SessionEvent>> {
        self.events_rx.take()
    }

    /// Waits for the next clock event, unless the receiver was taken.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        match self.events_rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Elapsed session time, derived from the session clock.
    pub fn elapsed(&self) -> Duration {
        match self.clocks.session {
            Some(handle) => {
                let remaining = self.timers.remaining(handle).unwrap_or(Duration::ZERO);
                self.session_total.saturating_sub(remaining)
            }
            None => Duration::ZERO,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.session_total.saturating_sub(self.elapsed())
    }

    /// Starts capturing an answer to question `number` of the current part.
    /// Any take in progress is closed first; a pending preparation countdown
    /// is cut short.
    pub async fn start_recording(&mut self, number: u16) -> Result<QuestionKey, SessionError> {
        self.ensure_active()?;
        let part = &self.parts[self.current];
        let key = QuestionKey::new(part.number, number);
        if part.phase.is_closed() {
            return Err(SessionError::PartClosed(part.number));
        }
        if part.question(number).is_none() {
            return Err(SessionError::UnknownQuestion(key));
        }

        // Closing the live take first also charges it to its budget.
        if self.capture.is_recording() {
            self.stop_recording_lenient().await?;
        }
        let budget = self.parts[self.current]
            .question(number)
            .map(|q| q.remaining_budget())
            .unwrap_or(Duration::ZERO);
        if budget.is_zero() {
            return Err(SessionError::BudgetExhausted(key));
        }
        if self.parts[self.current].phase == PartPhase::PreparationCountdown {
            if let Some(handle) = self.clocks.preparation.take() {
                self.timers.stop(handle);
            }
            self.parts[self.current].preparation_done = true;
            info!("Preparation for part {} cut short", key.part);
        }

        let next = PartPhase::Recording { question: key };
        self.check_transition(self.current, next)?;
        if let Err(e) = self.capture.start(key, budget).await {
            warn!("Could not start recording {}: {}", key, e);
            if self.parts[self.current].phase == PartPhase::PreparationCountdown {
                self.set_phase(self.current, PartPhase::Idle)?;
            }
            return Err(e.into());
        }
        self.set_phase(self.current, next)?;

        let tx = self.events_tx.clone();
        let expired = self.events_tx.clone();
        self.clocks.recording = Some(self.timers.start_clock(
            ClockKind::Recording,
            budget,
            move |tick| {
                let _ = tx.send(SessionEvent::Tick(tick));
            },
            move |handle| {
                let _ = expired.send(SessionEvent::Expired(handle));
            },
        ));
        Ok(key)
    }

    /// Closes the current take, attaches it to its question and, when eager
    /// evaluation is on, starts scoring it in the background.
    pub async fn stop_recording(&mut self) -> Result<Arc<Recording>, SessionError> {
        let key = self
            .capture
            .active_question()
            .ok_or(SessionError::NotRecording)?;
        if let Some(handle) = self.clocks.recording.take() {
            self.timers.stop(handle);
        }

        let stopped = self.capture.stop().await;
        if let Some(part_index) = self.part_index_of(key) {
            if self.parts[part_index].phase.recording_question() == Some(key) {
                self.set_phase(part_index, PartPhase::Idle)?;
            }
        }
        let recording = Arc::new(stopped?);

        let part_index = self
            .part_index_of(key)
            .ok_or(SessionError::UnknownQuestion(key))?;
        let question = self.parts[part_index]
            .question_mut(key.question)
            .ok_or(SessionError::UnknownQuestion(key))?;
        question.consumed = (question.consumed + recording.duration()).min(question.budget);
        question.recording = Some(recording.clone());
        let prompt = question.text.clone();
        let usage = BudgetUsage {
            question: key,
            consumed_secs: question.consumed.as_secs_f32(),
        };
        info!(
            "Answer to {} recorded ({:.1}s, {:.1}s of budget left)",
            key,
            recording.duration_secs,
            question.remaining_budget().as_secs_f32()
        );

        if let Err(e) = self.cache.save_usage(&self.session_id, usage).await {
            warn!("Failed to cache budget usage of {}: {}", key, e);
        }

        self.evaluations.invalidate(key);
        if self.eager_evaluation {
            self.evaluations.spawn(recording.clone(), prompt);
        }
        Ok(recording)
    }

    /// Leaves the current part: closes any take, evaluates every answer of
    /// the part, then enters the next one. The part left behind can never be
    /// reopened.
    pub async fn next_part(&mut self) -> Result<usize, SessionError> {
        self.ensure_active()?;
        if self.current + 1 >= self.parts.len() {
            return Err(SessionError::LastPart);
        }

        self.close_part(self.current).await?;
        self.current += 1;

        self.cache.save_progress(&self.marker()).await?;

        self.enter_current_part()?;
        Ok(self.current)
    }

    /// Moves forward to the part at `index`. Going back is refused.
    pub async fn go_to_part(&mut self, index: usize) -> Result<usize, SessionError> {
        if index >= self.parts.len() {
            return Err(SessionError::UnknownPart(index));
        }
        if index < self.current {
            return Err(SessionError::BackwardNavigation {
                current: self.parts[self.current].number,
                requested: self.parts[index].number,
            });
        }
        while self.current < index {
            self.next_part().await?;
        }
        Ok(self.current)
    }

    /// Explicit submit by the user.
    pub async fn submit(&mut self) -> Result<Ack, SessionError> {
        self.finalize(SubmitTrigger::Explicit).await
    }

    /// Abandons the session. Every question is stored as not attempted and
    /// scored zero, whatever was recorded.
    pub async fn exit(&mut self) -> Result<Ack, SessionError> {
        if self.started_at.is_none() {
            return Err(SessionError::NotStarted);
        }
        if self.finished {
            return Err(SessionError::Finished);
        }
        info!("Session {} abandoned", self.session_id);

        let elapsed = self.elapsed();
        self.closing = true;
        self.capture.abandon();
        if self.parts[self.current].phase.recording_question().is_some() {
            self.set_phase(self.current, PartPhase::Idle)?;
        }
        self.stop_part_clocks();
        self.evaluations.abort_all();

        let result = submission::assemble_abandoned(&self.session_id, &self.paper_id, &self.parts, elapsed);
        let ack = self.gateway.submit(result).await?;
        self.complete().await;
        Ok(ack)
    }

    /// Applies one clock event. Events from clocks that were stopped or
    /// replaced are ignored.
    pub async fn handle_event(&mut self, event: SessionEvent) -> Result<Option<SessionNotice>, SessionError> {
        if self.finished {
            return Ok(None);
        }
        match event {
            SessionEvent::Tick(tick) => {
                if self.clocks.owns(tick.clock) {
                    Ok(Some(SessionNotice::Tick(tick)))
                } else {
                    Ok(None)
                }
            }
            SessionEvent::Expired(handle) => {
                if !self.clocks.owns(handle) {
                    debug!("Ignoring expiry of stale {} clock {:?}", handle.kind, handle.id);
                    return Ok(None);
                }
                match handle.kind {
                    ClockKind::Session => {
                        info!("Session {} ran out of time", self.session_id);
                        let ack = self.finalize(SubmitTrigger::TimeExpired).await?;
                        Ok(Some(SessionNotice::Finalized(ack)))
                    }
                    ClockKind::Preparation => {
                        self.clocks.preparation = None;
                        self.preparation_expired().await.map(Some)
                    }
                    ClockKind::Recording => {
                        self.clocks.recording = None;
                        info!("Recording budget used up, stopping capture");
                        let recording = self.stop_recording().await?;
                        Ok(Some(SessionNotice::RecordingForceStopped(recording)))
                    }
                }
            }
        }
    }

    pub fn question_status(&self, key: QuestionKey) -> QuestionStatus {
        let Some(question) = self.find_question(key) else {
            return QuestionStatus::Unattempted;
        };
        let Some(recording) = &question.recording else {
            return QuestionStatus::Unattempted;
        };
        match self.evaluations.state(key) {
            Some(SlotState::Pending) => QuestionStatus::Evaluating,
            Some(SlotState::Failed) => QuestionStatus::Failed,
            Some(SlotState::Ready) => {
                let current = self
                    .evaluations
                    .get(key)
                    .map(|r| r.recording_id == Some(recording.id))
                    .unwrap_or(false);
                if current {
                    QuestionStatus::Evaluated
                } else {
                    QuestionStatus::Recorded
                }
            }
            None => QuestionStatus::Recorded,
        }
    }

    pub fn progress(&self) -> SessionProgress {
        let part = &self.parts[self.current];
        let questions = self
            .parts
            .iter()
            .flat_map(|p| p.questions.iter())
            .map(|q| QuestionProgress {
                key: q.key,
                text: q.text.clone(),
                status: self.question_status(q.key),
                remaining_budget_secs: q.remaining_budget().as_secs(),
                band: self
                    .evaluations
                    .get(q.key)
                    .filter(|r| r.recording_id.is_some() && r.recording_id == q.recording.as_ref().map(|rec| rec.id))
                    .map(|r| r.band),
            })
            .collect();
        let clock_secs = |handle: Option<ClockHandle>| {
            handle
                .and_then(|h| self.timers.remaining(h))
                .map(|d| d.as_secs())
        };

        SessionProgress {
            session_id: self.session_id.clone(),
            part_index: self.current,
            part_number: part.number,
            part_count: self.parts.len(),
            phase: part.phase,
            session_remaining_secs: self.remaining().as_secs(),
            preparation_remaining_secs: clock_secs(self.clocks.preparation),
            recording_remaining_secs: clock_secs(self.clocks.recording),
            questions,
            submission: self.gateway.status(),
        }
    }

    /// Shared by explicit submit and time expiry: close any take, evaluate
    /// everything answered so far, assemble and store the result.
    async fn finalize(&mut self, trigger: SubmitTrigger) -> Result<Ack, SessionError> {
        if self.started_at.is_none() {
            return Err(SessionError::NotStarted);
        }
        if self.finished {
            return Err(SessionError::Finished);
        }
        info!("Finalizing session {} ({})", self.session_id, trigger);

        let elapsed = self.elapsed();
        self.closing = true;
        self.close_part(self.current).await?;
        self.stop_part_clocks();

        let keys: Vec<QuestionKey> = self.parts[..=self.current]
            .iter()
            .flat_map(|p| p.questions.iter())
            .filter(|q| q.recording.is_some())
            .map(|q| q.key)
            .collect();
        let results = self.evaluations.join_all(&keys).await;

        let result = submission::assemble(
            &self.session_id,
            &self.paper_id,
            &self.parts,
            &results,
            elapsed,
            trigger,
        );
        let ack = self.gateway.submit(result).await?;
        self.complete().await;
        Ok(ack)
    }

    /// Bookkeeping after the result was stored.
    async fn complete(&mut self) {
        self.finished = true;
        self.timers.stop_all();
        self.clocks = Clocks::default();

        let mut marker = self.marker();
        marker.submitted = true;
        if let Err(e) = self.cache.save_progress(&marker).await {
            warn!("Failed to mark session {} as submitted: {}", self.session_id, e);
        }
        if let Err(e) = self.cache.clear_clips(&self.session_id).await {
            warn!("Failed to clear cached clips of {}: {}", self.session_id, e);
        }
        info!("Session {} finished", self.session_id);
    }

    /// Evaluates every answer in the part and marks it evaluated.
    async fn close_part(&mut self, index: usize) -> Result<(), SessionError> {
        if self.capture.is_recording() {
            self.stop_recording_lenient().await?;
        }
        if self.parts[index].phase.is_closed() {
            return Ok(());
        }
        if let Some(handle) = self.clocks.preparation.take() {
            self.timers.stop(handle);
        }

        self.set_phase(index, PartPhase::Evaluating)?;
        let mut keys = Vec::new();
        for question in &self.parts[index].questions {
            if let Some(recording) = &question.recording {
                self.evaluations.spawn(recording.clone(), question.text.clone());
                keys.push(question.key);
            }
        }
        info!(
            "Evaluating part {} ({} answers, {} still running)",
            self.parts[index].number,
            keys.len(),
            self.evaluations.pending_count()
        );
        let results = self.evaluations.join_all(&keys).await;
        self.set_phase(index, PartPhase::Evaluated)?;

        let finished: Vec<EvaluationResult> = results.values().map(|r| r.as_ref().clone()).collect();
        if let Err(e) = self.cache.save_results(&self.session_id, &finished).await {
            warn!("Failed to cache results of part {}: {}", self.parts[index].number, e);
        }
        Ok(())
    }

    fn enter_current_part(&mut self) -> Result<(), SessionError> {
        let part = &self.parts[self.current];
        info!(
            "Entering part {} ({:?}, {} questions)",
            part.number,
            part.mode,
            part.questions.len()
        );
        if !part.mode.has_preparation() || part.preparation_done || part.phase != PartPhase::Idle {
            return Ok(());
        }

        let preparation = part.preparation;
        self.set_phase(self.current, PartPhase::PreparationCountdown)?;
        let tx = self.events_tx.clone();
        let expired = self.events_tx.clone();
        self.clocks.preparation = Some(self.timers.start_clock(
            ClockKind::Preparation,
            preparation,
            move |tick| {
                let _ = tx.send(SessionEvent::Tick(tick));
            },
            move |handle| {
                let _ = expired.send(SessionEvent::Expired(handle));
            },
        ));
        Ok(())
    }

    /// Preparation is over: a monologue starts recording on its own.
    async fn preparation_expired(&mut self) -> Result<SessionNotice, SessionError> {
        let part = &mut self.parts[self.current];
        let number = part.number;
        if part.phase != PartPhase::PreparationCountdown {
            return Ok(SessionNotice::PreparationFinished {
                part: number,
                recording: None,
            });
        }
        part.preparation_done = true;
        info!("Preparation for part {} finished", number);

        let Some(first) = part.questions.first().map(|q| q.key.question) else {
            self.set_phase(self.current, PartPhase::Idle)?;
            return Ok(SessionNotice::PreparationFinished {
                part: number,
                recording: None,
            });
        };
        let key = self.start_recording(first).await?;
        Ok(SessionNotice::PreparationFinished {
            part: number,
            recording: Some(key),
        })
    }

    fn marker(&self) -> ProgressMarker {
        let started_at = self.started_at.unwrap_or_else(Utc::now);
        let mut marker = ProgressMarker::new(&self.session_id, &self.paper_id, started_at);
        marker.part_index = self.current;
        marker
    }

    fn start_session_clock(&mut self, duration: Duration) {
        let tx = self.events_tx.clone();
        let expired = self.events_tx.clone();
        self.clocks.session = Some(self.timers.start_clock(
            ClockKind::Session,
            duration,
            move |tick| {
                let _ = tx.send(SessionEvent::Tick(tick));
            },
            move |handle| {
                let _ = expired.send(SessionEvent::Expired(handle));
            },
        ));
    }

    fn stop_part_clocks(&mut self) {
        for handle in [self.clocks.preparation.take(), self.clocks.recording.take()]
            .into_iter()
            .flatten()
        {
            self.timers.stop(handle);
        }
    }

    /// Stops the current take; an empty take is dropped instead of failing.
    async fn stop_recording_lenient(&mut self) -> Result<(), SessionError> {
        match self.stop_recording().await {
            Ok(_) => Ok(()),
            Err(SessionError::Capture(CaptureError::EmptyRecording(reason))) => {
                warn!("Dropped empty take: {}", reason);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn ensure_active(&self) -> Result<(), SessionError> {
        if self.started_at.is_none() {
            return Err(SessionError::NotStarted);
        }
        if self.finished || self.closing {
            return Err(SessionError::Finished);
        }
        Ok(())
    }

    fn check_transition(&self, index: usize, next: PartPhase) -> Result<(), SessionError> {
        let part = &self.parts[index];
        if part.phase.can_transition(&next, part.mode) {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition {
                part: part.number,
                from: part.phase,
                to: next,
            })
        }
    }

    fn set_phase(&mut self, index: usize, next: PartPhase) -> Result<(), SessionError> {
        self.check_transition(index, next)?;
        let part = &mut self.parts[index];
        info!("Part {}: {} -> {}", part.number, part.phase, next);
        let change = PhaseChange {
            part: part.number,
            from: part.phase,
            to: next,
        };
        part.phase = next;
        // Nobody listening is fine.
        let _ = self.phases.send(change);
        Ok(())
    }

    fn part_index_of(&self, key: QuestionKey) -> Option<usize> {
        self.parts.iter().position(|p| p.number == key.part)
    }

    fn find_question(&self, key: QuestionKey) -> Option<&Question> {
        self.parts
            .iter()
            .find(|p| p.number == key.part)?
            .question(key.question)
    }
}
