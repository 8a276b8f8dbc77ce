//! End-to-end runs of the session controller on virtual time, with fake
//! audio, transcription, scoring and result storage.

use async_trait::async_trait;
use speaking_test_lib::audio::{AudioBuffer, AudioSource, SourceError};
use speaking_test_lib::cache::ClipCache;
use speaking_test_lib::config::TimingConfig;
use speaking_test_lib::evaluation::{EvaluationPipeline, ReasonCode};
use speaking_test_lib::recording::{CaptureError, Recording};
use speaking_test_lib::scoring::{LanguageScore, LanguageScorer, ScoringError, ScoringRequest};
use speaking_test_lib::session::{
    PartPhase, PhaseChange, QuestionKey, QuestionStatus, SessionController, SessionDeps,
    SessionError, SessionNotice, TestPaper,
};
use speaking_test_lib::stt::{STTError, SpeechAssessment, SpeechAssessor};
use speaking_test_lib::submission::{
    self, Ack, PersistError, ResultStore, SessionResult, SubmissionGateway, SubmissionStatus,
    SubmitError, SubmitTrigger,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::{sleep, Instant};

const SAMPLE_RATE: u32 = 1_000;

const PAPER: &str = r#"{
    "id": "paper-1",
    "title": "Mock speaking test",
    "parts": [
        {"number": 1, "mode": "direct-questions", "questions": [
            {"number": 1, "text": "Where do you live?"},
            {"number": 2, "text": "Do you work or study?"}]},
        {"number": 2, "mode": "prepared-monologue", "preparationSecs": 60,
         "cueCard": {"topic": "Describe a journey you enjoyed",
                     "bulletPoints": ["where you went", "who you went with"]}},
        {"number": 3, "mode": "discussion-questions", "questions": [
            {"number": 1, "text": "Why do people travel?"},
            {"number": 2, "text": "Is tourism harmful?"},
            {"number": 3, "text": "How will travel change?"}]}
    ]
}"#;

/// Produces as many samples as virtual time elapsed while it was open.
struct ClockedSource {
    opened_at: Option<Instant>,
    unavailable: bool,
}

impl AudioSource for ClockedSource {
    fn start(&mut self) -> Result<(), SourceError> {
        if self.unavailable {
            return Err(SourceError::DeviceUnavailable("permission denied".into()));
        }
        self.opened_at = Some(Instant::now());
        Ok(())
    }

    fn stop(&mut self) -> Result<AudioBuffer, SourceError> {
        let opened_at = self.opened_at.take().ok_or(SourceError::NotRecording)?;
        let frames = (opened_at.elapsed().as_secs_f64() * SAMPLE_RATE as f64) as usize;
        Ok(AudioBuffer::from_samples(vec![400; frames], SAMPLE_RATE, 1))
    }

    fn is_active(&self) -> bool {
        self.opened_at.is_some()
    }

    fn name(&self) -> &str {
        "clocked"
    }
}

struct EchoAssessor {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl SpeechAssessor for EchoAssessor {
    async fn assess(
        &self,
        recording: &Recording,
        _reference: Option<&str>,
    ) -> Result<SpeechAssessment, STTError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        sleep(Duration::from_millis(500)).await;
        Ok(SpeechAssessment {
            transcript: format!("my answer for {}", recording.question),
            fluency: Some(75.0),
            pronunciation: Some(80.0),
            overall: Some(78.0),
            duration_secs: recording.duration_secs,
            provider: "echo".into(),
        })
    }

    fn name(&self) -> &str {
        "echo"
    }
}

/// Fixed band per question prompt.
struct BandsByPrompt;

#[async_trait]
impl LanguageScorer for BandsByPrompt {
    async fn score(&self, request: &ScoringRequest) -> Result<LanguageScore, ScoringError> {
        let bands = [
            ("Where do you live?", 6.0),
            ("Do you work or study?", 7.0),
            ("Describe a journey", 5.5),
            ("Why do people travel?", 6.0),
            ("Is tourism harmful?", 8.0),
        ];
        let band = bands
            .iter()
            .find(|(prompt, _)| request.prompt_text.starts_with(prompt))
            .map(|(_, band)| *band)
            .ok_or(ScoringError::NoProviders)?;
        Ok(LanguageScore {
            band,
            feedback: format!("Scored against '{}'", request.prompt_text),
            categories: None,
            strengths: Vec::new(),
            improvements: Vec::new(),
            provider: "bands".into(),
        })
    }

    fn name(&self) -> &str {
        "bands"
    }
}

#[derive(Default)]
struct MemoryStore {
    saved: Mutex<Vec<SessionResult>>,
    delay: Duration,
}

impl MemoryStore {
    fn saved(&self) -> Vec<SessionResult> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn persist(&self, result: &SessionResult) -> Result<Ack, PersistError> {
        sleep(self.delay).await;
        self.saved.lock().unwrap().push(result.clone());
        Ok(Ack {
            result_id: Some(result.session_id.clone()),
            location: "memory".into(),
            attempts: 1,
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

struct Harness {
    _dir: TempDir,
    cache: Arc<ClipCache>,
    store: Arc<MemoryStore>,
    assessments: Arc<AtomicUsize>,
}

impl Harness {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(ClipCache::new(dir.path().join("cache")));
        Self {
            _dir: dir,
            cache,
            store: Arc::new(MemoryStore::default()),
            assessments: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn deps(&self, timing: TimingConfig, unavailable: bool) -> SessionDeps {
        let assessor = Arc::new(EchoAssessor {
            calls: self.assessments.clone(),
        });
        SessionDeps {
            source: Box::new(ClockedSource {
                opened_at: None,
                unavailable,
            }),
            pipeline: Arc::new(EvaluationPipeline::new(assessor, Arc::new(BandsByPrompt), "B2")),
            gateway: Arc::new(SubmissionGateway::new(self.store.clone())),
            cache: self.cache.clone(),
            timing,
        }
    }
}

fn timing() -> TimingConfig {
    TimingConfig {
        tick_millis: 1_000,
        ..TimingConfig::default()
    }
}

fn paper() -> TestPaper {
    TestPaper::from_json(PAPER).unwrap()
}

async fn started(harness: &Harness, paper: &TestPaper, timing: TimingConfig) -> SessionController {
    let mut controller = SessionController::new(paper, harness.deps(timing, false)).unwrap();
    controller.start().await.unwrap();
    controller
}

async fn answer(controller: &mut SessionController, question: u16, secs: u64) -> Arc<Recording> {
    controller.start_recording(question).await.unwrap();
    sleep(Duration::from_secs(secs)).await;
    controller.stop_recording().await.unwrap()
}

/// Applies clock events until one produces a notice matching `wanted`.
async fn pump_until<F>(controller: &mut SessionController, wanted: F) -> SessionNotice
where
    F: Fn(&SessionNotice) -> bool,
{
    loop {
        let event = controller.next_event().await.expect("clock events");
        if let Some(notice) = controller.handle_event(event).await.unwrap() {
            if wanted(&notice) {
                return notice;
            }
        }
    }
}

fn part_scores(result: &SessionResult) -> Vec<f32> {
    result.parts.iter().map(|p| p.score).collect()
}

#[tokio::test(start_paused = true)]
async fn three_part_session_scores_every_question() {
    let harness = Harness::new();
    let paper = paper();
    let mut controller = started(&harness, &paper, timing()).await;

    let first = answer(&mut controller, 1, 40).await;
    assert!((first.duration_secs - 40.0).abs() < 0.01);
    answer(&mut controller, 2, 50).await;

    let mut phases = controller.subscribe_phases();
    assert_eq!(controller.next_part().await.unwrap(), 1);
    let mut changes = Vec::new();
    while let Ok(change) = phases.try_recv() {
        changes.push(change);
    }
    assert_eq!(
        changes,
        vec![
            PhaseChange { part: 1, from: PartPhase::Idle, to: PartPhase::Evaluating },
            PhaseChange { part: 1, from: PartPhase::Evaluating, to: PartPhase::Evaluated },
            PhaseChange { part: 2, from: PartPhase::Idle, to: PartPhase::PreparationCountdown },
        ]
    );
    assert_eq!(controller.parts()[0].phase, PartPhase::Evaluated);
    assert_eq!(controller.current_part().phase, PartPhase::PreparationCountdown);
    assert_eq!(
        controller.question_status(QuestionKey::new(1, 2)),
        QuestionStatus::Evaluated
    );

    let prep_started = Instant::now();
    let notice = pump_until(&mut controller, |n| {
        matches!(n, SessionNotice::PreparationFinished { .. })
    })
    .await;
    assert!(prep_started.elapsed() >= Duration::from_secs(60));
    let SessionNotice::PreparationFinished { part, recording } = notice else {
        unreachable!()
    };
    assert_eq!(part, 2);
    assert_eq!(recording, Some(QuestionKey::new(2, 1)));
    assert_eq!(controller.recording_question(), Some(QuestionKey::new(2, 1)));

    let notice = pump_until(&mut controller, |n| {
        matches!(n, SessionNotice::RecordingForceStopped(_))
    })
    .await;
    let SessionNotice::RecordingForceStopped(monologue) = notice else {
        unreachable!()
    };
    assert!(monologue.duration_secs <= 120.0);
    assert!(monologue.duration_secs > 119.0);
    assert!(matches!(
        controller.start_recording(1).await,
        Err(SessionError::BudgetExhausted(_))
    ));

    assert_eq!(controller.next_part().await.unwrap(), 2);
    answer(&mut controller, 1, 20).await;

    controller.submit().await.unwrap();
    let saved = harness.store.saved();
    assert_eq!(saved.len(), 1);
    let result = &saved[0];

    assert_eq!(result.trigger, SubmitTrigger::Explicit);
    assert_eq!(part_scores(result), vec![6.5, 5.5, 2.0]);
    assert!((result.overall_score - 14.0 / 3.0).abs() < 1e-5);
    assert!((0.0..=9.0).contains(&result.overall_score));

    let unanswered = result.question(QuestionKey::new(3, 2)).unwrap();
    assert_eq!(unanswered.score, 0.0);
    assert_eq!(unanswered.reason, Some(ReasonCode::NotAttempted));
    let answered = result.question(QuestionKey::new(1, 1)).unwrap();
    assert_eq!(answered.transcript, "My answer for p1-q1.");
    assert!((answered.duration - 40.0).abs() < 0.01);

    assert!(controller.is_finished());
    assert_eq!(controller.progress().submission, SubmissionStatus::Submitted);
    assert!(matches!(controller.submit().await, Err(SessionError::Finished)));
    assert!(harness.cache.list(controller.session_id()).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn exit_scores_everything_as_not_attempted() {
    let harness = Harness::new();
    let paper = paper();
    let mut controller = started(&harness, &paper, timing()).await;

    answer(&mut controller, 1, 30).await;
    controller.start_recording(2).await.unwrap();
    sleep(Duration::from_secs(10)).await;

    controller.exit().await.unwrap();
    assert_eq!(controller.current_part().phase, PartPhase::Idle);
    assert_eq!(controller.progress().phase, PartPhase::Idle);
    assert!(controller.recording_question().is_none());

    let saved = harness.store.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].trigger, SubmitTrigger::Exit);
    assert_eq!(saved[0].overall_score, 0.0);
    for part in &saved[0].parts {
        assert_eq!(part.score, 0.0);
        for question in &part.questions {
            assert_eq!(question.score, 0.0);
            assert_eq!(question.reason, Some(ReasonCode::NotAttempted));
        }
    }

    assert!(matches!(
        controller.start_recording(1).await,
        Err(SessionError::Finished)
    ));
    assert!(harness.cache.list(controller.session_id()).await.unwrap().is_empty());
    assert!(matches!(
        SessionController::open(&paper, harness.deps(timing(), false), controller.session_id()).await,
        Err(SessionError::AlreadySubmitted(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn time_expiry_assembles_like_explicit_submit() {
    let mut paper = paper();
    paper.duration_secs = Some(100);

    let expired = Harness::new();
    let mut controller = started(&expired, &paper, timing()).await;
    answer(&mut controller, 1, 30).await;
    controller.start_recording(2).await.unwrap();

    let notice = pump_until(&mut controller, |n| matches!(n, SessionNotice::Finalized(_))).await;
    assert!(matches!(notice, SessionNotice::Finalized(_)));
    assert!(controller.is_finished());
    assert!(controller.recording_question().is_none());

    let explicit = Harness::new();
    let mut twin = started(&explicit, &paper, timing()).await;
    answer(&mut twin, 1, 30).await;
    answer(&mut twin, 2, 70).await;
    twin.submit().await.unwrap();

    let by_time = &expired.store.saved()[0];
    let by_user = &explicit.store.saved()[0];
    assert_eq!(by_time.trigger, SubmitTrigger::TimeExpired);
    assert_eq!(by_time.total_elapsed_secs, 100);
    assert_eq!(part_scores(by_time), part_scores(by_user));
    assert_eq!(by_time.overall_score, by_user.overall_score);
    assert_eq!(part_scores(by_time), vec![6.5, 0.0, 0.0]);

    let cut_off = by_time.question(QuestionKey::new(1, 2)).unwrap();
    assert_eq!(cut_off.score, 7.0);
    assert!((cut_off.duration - 70.0).abs() < 0.01);
}

#[tokio::test(start_paused = true)]
async fn parts_are_visited_forward_only() {
    let harness = Harness::new();
    let paper = paper();
    let mut controller = started(&harness, &paper, timing()).await;

    answer(&mut controller, 1, 10).await;
    controller.next_part().await.unwrap();

    assert!(matches!(
        controller.go_to_part(0).await,
        Err(SessionError::BackwardNavigation {
            current: 2,
            requested: 1
        })
    ));
    assert!(matches!(
        controller.go_to_part(7).await,
        Err(SessionError::UnknownPart(7))
    ));

    // Skipping the monologue cancels its preparation countdown.
    assert_eq!(controller.go_to_part(2).await.unwrap(), 2);
    assert_eq!(controller.parts()[1].phase, PartPhase::Evaluated);
    let stale = tokio::time::timeout(
        Duration::from_secs(90),
        pump_until(&mut controller, |n| {
            matches!(n, SessionNotice::PreparationFinished { .. })
        }),
    )
    .await;
    assert!(stale.is_err());

    assert!(matches!(controller.next_part().await, Err(SessionError::LastPart)));
    assert_eq!(controller.current_part().number, 3);
    assert!(controller.result(QuestionKey::new(1, 1)).is_some());
}

#[tokio::test(start_paused = true)]
async fn reopened_session_keeps_its_position_and_clips() {
    let harness = Harness::new();
    let paper = paper();
    let lazy = TimingConfig {
        eager_evaluation: false,
        ..timing()
    };

    let session_id = {
        let mut controller = started(&harness, &paper, lazy.clone()).await;
        answer(&mut controller, 1, 40).await;
        answer(&mut controller, 2, 40).await;
        controller.next_part().await.unwrap();
        answer(&mut controller, 1, 30).await;
        assert_eq!(harness.assessments.load(Ordering::SeqCst), 2);
        controller.session_id().to_string()
    };

    let reopened = Harness {
        _dir: TempDir::new().unwrap(),
        cache: harness.cache.clone(),
        store: harness.store.clone(),
        assessments: Arc::new(AtomicUsize::new(0)),
    };
    let mut controller = SessionController::open(&paper, reopened.deps(lazy, false), &session_id)
        .await
        .unwrap();

    assert_eq!(controller.current_part_index(), 1);
    // The current part's clip waits for the part boundary.
    assert_eq!(reopened.assessments.load(Ordering::SeqCst), 0);
    assert_eq!(
        controller.question_status(QuestionKey::new(2, 1)),
        QuestionStatus::Recorded
    );
    assert_eq!(controller.parts()[0].phase, PartPhase::Evaluated);
    assert_eq!(controller.current_part().phase, PartPhase::Idle);
    assert_eq!(
        controller.question_status(QuestionKey::new(1, 1)),
        QuestionStatus::Evaluated
    );
    let monologue = controller.progress();
    let monologue = monologue.question(QuestionKey::new(2, 1)).unwrap();
    assert_eq!(monologue.remaining_budget_secs, 90);
    assert!(matches!(
        controller.go_to_part(0).await,
        Err(SessionError::BackwardNavigation { .. })
    ));

    controller.submit().await.unwrap();
    assert_eq!(reopened.assessments.load(Ordering::SeqCst), 1);

    let result = &harness.store.saved()[0];
    assert_eq!(result.session_id, session_id);
    assert_eq!(part_scores(result), vec![6.5, 5.5, 0.0]);
    assert!((result.overall_score - 4.0).abs() < 1e-6);

    assert!(matches!(
        SessionController::open(&paper, reopened.deps(timing(), false), "no-such-session").await,
        Err(SessionError::UnknownSession(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn used_budget_survives_a_reload() {
    let harness = Harness::new();
    let paper = paper();

    let session_id = {
        let mut controller = started(&harness, &paper, timing()).await;
        answer(&mut controller, 1, 100).await;
        answer(&mut controller, 1, 15).await;
        answer(&mut controller, 2, 30).await;
        answer(&mut controller, 2, 30).await;

        let first = controller.parts()[0].question(1).unwrap();
        assert_eq!(first.remaining_budget(), Duration::from_secs(5));
        controller.session_id().to_string()
    };

    let mut controller = SessionController::open(&paper, harness.deps(timing(), false), &session_id)
        .await
        .unwrap();

    let part = &controller.parts()[0];
    assert_eq!(part.question(1).unwrap().remaining_budget(), Duration::from_secs(5));
    assert_eq!(part.question(2).unwrap().remaining_budget(), Duration::from_secs(60));
    let progress = controller.progress();
    assert_eq!(progress.question(QuestionKey::new(1, 2)).unwrap().remaining_budget_secs, 60);

    // The restored allowance still caps the next take.
    controller.start_recording(1).await.unwrap();
    let notice = pump_until(&mut controller, |n| {
        matches!(n, SessionNotice::RecordingForceStopped(_))
    })
    .await;
    let SessionNotice::RecordingForceStopped(last) = notice else {
        unreachable!()
    };
    assert!((last.duration_secs - 5.0).abs() < 0.01);
    assert!(matches!(
        controller.start_recording(1).await,
        Err(SessionError::BudgetExhausted(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn failed_evaluation_is_scored_zero_and_still_averaged() {
    let harness = Harness::new();
    let paper = paper();
    let mut controller = started(&harness, &paper, timing()).await;

    assert_eq!(controller.go_to_part(2).await.unwrap(), 2);
    answer(&mut controller, 1, 20).await;
    answer(&mut controller, 3, 30).await;
    sleep(Duration::from_secs(1)).await;
    assert_eq!(
        controller.question_status(QuestionKey::new(3, 3)),
        QuestionStatus::Failed
    );

    controller.submit().await.unwrap();
    let result = &harness.store.saved()[0];

    let failed = result.question(QuestionKey::new(3, 3)).unwrap();
    assert_eq!(failed.score, 0.0);
    assert_eq!(failed.reason, Some(ReasonCode::EvaluationError));
    assert!((failed.duration - 30.0).abs() < 0.01);

    let skipped = result.question(QuestionKey::new(3, 2)).unwrap();
    assert_eq!(skipped.reason, Some(ReasonCode::NotAttempted));

    assert_eq!(part_scores(result), vec![0.0, 0.0, 2.0]);
    assert!((result.overall_score - 2.0 / 3.0).abs() < 1e-6);
}

#[tokio::test(start_paused = true)]
async fn concurrent_submissions_persist_once() {
    let harness = Harness::new();
    let store = Arc::new(MemoryStore {
        saved: Mutex::new(Vec::new()),
        delay: Duration::from_secs(1),
    });
    let gateway = SubmissionGateway::new(store.clone());
    let controller = SessionController::new(&paper(), harness.deps(timing(), false)).unwrap();

    let doc = || {
        submission::assemble_abandoned(
            controller.session_id(),
            "paper-1",
            controller.parts(),
            Duration::from_secs(5),
        )
    };
    let (first, second) = tokio::join!(gateway.submit(doc()), gateway.submit(doc()));

    assert!(first.is_ok());
    assert!(matches!(second, Err(SubmitError::InFlight)));
    assert_eq!(store.saved().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn one_question_records_at_a_time() {
    let harness = Harness::new();
    let paper = paper();
    let mut controller = started(&harness, &paper, timing()).await;

    controller.start_recording(1).await.unwrap();
    sleep(Duration::from_secs(5)).await;
    controller.start_recording(2).await.unwrap();

    assert_eq!(controller.recording_question(), Some(QuestionKey::new(1, 2)));
    let first = controller.parts()[0].question(1).unwrap();
    assert!(first.is_attempted());
    assert_eq!(first.remaining_budget(), Duration::from_secs(115));
    assert!(matches!(
        controller.current_part().phase,
        PartPhase::Recording { question } if question == QuestionKey::new(1, 2)
    ));

    controller.stop_recording().await.unwrap();
    assert!(matches!(
        controller.stop_recording().await,
        Err(SessionError::NotRecording)
    ));
}

#[tokio::test(start_paused = true)]
async fn budget_is_shared_across_retakes() {
    let harness = Harness::new();
    let paper = paper();
    let mut controller = started(&harness, &paper, timing()).await;

    answer(&mut controller, 1, 100).await;
    controller.start_recording(1).await.unwrap();
    let notice = pump_until(&mut controller, |n| {
        matches!(n, SessionNotice::RecordingForceStopped(_))
    })
    .await;
    let SessionNotice::RecordingForceStopped(retake) = notice else {
        unreachable!()
    };
    assert!((retake.duration_secs - 20.0).abs() < 0.01);

    let question = controller.parts()[0].question(1).unwrap();
    assert_eq!(question.remaining_budget(), Duration::ZERO);
    assert!(question.consumed <= question.budget);
    assert!(matches!(
        controller.start_recording(1).await,
        Err(SessionError::BudgetExhausted(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn missing_microphone_is_reported_and_nothing_records() {
    let harness = Harness::new();
    let paper = paper();
    let mut controller = SessionController::new(&paper, harness.deps(timing(), true)).unwrap();
    controller.start().await.unwrap();

    assert!(matches!(
        controller.start_recording(1).await,
        Err(SessionError::Capture(CaptureError::DeviceUnavailable(_)))
    ));
    assert_eq!(controller.current_part().phase, PartPhase::Idle);
    assert!(controller.recording_question().is_none());

    controller.next_part().await.unwrap();
    loop {
        let event = controller.next_event().await.expect("clock events");
        match controller.handle_event(event).await {
            Ok(_) => continue,
            Err(SessionError::Capture(CaptureError::DeviceUnavailable(_))) => break,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(controller.current_part().phase, PartPhase::Idle);
    assert!(controller.current_part().preparation_done);
}
