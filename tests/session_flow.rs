//! End-to-end tests of the recording pipeline with fake collaborators.
//!
//! A fake audio source feeds pre-scripted frames, a fake backend is driven
//! from the test through a shared handle, and a collector sink records the
//! exact event sequence the controller broadcast.

use speechtide::audio::{AudioFrame, AudioSource, FrameQueue, FrameStream};
use speechtide::backend::{TranscriptEvent, TranscriptionBackend};
use speechtide::config::{ActivationMode, BackendKind, Config};
use speechtide::error::{BackendError, DeviceError, InjectionError};
use speechtide::hotkey::{HotkeyIntent, IntentKind};
use speechtide::session::log::{MemoryLogStore, SessionLog, SessionLogger};
use speechtide::session::{AudioSourceFactory, BackendFactory, SessionController};
use speechtide::sink::injector::TextInject;
use speechtide::sink::{OutputSink, SessionOutcome, SinkEvent, SinkSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Fakes

/// Audio source that exposes a fixed set of frames
struct FakeSource {
    frames: Vec<Vec<i16>>,
    queue: Option<Arc<FrameQueue>>,
}

#[async_trait::async_trait]
impl AudioSource for FakeSource {
    async fn open(&mut self) -> Result<FrameStream, DeviceError> {
        let queue = FrameQueue::new(64);
        for (i, samples) in self.frames.iter().enumerate() {
            queue.push(AudioFrame::from_samples(samples, 16000, i as u64));
        }
        self.queue = Some(queue.clone());
        Ok(FrameStream::new(queue))
    }

    async fn close(&mut self) {
        if let Some(queue) = &self.queue {
            queue.close();
        }
    }
}

/// How a fake backend behaves without test intervention
#[derive(Clone, Default)]
struct BackendScript {
    /// Emit this final right after finish()
    final_on_finish: Option<String>,
    /// Fail every submit with this error
    error_on_submit: Option<BackendError>,
}

/// Shared handle the test uses to observe and drive the fake backend
#[derive(Default)]
struct BackendHandle {
    submitted: Mutex<Vec<AudioFrame>>,
    finished: AtomicBool,
    tx: Mutex<Option<mpsc::Sender<TranscriptEvent>>>,
    session_id: Mutex<Option<Uuid>>,
}

impl BackendHandle {
    fn submitted_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    fn current_session(&self) -> Option<Uuid> {
        *self.session_id.lock().unwrap()
    }

    async fn wait_open(&self) {
        for _ in 0..400 {
            if self.tx.lock().unwrap().is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("backend session never opened");
    }

    async fn wait_submitted(&self, count: usize) {
        for _ in 0..400 {
            if self.submitted_count() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "expected {} submitted frames, got {}",
            count,
            self.submitted_count()
        );
    }

    async fn emit(&self, event: TranscriptEvent) {
        let tx = self
            .tx
            .lock()
            .unwrap()
            .clone()
            .expect("backend session not open");
        tx.send(event).await.expect("event channel closed");
    }

    async fn emit_partial(&self, text: &str) {
        let session_id = self.current_session().expect("no session");
        self.emit(TranscriptEvent::Partial {
            session_id,
            text: text.to_string(),
        })
        .await;
    }

    async fn emit_final(&self, text: &str) {
        let session_id = self.current_session().expect("no session");
        self.emit(TranscriptEvent::Final {
            session_id,
            text: text.to_string(),
        })
        .await;
    }

    async fn emit_error(&self, error: BackendError) {
        let session_id = self.current_session().expect("no session");
        self.emit(TranscriptEvent::Error { session_id, error }).await;
    }
}

struct FakeBackend {
    handle: Arc<BackendHandle>,
    script: BackendScript,
}

#[async_trait::async_trait]
impl TranscriptionBackend for FakeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Streaming
    }

    async fn open(
        &mut self,
        session_id: Uuid,
    ) -> Result<mpsc::Receiver<TranscriptEvent>, BackendError> {
        let (tx, rx) = mpsc::channel(32);
        *self.handle.tx.lock().unwrap() = Some(tx);
        *self.handle.session_id.lock().unwrap() = Some(session_id);
        self.handle.finished.store(false, Ordering::SeqCst);
        self.handle.submitted.lock().unwrap().clear();
        Ok(rx)
    }

    async fn submit(&mut self, frame: &AudioFrame) -> Result<(), BackendError> {
        if let Some(error) = &self.script.error_on_submit {
            return Err(error.clone());
        }
        self.handle.submitted.lock().unwrap().push(frame.clone());
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), BackendError> {
        self.handle.finished.store(true, Ordering::SeqCst);
        if let Some(text) = &self.script.final_on_finish {
            let session_id = self.handle.current_session().expect("no session");
            let text = text.clone();
            self.handle
                .emit(TranscriptEvent::Final { session_id, text })
                .await;
        }
        Ok(())
    }

    async fn shutdown(&mut self) {
        *self.handle.tx.lock().unwrap() = None;
    }
}

/// Injector that records calls and optionally fails
struct FakeInjector {
    calls: Mutex<Vec<String>>,
    fail: bool,
}

#[async_trait::async_trait]
impl TextInject for FakeInjector {
    async fn inject(&self, text: &str) -> Result<(), InjectionError> {
        self.calls.lock().unwrap().push(text.to_string());
        if self.fail {
            Err(InjectionError::Failed("injection refused".into()))
        } else {
            Ok(())
        }
    }
}

/// Sink recording the broadcast order
struct Collector {
    events: Arc<Mutex<Vec<SinkEvent>>>,
}

#[async_trait::async_trait]
impl OutputSink for Collector {
    fn name(&self) -> &'static str {
        "collector"
    }

    async fn deliver(&self, event: SinkEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ---------------------------------------------------------------------------
// Harness

struct Harness {
    intents: mpsc::Sender<HotkeyIntent>,
    events: Arc<Mutex<Vec<SinkEvent>>>,
    backend: Arc<BackendHandle>,
    injector: Arc<FakeInjector>,
    log: Arc<SessionLog>,
    task: tokio::task::JoinHandle<()>,
}

impl Harness {
    fn spawn(config: Config, frames: Vec<Vec<i16>>, script: BackendScript) -> Self {
        Self::spawn_with_injector(config, frames, script, false)
    }

    fn spawn_with_injector(
        config: Config,
        frames: Vec<Vec<i16>>,
        script: BackendScript,
        failing_injector: bool,
    ) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let backend = Arc::new(BackendHandle::default());
        let injector = Arc::new(FakeInjector {
            calls: Mutex::new(Vec::new()),
            fail: failing_injector,
        });
        let log = Arc::new(SessionLog::new(Box::new(MemoryLogStore::new())).unwrap());

        let sinks = SinkSet::new(vec![
            Arc::new(Collector {
                events: events.clone(),
            }) as Arc<dyn OutputSink>,
            Arc::new(SessionLogger::new(log.clone())),
        ]);

        let source_frames = frames;
        let source_factory: AudioSourceFactory = Box::new(move || {
            Ok(Box::new(FakeSource {
                frames: source_frames.clone(),
                queue: None,
            }) as Box<dyn AudioSource>)
        });

        let backend_handle = backend.clone();
        let backend_factory: BackendFactory = Box::new(move || {
            Ok(Box::new(FakeBackend {
                handle: backend_handle.clone(),
                script: script.clone(),
            }) as Box<dyn TranscriptionBackend>)
        });

        let (intent_tx, intent_rx) = mpsc::channel(64);
        let mut controller = SessionController::new(
            config,
            source_factory,
            backend_factory,
            sinks,
            injector.clone(),
        );
        let task = tokio::spawn(async move {
            controller.run(intent_rx).await;
        });

        Self {
            intents: intent_tx,
            events,
            backend,
            injector,
            log,
            task,
        }
    }

    async fn send(&self, kind: IntentKind) {
        self.intents.send(HotkeyIntent::new(kind)).await.unwrap();
    }

    fn snapshot(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Wait until the collected events satisfy the predicate
    async fn wait_for<F>(&self, what: &str, pred: F) -> Vec<SinkEvent>
    where
        F: Fn(&[SinkEvent]) -> bool,
    {
        for _ in 0..400 {
            let snapshot = self.snapshot();
            if pred(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {}; got {:?}", what, self.snapshot());
    }

    async fn shutdown(self) {
        drop(self.intents);
        let _ = self.task.await;
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.audio.min_duration_ms = 0;
    config.backend.finalize_timeout_ms = 2000;
    config
}

fn count_started(events: &[SinkEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SinkEvent::SessionStarted { .. }))
        .count()
}

fn count_terminal(events: &[SinkEvent]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}

fn finalized_outcomes(events: &[SinkEvent]) -> Vec<SessionOutcome> {
    events
        .iter()
        .filter_map(|e| match e {
            SinkEvent::Finalized(outcome) => Some(outcome.clone()),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests

/// The full streaming scenario: Engage, five frames, two partials,
/// Disengage, Final within the timeout. UI sequence and log contents are
/// checked end to end.
#[tokio::test]
async fn scenario_streaming_session() {
    let frames: Vec<Vec<i16>> = (0..5).map(|_| vec![1000i16; 320]).collect();
    let harness = Harness::spawn(test_config(), frames, BackendScript::default());

    harness.send(IntentKind::Engage).await;
    harness.backend.wait_open().await;
    harness.backend.wait_submitted(5).await;
    harness
        .wait_for("level meters", |e| {
            e.iter()
                .filter(|e| matches!(e, SinkEvent::LevelMeter { .. }))
                .count()
                == 5
        })
        .await;

    harness.backend.emit_partial("hel").await;
    harness.backend.emit_partial("hello").await;
    harness
        .wait_for("partials", |e| {
            e.iter()
                .filter(|e| matches!(e, SinkEvent::PartialText { .. }))
                .count()
                == 2
        })
        .await;

    harness.send(IntentKind::Engage).await; // tap stop edge
    for _ in 0..400 {
        if harness.backend.finished.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(harness.backend.finished.load(Ordering::SeqCst));

    harness.backend.emit_final("hello world").await;
    let events = harness
        .wait_for("finalized", |e| count_terminal(e) == 1)
        .await;

    // Exact UI sequence
    assert!(matches!(events[0], SinkEvent::SessionStarted { mode: ActivationMode::Tap, .. }));
    for event in &events[1..6] {
        assert!(matches!(event, SinkEvent::LevelMeter { .. }));
    }
    match (&events[6], &events[7]) {
        (
            SinkEvent::PartialText { text: first, .. },
            SinkEvent::PartialText { text: second, .. },
        ) => {
            assert_eq!(first, "hel");
            assert_eq!(second, "hello");
        }
        other => panic!("expected two partials, got {:?}", other),
    }
    match &events[8] {
        SinkEvent::Finalized(outcome) => {
            assert_eq!(outcome.text, "hello world");
            assert!(outcome.injected);
            assert!(outcome.injection_error.is_none());
        }
        other => panic!("expected finalized, got {:?}", other),
    }
    assert_eq!(events.len(), 9);

    // Injection happened exactly once, with the final text
    assert_eq!(
        *harness.injector.calls.lock().unwrap(),
        vec!["hello world".to_string()]
    );

    // One log entry with a title derived from the text
    let entries = harness.log.recent(10).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].seq, 1);
    assert_eq!(entries[0].title, "hello world");
    assert_eq!(entries[0].mode, ActivationMode::Tap);

    harness.shutdown().await;
}

/// Tap law: a third Engage while Finalizing is a no-op.
#[tokio::test]
async fn tap_third_engage_while_finalizing_is_noop() {
    let harness = Harness::spawn(test_config(), vec![], BackendScript::default());

    harness.send(IntentKind::Engage).await;
    harness.backend.wait_open().await;
    harness
        .wait_for("session start", |e| count_started(e) == 1)
        .await;

    harness.send(IntentKind::Engage).await; // Capturing -> Finalizing
    for _ in 0..400 {
        if harness.backend.finished.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    harness.send(IntentKind::Engage).await; // no-op
    tokio::time::sleep(Duration::from_millis(50)).await;

    let events = harness.snapshot();
    assert_eq!(count_started(&events), 1, "third Engage must not start a session");
    assert_eq!(count_terminal(&events), 0);

    harness.backend.emit_final("done").await;
    harness
        .wait_for("finalized", |e| count_terminal(e) == 1)
        .await;

    harness.shutdown().await;
}

/// Hold law: HoldEnd without a preceding HoldStart creates nothing.
#[tokio::test]
async fn hold_end_without_start_is_noop() {
    let harness = Harness::spawn(test_config(), vec![], BackendScript::default());

    harness.send(IntentKind::HoldEnd).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(harness.snapshot().is_empty());
    assert!(harness.backend.current_session().is_none());

    harness.shutdown().await;
}

/// Re-entrancy: a second start intent while a session is live is ignored.
#[tokio::test]
async fn reentrant_start_is_ignored() {
    let script = BackendScript {
        final_on_finish: Some("ok".into()),
        ..BackendScript::default()
    };
    let harness = Harness::spawn(test_config(), vec![], script);

    harness.send(IntentKind::HoldStart).await;
    harness.backend.wait_open().await;
    harness.send(IntentKind::HoldStart).await;
    harness.send(IntentKind::HoldStart).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(count_started(&harness.snapshot()), 1);

    harness.send(IntentKind::HoldEnd).await;
    let events = harness
        .wait_for("finalized", |e| count_terminal(e) == 1)
        .await;
    assert_eq!(count_started(&events), 1);

    harness.shutdown().await;
}

/// Finalize timeout completes the session with accumulated partial text.
#[tokio::test]
async fn finalize_timeout_completes_with_partial_text() {
    let mut config = test_config();
    config.backend.finalize_timeout_ms = 150;
    let harness = Harness::spawn(config, vec![], BackendScript::default());

    harness.send(IntentKind::HoldStart).await;
    harness.backend.wait_open().await;
    harness.backend.emit_partial("partial tex").await;
    harness
        .wait_for("partial", |e| {
            e.iter().any(|e| matches!(e, SinkEvent::PartialText { .. }))
        })
        .await;

    harness.send(IntentKind::HoldEnd).await;

    // No Final ever arrives; the timeout must complete (not fail) the session.
    let events = harness
        .wait_for("timeout completion", |e| count_terminal(e) == 1)
        .await;
    let outcomes = finalized_outcomes(&events);
    assert_eq!(outcomes.len(), 1, "expected Completed, not Failed");
    assert_eq!(outcomes[0].text, "partial tex");
    assert!(outcomes[0].injected);

    harness.shutdown().await;
}

/// Finalize timeout with no partial text completes with an empty string.
#[tokio::test]
async fn finalize_timeout_with_no_text_completes_empty() {
    let mut config = test_config();
    config.backend.finalize_timeout_ms = 150;
    let harness = Harness::spawn(config, vec![], BackendScript::default());

    harness.send(IntentKind::HoldStart).await;
    harness.backend.wait_open().await;
    harness.send(IntentKind::HoldEnd).await;

    let events = harness
        .wait_for("timeout completion", |e| count_terminal(e) == 1)
        .await;
    let outcomes = finalized_outcomes(&events);
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].text, "");
    assert!(!outcomes[0].injected);

    // Empty text: injection skipped, but the session is still logged.
    assert!(harness.injector.calls.lock().unwrap().is_empty());
    let entries = harness.log.recent(10).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].title, "Session 1");

    harness.shutdown().await;
}

/// A backend error fails the session: partial text discarded, no log entry.
#[tokio::test]
async fn backend_error_fails_session_without_log_entry() {
    let harness = Harness::spawn(test_config(), vec![], BackendScript::default());

    harness.send(IntentKind::HoldStart).await;
    harness.backend.wait_open().await;
    harness.backend.emit_partial("doomed").await;
    harness
        .wait_for("partial", |e| {
            e.iter().any(|e| matches!(e, SinkEvent::PartialText { .. }))
        })
        .await;

    harness
        .backend
        .emit_error(BackendError::Transport("connection reset".into()))
        .await;

    let events = harness
        .wait_for("failure", |e| count_terminal(e) == 1)
        .await;
    match events.last().unwrap() {
        SinkEvent::Failed { reason, .. } => assert!(reason.contains("connection reset")),
        other => panic!("expected Failed, got {:?}", other),
    }

    assert!(harness.injector.calls.lock().unwrap().is_empty());
    assert!(harness.log.recent(10).unwrap().is_empty());

    harness.shutdown().await;
}

/// A submit error also fails the session.
#[tokio::test]
async fn submit_error_fails_session() {
    let script = BackendScript {
        error_on_submit: Some(BackendError::Transport("socket closed".into())),
        ..BackendScript::default()
    };
    let harness = Harness::spawn(test_config(), vec![vec![500i16; 320]], script);

    harness.send(IntentKind::HoldStart).await;
    let events = harness
        .wait_for("failure", |e| count_terminal(e) == 1)
        .await;
    assert!(matches!(events.last().unwrap(), SinkEvent::Failed { .. }));

    harness.shutdown().await;
}

/// Cancel releases everything and emits exactly one Cancelled event.
#[tokio::test]
async fn cancel_intent_cancels_active_session() {
    let harness = Harness::spawn(test_config(), vec![], BackendScript::default());

    harness.send(IntentKind::HoldStart).await;
    harness.backend.wait_open().await;
    harness.send(IntentKind::Cancel).await;

    let events = harness
        .wait_for("cancellation", |e| count_terminal(e) == 1)
        .await;
    assert!(matches!(events.last().unwrap(), SinkEvent::Cancelled { .. }));
    assert!(harness.log.recent(10).unwrap().is_empty());

    // A cancel with nothing active is a no-op
    harness.send(IntentKind::Cancel).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(count_terminal(&harness.snapshot()), 1);

    harness.shutdown().await;
}

/// Injection failure still completes the session, flagged in the outcome.
#[tokio::test]
async fn injection_failure_flags_completed_session() {
    let script = BackendScript {
        final_on_finish: Some("important words".into()),
        ..BackendScript::default()
    };
    let harness = Harness::spawn_with_injector(test_config(), vec![], script, true);

    harness.send(IntentKind::HoldStart).await;
    harness.backend.wait_open().await;
    harness.send(IntentKind::HoldEnd).await;

    let events = harness
        .wait_for("completion", |e| count_terminal(e) == 1)
        .await;
    let outcomes = finalized_outcomes(&events);
    assert_eq!(outcomes.len(), 1, "injection failure must not fail the session");
    assert!(!outcomes[0].injected);
    assert!(outcomes[0]
        .injection_error
        .as_deref()
        .unwrap()
        .contains("injection refused"));

    // Still logged as completed
    assert_eq!(harness.log.recent(10).unwrap().len(), 1);

    harness.shutdown().await;
}

/// All submitted frames reach the backend before the single terminal event
/// (the batch contract, exercised through the shared backend interface).
#[tokio::test]
async fn all_frames_reach_backend_before_terminal() {
    let frames: Vec<Vec<i16>> = (0..3).map(|i| vec![i as i16 * 100; 320]).collect();
    let script = BackendScript {
        final_on_finish: Some("abc".into()),
        ..BackendScript::default()
    };
    let harness = Harness::spawn(test_config(), frames, script);

    harness.send(IntentKind::HoldStart).await;
    harness.backend.wait_submitted(3).await;
    harness.send(IntentKind::HoldEnd).await;

    let events = harness
        .wait_for("completion", |e| count_terminal(e) == 1)
        .await;
    assert_eq!(count_terminal(&events), 1);
    assert_eq!(harness.backend.submitted_count(), 3);

    // Frame order was preserved
    let sequences: Vec<u64> = harness
        .backend
        .submitted
        .lock()
        .unwrap()
        .iter()
        .map(|f| f.sequence)
        .collect();
    assert_eq!(sequences, vec![0, 1, 2]);

    harness.shutdown().await;
}

/// For any intent stream, at most one session is non-terminal at a time:
/// scanning the ordered event log, starts and terminals must interleave.
#[tokio::test]
async fn single_active_session_under_random_intents() {
    let script = BackendScript {
        final_on_finish: Some("ok".into()),
        ..BackendScript::default()
    };
    let harness = Harness::spawn(test_config(), vec![], script);

    // Deterministic pseudo-random intent stream
    let intents = [
        IntentKind::Engage,
        IntentKind::HoldStart,
        IntentKind::HoldEnd,
        IntentKind::Disengage,
        IntentKind::Cancel,
    ];
    let mut state: u64 = 0x5eed;
    for _ in 0..200 {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let intent = intents[(state >> 33) as usize % intents.len()];
        harness.send(intent).await;
        if state % 7 == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
    // Quiesce: cancel whatever is open and let deliveries settle.
    harness.send(IntentKind::Cancel).await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let events = harness.snapshot();
    let mut open = 0i64;
    for event in &events {
        match event {
            SinkEvent::SessionStarted { .. } => {
                open += 1;
                assert!(open <= 1, "two sessions were live at once");
            }
            e if e.is_terminal() => {
                open -= 1;
                assert!(open >= 0, "terminal event without a session");
            }
            _ => {}
        }
    }
    assert_eq!(open, 0, "a session was left non-terminal");

    harness.shutdown().await;
}

/// 100 completed sessions produce strictly increasing, gap-free sequence
/// numbers.
#[tokio::test]
async fn session_log_sequences_are_gap_free_across_sessions() {
    let script = BackendScript {
        final_on_finish: Some("entry".into()),
        ..BackendScript::default()
    };
    let harness = Harness::spawn(test_config(), vec![], script);

    for i in 0..100usize {
        harness.send(IntentKind::HoldStart).await;
        harness.send(IntentKind::HoldEnd).await;
        harness
            .wait_for("completion", |e| count_terminal(e) == i + 1)
            .await;
    }

    // The logger sink is fire-and-forget; wait for the last append.
    for _ in 0..400 {
        if harness.log.recent(200).unwrap().len() == 100 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let entries = harness.log.recent(200).unwrap();
    assert_eq!(entries.len(), 100);
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.seq, 100 - i as u64);
    }

    harness.shutdown().await;
}

/// A device failure at open terminates the attempt with a single Failed
/// event and leaves the controller usable.
#[tokio::test]
async fn device_failure_is_contained() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let backend = Arc::new(BackendHandle::default());
    let injector = Arc::new(FakeInjector {
        calls: Mutex::new(Vec::new()),
        fail: false,
    });

    let sinks = SinkSet::new(vec![Arc::new(Collector {
        events: events.clone(),
    }) as Arc<dyn OutputSink>]);

    // First open fails, later opens succeed.
    let attempts = Arc::new(Mutex::new(0usize));
    let attempts_clone = attempts.clone();
    let source_factory: AudioSourceFactory = Box::new(move || {
        let mut n = attempts_clone.lock().unwrap();
        *n += 1;
        if *n == 1 {
            Err(DeviceError::NoDefaultDevice)
        } else {
            Ok(Box::new(FakeSource {
                frames: vec![],
                queue: None,
            }) as Box<dyn AudioSource>)
        }
    });

    let backend_handle = backend.clone();
    let backend_factory: BackendFactory = Box::new(move || {
        Ok(Box::new(FakeBackend {
            handle: backend_handle.clone(),
            script: BackendScript {
                final_on_finish: Some("recovered".into()),
                ..BackendScript::default()
            },
        }) as Box<dyn TranscriptionBackend>)
    });

    let (intent_tx, intent_rx) = mpsc::channel(16);
    let mut controller =
        SessionController::new(test_config(), source_factory, backend_factory, sinks, injector);
    let task = tokio::spawn(async move {
        controller.run(intent_rx).await;
    });

    // First attempt fails at the device
    intent_tx
        .send(HotkeyIntent::new(IntentKind::HoldStart))
        .await
        .unwrap();
    for _ in 0..400 {
        if events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, SinkEvent::Failed { .. }))
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    {
        let snapshot = events.lock().unwrap();
        assert_eq!(snapshot.len(), 1, "device failure must produce exactly one event");
        assert!(matches!(snapshot[0], SinkEvent::Failed { .. }));
    }

    // The controller recovers: the next session completes normally.
    intent_tx
        .send(HotkeyIntent::new(IntentKind::HoldStart))
        .await
        .unwrap();
    intent_tx
        .send(HotkeyIntent::new(IntentKind::HoldEnd))
        .await
        .unwrap();
    for _ in 0..400 {
        if events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, SinkEvent::Finalized(_)))
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, SinkEvent::Finalized(_))));

    drop(intent_tx);
    let _ = task.await;
}
