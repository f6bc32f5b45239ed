//! Recording session state machine
//!
//! One controller task owns the whole pipeline: hotkey intents drive the
//! state machine, frames flow from the audio source into the active
//! transcription backend, transcript events flow out to the sinks, and
//! deadlines bound both capture length and finalization latency. Every
//! collaborator for a session (source, backend, event channel) is owned by
//! that session and released on every exit path.
//!
//! States: Idle -> Arming -> Capturing -> Finalizing -> terminal
//! (Completed | Cancelled | Failed). Idle is the absence of an active
//! session; Arming is traversed while the device and backend are opened.

pub mod log;

use crate::audio::{AudioFrame, AudioSource, FrameStream};
use crate::backend::{TranscriptEvent, TranscriptionBackend};
use crate::config::{ActivationMode, BackendKind, Config};
use crate::error::{BackendError, DeviceError};
use crate::hotkey::{HotkeyIntent, IntentKind};
use crate::sink::injector::TextInject;
use crate::sink::{SessionOutcome, SinkEvent, SinkSet};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

/// Lifecycle of one recording session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Resources being acquired (device, backend connection)
    Arming,
    /// Audio flowing to the backend
    Capturing,
    /// Capture stopped, waiting for the final transcript
    Finalizing,
    /// Terminal: final text delivered (possibly empty on timeout)
    Completed,
    /// Terminal: aborted, no text emitted, no log entry
    Cancelled,
    /// Terminal: backend or device failure
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Arming => "Arming",
            SessionState::Capturing => "Capturing",
            SessionState::Finalizing => "Finalizing",
            SessionState::Completed => "Completed",
            SessionState::Cancelled => "Cancelled",
            SessionState::Failed => "Failed",
        };
        write!(f, "{}", name)
    }
}

/// The session record, mutated only by the controller
#[derive(Debug, Clone)]
pub struct RecordingSession {
    pub id: Uuid,
    pub mode: ActivationMode,
    pub backend: BackendKind,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub partial_text: String,
    pub final_text: Option<String>,
}

impl RecordingSession {
    fn new(mode: ActivationMode, backend: BackendKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            mode,
            backend,
            state: SessionState::Arming,
            started_at: Utc::now(),
            ended_at: None,
            partial_text: String::new(),
            final_text: None,
        }
    }
}

/// Factory for per-session audio sources
pub type AudioSourceFactory =
    Box<dyn Fn() -> Result<Box<dyn AudioSource>, DeviceError> + Send + Sync>;

/// Factory for per-session transcription backends
pub type BackendFactory =
    Box<dyn Fn() -> Result<Box<dyn TranscriptionBackend>, BackendError> + Send + Sync>;

/// Everything owned by one live session
struct ActiveSession {
    record: RecordingSession,
    source: Box<dyn AudioSource>,
    stream: FrameStream,
    backend: Box<dyn TranscriptionBackend>,
    events: mpsc::Receiver<TranscriptEvent>,
    started: Instant,
    capture_deadline: Instant,
    finalize_deadline: Option<Instant>,
}

/// What woke the controller loop
enum Wake {
    Intent(HotkeyIntent),
    IntentsClosed,
    Frame(Option<AudioFrame>),
    Transcript(Option<TranscriptEvent>),
    CaptureTimeout,
    FinalizeTimeout,
}

/// Drives recording sessions: at most one non-terminal session exists at
/// any time, enforced by construction (`active` is an Option).
pub struct SessionController {
    config: Config,
    source_factory: AudioSourceFactory,
    backend_factory: BackendFactory,
    sinks: SinkSet,
    injector: Arc<dyn TextInject>,
    active: Option<ActiveSession>,
}

impl SessionController {
    pub fn new(
        config: Config,
        source_factory: AudioSourceFactory,
        backend_factory: BackendFactory,
        sinks: SinkSet,
        injector: Arc<dyn TextInject>,
    ) -> Self {
        Self {
            config,
            source_factory,
            backend_factory,
            sinks,
            injector,
            active: None,
        }
    }

    /// Run until the intent channel closes. Any active session is
    /// cancelled on shutdown.
    pub async fn run(&mut self, mut intents: mpsc::Receiver<HotkeyIntent>) {
        loop {
            let wake = self.wait_next(&mut intents).await;
            match wake {
                Wake::Intent(intent) => self.handle_intent(intent).await,
                Wake::IntentsClosed => {
                    self.cancel_active("shutdown").await;
                    break;
                }
                Wake::Frame(Some(frame)) => self.on_frame(frame).await,
                Wake::Frame(None) => {
                    // The capture stream ended underneath us; treat it as
                    // the stop edge so buffered audio still transcribes.
                    tracing::warn!("Audio stream ended unexpectedly, finalizing");
                    self.stop_capture().await;
                }
                Wake::Transcript(Some(event)) => self.on_transcript_event(event).await,
                Wake::Transcript(None) => {
                    self.fail_active("backend closed its event channel".into())
                        .await;
                }
                Wake::CaptureTimeout => {
                    tracing::warn!(
                        "Recording timeout ({}s limit), stopping",
                        self.config.audio.max_duration_secs
                    );
                    self.stop_capture().await;
                }
                Wake::FinalizeTimeout => self.on_finalize_timeout().await,
            }
        }
    }

    async fn wait_next(&mut self, intents: &mut mpsc::Receiver<HotkeyIntent>) -> Wake {
        let Some(active) = self.active.as_mut() else {
            return match intents.recv().await {
                Some(intent) => Wake::Intent(intent),
                None => Wake::IntentsClosed,
            };
        };

        let capturing = active.record.state == SessionState::Capturing;
        let finalizing = active.record.state == SessionState::Finalizing;
        let capture_deadline = active.capture_deadline;
        let finalize_deadline = active.finalize_deadline.unwrap_or(capture_deadline);

        tokio::select! {
            biased;

            intent = intents.recv() => match intent {
                Some(intent) => Wake::Intent(intent),
                None => Wake::IntentsClosed,
            },

            event = active.events.recv() => Wake::Transcript(event),

            frame = active.stream.next(), if capturing => Wake::Frame(frame),

            _ = tokio::time::sleep_until(capture_deadline), if capturing => Wake::CaptureTimeout,

            _ = tokio::time::sleep_until(finalize_deadline), if finalizing => Wake::FinalizeTimeout,
        }
    }

    /// Apply one hotkey intent to the state machine.
    ///
    /// Re-entrancy rule: a start intent while a session is non-terminal is
    /// an idempotent no-op, except that in tap mode a second `Engage`
    /// during capture is the stop edge. Stop intents with no matching
    /// capture are no-ops, so a `HoldEnd` without `HoldStart` never
    /// creates a session.
    async fn handle_intent(&mut self, intent: HotkeyIntent) {
        let state = self.active.as_ref().map(|a| a.record.state);
        let mode = self.active.as_ref().map(|a| a.record.mode);
        tracing::debug!("Intent {:?} in state {:?}", intent.kind, state);

        match intent.kind {
            IntentKind::Engage => match (state, mode) {
                (None, _) => self.start_session(ActivationMode::Tap).await,
                (Some(SessionState::Capturing), Some(ActivationMode::Tap)) => {
                    self.stop_capture().await;
                }
                _ => {}
            },
            IntentKind::HoldStart => {
                if state.is_none() {
                    self.start_session(ActivationMode::Hold).await;
                }
            }
            IntentKind::Disengage => {
                if state == Some(SessionState::Capturing) && mode == Some(ActivationMode::Tap) {
                    self.stop_capture().await;
                }
            }
            IntentKind::HoldEnd => {
                if state == Some(SessionState::Capturing) && mode == Some(ActivationMode::Hold) {
                    self.stop_capture().await;
                }
            }
            IntentKind::Cancel => {
                if state.is_some() {
                    self.cancel_active("cancelled by user").await;
                }
            }
        }
    }

    /// Idle -> Arming -> Capturing. On any acquisition failure the
    /// stillborn session terminates with a single Failed event.
    async fn start_session(&mut self, mode: ActivationMode) {
        let mut record = RecordingSession::new(mode, self.config.backend.kind);
        tracing::info!("Session {} starting ({} mode)", record.id, mode);

        let mut source = match (self.source_factory)() {
            Ok(source) => source,
            Err(e) => {
                tracing::error!("Failed to create audio source: {}", e);
                self.sinks.broadcast(SinkEvent::Failed {
                    session_id: record.id,
                    reason: e.to_string(),
                });
                return;
            }
        };

        let stream = match source.open().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("Failed to open audio source: {}", e);
                self.sinks.broadcast(SinkEvent::Failed {
                    session_id: record.id,
                    reason: e.to_string(),
                });
                return;
            }
        };

        let mut backend = match (self.backend_factory)() {
            Ok(backend) => backend,
            Err(e) => {
                tracing::error!("Failed to create backend: {}", e);
                source.close().await;
                self.sinks.broadcast(SinkEvent::Failed {
                    session_id: record.id,
                    reason: e.to_string(),
                });
                return;
            }
        };

        record.backend = backend.kind();

        let events = match backend.open(record.id).await {
            Ok(events) => events,
            Err(e) => {
                tracing::error!("Failed to open backend session: {}", e);
                source.close().await;
                backend.shutdown().await;
                self.sinks.broadcast(SinkEvent::Failed {
                    session_id: record.id,
                    reason: e.to_string(),
                });
                return;
            }
        };

        record.state = SessionState::Capturing;
        let started = Instant::now();
        let capture_deadline =
            started + Duration::from_secs(self.config.audio.max_duration_secs as u64);

        self.sinks.broadcast(SinkEvent::SessionStarted {
            session_id: record.id,
            mode,
        });

        self.active = Some(ActiveSession {
            record,
            source,
            stream,
            backend,
            events,
            started,
            capture_deadline,
            finalize_deadline: None,
        });
    }

    /// One captured frame: level meter out, audio in.
    async fn on_frame(&mut self, frame: AudioFrame) {
        let Some(active) = self.active.as_mut() else {
            return;
        };

        self.sinks.broadcast(SinkEvent::LevelMeter {
            session_id: active.record.id,
            amplitude: frame.rms(),
            captured_at: frame.captured_at,
        });

        if let Err(e) = active.backend.submit(&frame).await {
            self.fail_active(e.to_string()).await;
        }
    }

    /// Capturing -> Finalizing: stop the device, flush buffered frames,
    /// tell the backend no more audio is coming.
    async fn stop_capture(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.record.state != SessionState::Capturing {
            return;
        }

        let elapsed = active.started.elapsed();
        tracing::info!(
            "Session {} capture stopped ({:.1}s)",
            active.record.id,
            elapsed.as_secs_f32()
        );

        if elapsed < Duration::from_millis(self.config.audio.min_duration_ms) {
            tracing::debug!("Capture too short ({:?}), treating as accidental press", elapsed);
            self.cancel_active("capture too short").await;
            return;
        }

        active.source.close().await;

        // The stream is finite once closed; hand any buffered tail to the
        // backend before end-of-audio.
        while let Some(frame) = active.stream.next().await {
            if let Err(e) = active.backend.submit(&frame).await {
                let reason = e.to_string();
                self.fail_active(reason).await;
                return;
            }
        }

        if let Err(e) = active.backend.finish().await {
            let reason = e.to_string();
            self.fail_active(reason).await;
            return;
        }

        active.record.state = SessionState::Finalizing;
        active.finalize_deadline = Some(Instant::now() + self.config.backend.finalize_timeout());
    }

    /// Route one backend event, discarding anything for a dead session.
    async fn on_transcript_event(&mut self, event: TranscriptEvent) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        if event.session_id() != active.record.id {
            tracing::debug!("Discarding event for defunct session {}", event.session_id());
            return;
        }

        match event {
            TranscriptEvent::Partial { text, .. } => {
                // A Final, once accepted, suppresses trailing partials; a
                // live Final also tears the session down, so reaching here
                // means none has been accepted yet.
                if let Some(active) = self.active.as_mut() {
                    active.record.partial_text = text.clone();
                    self.sinks.broadcast(SinkEvent::PartialText {
                        session_id: active.record.id,
                        text,
                    });
                }
            }
            TranscriptEvent::Final { text, .. } => self.complete_active(text).await,
            TranscriptEvent::Error { error, .. } => self.fail_active(error.to_string()).await,
        }
    }

    /// Finalizing deadline fired: complete with whatever partial text
    /// accumulated. This is a completion, not a failure.
    async fn on_finalize_timeout(&mut self) {
        let Some(active) = self.active.as_ref() else {
            return;
        };
        tracing::warn!(
            "Session {} finalize timeout, completing with partial text",
            active.record.id
        );
        let text = active.record.partial_text.clone();
        self.complete_active(text).await;
    }

    /// -> Completed. Injection is awaited so its outcome rides along in
    /// the terminal event; the log entry is written by the logger sink.
    async fn complete_active(&mut self, text: String) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        active.record.final_text = Some(text.clone());
        active.record.ended_at = Some(Utc::now());
        active.record.state = SessionState::Completed;

        let (injected, injection_error) = if text.trim().is_empty() {
            (false, None)
        } else {
            match self.injector.inject(&text).await {
                Ok(()) => (true, None),
                Err(e) => {
                    tracing::error!("Text injection failed: {}", e);
                    (false, Some(e.to_string()))
                }
            }
        };

        active.source.close().await;
        active.backend.shutdown().await;
        active.events.close();

        tracing::info!(
            "Session {} completed ({} chars{})",
            active.record.id,
            text.chars().count(),
            if injected { ", injected" } else { "" }
        );

        self.sinks.broadcast(SinkEvent::Finalized(SessionOutcome {
            session_id: active.record.id,
            mode: active.record.mode,
            backend: active.record.backend,
            started_at: active.record.started_at,
            duration: active.started.elapsed(),
            text,
            injected,
            injection_error,
        }));
    }

    /// -> Failed. Partial text is discarded and no log entry is written.
    async fn fail_active(&mut self, reason: String) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        active.record.ended_at = Some(Utc::now());
        active.record.state = SessionState::Failed;

        active.source.close().await;
        active.backend.shutdown().await;
        active.events.close();

        tracing::error!("Session {} failed: {}", active.record.id, reason);

        self.sinks.broadcast(SinkEvent::Failed {
            session_id: active.record.id,
            reason,
        });
    }

    /// -> Cancelled. Resources released, no text, no log entry.
    async fn cancel_active(&mut self, reason: &str) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        active.record.ended_at = Some(Utc::now());
        active.record.state = SessionState::Cancelled;

        active.source.close().await;
        active.backend.shutdown().await;
        active.events.close();

        tracing::info!("Session {} cancelled: {}", active.record.id, reason);

        self.sinks.broadcast(SinkEvent::Cancelled {
            session_id: active.record.id,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!SessionState::Arming.is_terminal());
        assert!(!SessionState::Capturing.is_terminal());
        assert!(!SessionState::Finalizing.is_terminal());
        assert!(SessionState::Completed.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
        assert!(SessionState::Failed.is_terminal());
    }

    #[test]
    fn test_new_session_record() {
        let record = RecordingSession::new(ActivationMode::Tap, BackendKind::Batch);
        assert_eq!(record.state, SessionState::Arming);
        assert_eq!(record.mode, ActivationMode::Tap);
        assert_eq!(record.backend, BackendKind::Batch);
        assert!(record.partial_text.is_empty());
        assert!(record.final_text.is_none());
        assert!(record.ended_at.is_none());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Capturing.to_string(), "Capturing");
        assert_eq!(SessionState::Completed.to_string(), "Completed");
    }
}
