//! Output sinks and event fan-out
//!
//! The session controller broadcasts lifecycle events to every registered
//! sink. Each sink gets its own bounded queue and delivery task, so
//! broadcast never waits on a sink but per-sink ordering is preserved. A
//! sink that falls behind loses events (with a warning) rather than
//! stalling the session. Text injection is deliberately not a queued
//! sink — see `injector` — because its outcome is part of the terminal
//! event.

pub mod injector;
pub mod projector;

use crate::config::{ActivationMode, BackendKind};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Queue depth per sink
const SINK_QUEUE_DEPTH: usize = 256;

/// Everything a consumer needs to know about a completed session
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session_id: Uuid,
    pub mode: ActivationMode,
    pub backend: BackendKind,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Final transcription; empty when the finalize timeout fired with no
    /// partial text accumulated
    pub text: String,
    /// Whether the text was injected at the cursor
    pub injected: bool,
    /// Set when injection was attempted and failed
    pub injection_error: Option<String>,
}

/// Session lifecycle events delivered to sinks, in order
#[derive(Debug, Clone)]
pub enum SinkEvent {
    SessionStarted {
        session_id: Uuid,
        mode: ActivationMode,
    },
    LevelMeter {
        session_id: Uuid,
        amplitude: f32,
        captured_at: DateTime<Utc>,
    },
    PartialText {
        session_id: Uuid,
        text: String,
    },
    Finalized(SessionOutcome),
    Failed {
        session_id: Uuid,
        reason: String,
    },
    Cancelled {
        session_id: Uuid,
    },
}

impl SinkEvent {
    /// Terminal events close out a session; exactly one is emitted per
    /// session.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SinkEvent::Finalized(_) | SinkEvent::Failed { .. } | SinkEvent::Cancelled { .. }
        )
    }
}

/// Trait for output sink implementations
#[async_trait::async_trait]
pub trait OutputSink: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &'static str;

    /// Handle one session event
    async fn deliver(&self, event: SinkEvent);
}

/// Fan-out dispatcher: one bounded queue plus delivery task per sink
pub struct SinkSet {
    senders: Vec<(&'static str, mpsc::Sender<SinkEvent>)>,
}

impl SinkSet {
    pub fn new(sinks: Vec<Arc<dyn OutputSink>>) -> Self {
        let mut senders = Vec::with_capacity(sinks.len());

        for sink in sinks {
            let (tx, mut rx) = mpsc::channel::<SinkEvent>(SINK_QUEUE_DEPTH);
            let name = sink.name();
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    sink.deliver(event).await;
                }
            });
            senders.push((name, tx));
        }

        Self { senders }
    }

    /// Queue an event for every sink without waiting for delivery
    pub fn broadcast(&self, event: SinkEvent) {
        for (name, tx) in &self.senders {
            if let Err(e) = tx.try_send(event.clone()) {
                tracing::warn!("Sink '{}' queue full, dropping event: {}", name, e);
            }
        }
    }
}
