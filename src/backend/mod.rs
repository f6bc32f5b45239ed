//! Speech-to-text transcription backends
//!
//! Two variants behind one capability contract:
//! - StreamingBackend: duplex connection, emits partial text while audio
//!   is still arriving
//! - BatchBackend: buffers everything, one request on finish
//!
//! Both deliver events for exactly one session over a channel handed out
//! by `open`, and emit at most one terminal event (`Final` or `Error`).
//! Dropping the receiver ends delivery; nothing is emitted afterwards.

pub mod batch;
pub mod streaming;

use crate::audio::AudioFrame;
use crate::config::{BackendConfig, BackendKind};
use crate::error::BackendError;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Transcription output for one session
#[derive(Debug, Clone)]
pub enum TranscriptEvent {
    /// Provisional text, may be revised while capture is ongoing
    Partial { session_id: Uuid, text: String },
    /// The terminal transcription; emitted at most once
    Final { session_id: Uuid, text: String },
    /// Unrecoverable failure; terminal for this backend instance
    Error {
        session_id: Uuid,
        error: BackendError,
    },
}

impl TranscriptEvent {
    pub fn session_id(&self) -> Uuid {
        match self {
            TranscriptEvent::Partial { session_id, .. }
            | TranscriptEvent::Final { session_id, .. }
            | TranscriptEvent::Error { session_id, .. } => *session_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TranscriptEvent::Final { .. } | TranscriptEvent::Error { .. }
        )
    }
}

/// Trait for transcription backend implementations
///
/// One instance serves one recording session. `open` establishes the
/// service session and returns the event channel; `submit` hands over a
/// captured frame; `finish` signals end-of-audio (trailing partials may
/// still arrive); `shutdown` closes everything unconditionally and
/// abandons in-flight work.
#[async_trait::async_trait]
pub trait TranscriptionBackend: Send {
    fn kind(&self) -> BackendKind;

    async fn open(
        &mut self,
        session_id: Uuid,
    ) -> Result<mpsc::Receiver<TranscriptEvent>, BackendError>;

    async fn submit(&mut self, frame: &AudioFrame) -> Result<(), BackendError>;

    async fn finish(&mut self) -> Result<(), BackendError>;

    async fn shutdown(&mut self);
}

/// Factory function to create a backend for one session
pub fn create_backend(
    config: &BackendConfig,
) -> Result<Box<dyn TranscriptionBackend>, BackendError> {
    tracing::debug!("Creating {} backend, model={}", config.kind, config.model);

    match config.kind {
        BackendKind::Streaming => Ok(Box::new(streaming::StreamingBackend::new(config)?)),
        BackendKind::Batch => Ok(Box::new(batch::BatchBackend::new(config)?)),
    }
}
