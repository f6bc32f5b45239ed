//! Error types for speechtide
//!
//! Uses thiserror for ergonomic error definitions with clear messages
//! that guide users toward fixing common issues.

use thiserror::Error;

/// Top-level error type for the speechtide application
#[derive(Error, Debug)]
pub enum SpeechTideError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Audio device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Transcription backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Text injection error: {0}")]
    Injection(#[from] InjectionError),

    #[error("Session log error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to microphone capture
///
/// All device problems surface when a source is opened; a running stream
/// only logs and keeps going.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Audio device not found: '{requested}'. {available}")]
    NotFound { requested: String, available: String },

    #[error("No default audio input device. Check your sound server.")]
    NoDefaultDevice,

    #[error("Audio connection failed: {0}")]
    Connection(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),
}

/// Errors reported by transcription backends
#[derive(Error, Debug, Clone)]
pub enum BackendError {
    /// Bad or missing credentials/endpoint. Never retried.
    #[error("Authentication failed: {0}. Check backend.api_key in your config.")]
    Auth(String),

    /// Network-level failure (connect, timeout, 5xx-equivalent). Retried once.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The service rejected the request for a non-auth, non-transient reason.
    #[error("Remote server error: {0}")]
    Remote(String),

    /// Malformed or unexpected wire traffic.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Backend configuration error: {0}")]
    Config(String),

    #[error("Audio format error: {0}")]
    AudioFormat(String),
}

impl BackendError {
    /// Whether a single retry with backoff is worth attempting.
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transport(_))
    }
}

/// Errors related to text injection
#[derive(Error, Debug)]
pub enum InjectionError {
    #[error("wtype not found in PATH. Install via your package manager.")]
    WtypeNotFound,

    #[error("wl-copy not found in PATH. Install wl-clipboard via your package manager.")]
    WlCopyNotFound,

    #[error("Text injection failed: {0}")]
    Failed(String),

    #[error("All injection methods failed. Ensure wtype or wl-copy is available.")]
    AllMethodsFailed,
}

/// Errors from the session log store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using SpeechTideError
pub type Result<T> = std::result::Result<T, SpeechTideError>;
