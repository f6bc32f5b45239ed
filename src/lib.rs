//! Speechtide: hotkey-driven voice dictation
//!
//! This library provides the core functionality for:
//! - Translating hotkey press/release events into activation intents
//! - Capturing microphone audio as fixed-duration PCM frames (cpal)
//! - Streaming or batching audio to a transcription service
//! - Injecting the transcribed text at the cursor (wtype/wl-copy)
//! - Projecting live feedback to an external floating window
//! - Archiving completed sessions in an append-only log
//!
//! # Architecture
//!
//! ```text
//!      ┌──────────────┐          ┌──────────────────────────────┐
//!      │ HotkeyBridge │ intents  │      SessionController       │
//!      │ (tap / hold) ├─────────▶│ Idle → Arming → Capturing →  │
//!      └──────────────┘          │ Finalizing → terminal state  │
//!                                └──────┬────────────────▲──────┘
//!                                       │ frames         │ partial/final
//!                            ┌──────────▼─────────┐ ┌────┴──────────────┐
//!                            │    AudioSource     │ │ TranscriptionBack │
//!                            │ (cpal, drop-oldest │ │ end: streaming ws │
//!                            │   bounded queue)   │ │   or batch HTTP   │
//!                            └────────────────────┘ └───────────────────┘
//!                                       │ events (ordered, fan-out)
//!          ┌────────────────────────────┼──────────────────────────┐
//!          ▼                            ▼                          ▼
//!   ┌──────────────┐           ┌─────────────────┐         ┌──────────────┐
//!   │ TextInjector │ (awaited) │   UiProjector   │         │ SessionLogger│
//!   │ wtype/wl-copy│           │ broadcast + bar │         │ sqlite, gap- │
//!   │              │           │   state file    │         │ free seq     │
//!   └──────────────┘           └─────────────────┘         └──────────────┘
//! ```
//!
//! At most one session is non-terminal at any time. Each session owns its
//! audio subscription and backend connection; both are released on every
//! exit path, including failures and cancellation.

pub mod audio;
pub mod backend;
pub mod cli;
pub mod config;
pub mod daemon;
pub mod error;
pub mod hotkey;
pub mod session;
pub mod sink;

pub use cli::{Cli, Commands, RecordAction};
pub use config::Config;
pub use daemon::Daemon;
pub use error::{Result, SpeechTideError};
