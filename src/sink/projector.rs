//! UI projection sink
//!
//! Projects session events for the external floating window and bar
//! integrations: every event is republished on a broadcast channel any UI
//! component can subscribe to, and the coarse state ("idle" or "recording")
//! is mirrored to a state file for Waybar-style consumers.

use super::{OutputSink, SinkEvent};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tokio::sync::broadcast;

/// Events published to external UI consumers
#[derive(Debug, Clone)]
pub enum UiEvent {
    SessionStarted { mode: String },
    LevelMeter { amplitude: f32, at: DateTime<Utc> },
    PartialText { text: String },
    Finalized { text: String },
    Failed { reason: String },
    Cancelled,
}

/// Broadcast + state-file projector
pub struct UiProjector {
    ui_tx: broadcast::Sender<UiEvent>,
    state_file: Option<PathBuf>,
}

impl UiProjector {
    pub fn new(state_file: Option<PathBuf>) -> Self {
        let (ui_tx, _) = broadcast::channel(256);
        Self { ui_tx, state_file }
    }

    /// Subscribe to the UI event feed
    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.ui_tx.subscribe()
    }

    fn write_state(&self, state: &str) {
        let Some(ref path) = self.state_file else {
            return;
        };

        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!("Failed to create state file directory: {}", e);
                return;
            }
        }

        if let Err(e) = std::fs::write(path, state) {
            tracing::warn!("Failed to write state file: {}", e);
        } else {
            tracing::trace!("State file updated: {}", state);
        }
    }

    /// Remove the state file on shutdown
    pub fn cleanup(&self) {
        if let Some(ref path) = self.state_file {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(path) {
                    tracing::warn!("Failed to remove state file: {}", e);
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl OutputSink for UiProjector {
    fn name(&self) -> &'static str {
        "ui-projector"
    }

    async fn deliver(&self, event: SinkEvent) {
        let ui_event = match event {
            SinkEvent::SessionStarted { mode, .. } => {
                self.write_state("recording");
                UiEvent::SessionStarted {
                    mode: mode.to_string(),
                }
            }
            SinkEvent::LevelMeter {
                amplitude,
                captured_at,
                ..
            } => UiEvent::LevelMeter {
                amplitude,
                at: captured_at,
            },
            SinkEvent::PartialText { text, .. } => UiEvent::PartialText { text },
            SinkEvent::Finalized(outcome) => {
                self.write_state("idle");
                UiEvent::Finalized { text: outcome.text }
            }
            SinkEvent::Failed { reason, .. } => {
                self.write_state("idle");
                UiEvent::Failed { reason }
            }
            SinkEvent::Cancelled { .. } => {
                self.write_state("idle");
                UiEvent::Cancelled
            }
        };

        // Send fails only when no UI is subscribed, which is fine.
        let _ = self.ui_tx.send(ui_event);
    }
}
