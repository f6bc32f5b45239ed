//! Daemon module - wires the pipeline together
//!
//! Builds the session controller with real collaborators (cpal source,
//! configured backend, injector, UI projector, session logger) and feeds
//! it intents from the external trigger paths: an optional raw-key channel
//! run through the hotkey bridge, and SIGUSR1/SIGUSR2 for compositor
//! keybindings and `speechtide record` commands.

use crate::audio;
use crate::backend;
use crate::config::{ActivationMode, Config};
use crate::error::Result;
use crate::hotkey::{HotkeyBridge, HotkeyIntent, IntentKind, KeyEvent};
use crate::session::log::{MemoryLogStore, SessionLog, SessionLogger, SqliteLogStore};
use crate::session::{AudioSourceFactory, BackendFactory, SessionController};
use crate::sink::injector::Injector;
use crate::sink::projector::{UiEvent, UiProjector};
use crate::sink::{OutputSink, SinkSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::signal::unix::{signal, SignalKind};

/// Write the PID file for external control via signals
fn write_pid_file() -> Option<PathBuf> {
    let pid_path = Config::runtime_dir().join("pid");

    if let Some(parent) = pid_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!("Failed to create PID file directory: {}", e);
            return None;
        }
    }

    let pid = std::process::id();
    if let Err(e) = std::fs::write(&pid_path, pid.to_string()) {
        tracing::warn!("Failed to write PID file: {}", e);
        return None;
    }

    tracing::debug!("PID file written: {:?} (pid={})", pid_path, pid);
    Some(pid_path)
}

fn cleanup_pid_file(path: &PathBuf) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!("Failed to remove PID file: {}", e);
        }
    }
}

/// Main daemon that owns the controller and its trigger paths
pub struct Daemon {
    config: Config,
    projector: Arc<UiProjector>,
    key_rx: Option<mpsc::Receiver<KeyEvent>>,
    pid_file_path: Option<PathBuf>,
}

impl Daemon {
    /// Create a daemon driven by signals only
    pub fn new(config: Config) -> Self {
        let projector = Arc::new(UiProjector::new(config.resolve_state_file()));
        Self {
            config,
            projector,
            key_rx: None,
            pid_file_path: None,
        }
    }

    /// Create a daemon that additionally consumes raw key events from an
    /// embedding platform listener (menu bar shell, evdev shim, ...)
    pub fn with_key_events(config: Config, key_rx: mpsc::Receiver<KeyEvent>) -> Self {
        let mut daemon = Self::new(config);
        daemon.key_rx = Some(key_rx);
        daemon
    }

    /// Subscribe to the UI event feed (floating window, bars)
    pub fn ui_events(&self) -> broadcast::Receiver<UiEvent> {
        self.projector.subscribe()
    }

    /// Run the daemon until SIGINT/SIGTERM
    pub async fn run(&mut self) -> Result<()> {
        tracing::info!("Starting speechtide daemon");

        self.pid_file_path = write_pid_file();

        let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
            crate::error::SpeechTideError::Config(format!("Failed to set up SIGTERM handler: {}", e))
        })?;
        let mut sigusr1 = signal(SignalKind::user_defined1()).map_err(|e| {
            crate::error::SpeechTideError::Config(format!("Failed to set up SIGUSR1 handler: {}", e))
        })?;
        let mut sigusr2 = signal(SignalKind::user_defined2()).map_err(|e| {
            crate::error::SpeechTideError::Config(format!("Failed to set up SIGUSR2 handler: {}", e))
        })?;

        tracing::info!(
            "Activation: {} mode, {} backend",
            self.config.hotkey.mode,
            self.config.backend.kind
        );

        // Session log
        let log = if self.config.log.enabled {
            let dir = self.config.resolve_log_dir();
            tracing::debug!("Session log: {:?}", dir);
            Arc::new(SessionLog::new(Box::new(SqliteLogStore::open(&dir)?))?)
        } else {
            Arc::new(SessionLog::new(Box::new(MemoryLogStore::new()))?)
        };

        // Sinks: UI projection and session logging share the fan-out; the
        // injector is awaited by the controller instead.
        let sinks: Vec<Arc<dyn OutputSink>> = vec![
            self.projector.clone(),
            Arc::new(SessionLogger::new(log.clone())),
        ];
        let sinks = SinkSet::new(sinks);

        let injector = Arc::new(Injector::new(&self.config.output));

        let audio_config = self.config.audio.clone();
        let source_factory: AudioSourceFactory =
            Box::new(move || audio::create_source(&audio_config));

        let backend_config = self.config.backend.clone();
        let backend_factory: BackendFactory =
            Box::new(move || backend::create_backend(&backend_config));

        let mut controller = SessionController::new(
            self.config.clone(),
            source_factory,
            backend_factory,
            sinks,
            injector,
        );

        let (intent_tx, intent_rx) = mpsc::channel::<HotkeyIntent>(16);

        // Raw key events from an embedding listener go through the bridge
        let bridge_task = self.key_rx.take().map(|mut key_rx| {
            let mut bridge = HotkeyBridge::new(self.config.hotkey.mode);
            let tx = intent_tx.clone();
            tokio::spawn(async move {
                while let Some(event) = key_rx.recv().await {
                    if let Some(intent) = bridge.translate(event) {
                        if tx.send(intent).await.is_err() {
                            break;
                        }
                    }
                }
            })
        });

        // SIGUSR1 starts, SIGUSR2 stops (compositor keybindings, scripts)
        let mode = self.config.hotkey.mode;
        let tx = intent_tx.clone();
        let signal_task = tokio::spawn(async move {
            loop {
                let kind = tokio::select! {
                    _ = sigusr1.recv() => match mode {
                        ActivationMode::Tap => IntentKind::Engage,
                        ActivationMode::Hold => IntentKind::HoldStart,
                    },
                    _ = sigusr2.recv() => match mode {
                        ActivationMode::Tap => IntentKind::Disengage,
                        ActivationMode::Hold => IntentKind::HoldEnd,
                    },
                };
                tracing::debug!("External trigger: {:?}", kind);
                if tx.send(HotkeyIntent::new(kind)).await.is_err() {
                    break;
                }
            }
        });

        let controller_task = tokio::spawn(async move {
            controller.run(intent_rx).await;
        });

        // Block until shutdown is requested
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT, shutting down...");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down...");
            }
        }

        // Closing every intent sender ends the controller loop, which
        // cancels any active session on its way out.
        signal_task.abort();
        if let Some(task) = bridge_task {
            task.abort();
        }
        drop(intent_tx);
        let _ = controller_task.await;

        self.projector.cleanup();
        if let Some(ref path) = self.pid_file_path {
            cleanup_pid_file(path);
        }

        tracing::info!("Daemon stopped");
        Ok(())
    }
}

/// Read the daemon PID from the runtime directory
pub fn read_daemon_pid() -> Option<u32> {
    let pid_path = Config::runtime_dir().join("pid");
    std::fs::read_to_string(pid_path)
        .ok()
        .and_then(|s| s.trim().parse().ok())
}
