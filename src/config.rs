//! Configuration loading and types for speechtide
//!
//! Configuration is loaded in layers:
//! 1. Built-in defaults
//! 2. Config file (~/.config/speechtide/config.toml)
//! 3. Environment variables (SPEECHTIDE_*)
//! 4. CLI arguments (highest priority)

use crate::error::SpeechTideError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file content
pub const DEFAULT_CONFIG: &str = r#"# Speechtide Configuration
#
# Location: ~/.config/speechtide/config.toml
# All settings can be overridden via CLI flags

# State file for external integrations (Waybar, polybar, the floating window)
# Use "auto" for the default location ($XDG_RUNTIME_DIR/speechtide/state),
# a custom path, or "disabled" to turn it off. The daemon writes the current
# state ("idle" or "recording") to this file whenever it changes.
state_file = "auto"

[hotkey]
# Activation mode: "hold" or "tap"
# - hold: capture while the chord is held, stop on release (default)
# - tap: press once to start, press again to stop
mode = "hold"

[audio]
# Audio input device ("default" uses the system default)
# List devices with: pactl list sources short
device = "default"

# Sample rate in Hz delivered to the backend
sample_rate = 16000

# Frame duration in milliseconds (capture granularity)
frame_ms = 20

# Bounded frame queue depth. When full, the oldest frame is dropped so the
# capture device never blocks.
queue_frames = 64

# Maximum recording duration in seconds (safety limit)
max_duration_secs = 60

# Captures shorter than this are treated as accidental presses and cancelled
min_duration_ms = 300

[backend]
# Transcription backend: "streaming" (duplex connection, live partial text)
# or "batch" (one request with the complete recording)
kind = "streaming"

# Service endpoint. wss://... for streaming, https://... for batch.
# endpoint = "wss://api.example.com/v1/realtime"

# API key. Prefer the SPEECHTIDE_API_KEY environment variable.
# api_key = ""

# Model name sent to the service
model = "whisper-1"

# Language hint (omit for auto-detection)
# language = "en"

# How long Finalizing waits for a final transcript before completing with
# whatever partial text accumulated
finalize_timeout_ms = 3000

# Connection/request timeouts
connect_timeout_secs = 30
request_timeout_secs = 30

# Backoff before the single retry on transient failures
retry_backoff_ms = 500

[output]
# Primary output mode: "type" or "clipboard"
# - type: simulates keyboard input at the cursor (wtype)
# - clipboard: copies text to the clipboard (wl-copy)
mode = "type"

# Fall back to clipboard if typing fails
fallback_to_clipboard = true

[log]
# Keep an append-only log of completed sessions
enabled = true

# Log directory ("auto" uses ~/.local/share/speechtide)
dir = "auto"
"#;

/// Hotkey activation mode
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActivationMode {
    /// Capture while the chord is held, stop on release (default)
    #[default]
    Hold,
    /// Press once to start, press again to stop
    Tap,
}

impl std::fmt::Display for ActivationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivationMode::Hold => write!(f, "hold"),
            ActivationMode::Tap => write!(f, "tap"),
        }
    }
}

/// Transcription backend selection
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Duplex connection, emits partial text while capture is ongoing
    #[default]
    Streaming,
    /// Single request carrying the complete recording
    Batch,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Streaming => write!(f, "streaming"),
            BackendKind::Batch => write!(f, "batch"),
        }
    }
}

/// Root configuration structure
///
/// The scalar `state_file` field leads so TOML serialization emits it
/// before the tables.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Optional path to a state file for external integrations.
    /// "auto" resolves under $XDG_RUNTIME_DIR/speechtide.
    #[serde(default = "default_state_file")]
    pub state_file: Option<String>,

    #[serde(default)]
    pub hotkey: HotkeyConfig,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub log: LogConfig,
}

/// Hotkey bridge configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct HotkeyConfig {
    /// Activation mode: hold (press-and-hold) or tap (press twice)
    #[serde(default)]
    pub mode: ActivationMode,
}

/// Audio capture configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    /// PipeWire/PulseAudio device name, or "default"
    #[serde(default = "default_device")]
    pub device: String,

    /// Sample rate in Hz delivered to the backend
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Frame duration in milliseconds
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u32,

    /// Bounded frame queue depth (oldest frame dropped when full)
    #[serde(default = "default_queue_frames")]
    pub queue_frames: usize,

    /// Maximum recording duration in seconds (safety limit)
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u32,

    /// Captures shorter than this are cancelled as accidental presses
    #[serde(default = "default_min_duration_ms")]
    pub min_duration_ms: u64,
}

/// Transcription backend configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Which backend variant to use
    #[serde(default)]
    pub kind: BackendKind,

    /// Service endpoint (wss:// for streaming, https:// for batch)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// API key; SPEECHTIDE_API_KEY takes precedence
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model name sent to the service
    #[serde(default = "default_model")]
    pub model: String,

    /// Language hint (None = auto-detect)
    #[serde(default)]
    pub language: Option<String>,

    /// How long Finalizing waits for a final transcript
    #[serde(default = "default_finalize_timeout_ms")]
    pub finalize_timeout_ms: u64,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Request timeout in seconds (batch)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Backoff before the single retry on transient failures
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Text output configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// Primary output mode
    #[serde(default)]
    pub mode: OutputMode,

    /// Fall back to clipboard if typing fails
    #[serde(default = "default_true")]
    pub fallback_to_clipboard: bool,
}

/// Output mode selection
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Simulate keyboard input (requires wtype)
    #[default]
    Type,
    /// Copy to clipboard (requires wl-copy)
    Clipboard,
}

/// Session log configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Keep an append-only log of completed sessions
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log directory ("auto" uses the XDG data dir)
    #[serde(default = "default_log_dir")]
    pub dir: String,
}

fn default_state_file() -> Option<String> {
    Some("auto".to_string())
}

fn default_device() -> String {
    "default".to_string()
}

fn default_sample_rate() -> u32 {
    16000
}

fn default_frame_ms() -> u32 {
    20
}

fn default_queue_frames() -> usize {
    64
}

fn default_max_duration_secs() -> u32 {
    60
}

fn default_min_duration_ms() -> u64 {
    300
}

fn default_model() -> String {
    "whisper-1".to_string()
}

fn default_finalize_timeout_ms() -> u64 {
    3000
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_log_dir() -> String {
    "auto".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            sample_rate: default_sample_rate(),
            frame_ms: default_frame_ms(),
            queue_frames: default_queue_frames(),
            max_duration_secs: default_max_duration_secs(),
            min_duration_ms: default_min_duration_ms(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            endpoint: None,
            api_key: None,
            model: default_model(),
            language: None,
            finalize_timeout_ms: default_finalize_timeout_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            mode: OutputMode::default(),
            fallback_to_clipboard: true,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_log_dir(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            hotkey: HotkeyConfig::default(),
            audio: AudioConfig::default(),
            backend: BackendConfig::default(),
            output: OutputConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl BackendConfig {
    /// Finalize timeout as a Duration
    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_millis(self.finalize_timeout_ms)
    }

    /// Retry backoff as a Duration
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl AudioConfig {
    /// Number of samples in one frame at the configured rate
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate as usize * self.frame_ms as usize) / 1000
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "speechtide")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Get the runtime directory for ephemeral files (state, pid)
    pub fn runtime_dir() -> PathBuf {
        std::env::var("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
            .join("speechtide")
    }

    /// Get the data directory (session log store)
    pub fn data_dir() -> PathBuf {
        directories::ProjectDirs::from("", "", "speechtide")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Resolve the state file path from config.
    /// Returns None when disabled, the resolved path for "auto" or an
    /// explicit path.
    pub fn resolve_state_file(&self) -> Option<PathBuf> {
        self.state_file
            .as_ref()
            .and_then(|path| match path.to_lowercase().as_str() {
                "disabled" | "none" | "off" | "false" => None,
                "auto" => Some(Self::runtime_dir().join("state")),
                _ => Some(PathBuf::from(path)),
            })
    }

    /// Resolve the session log directory
    pub fn resolve_log_dir(&self) -> PathBuf {
        match self.log.dir.to_lowercase().as_str() {
            "auto" => Self::data_dir(),
            _ => PathBuf::from(&self.log.dir),
        }
    }
}

/// Load configuration from file, with defaults for missing values
pub fn load_config(path: Option<&Path>) -> Result<Config, SpeechTideError> {
    let mut config = Config::default();

    let config_path = path.map(PathBuf::from).or_else(Config::default_path);

    if let Some(ref path) = config_path {
        if path.exists() {
            tracing::debug!("Loading config from {:?}", path);
            let contents = std::fs::read_to_string(path)
                .map_err(|e| SpeechTideError::Config(format!("Failed to read config: {}", e)))?;

            config = toml::from_str(&contents)
                .map_err(|e| SpeechTideError::Config(format!("Invalid config: {}", e)))?;
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
        }
    }

    // Override from environment variables
    if let Ok(key) = std::env::var("SPEECHTIDE_API_KEY") {
        config.backend.api_key = Some(key);
    }
    if let Ok(endpoint) = std::env::var("SPEECHTIDE_ENDPOINT") {
        config.backend.endpoint = Some(endpoint);
    }
    if let Ok(kind) = std::env::var("SPEECHTIDE_BACKEND") {
        config.backend.kind = match kind.to_lowercase().as_str() {
            "batch" => BackendKind::Batch,
            _ => BackendKind::Streaming,
        };
    }

    Ok(config)
}

/// Write the default config template to the given path
pub fn write_default_config(path: &Path) -> Result<(), SpeechTideError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| SpeechTideError::Config(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, DEFAULT_CONFIG)
        .map_err(|e| SpeechTideError::Config(format!("Failed to write config: {}", e)))?;

    Ok(())
}
