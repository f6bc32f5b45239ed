//! Text injection at the cursor
//!
//! Injection goes through a fallback chain of external tools:
//! 1. wtype - Wayland-native keyboard simulation, best Unicode support
//! 2. wl-copy - clipboard fallback, works on every compositor
//!
//! Unlike the other sinks, the session controller awaits injection so a
//! failure can be surfaced in the terminal event.

use crate::config::{OutputConfig, OutputMode};
use crate::error::InjectionError;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Trait for text injection implementations
#[async_trait::async_trait]
pub trait TextInject: Send + Sync {
    /// Insert text at the cursor (or the configured fallback)
    async fn inject(&self, text: &str) -> Result<(), InjectionError>;
}

/// One method in the fallback chain
#[async_trait::async_trait]
trait InjectMethod: Send + Sync {
    fn name(&self) -> &'static str;
    async fn is_available(&self) -> bool;
    async fn inject(&self, text: &str) -> Result<(), InjectionError>;
}

/// Chain-of-methods injector built from the output config
pub struct Injector {
    chain: Vec<Box<dyn InjectMethod>>,
}

impl Injector {
    pub fn new(config: &OutputConfig) -> Self {
        let mut chain: Vec<Box<dyn InjectMethod>> = Vec::new();

        match config.mode {
            OutputMode::Type => {
                chain.push(Box::new(WtypeMethod));
                if config.fallback_to_clipboard {
                    chain.push(Box::new(ClipboardMethod));
                }
            }
            OutputMode::Clipboard => {
                chain.push(Box::new(ClipboardMethod));
            }
        }

        Self { chain }
    }
}

#[async_trait::async_trait]
impl TextInject for Injector {
    async fn inject(&self, text: &str) -> Result<(), InjectionError> {
        if text.is_empty() {
            return Ok(());
        }

        for method in &self.chain {
            if !method.is_available().await {
                tracing::debug!("{} not available, trying next", method.name());
                continue;
            }

            match method.inject(text).await {
                Ok(()) => {
                    tracing::debug!("Text injected via {}", method.name());
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!("{} failed: {}, trying next", method.name(), e);
                }
            }
        }

        Err(InjectionError::AllMethodsFailed)
    }
}

async fn tool_in_path(tool: &str) -> bool {
    Command::new("which")
        .arg(tool)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// wtype keyboard simulation
struct WtypeMethod;

#[async_trait::async_trait]
impl InjectMethod for WtypeMethod {
    fn name(&self) -> &'static str {
        "wtype"
    }

    async fn is_available(&self) -> bool {
        tool_in_path("wtype").await
    }

    async fn inject(&self, text: &str) -> Result<(), InjectionError> {
        let output = Command::new("wtype")
            .arg("--")
            .arg(text)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    InjectionError::WtypeNotFound
                } else {
                    InjectionError::Failed(e.to_string())
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(InjectionError::Failed(format!("wtype failed: {}", stderr)));
        }

        Ok(())
    }
}

/// wl-copy clipboard fallback
struct ClipboardMethod;

#[async_trait::async_trait]
impl InjectMethod for ClipboardMethod {
    fn name(&self) -> &'static str {
        "clipboard (wl-copy)"
    }

    async fn is_available(&self) -> bool {
        tool_in_path("wl-copy").await
    }

    async fn inject(&self, text: &str) -> Result<(), InjectionError> {
        let mut child = Command::new("wl-copy")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    InjectionError::WlCopyNotFound
                } else {
                    InjectionError::Failed(e.to_string())
                }
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(|e| InjectionError::Failed(e.to_string()))?;
            drop(stdin);
        }

        let status = child
            .wait()
            .await
            .map_err(|e| InjectionError::Failed(e.to_string()))?;

        if !status.success() {
            return Err(InjectionError::Failed(
                "wl-copy exited with error".to_string(),
            ));
        }

        tracing::info!("Text copied to clipboard ({} chars)", text.chars().count());
        Ok(())
    }
}
