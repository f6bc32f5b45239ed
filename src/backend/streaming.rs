//! Streaming transcription over a duplex WebSocket connection
//!
//! Audio frames are forwarded as base64 PCM16 append messages with minimal
//! delay; the service answers with transcript deltas at any time after the
//! first few frames, then one final transcript (or an error). `finish`
//! commits the audio buffer; the connection stays open until a terminal
//! event arrives or the session owner shuts it down.
//!
//! Wire shape: `input_audio_buffer.append` / `input_audio_buffer.commit`
//! upstream; `response.audio_transcript.delta`, `response.audio_transcript.done`
//! and `error` downstream.

use super::{TranscriptEvent, TranscriptionBackend};
use crate::audio::AudioFrame;
use crate::config::{BackendConfig, BackendKind};
use crate::error::BackendError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type WsWrite = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// PCM sample rate advertised to the service
const STREAM_SAMPLE_RATE: u32 = 16000;

// Upstream messages

#[derive(Serialize)]
struct SessionUpdate<'a> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    session: SessionSettings<'a>,
}

#[derive(Serialize)]
struct SessionSettings<'a> {
    model: &'a str,
    input_audio_format: &'static str,
    sample_rate: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<&'a str>,
}

#[derive(Serialize)]
struct AudioAppend<'a> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    audio: &'a str,
}

#[derive(Serialize)]
struct AudioCommit {
    #[serde(rename = "type")]
    msg_type: &'static str,
}

// Downstream messages

#[derive(Deserialize, Debug)]
struct ServerEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    delta: Option<String>,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    error: Option<ServerError>,
}

#[derive(Deserialize, Debug)]
struct ServerError {
    message: String,
    #[serde(default)]
    code: Option<String>,
}

impl ServerError {
    fn into_backend_error(self) -> BackendError {
        match self.code.as_deref() {
            Some("invalid_api_key") | Some("invalid_authentication") => {
                BackendError::Auth(self.message)
            }
            _ => BackendError::Remote(self.message),
        }
    }
}

/// Duplex streaming backend
pub struct StreamingBackend {
    config: BackendConfig,
    endpoint: String,
    write: Option<WsWrite>,
    reader: Option<tokio::task::JoinHandle<()>>,
}

impl StreamingBackend {
    /// Validate config and build an unconnected backend
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let endpoint = config
            .endpoint
            .as_ref()
            .ok_or_else(|| {
                BackendError::Config("backend.endpoint is required for kind = 'streaming'".into())
            })?
            .clone();

        if !endpoint.starts_with("wss://") && !endpoint.starts_with("ws://") {
            return Err(BackendError::Config(format!(
                "streaming endpoint must start with wss:// or ws://, got: {}",
                endpoint
            )));
        }

        if endpoint.starts_with("ws://") && !endpoint.contains("localhost") && !endpoint.contains("127.0.0.1") {
            tracing::warn!("Streaming endpoint uses ws:// without TLS. Audio will be sent unencrypted!");
        }

        Ok(Self {
            config: config.clone(),
            endpoint,
            write: None,
            reader: None,
        })
    }

    async fn connect_once(
        &self,
    ) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, BackendError> {
        let mut request = self
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| BackendError::Config(format!("Invalid endpoint: {}", e)))?;

        if let Some(ref key) = self.config.api_key {
            let value = HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| BackendError::Config(format!("Invalid API key: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let connect_timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let (ws, _response) = timeout(connect_timeout, connect_async(request))
            .await
            .map_err(|_| BackendError::Transport("connection timed out".into()))?
            .map_err(|e| classify_connect_error(e))?;

        Ok(ws)
    }

    /// Connect with a single retry on transient failures
    async fn connect(&self) -> Result<WebSocketStream<MaybeTlsStream<TcpStream>>, BackendError> {
        match self.connect_once().await {
            Ok(ws) => Ok(ws),
            Err(e) if e.is_transient() => {
                tracing::warn!("Streaming connect failed ({}), retrying once", e);
                tokio::time::sleep(self.config.retry_backoff()).await;
                self.connect_once().await
            }
            Err(e) => Err(e),
        }
    }
}

fn classify_connect_error(e: tokio_tungstenite::tungstenite::Error) -> BackendError {
    use tokio_tungstenite::tungstenite::Error;

    match e {
        Error::Http(response) => {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                BackendError::Auth(format!("server returned {}", status))
            } else if status.is_server_error() {
                BackendError::Transport(format!("server returned {}", status))
            } else {
                BackendError::Remote(format!("server returned {}", status))
            }
        }
        other => BackendError::Transport(other.to_string()),
    }
}

#[async_trait::async_trait]
impl TranscriptionBackend for StreamingBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Streaming
    }

    async fn open(
        &mut self,
        session_id: uuid::Uuid,
    ) -> Result<mpsc::Receiver<TranscriptEvent>, BackendError> {
        let ws = self.connect().await?;
        let (mut write, read) = ws.split();

        let settings = SessionUpdate {
            msg_type: "session.update",
            session: SessionSettings {
                model: &self.config.model,
                input_audio_format: "pcm16",
                sample_rate: STREAM_SAMPLE_RATE,
                language: self.config.language.as_deref(),
            },
        };

        let payload = serde_json::to_string(&settings)
            .map_err(|e| BackendError::Protocol(e.to_string()))?;
        write
            .send(Message::Text(payload))
            .await
            .map_err(|e| BackendError::Transport(format!("failed to configure session: {}", e)))?;

        let (event_tx, event_rx) = mpsc::channel(32);
        let reader = tokio::spawn(read_events(read, session_id, event_tx));

        self.write = Some(write);
        self.reader = Some(reader);

        tracing::debug!("Streaming session {} open", session_id);
        Ok(event_rx)
    }

    async fn submit(&mut self, frame: &AudioFrame) -> Result<(), BackendError> {
        let write = self
            .write
            .as_mut()
            .ok_or_else(|| BackendError::Protocol("submit before open".into()))?;

        let encoded = BASE64.encode(&frame.pcm);
        let append = AudioAppend {
            msg_type: "input_audio_buffer.append",
            audio: &encoded,
        };
        let payload =
            serde_json::to_string(&append).map_err(|e| BackendError::Protocol(e.to_string()))?;

        write
            .send(Message::Text(payload))
            .await
            .map_err(|e| BackendError::Transport(format!("failed to send audio: {}", e)))
    }

    async fn finish(&mut self) -> Result<(), BackendError> {
        let write = self
            .write
            .as_mut()
            .ok_or_else(|| BackendError::Protocol("finish before open".into()))?;

        let commit = AudioCommit {
            msg_type: "input_audio_buffer.commit",
        };
        let payload =
            serde_json::to_string(&commit).map_err(|e| BackendError::Protocol(e.to_string()))?;

        write
            .send(Message::Text(payload))
            .await
            .map_err(|e| BackendError::Transport(format!("failed to commit audio: {}", e)))
    }

    async fn shutdown(&mut self) {
        if let Some(mut write) = self.write.take() {
            let _ = write.send(Message::Close(None)).await;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Pump server events into the session channel.
///
/// Deltas accumulate into the provisional transcript; the first terminal
/// event ends the task, so nothing can follow a `Final` or `Error`. A send
/// failure means the session dropped its receiver, which also ends the task.
async fn read_events<S>(mut read: S, session_id: uuid::Uuid, event_tx: mpsc::Sender<TranscriptEvent>)
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin
        + Send,
{
    let mut partial = String::new();

    while let Some(message) = read.next().await {
        let event = match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                Ok(ev) => ev,
                Err(e) => {
                    let _ = event_tx
                        .send(TranscriptEvent::Error {
                            session_id,
                            error: BackendError::Protocol(format!("bad server event: {}", e)),
                        })
                        .await;
                    return;
                }
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Binary(_))
            | Ok(Message::Frame(_)) => continue,
            Ok(Message::Close(_)) => {
                let _ = event_tx
                    .send(TranscriptEvent::Error {
                        session_id,
                        error: BackendError::Transport("connection closed by server".into()),
                    })
                    .await;
                return;
            }
            Err(e) => {
                let _ = event_tx
                    .send(TranscriptEvent::Error {
                        session_id,
                        error: BackendError::Transport(e.to_string()),
                    })
                    .await;
                return;
            }
        };

        match event.event_type.as_str() {
            "response.audio_transcript.delta" => {
                if let Some(delta) = event.delta {
                    partial.push_str(&delta);
                    if event_tx
                        .send(TranscriptEvent::Partial {
                            session_id,
                            text: partial.clone(),
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
            }
            "response.audio_transcript.done" => {
                let text = event.transcript.unwrap_or_else(|| partial.clone());
                let _ = event_tx
                    .send(TranscriptEvent::Final { session_id, text })
                    .await;
                return;
            }
            "error" => {
                let error = event
                    .error
                    .map(ServerError::into_backend_error)
                    .unwrap_or_else(|| BackendError::Remote("unspecified server error".into()));
                let _ = event_tx
                    .send(TranscriptEvent::Error { session_id, error })
                    .await;
                return;
            }
            other => {
                tracing::trace!("Ignoring server event: {}", other);
            }
        }
    }

    // Stream ended without a terminal event
    let _ = event_tx
        .send(TranscriptEvent::Error {
            session_id,
            error: BackendError::Transport("connection ended before final transcript".into()),
        })
        .await;
}
