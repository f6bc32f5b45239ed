//! Batch transcription via an OpenAI-compatible HTTP API
//!
//! Buffers every submitted frame; on `finish` the recording is assembled
//! into one WAV payload and posted as a single multipart request. Emits
//! exactly one `Final` or one `Error`, never a `Partial`. Transient
//! failures (timeout, 5xx) are retried once with backoff; auth failures
//! surface immediately.

use super::{TranscriptEvent, TranscriptionBackend};
use crate::audio::AudioFrame;
use crate::config::{BackendConfig, BackendKind};
use crate::error::BackendError;
use std::io::Cursor;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Buffering batch backend
pub struct BatchBackend {
    config: BackendConfig,
    endpoint: String,
    session_id: Option<Uuid>,
    samples: Vec<i16>,
    sample_rate: u32,
    event_tx: Option<mpsc::Sender<TranscriptEvent>>,
    request: Option<tokio::task::JoinHandle<()>>,
}

impl BatchBackend {
    /// Validate config and build an idle backend
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let endpoint = config
            .endpoint
            .as_ref()
            .ok_or_else(|| {
                BackendError::Config("backend.endpoint is required for kind = 'batch'".into())
            })?
            .clone();

        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(BackendError::Config(format!(
                "batch endpoint must start with http:// or https://, got: {}",
                endpoint
            )));
        }

        if endpoint.starts_with("http://")
            && !endpoint.contains("localhost")
            && !endpoint.contains("127.0.0.1")
        {
            tracing::warn!("Batch endpoint uses HTTP without TLS. Audio will be sent unencrypted!");
        }

        Ok(Self {
            config: config.clone(),
            endpoint,
            session_id: None,
            samples: Vec::new(),
            sample_rate: 16000,
            event_tx: None,
            request: None,
        })
    }
}

#[async_trait::async_trait]
impl TranscriptionBackend for BatchBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Batch
    }

    async fn open(
        &mut self,
        session_id: Uuid,
    ) -> Result<mpsc::Receiver<TranscriptEvent>, BackendError> {
        let (event_tx, event_rx) = mpsc::channel(4);
        self.session_id = Some(session_id);
        self.event_tx = Some(event_tx);
        self.samples.clear();
        Ok(event_rx)
    }

    async fn submit(&mut self, frame: &AudioFrame) -> Result<(), BackendError> {
        self.sample_rate = frame.sample_rate;
        self.samples.extend(frame.samples());
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), BackendError> {
        let session_id = self
            .session_id
            .ok_or_else(|| BackendError::Protocol("finish before open".into()))?;
        let event_tx = self
            .event_tx
            .take()
            .ok_or_else(|| BackendError::Protocol("finish called twice".into()))?;

        if self.samples.is_empty() {
            let _ = event_tx
                .send(TranscriptEvent::Error {
                    session_id,
                    error: BackendError::AudioFormat("empty recording".into()),
                })
                .await;
            return Ok(());
        }

        let wav = encode_wav(&self.samples, self.sample_rate)?;
        let request = BatchRequest {
            endpoint: self.endpoint.clone(),
            model: self.config.model.clone(),
            language: self.config.language.clone(),
            api_key: self.config.api_key.clone(),
            timeout: Duration::from_secs(self.config.request_timeout_secs),
        };
        let backoff = self.config.retry_backoff();

        let duration_secs = self.samples.len() as f32 / self.sample_rate as f32;
        tracing::debug!(
            "Submitting {:.2}s of audio ({} bytes WAV) to {}",
            duration_secs,
            wav.len(),
            request.endpoint
        );

        self.request = Some(tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || request.send(&wav, backoff)).await;

            let event = match result {
                Ok(Ok(text)) => TranscriptEvent::Final { session_id, text },
                Ok(Err(error)) => TranscriptEvent::Error { session_id, error },
                Err(e) => TranscriptEvent::Error {
                    session_id,
                    error: BackendError::Transport(format!("request task failed: {}", e)),
                },
            };

            let _ = event_tx.send(event).await;
        }));

        Ok(())
    }

    async fn shutdown(&mut self) {
        self.event_tx = None;
        if let Some(request) = self.request.take() {
            // In-flight responses are abandoned; the session discards any
            // stragglers by session-id anyway.
            request.abort();
        }
    }
}

/// One outbound transcription request
struct BatchRequest {
    endpoint: String,
    model: String,
    language: Option<String>,
    api_key: Option<String>,
    timeout: Duration,
}

impl BatchRequest {
    /// Send with a single retry on transient failures
    fn send(&self, wav: &[u8], backoff: Duration) -> Result<String, BackendError> {
        match self.send_once(wav) {
            Ok(text) => Ok(text),
            Err(e) if e.is_transient() => {
                tracing::warn!("Batch request failed ({}), retrying once", e);
                std::thread::sleep(backoff);
                self.send_once(wav)
            }
            Err(e) => Err(e),
        }
    }

    fn send_once(&self, wav: &[u8]) -> Result<String, BackendError> {
        let (boundary, body) = build_multipart_body(wav, &self.model, self.language.as_deref());

        let url = format!(
            "{}/v1/audio/transcriptions",
            self.endpoint.trim_end_matches('/')
        );

        let mut request = ureq::post(&url).timeout(self.timeout).set(
            "Content-Type",
            &format!("multipart/form-data; boundary={}", boundary),
        );

        if let Some(ref key) = self.api_key {
            request = request.set("Authorization", &format!("Bearer {}", key));
        }

        let response = request.send_bytes(&body).map_err(classify_ureq_error)?;

        let json: serde_json::Value = response
            .into_json()
            .map_err(|e| BackendError::Protocol(format!("failed to parse response: {}", e)))?;

        let text = json
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                BackendError::Protocol(format!("response missing 'text' field: {}", json))
            })?
            .trim()
            .to_string();

        Ok(text)
    }
}

fn classify_ureq_error(e: ureq::Error) -> BackendError {
    match e {
        ureq::Error::Status(code, resp) => {
            let body = resp.into_string().unwrap_or_default();
            classify_status(code, &body)
        }
        ureq::Error::Transport(t) => BackendError::Transport(format!("request failed: {}", t)),
    }
}

fn classify_status(code: u16, body: &str) -> BackendError {
    let detail = format!("server returned {}: {}", code, body);
    match code {
        401 | 403 => BackendError::Auth(detail),
        408 | 429 | 500..=599 => BackendError::Transport(detail),
        _ => BackendError::Remote(detail),
    }
}

/// Encode i16 samples to WAV format
fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, BackendError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut buffer = Cursor::new(Vec::new());
    let mut writer = hound::WavWriter::new(&mut buffer, spec)
        .map_err(|e| BackendError::AudioFormat(format!("failed to create WAV writer: {}", e)))?;

    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| BackendError::AudioFormat(format!("failed to write sample: {}", e)))?;
    }

    writer
        .finalize()
        .map_err(|e| BackendError::AudioFormat(format!("failed to finalize WAV: {}", e)))?;

    Ok(buffer.into_inner())
}

/// Build the multipart form body for the API request
fn build_multipart_body(
    wav_data: &[u8],
    model: &str,
    language: Option<&str>,
) -> (String, Vec<u8>) {
    let boundary = format!(
        "----SpeechtideBoundary{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    );

    let mut body = Vec::new();

    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"file\"; filename=\"audio.wav\"\r\n",
    );
    body.extend_from_slice(b"Content-Type: audio/wav\r\n\r\n");
    body.extend_from_slice(wav_data);
    body.extend_from_slice(b"\r\n");

    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"model\"\r\n\r\n");
    body.extend_from_slice(model.as_bytes());
    body.extend_from_slice(b"\r\n");

    if let Some(language) = language {
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"language\"\r\n\r\n");
        body.extend_from_slice(language.as_bytes());
        body.extend_from_slice(b"\r\n");
    }

    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"response_format\"\r\n\r\n");
    body.extend_from_slice(b"json\r\n");

    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());

    (boundary, body)
}
