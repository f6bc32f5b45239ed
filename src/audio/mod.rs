//! Audio capture module
//!
//! Capture is exposed as an ordered stream of fixed-duration PCM frames.
//! The capture callback pushes into a bounded queue; when the consumer
//! falls behind, the oldest frame is dropped and a counter incremented so
//! the device callback never blocks.

pub mod cpal_source;

use crate::config::AudioConfig;
use crate::error::DeviceError;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// One fixed-duration window of captured audio (PCM16 little-endian, mono).
///
/// Frames are immutable once produced and move through a single-reader
/// queue: whichever backend receives a frame owns it.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub channels: u16,
    /// PCM16 little-endian payload
    pub pcm: Vec<u8>,
    /// Monotonic per-stream sequence number
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
}

impl AudioFrame {
    /// Build a mono frame from i16 samples
    pub fn from_samples(samples: &[i16], sample_rate: u32, sequence: u64) -> Self {
        let mut pcm = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            pcm.extend_from_slice(&s.to_le_bytes());
        }
        Self {
            sample_rate,
            channels: 1,
            pcm,
            sequence,
            captured_at: Utc::now(),
        }
    }

    /// Decode the payload back into i16 samples
    pub fn samples(&self) -> Vec<i16> {
        self.pcm
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    /// Frame duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        let samples = self.pcm.len() as u64 / 2;
        samples * 1000 / self.sample_rate.max(1) as u64
    }

    /// RMS amplitude normalized to 0.0..=1.0, used for the level meter
    pub fn rms(&self) -> f32 {
        let samples = self.samples();
        if samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
        let mean = sum / samples.len() as f64;
        (mean.sqrt() / i16::MAX as f64) as f32
    }
}

struct QueueInner {
    frames: VecDeque<AudioFrame>,
    closed: bool,
}

/// Bounded frame queue shared between the capture thread and the session.
///
/// Push never blocks: at capacity the oldest frame is evicted and counted.
/// Close is idempotent and safe from any thread; a closed queue still
/// yields buffered frames, then ends.
pub struct FrameQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(QueueInner {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        })
    }

    /// Push a frame, evicting the oldest one when full. No-op after close.
    pub fn push(&self, frame: AudioFrame) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return;
            }
            if inner.frames.len() >= self.capacity {
                inner.frames.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            inner.frames.push_back(frame);
        }
        self.notify.notify_one();
    }

    /// Pop the next frame, waiting if the queue is empty.
    /// Returns None once the queue is closed and drained.
    pub async fn pop(&self) -> Option<AudioFrame> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(frame) = inner.frames.pop_front() {
                    return Some(frame);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Close the queue. Idempotent; buffered frames remain poppable.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.closed = true;
        }
        self.notify.notify_waiters();
    }

    /// Frames evicted because the consumer fell behind
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer half of a frame queue: a lazy, ordered, finite-once-closed
/// sequence of frames.
pub struct FrameStream {
    queue: Arc<FrameQueue>,
}

impl FrameStream {
    pub fn new(queue: Arc<FrameQueue>) -> Self {
        Self { queue }
    }

    /// Next frame in capture order; None once the source is closed and
    /// all buffered frames are drained.
    pub async fn next(&mut self) -> Option<AudioFrame> {
        self.queue.pop().await
    }

    /// Frames dropped by the backpressure policy so far
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }
}

/// Producer half: stamps sequence numbers and pushes into the queue.
pub struct FrameProducer {
    queue: Arc<FrameQueue>,
    sample_rate: u32,
    sequence: u64,
}

impl FrameProducer {
    pub fn new(queue: Arc<FrameQueue>, sample_rate: u32) -> Self {
        Self {
            queue,
            sample_rate,
            sequence: 0,
        }
    }

    /// Emit one frame of mono i16 samples
    pub fn produce(&mut self, samples: &[i16]) {
        let frame = AudioFrame::from_samples(samples, self.sample_rate, self.sequence);
        self.sequence += 1;
        self.queue.push(frame);
    }
}

/// Trait for audio capture implementations
///
/// `open` acquires the device and returns the frame stream; device and
/// permission problems surface here, never mid-stream. `close` stops
/// capture, finishes the stream, and is idempotent.
#[async_trait::async_trait]
pub trait AudioSource: Send {
    async fn open(&mut self) -> Result<FrameStream, DeviceError>;
    async fn close(&mut self);
}

/// Factory function to create the capture implementation
pub fn create_source(config: &AudioConfig) -> Result<Box<dyn AudioSource>, DeviceError> {
    Ok(Box::new(cpal_source::CpalSource::new(config)))
}
