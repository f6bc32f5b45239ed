//! cpal-based audio capture
//!
//! Uses the cpal crate for cross-platform audio input. Works with
//! PipeWire, PulseAudio, and ALSA backends.
//!
//! Note: cpal::Stream is not Send, so the stream lives on a dedicated
//! thread; the callback mixes to mono, resamples to the configured rate,
//! converts to PCM16 and pushes fixed-duration frames into the queue.

use super::{AudioSource, FrameProducer, FrameQueue, FrameStream};
use crate::config::AudioConfig;
use crate::error::DeviceError;
use std::sync::Arc;
use std::thread;

/// cpal-based audio source
pub struct CpalSource {
    config: AudioConfig,
    queue: Option<Arc<FrameQueue>>,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl CpalSource {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            config: config.clone(),
            queue: None,
            stop_tx: None,
            thread_handle: None,
        }
    }
}

/// Find an audio input device by name.
///
/// Tries an exact match first, then a case-insensitive substring match so
/// users can write either full cpal names or PipeWire short names.
fn find_audio_device(host: &cpal::Host, device_name: &str) -> Result<cpal::Device, DeviceError> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let devices: Vec<cpal::Device> = host
        .input_devices()
        .map_err(|e| DeviceError::Connection(e.to_string()))?
        .collect();

    let device_names: Vec<String> = devices.iter().filter_map(|d| d.name().ok()).collect();
    let search_lower = device_name.to_lowercase();

    for device in devices {
        if let Ok(name) = device.name() {
            if name == device_name || name.to_lowercase().contains(&search_lower) {
                tracing::debug!("Found audio device: {}", name);
                return Ok(device);
            }
        }
    }

    let available = if device_names.is_empty() {
        "No audio input devices found.".to_string()
    } else {
        format!(
            "Available devices:\n{}",
            device_names
                .iter()
                .map(|n| format!("  - {}", n))
                .collect::<Vec<_>>()
                .join("\n")
        )
    };

    Err(DeviceError::NotFound {
        requested: device_name.to_string(),
        available,
    })
}

#[async_trait::async_trait]
impl AudioSource for CpalSource {
    async fn open(&mut self) -> Result<FrameStream, DeviceError> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

        // Resolve the device and its config before spawning the thread so
        // every device problem surfaces here, never mid-stream.
        let host = cpal::default_host();

        let device = if self.config.device == "default" {
            host.default_input_device()
                .ok_or(DeviceError::NoDefaultDevice)?
        } else {
            find_audio_device(&host, &self.config.device)?
        };

        let device_name = device.name().unwrap_or_else(|_| "unknown".to_string());
        tracing::info!("Using audio device: {}", device_name);

        let supported_config = device
            .default_input_config()
            .map_err(|e| DeviceError::Connection(e.to_string()))?;

        let source_rate = supported_config.sample_rate().0;
        let source_channels = supported_config.channels() as usize;
        let target_rate = self.config.sample_rate;
        let sample_format = supported_config.sample_format();

        tracing::debug!(
            "Device config: {} Hz, {} channel(s), format: {:?}",
            source_rate,
            source_channels,
            sample_format
        );

        match sample_format {
            cpal::SampleFormat::F32 | cpal::SampleFormat::I16 | cpal::SampleFormat::U16 => {}
            format => {
                return Err(DeviceError::UnsupportedFormat(format!("{:?}", format)));
            }
        }

        let queue = FrameQueue::new(self.config.queue_frames);
        let producer = FrameProducer::new(queue.clone(), target_rate);
        let frame_samples = self.config.frame_samples();

        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();

        let thread_handle = thread::spawn(move || {
            let stream_config = cpal::StreamConfig {
                channels: supported_config.channels(),
                sample_rate: supported_config.sample_rate(),
                buffer_size: cpal::BufferSize::Default,
            };

            let err_fn = |err| tracing::error!("Audio stream error: {}", err);

            let framer = Framer {
                producer,
                pending: Vec::with_capacity(frame_samples * 2),
                frame_samples,
                source_rate,
                target_rate,
                source_channels,
            };

            let stream_result = match sample_format {
                cpal::SampleFormat::F32 => {
                    build_stream::<f32>(&device, &stream_config, framer, err_fn)
                }
                cpal::SampleFormat::I16 => {
                    build_stream::<i16>(&device, &stream_config, framer, err_fn)
                }
                cpal::SampleFormat::U16 => {
                    build_stream::<u16>(&device, &stream_config, framer, err_fn)
                }
                _ => unreachable!("format checked before spawn"),
            };

            let stream = match stream_result {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!("Failed to build audio stream: {}", e);
                    return;
                }
            };

            if let Err(e) = stream.play() {
                tracing::error!("Failed to start audio stream: {}", e);
                return;
            }

            tracing::debug!("Audio capture thread started");

            // Park until close(); a disconnected channel also stops capture.
            let _ = stop_rx.recv();
            drop(stream);

            tracing::debug!("Audio capture thread stopped");
        });

        self.stop_tx = Some(stop_tx);
        self.thread_handle = Some(thread_handle);
        self.queue = Some(queue.clone());

        Ok(FrameStream::new(queue))
    }

    async fn close(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(handle) = self.thread_handle.take() {
            // Join off the runtime; the capture thread exits promptly once
            // the stop channel fires.
            let _ = tokio::task::spawn_blocking(move || handle.join()).await;
        }

        if let Some(queue) = self.queue.take() {
            queue.close();
            let dropped = queue.dropped();
            if dropped > 0 {
                tracing::warn!("Dropped {} audio frame(s) under backpressure", dropped);
            }
        }
    }
}

/// Accumulates converted samples and emits fixed-size frames
struct Framer {
    producer: FrameProducer,
    pending: Vec<i16>,
    frame_samples: usize,
    source_rate: u32,
    target_rate: u32,
    source_channels: usize,
}

impl Framer {
    fn ingest<T>(&mut self, data: &[T])
    where
        T: cpal::Sample,
        f32: cpal::FromSample<T>,
    {
        // Mix to mono
        let mono: Vec<f32> = data
            .chunks(self.source_channels)
            .map(|frame| {
                let sum: f32 = frame
                    .iter()
                    .map(|&s| <f32 as cpal::FromSample<T>>::from_sample_(s))
                    .sum();
                sum / self.source_channels as f32
            })
            .collect();

        let resampled = if self.source_rate != self.target_rate {
            resample(&mono, self.source_rate, self.target_rate)
        } else {
            mono
        };

        for s in resampled {
            let clamped = s.clamp(-1.0, 1.0);
            self.pending.push((clamped * i16::MAX as f32) as i16);
        }

        while self.pending.len() >= self.frame_samples {
            let rest = self.pending.split_off(self.frame_samples);
            let frame: Vec<i16> = std::mem::replace(&mut self.pending, rest);
            self.producer.produce(&frame);
        }
    }
}

/// Build an input stream for a specific sample type
fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut framer: Framer,
    err_fn: impl Fn(cpal::StreamError) + Send + 'static,
) -> Result<cpal::Stream, DeviceError>
where
    T: cpal::Sample + cpal::SizedSample + Send + 'static,
    f32: cpal::FromSample<T>,
{
    use cpal::traits::DeviceTrait;

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                framer.ingest(data);
            },
            err_fn,
            None,
        )
        .map_err(|e| DeviceError::Stream(e.to_string()))?;

    Ok(stream)
}

/// Linear interpolation resampling
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let new_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx = src_idx.floor() as usize;
        let frac = (src_idx - idx as f64) as f32;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else {
            samples.get(idx).copied().unwrap_or(0.0)
        };

        output.push(sample);
    }

    output
}
