//! Audio playback on an output device
//!
//! Received wire frames are decoded, queued and pulled by the
//! cpal output callback on a dedicated thread. An empty queue plays silence.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample, SupportedBufferSize};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{AudioFrame, FrameReader, PlaybackQueue, SharedPlaybackQueue};
use crate::audio::device::output_device_by_index;
use crate::codec::decode_frame;
use crate::constants::PLAYBACK_QUEUE_CAPACITY;
use crate::error::{AudioError, CodecError};
use crate::protocol::{SampleFormat, StreamConfig};

/// Destination for received PCM frames
pub trait PcmSink: Send {
    /// Queue one wire frame for output
    fn write(&mut self, frame: &[u8]) -> Result<(), CodecError>;
}

/// Playback of a negotiated stream on one output device
pub struct Playback {
    device_index: u32,
    format: SampleFormat,
    channels: u16,
    queue: SharedPlaybackQueue,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl Playback {
    /// Open the output device and start the stream
    pub fn start(device_index: u32, stream: &StreamConfig) -> Result<Self, AudioError> {
        let device = output_device_by_index(device_index)?;
        let (config, sample_format) = negotiate(&device, stream)?;

        let queue = Arc::new(PlaybackQueue::new(PLAYBACK_QUEUE_CAPACITY));
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = bounded::<Result<cpal::BufferSize, AudioError>>(1);

        let running_for_loop = running.clone();
        let output_queue = queue.clone();
        let handle = thread::Builder::new()
            .name(format!("playback-device-{}", device_index))
            .spawn(move || {
                let mut config = config;
                let built = match sample_format {
                    cpal::SampleFormat::F32 => open_output::<f32>(&device, &mut config, output_queue),
                    cpal::SampleFormat::I16 => open_output::<i16>(&device, &mut config, output_queue),
                    cpal::SampleFormat::I32 => open_output::<i32>(&device, &mut config, output_queue),
                    cpal::SampleFormat::U16 => open_output::<u16>(&device, &mut config, output_queue),
                    other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
                };

                let stream = match built {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(config.buffer_size.clone()));

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let mut playback = Self {
            device_index,
            format: stream.sample_format,
            channels: stream.channel_count,
            queue,
            running,
            thread_handle: Some(handle),
        };

        let outcome = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(AudioError::StreamError("playback thread exited".to_string())));
        match outcome {
            Ok(buffer_size) => {
                tracing::info!(
                    "Playback started on output device {} ({:?})",
                    device_index,
                    buffer_size
                );
                Ok(playback)
            }
            Err(e) => {
                playback.stop();
                Err(e)
            }
        }
    }

    pub fn device_index(&self) -> u32 {
        self.device_index
    }

    pub fn queue(&self) -> &SharedPlaybackQueue {
        &self.queue
    }

    /// Stop playback and release the device
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::info!(
                "Playback stopped on output device {} ({} frames dropped, {} underruns)",
                self.device_index,
                self.queue.dropped(),
                self.queue.underruns()
            );
        }
    }
}

impl PcmSink for Playback {
    fn write(&mut self, frame: &[u8]) -> Result<(), CodecError> {
        let mut samples = Vec::with_capacity(frame.len() / self.format.byte_width());
        decode_frame(self.format, frame, &mut samples)?;
        // A full queue drops the newest frame to bound latency
        self.queue.offer(AudioFrame::new(samples, self.channels));
        Ok(())
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.stop();
    }
}

fn negotiate(
    device: &cpal::Device,
    stream: &StreamConfig,
) -> Result<(cpal::StreamConfig, cpal::SampleFormat), AudioError> {
    let rate = cpal::SampleRate(stream.sample_rate_hz);
    let range = device
        .supported_output_configs()
        .map_err(|e| AudioError::CpalError(e.to_string()))?
        .filter(|r| {
            r.channels() == stream.channel_count
                && r.min_sample_rate() <= rate
                && rate <= r.max_sample_rate()
        })
        .max_by_key(|r| match r.sample_format() {
            cpal::SampleFormat::F32 => 3,
            cpal::SampleFormat::I16 => 2,
            cpal::SampleFormat::I32 | cpal::SampleFormat::U16 => 1,
            _ => 0,
        })
        .ok_or_else(|| {
            AudioError::UnsupportedFormat(format!(
                "{} channel(s) at {} Hz",
                stream.channel_count, stream.sample_rate_hz
            ))
        })?;

    Ok((
        cpal::StreamConfig {
            channels: stream.channel_count,
            sample_rate: rate,
            buffer_size: requested_buffer_size(range.buffer_size(), stream.server_buffer_frames),
        },
        range.sample_format(),
    ))
}

/// Ask for `frames` as a fixed buffer unless the device advertises a range
/// that excludes it. Devices reporting `Unknown` get the fixed size first.
fn requested_buffer_size(supported: &SupportedBufferSize, frames: u32) -> cpal::BufferSize {
    match supported {
        SupportedBufferSize::Range { min, max } if !(*min..=*max).contains(&frames) => {
            cpal::BufferSize::Default
        }
        _ if frames == 0 => cpal::BufferSize::Default,
        _ => cpal::BufferSize::Fixed(frames),
    }
}

/// Whether a build failure should be retried with the default buffer size
fn should_retry_with_default(config: &cpal::StreamConfig, err: &cpal::BuildStreamError) -> bool {
    matches!(config.buffer_size, cpal::BufferSize::Fixed(_))
        && matches!(
            err,
            cpal::BuildStreamError::StreamConfigNotSupported | cpal::BuildStreamError::InvalidArgument
        )
}

/// Build the output stream, dropping back to the default buffer size when
/// the device rejects the fixed one. `config` ends up holding what was used.
fn open_output<T>(
    device: &cpal::Device,
    config: &mut cpal::StreamConfig,
    queue: SharedPlaybackQueue,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    match build_output::<T>(device, config, queue.clone()) {
        Err(e) if should_retry_with_default(config, &e) => {
            tracing::warn!(
                "Output device rejected {:?} ({}), using the default buffer size",
                config.buffer_size,
                e
            );
            config.buffer_size = cpal::BufferSize::Default;
            Ok(build_output::<T>(device, config, queue)?)
        }
        built => Ok(built?),
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: SharedPlaybackQueue,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let mut reader = FrameReader::new();
    let mut scratch: Vec<f32> = Vec::with_capacity(4096);

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            scratch.resize(data.len(), 0.0);
            reader.fill(&queue, &mut scratch);
            for (out, &s) in data.iter_mut().zip(scratch.iter()) {
                *out = T::from_sample(s);
            }
        },
        |err| {
            tracing::error!("Output stream error: {}", err);
        },
        None,
    )
}
