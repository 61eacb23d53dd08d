//! Microphone capture
//!
//! [`CaptureSource`] is the seam between the session and the audio hardware.
//! [`CpalCapture`] runs the cpal input stream on a dedicated thread (cpal
//! streams are not `Send`) and drives a [`FrameProducer`] from the callback.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample, SupportedBufferSize};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::input_device;
use crate::error::CaptureError;
use crate::protocol::StreamConfig;
use crate::stream::FrameProducer;

/// Parameters for acquiring the microphone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureRequest {
    pub channel_count: u16,
    pub sample_rate_hz: u32,
    /// Preferred frames per callback; the backend may deliver other sizes
    pub block_frames: u32,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// Input device name, or the system default when `None`
    pub device_name: Option<String>,
}

impl CaptureRequest {
    /// Raw capture matching a negotiated stream: all voice processing off
    pub fn for_stream(config: &StreamConfig, block_frames: u32, device_name: Option<String>) -> Self {
        Self {
            channel_count: config.channel_count,
            sample_rate_hz: config.sample_rate_hz,
            block_frames,
            echo_cancellation: false,
            noise_suppression: false,
            auto_gain_control: false,
            device_name,
        }
    }

    pub fn block_samples(&self) -> usize {
        self.block_frames as usize * self.channel_count as usize
    }
}

/// A live sample source that feeds a frame producer from its callback
pub trait CaptureSource: Send {
    /// Acquire the input and start delivering blocks to `producer`
    fn start(&mut self, request: &CaptureRequest, producer: FrameProducer) -> Result<(), CaptureError>;

    /// Release the input. Must be safe to call when not running.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Asynchronous failure reported by the backend after a successful start
    fn poll_error(&self) -> Option<CaptureError> {
        None
    }
}

/// cpal-backed capture source
pub struct CpalCapture {
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<CaptureError>>,
}

impl CpalCapture {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
        }
    }
}

impl Default for CpalCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for CpalCapture {
    fn start(&mut self, request: &CaptureRequest, producer: FrameProducer) -> Result<(), CaptureError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        if request.echo_cancellation || request.noise_suppression || request.auto_gain_control {
            return Err(CaptureError::UnsupportedConfig(
                "voice processing is not available on this backend".to_string(),
            ));
        }

        let device = input_device(request.device_name.as_deref())?;
        let (config, sample_format) = negotiate(&device, request)?;

        let (ready_tx, ready_rx) = bounded::<Result<(), CaptureError>>(1);
        let (error_tx, error_rx) = bounded::<CaptureError>(16);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("mic-capture".to_string())
            .spawn(move || {
                let stream = match sample_format {
                    cpal::SampleFormat::F32 => build_f32(&device, &config, producer, error_tx),
                    cpal::SampleFormat::I16 => build_converted::<i16>(&device, &config, producer, error_tx),
                    cpal::SampleFormat::I32 => build_converted::<i32>(&device, &config, producer, error_tx),
                    cpal::SampleFormat::U16 => build_converted::<u16>(&device, &config, producer, error_tx),
                    other => Err(CaptureError::UnsupportedConfig(format!(
                        "input sample format {:?}",
                        other
                    ))),
                };

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(e.into()));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while running
                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                // Stream is dropped here, releasing the microphone
            })
            .map_err(|e| CaptureError::Backend(e.to_string()))?;

        self.thread_handle = Some(handle);

        let outcome = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(CaptureError::Backend("capture thread exited".to_string())));
        if outcome.is_err() {
            self.stop();
        }
        outcome
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::debug!("Capture thread joined");
        }
        self.error_rx = None;
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn poll_error(&self) -> Option<CaptureError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Pick a stream config the device supports for the requested rate and channels
fn negotiate(
    device: &cpal::Device,
    request: &CaptureRequest,
) -> Result<(cpal::StreamConfig, cpal::SampleFormat), CaptureError> {
    let rate = cpal::SampleRate(request.sample_rate_hz);
    let range = device
        .supported_input_configs()
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
        .filter(|r| {
            r.channels() == request.channel_count
                && r.min_sample_rate() <= rate
                && rate <= r.max_sample_rate()
        })
        .max_by_key(|r| format_preference(r.sample_format()))
        .ok_or_else(|| {
            CaptureError::UnsupportedConfig(format!(
                "{} channel(s) at {} Hz",
                request.channel_count, request.sample_rate_hz
            ))
        })?;

    let buffer_size = match range.buffer_size() {
        SupportedBufferSize::Range { min, max }
            if (*min..=*max).contains(&request.block_frames) =>
        {
            cpal::BufferSize::Fixed(request.block_frames)
        }
        _ => cpal::BufferSize::Default,
    };

    Ok((
        cpal::StreamConfig {
            channels: request.channel_count,
            sample_rate: rate,
            buffer_size,
        },
        range.sample_format(),
    ))
}

fn format_preference(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 3,
        cpal::SampleFormat::I16 => 2,
        cpal::SampleFormat::I32 | cpal::SampleFormat::U16 => 1,
        _ => 0,
    }
}

fn build_f32(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: FrameProducer,
    error_tx: Sender<CaptureError>,
) -> Result<cpal::Stream, CaptureError> {
    let stream = device.build_input_stream(
        config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| producer.process(data),
        move |err| {
            let _ = error_tx.try_send(CaptureError::Backend(err.to_string()));
        },
        None,
    )?;
    Ok(stream)
}

fn build_converted<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: FrameProducer,
    error_tx: Sender<CaptureError>,
) -> Result<cpal::Stream, CaptureError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut scratch: Vec<f32> = Vec::with_capacity(4096);
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            scratch.clear();
            scratch.extend(data.iter().map(|&s| s.to_sample::<f32>()));
            producer.process(&scratch);
        },
        move |err| {
            let _ = error_tx.try_send(CaptureError::Backend(err.to_string()));
        },
        None,
    )?;
    Ok(stream)
}
