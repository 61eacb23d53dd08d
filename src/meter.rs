//! Input level monitor
//!
//! The audio callback pushes gained samples into a lock-free tap; the display
//! side calls [`LevelMonitor::tick`] on its own refresh clock. Each tick runs a
//! small windowed FFT over the most recent samples and reports the loudest bin
//! as a percentage, like an analyser-driven VU meter:
//! Blackman window, 0.8 smoothing between ticks, magnitudes mapped to a byte
//! over `[-100 dB, -30 dB]`.

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use serde::Serialize;
use std::f32::consts::PI;
use std::fmt;
use std::sync::Arc;

use crate::constants::LEVEL_FFT_SIZE;

const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;
const SMOOTHING: f32 = 0.8;

/// Severity band of a level reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelBand {
    Normal,
    Warning,
    Clipping,
}

impl LevelBand {
    /// `< 80` normal, `80..=95` warning, `> 95` clipping
    pub fn classify(level: f32) -> Self {
        if level > 95.0 {
            LevelBand::Clipping
        } else if level >= 80.0 {
            LevelBand::Warning
        } else {
            LevelBand::Normal
        }
    }
}

impl fmt::Display for LevelBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelBand::Normal => write!(f, "normal"),
            LevelBand::Warning => write!(f, "warning"),
            LevelBand::Clipping => write!(f, "clipping"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LevelReading {
    /// Loudest frequency bin as a percentage in `[0, 100]`
    pub level: f32,
    pub band: LevelBand,
}

impl LevelReading {
    pub fn silent() -> Self {
        Self {
            level: 0.0,
            band: LevelBand::Normal,
        }
    }

    fn from_level(level: f32) -> Self {
        let level = level.clamp(0.0, 100.0);
        Self {
            level,
            band: LevelBand::classify(level),
        }
    }
}

/// Audio-callback end of the monitor
pub struct LevelTap {
    producer: HeapProd<f32>,
    channels: usize,
}

impl LevelTap {
    /// Push interleaved samples, dropping whatever does not fit.
    /// Only whole frames are written so channels stay aligned.
    #[inline]
    pub fn push(&mut self, samples: &[f32]) {
        let room = self.producer.vacant_len() / self.channels * self.channels;
        let len = samples.len().min(room);
        self.producer.push_slice(&samples[..len]);
    }
}

/// Create a connected tap/monitor pair
pub fn level_monitor(channels: u16, capacity: usize) -> (LevelTap, LevelMonitor) {
    let channels = channels.max(1) as usize;
    let (producer, consumer) = HeapRb::<f32>::new(capacity).split();
    (
        LevelTap { producer, channels },
        LevelMonitor::new(consumer, channels),
    )
}

/// Display end of the monitor
pub struct LevelMonitor {
    consumer: HeapCons<f32>,
    channels: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    /// Most recent mono samples, oldest first
    history: Vec<f32>,
    smoothed: Vec<f32>,
    spectrum: Vec<Complex32>,
    drain: Vec<f32>,
    last: LevelReading,
}

impl LevelMonitor {
    fn new(consumer: HeapCons<f32>, channels: usize) -> Self {
        let size = LEVEL_FFT_SIZE;
        let fft = FftPlanner::<f32>::new().plan_fft_forward(size);

        Self {
            consumer,
            channels,
            fft,
            window: blackman(size),
            history: vec![0.0; size],
            smoothed: vec![0.0; size / 2],
            spectrum: vec![Complex32::new(0.0, 0.0); size],
            drain: vec![0.0; size * channels],
            last: LevelReading::silent(),
        }
    }

    /// Number of frequency bins analysed per tick
    pub fn bin_count(&self) -> usize {
        self.smoothed.len()
    }

    /// Reading from the most recent tick
    pub fn last(&self) -> LevelReading {
        self.last
    }

    /// Consume pending samples and compute a fresh reading
    pub fn tick(&mut self) -> LevelReading {
        self.ingest();

        let size = self.history.len();
        for (i, slot) in self.spectrum.iter_mut().enumerate() {
            *slot = Complex32::new(self.history[i] * self.window[i], 0.0);
        }
        self.fft.process(&mut self.spectrum);

        let mut max_byte = 0u8;
        for (bin, smoothed) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.spectrum[bin].norm() / size as f32;
            *smoothed = SMOOTHING * *smoothed + (1.0 - SMOOTHING) * magnitude;
            max_byte = max_byte.max(to_byte(*smoothed));
        }

        self.last = LevelReading::from_level(max_byte as f32 / 255.0 * 100.0);
        self.last
    }

    fn ingest(&mut self) {
        let frame_len = self.channels;
        loop {
            // Read whole frames only; the tap never writes partial ones.
            let want = self.drain.len() / frame_len * frame_len;
            let read = self.consumer.pop_slice(&mut self.drain[..want]);
            if read == 0 {
                break;
            }

            let frames = read / frame_len;
            let keep = self.history.len();
            if frames >= keep {
                self.history.clear();
            } else {
                self.history.drain(..frames.min(self.history.len()));
            }
            let start = frames.saturating_sub(keep);
            for frame in self.drain[start * frame_len..frames * frame_len].chunks_exact(frame_len) {
                self.history.push(frame.iter().sum::<f32>() / frame_len as f32);
            }

            if read < want {
                break;
            }
        }
    }
}

fn to_byte(magnitude: f32) -> u8 {
    if magnitude <= 0.0 {
        return 0;
    }
    let db = 20.0 * magnitude.log10();
    let scaled = 255.0 / (MAX_DECIBELS - MIN_DECIBELS) * (db - MIN_DECIBELS);
    scaled.clamp(0.0, 255.0).floor() as u8
}

fn blackman(size: usize) -> Vec<f32> {
    const ALPHA: f32 = 0.16;
    let a0 = 0.5 * (1.0 - ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * ALPHA;
    (0..size)
        .map(|i| {
            let x = i as f32 / size as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}
