//! Frame producer: runs inside the capture callback
//!
//! Applies gain, feeds the level tap, encodes to the wire format and hands
//! the frame to the outbound queue. Nothing here blocks, retries or logs;
//! frames that cannot be sent are dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::codec::PcmEncoder;
use crate::meter::LevelTap;
use crate::network::ChannelHandle;
use crate::protocol::SampleFormat;
use crate::stream::gate::{Gain, SessionGate};

/// Counters updated from the audio callback
#[derive(Debug, Default)]
pub struct ProducerStats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
    bytes_sent: AtomicU64,
}

impl ProducerStats {
    pub fn snapshot(&self) -> ProducerStatsSnapshot {
        ProducerStatsSnapshot {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.frames_sent.store(0, Ordering::Relaxed);
        self.frames_dropped.store(0, Ordering::Relaxed);
        self.bytes_sent.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProducerStatsSnapshot {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub bytes_sent: u64,
}

pub struct FrameProducer {
    gate: SessionGate,
    gain: Gain,
    channel: ChannelHandle,
    encoder: PcmEncoder,
    // Keeps the capacity of the largest block seen
    scaled: Vec<f32>,
    tap: Option<LevelTap>,
    stats: Arc<ProducerStats>,
}

impl FrameProducer {
    pub fn new(
        gate: SessionGate,
        gain: Gain,
        channel: ChannelHandle,
        format: SampleFormat,
        block_samples: usize,
        stats: Arc<ProducerStats>,
    ) -> Self {
        Self {
            gate,
            gain,
            channel,
            encoder: PcmEncoder::with_capacity(format, block_samples),
            scaled: Vec::with_capacity(block_samples),
            tap: None,
            stats,
        }
    }

    /// Also expose every gained block to a level monitor
    pub fn with_tap(mut self, tap: LevelTap) -> Self {
        self.tap = Some(tap);
        self
    }

    pub fn format(&self) -> SampleFormat {
        self.encoder.format()
    }

    /// Process one block of interleaved normalized samples
    pub fn process(&mut self, samples: &[f32]) {
        let gain = self.gain.get();
        self.scaled.clear();
        self.scaled.extend(samples.iter().map(|&s| s * gain));

        if let Some(tap) = self.tap.as_mut() {
            tap.push(&self.scaled);
        }

        if !self.gate.is_streaming() {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let frame = self.encoder.encode(&self.scaled);
        let len = frame.len() as u64;
        if self.channel.send_audio(frame) {
            self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
            self.stats.bytes_sent.fetch_add(len, Ordering::Relaxed);
        } else {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}
