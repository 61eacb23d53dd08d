//! Decoded-frame queue between the receiver socket and the output callback
//!
//! Single producer (the socket task), single consumer (the cpal output
//! callback). A full queue rejects the incoming frame so latency stays
//! bounded; an empty queue makes the reader pad with silence.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Interleaved samples decoded from one received wire frame
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub channels: u16,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, channels: u16) -> Self {
        Self { samples, channels }
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// Bounded lock-free frame queue with overflow and underrun counters
pub struct PlaybackQueue {
    frames: ArrayQueue<AudioFrame>,
    dropped: AtomicUsize,
    starved: AtomicUsize,
}

impl PlaybackQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicUsize::new(0),
            starved: AtomicUsize::new(0),
        }
    }

    /// Queue a frame; returns false and counts a drop when full
    pub fn offer(&self, frame: AudioFrame) -> bool {
        if self.frames.push(frame).is_ok() {
            return true;
        }
        self.dropped.fetch_add(1, Ordering::Relaxed);
        false
    }

    /// Next queued frame; an empty queue counts as an underrun
    pub fn take(&self) -> Option<AudioFrame> {
        let frame = self.frames.pop();
        if frame.is_none() {
            self.starved.fetch_add(1, Ordering::Relaxed);
        }
        frame
    }

    pub fn queued(&self) -> usize {
        self.frames.len()
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn underruns(&self) -> usize {
        self.starved.load(Ordering::Relaxed)
    }
}

pub type SharedPlaybackQueue = Arc<PlaybackQueue>;

/// Consumer-side cursor that copies samples out of queued frames, across
/// frame boundaries
#[derive(Default)]
pub struct FrameReader {
    current: Option<AudioFrame>,
    position: usize,
}

impl FrameReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fill `out` from the queue, padding with silence when it runs dry.
    /// Returns the number of real samples written.
    pub fn fill(&mut self, queue: &PlaybackQueue, out: &mut [f32]) -> usize {
        let mut written = 0;

        while written < out.len() {
            let remaining = self
                .current
                .as_ref()
                .map(|frame| &frame.samples[self.position.min(frame.samples.len())..])
                .unwrap_or(&[]);

            if remaining.is_empty() {
                match queue.take() {
                    Some(frame) => {
                        self.current = Some(frame);
                        self.position = 0;
                        continue;
                    }
                    None => break,
                }
            }

            let n = remaining.len().min(out.len() - written);
            out[written..written + n].copy_from_slice(&remaining[..n]);
            self.position += n;
            written += n;
        }

        out[written..].fill(0.0);
        written
    }
}
