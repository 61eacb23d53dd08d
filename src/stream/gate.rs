//! Atomic snapshots shared between the control domain and the audio callback
//!
//! The control domain is the only writer. The audio callback only loads, so it
//! never waits on the control domain.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

use crate::constants::MAX_GAIN;
use crate::session::SessionState;

/// Mirror of the session state, readable from the audio callback
#[derive(Clone, Debug)]
pub struct SessionGate {
    state: Arc<AtomicU8>,
}

impl SessionGate {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(SessionState::Disconnected as u8)),
        }
    }

    pub fn set(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether frames may be transmitted right now
    #[inline]
    pub fn is_streaming(&self) -> bool {
        self.state.load(Ordering::Acquire) == SessionState::Streaming as u8
    }
}

impl Default for SessionGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Operator gain in `[0, MAX_GAIN]`, stored as f32 bits.
///
/// A change is picked up by the next block the producer processes.
#[derive(Clone, Debug)]
pub struct Gain {
    bits: Arc<AtomicU32>,
}

impl Gain {
    pub fn new(value: f32) -> Self {
        Self {
            bits: Arc::new(AtomicU32::new(Self::clamp(value).to_bits())),
        }
    }

    fn clamp(value: f32) -> f32 {
        if value.is_nan() {
            1.0
        } else {
            value.clamp(0.0, MAX_GAIN)
        }
    }

    /// Store a new gain, returning the clamped value actually applied
    pub fn set(&self, value: f32) -> f32 {
        let value = Self::clamp(value);
        self.bits.store(value.to_bits(), Ordering::Relaxed);
        value
    }

    #[inline]
    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

impl Default for Gain {
    fn default() -> Self {
        Self::new(1.0)
    }
}
