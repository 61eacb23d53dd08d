//! # Mic Bridge
//!
//! Streams a local microphone to an audio output device on a remote machine,
//! turning that device into a virtual microphone input over the network.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────── SENDER ─────────────────────────────────┐
//! │                                                                          │
//! │  ┌─────────────┐  audio callback   ┌────────────────┐   ┌─────────────┐  │
//! │  │  Microphone │ ────────────────▶ │ Frame Producer │──▶│ Sample Codec│  │
//! │  │   (cpal)    │                   │  gain + gate   │   │ i8/i16/f32  │  │
//! │  └─────────────┘                   └───────┬────────┘   └──────┬──────┘  │
//! │                                            │ tap               │ bytes   │
//! │                                            ▼                   ▼         │
//! │                                   ┌────────────────┐   ┌──────────────┐  │
//! │                                   │ Level Monitor  │   │ Outbound FIFO│  │
//! │                                   │ (FFT, display) │   └──────┬───────┘  │
//! │                                   └────────────────┘          │          │
//! │  ┌──────────────────────────────────────────┐                 │          │
//! │  │ Session state machine (control domain)   │── config ──────▶│          │
//! │  │ connect → config → devices → select →    │── select ──────▶│          │
//! │  │ stream → teardown                        │◀─ devices ──┐   │          │
//! │  └──────────────────────────────────────────┘             │   ▼          │
//! │                                              ┌────────────┴──────────┐   │
//! │                                              │ WebSocket (tungstenite)│  │
//! └──────────────────────────────────────────────┴───────────┬───────────┴───┘
//!                                                            │ ws://
//! ┌─────────────────────────────── RECEIVER ──────────────────▼──────────────┐
//! │   axum WebSocket ─▶ handshake ─▶ PCM decode ─▶ ring buffer ─▶ cpal output│
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod meter;
pub mod network;
pub mod protocol;
pub mod session;
pub mod stream;

#[cfg(feature = "sender")]
pub mod client;

#[cfg(feature = "receiver")]
pub mod receiver;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for capture and playback
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Default channel count (mono microphone)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default buffering hint sent to the receiver, in frames
    pub const DEFAULT_SERVER_BUFFER_FRAMES: u32 = 128;

    /// Requested capture block size in frames per callback
    pub const DEFAULT_CAPTURE_BLOCK_FRAMES: u32 = 128;

    /// Default WebSocket port
    pub const DEFAULT_WS_PORT: u16 = 8765;

    /// Upper bound for the operator gain
    pub const MAX_GAIN: f32 = 3.0;

    /// Messages held between the session and the socket writer
    pub const OUTBOUND_QUEUE_CAPACITY: usize = 64;

    /// Level analysis window in samples (half as many frequency bins)
    pub const LEVEL_FFT_SIZE: usize = 256;

    /// Samples buffered between the audio callback and the level monitor
    pub const LEVEL_TAP_CAPACITY: usize = 8192;

    /// Decoded frames queued ahead of the receiver's output stream
    pub const PLAYBACK_QUEUE_CAPACITY: usize = 32;

    /// Entries kept in the operator activity log
    pub const ACTIVITY_LOG_CAPACITY: usize = 500;
}
