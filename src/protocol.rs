//! Control-plane wire types
//!
//! Control messages travel as JSON text frames shaped `{"type": ..., "data": ...}`.
//! Audio travels as bare binary frames and has no wrapper type here.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE, DEFAULT_SERVER_BUFFER_FRAMES};
use crate::error::{CodecError, ProtocolError};

/// Wire-level encoding of one audio sample.
///
/// Serialized as its byte width (1, 2 or 4), which is what the receiving end keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SampleFormat {
    Int8,
    #[default]
    Int16,
    Float32,
}

impl SampleFormat {
    /// Bytes per encoded sample
    pub const fn byte_width(self) -> usize {
        match self {
            SampleFormat::Int8 => 1,
            SampleFormat::Int16 => 2,
            SampleFormat::Float32 => 4,
        }
    }
}

impl TryFrom<u8> for SampleFormat {
    type Error = CodecError;

    fn try_from(width: u8) -> Result<Self, Self::Error> {
        match width {
            1 => Ok(SampleFormat::Int8),
            2 => Ok(SampleFormat::Int16),
            4 => Ok(SampleFormat::Float32),
            other => Err(CodecError::UnsupportedSampleWidth(other)),
        }
    }
}

impl From<SampleFormat> for u8 {
    fn from(format: SampleFormat) -> Self {
        format.byte_width() as u8
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleFormat::Int8 => write!(f, "8-bit integer"),
            SampleFormat::Int16 => write!(f, "16-bit integer"),
            SampleFormat::Float32 => write!(f, "32-bit float"),
        }
    }
}

/// Stream parameters negotiated once per session, before any audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(rename = "sampleRate")]
    pub sample_rate_hz: u32,

    #[serde(rename = "channels")]
    pub channel_count: u16,

    #[serde(rename = "sampleWidthBytes")]
    pub sample_format: SampleFormat,

    /// Buffering hint for the receiving side; the sender does not enforce it
    #[serde(rename = "framesPerBuffer")]
    pub server_buffer_frames: u32,
}

impl StreamConfig {
    /// Size in bytes of one encoded frame holding `frames` samples per channel
    pub fn frame_bytes(&self, frames: usize) -> usize {
        frames * self.channel_count as usize * self.sample_format.byte_width()
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: DEFAULT_SAMPLE_RATE,
            channel_count: DEFAULT_CHANNELS,
            sample_format: SampleFormat::Int16,
            server_buffer_frames: DEFAULT_SERVER_BUFFER_FRAMES,
        }
    }
}

/// An output device on the remote endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub index: u32,
    pub name: String,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] - {}", self.index, self.name)
    }
}

/// Structured control messages exchanged over the channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ControlMessage {
    /// client -> server, always the first message of a session
    Config(StreamConfig),
    /// client -> server
    SelectDevice(u32),
    /// server -> client
    Devices(Vec<Device>),
}

impl ControlMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Config(_) => "config",
            ControlMessage::SelectDevice(_) => "select_device",
            ControlMessage::Devices(_) => "devices",
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}
