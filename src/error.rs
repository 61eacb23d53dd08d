//! Error types for the microphone bridge

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by the client session. Every variant resets the session
/// to `Disconnected`; none is fatal to the process.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Connect error: {0}")]
    Connect(#[from] ConnectError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// The transport failed to open or closed before the handshake
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),
}

/// Microphone acquisition failures
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Input device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Unsupported capture configuration: {0}")]
    UnsupportedConfig(String),

    #[error("Capture backend error: {0}")]
    Backend(String),
}

/// Channel-level failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Channel is not open")]
    NotOpen,

    #[error("Outbound queue is full")]
    QueueFull,

    #[error("WebSocket error: {0}")]
    WebSocket(String),
}

/// Control protocol violations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Unknown device index: {0}")]
    UnknownDevice(u32),

    #[error("No output device selected")]
    NoDeviceSelected,

    #[error("Remote endpoint reported no output devices")]
    NoDevices,

    #[error("Malformed control message: {0}")]
    Malformed(String),

    #[error("Unexpected control message: {0}")]
    UnexpectedMessage(String),
}

/// Audio device and stream errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// PCM codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Unsupported sample width: {0} bytes")]
    UnsupportedSampleWidth(u8),

    #[error("Frame of {len} bytes is not a multiple of the {width}-byte sample width")]
    MisalignedFrame { len: usize, width: usize },
}

impl From<cpal::BuildStreamError> for CaptureError {
    fn from(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => {
                CaptureError::DeviceUnavailable(err.to_string())
            }
            cpal::BuildStreamError::StreamConfigNotSupported
            | cpal::BuildStreamError::InvalidArgument => {
                CaptureError::UnsupportedConfig(err.to_string())
            }
            other => CaptureError::Backend(other.to_string()),
        }
    }
}

impl From<cpal::PlayStreamError> for CaptureError {
    fn from(err: cpal::PlayStreamError) -> Self {
        match err {
            cpal::PlayStreamError::DeviceNotAvailable => {
                CaptureError::DeviceUnavailable(err.to_string())
            }
            other => CaptureError::Backend(other.to_string()),
        }
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        AudioError::StreamError(err.to_string())
    }
}

impl From<cpal::DevicesError> for AudioError {
    fn from(err: cpal::DevicesError) -> Self {
        AudioError::CpalError(err.to_string())
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
