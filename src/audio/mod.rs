//! Audio hardware: microphone capture, output playback and device lookup

pub mod buffer;
pub mod capture;
pub mod device;
pub mod playback;

pub use buffer::{AudioFrame, FrameReader, PlaybackQueue};
pub use capture::{CaptureRequest, CaptureSource, CpalCapture};
pub use device::{list_input_devices, list_output_devices};
pub use playback::{PcmSink, Playback};
