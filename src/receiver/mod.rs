//! Receiving endpoint
//!
//! Serves the other half of the control protocol: accepts a stream config,
//! announces output devices, takes a device selection and plays the binary
//! frames that follow on that device.

pub mod server;

pub use server::{router, serve};

use crate::audio::device::list_output_devices;
use crate::audio::playback::{PcmSink, Playback};
use crate::error::AudioError;
use crate::protocol::{Device, StreamConfig};

/// Output devices as seen by the receiver
pub trait OutputBackend: Send + Sync + 'static {
    /// Devices announced to a newly configured client
    fn list_devices(&self) -> Vec<Device>;

    /// Open `device_index` for the negotiated stream. May block while the
    /// hardware starts.
    fn open(&self, device_index: u32, config: &StreamConfig) -> Result<Box<dyn PcmSink>, AudioError>;
}

/// cpal output devices on the default host
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalOutput;

impl OutputBackend for CpalOutput {
    fn list_devices(&self) -> Vec<Device> {
        list_output_devices()
    }

    fn open(&self, device_index: u32, config: &StreamConfig) -> Result<Box<dyn PcmSink>, AudioError> {
        let playback = Playback::start(device_index, config)?;
        Ok(Box::new(playback))
    }
}
