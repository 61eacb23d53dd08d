//! Audio device enumeration
//!
//! Output devices are addressed by their position in the host's output
//! enumeration; that position is the `index` announced to clients.

use cpal::traits::{DeviceTrait, HostTrait};

use crate::error::{AudioError, CaptureError};
use crate::protocol::Device;

/// List output devices as announced to clients
pub fn list_output_devices() -> Vec<Device> {
    let host = cpal::default_host();
    let devices = match host.output_devices() {
        Ok(devices) => devices,
        Err(e) => {
            tracing::warn!("Failed to enumerate output devices: {}", e);
            return Vec::new();
        }
    };

    devices
        .enumerate()
        .map(|(index, device)| Device {
            index: index as u32,
            name: device.name().unwrap_or_else(|_| "Unknown".to_string()),
        })
        .collect()
}

/// Names of the available input devices, default first
pub fn list_input_devices() -> Vec<String> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let mut names: Vec<String> = host
        .input_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default();

    if let Some(default_name) = default_name {
        if let Some(pos) = names.iter().position(|n| *n == default_name) {
            let name = names.remove(pos);
            names.insert(0, name);
        }
    }
    names
}

/// Look up an output device by its announced index
pub fn output_device_by_index(index: u32) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();
    host.output_devices()?
        .nth(index as usize)
        .ok_or_else(|| AudioError::DeviceNotFound(format!("output device {}", index)))
}

/// Resolve the capture device by name, or the system default
pub fn input_device(name: Option<&str>) -> Result<cpal::Device, CaptureError> {
    let host = cpal::default_host();

    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceUnavailable("no default input device".to_string())),
        Some(name) => host
            .input_devices()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| CaptureError::DeviceUnavailable(format!("input device '{}'", name))),
    }
}
