//! Control protocol state machine
//!
//! ```text
//! Disconnected ─connect─▶ Connecting ─open / send config─▶ AwaitingDeviceList
//!      ▲                                                        │ devices
//!      │                                                        ▼
//!      │            start_capture              DeviceSelectionPending ◀─┐
//!      │     ┌───────────────────────────────────────┘        │        │ select_device
//!      │     ▼                                                 └────────┘
//!      │  Streaming
//!      │     │ stop / close / error (from any state)
//!      └─ Closed (teardown) ◀─┘
//! ```
//!
//! The session runs in the control domain and is the only writer of the
//! [`SessionGate`]; the audio callback only reads it.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::audio::capture::{CaptureRequest, CaptureSource};
use crate::constants::{DEFAULT_CAPTURE_BLOCK_FRAMES, LEVEL_TAP_CAPACITY};
use crate::error::{ConnectError, ProtocolError, SessionError, TransportError};
use crate::meter::{level_monitor, LevelMonitor};
use crate::network::ChannelHandle;
use crate::protocol::{ControlMessage, Device, StreamConfig};
use crate::session::log::ActivityLog;
use crate::stream::{FrameProducer, Gain, ProducerStats, ProducerStatsSnapshot, SessionGate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum SessionState {
    Disconnected = 0,
    Connecting = 1,
    AwaitingDeviceList = 2,
    DeviceSelectionPending = 3,
    Streaming = 4,
    /// Teardown in progress; settles to `Disconnected`
    Closed = 5,
}

impl SessionState {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Connecting,
            2 => SessionState::AwaitingDeviceList,
            3 => SessionState::DeviceSelectionPending,
            4 => SessionState::Streaming,
            5 => SessionState::Closed,
            _ => SessionState::Disconnected,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::AwaitingDeviceList => "awaiting device list",
            SessionState::DeviceSelectionPending => "selecting device",
            SessionState::Streaming => "streaming",
            SessionState::Closed => "closing",
        }
    }

    /// Operator-facing status line
    pub fn status_text(self) -> &'static str {
        match self {
            SessionState::Disconnected | SessionState::Closed => "Idle",
            SessionState::Connecting => "Connecting...",
            SessionState::AwaitingDeviceList => "Sending configuration...",
            SessionState::DeviceSelectionPending => "Select an output device and start streaming.",
            SessionState::Streaming => "Streaming...",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Notable outcomes of handling a channel event
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    DevicesReceived(Vec<Device>),
    MessageIgnored(String),
    Disconnected(String),
}

/// Per-client settings that are not part of the wire config
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub capture_block_frames: u32,
    pub input_device: Option<String>,
    /// Remote device to pre-select when the list contains it
    pub preferred_device: Option<u32>,
    pub initial_gain: f32,
    pub log: ActivityLog,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            capture_block_frames: DEFAULT_CAPTURE_BLOCK_FRAMES,
            input_device: None,
            preferred_device: None,
            initial_gain: 1.0,
            log: ActivityLog::default(),
        }
    }
}

/// Everything a visual shell needs to render the session
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub state: SessionState,
    pub status: &'static str,
    pub is_connected: bool,
    pub is_recording: bool,
    pub devices: Vec<Device>,
    pub selected_device: Option<u32>,
    pub gain: f32,
}

pub struct Session<C: CaptureSource> {
    id: Uuid,
    config: StreamConfig,
    state: SessionState,
    gate: SessionGate,
    gain: Gain,
    capture: C,
    capture_block_frames: u32,
    input_device: Option<String>,
    preferred_device: Option<u32>,
    channel: Option<ChannelHandle>,
    devices: Vec<Device>,
    selected_device: Option<u32>,
    selection_sent: bool,
    level: Option<LevelMonitor>,
    stats: Arc<ProducerStats>,
    log: ActivityLog,
}

impl<C: CaptureSource> Session<C> {
    pub fn new(config: StreamConfig, capture: C, options: SessionOptions) -> Self {
        Self {
            id: Uuid::nil(),
            config,
            state: SessionState::Disconnected,
            gate: SessionGate::new(),
            gain: Gain::new(options.initial_gain),
            capture,
            capture_block_frames: options.capture_block_frames,
            input_device: options.input_device,
            preferred_device: options.preferred_device,
            channel: None,
            devices: Vec::new(),
            selected_device: None,
            selection_sent: false,
            level: None,
            stats: Arc::new(ProducerStats::default()),
            log: options.log,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn selected_device(&self) -> Option<u32> {
        self.selected_device
    }

    pub fn gain(&self) -> f32 {
        self.gain.get()
    }

    pub fn log(&self) -> &ActivityLog {
        &self.log
    }

    pub fn capture(&self) -> &C {
        &self.capture
    }

    pub fn stats(&self) -> ProducerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn level_monitor_mut(&mut self) -> Option<&mut LevelMonitor> {
        self.level.as_mut()
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            SessionState::DeviceSelectionPending | SessionState::Streaming
        )
    }

    pub fn is_recording(&self) -> bool {
        self.state == SessionState::Streaming
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: self.state,
            status: self.state.status_text(),
            is_connected: self.is_connected(),
            is_recording: self.is_recording(),
            devices: self.devices.clone(),
            selected_device: self.selected_device,
            gain: self.gain.get(),
        }
    }

    /// Change the gain; effective from the next captured block
    pub fn set_gain(&self, value: f32) -> f32 {
        let applied = self.gain.set(value);
        tracing::debug!(session = %self.id, gain = applied, "Gain changed");
        applied
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::info!(session = %self.id, from = %self.state, to = %next, "Session state changed");
        }
        self.state = next;
        self.gate.set(next);
    }

    fn expect_state(&self, operation: &'static str, allowed: &[SessionState]) -> Result<(), ProtocolError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ProtocolError::InvalidState {
                operation,
                state: self.state.name(),
            })
        }
    }

    fn send(&self, message: &ControlMessage) -> Result<(), SessionError> {
        match &self.channel {
            Some(channel) => channel.send_control(message),
            None => Err(TransportError::NotOpen.into()),
        }
    }

    /// `Disconnected -> Connecting`
    pub fn begin_connect(&mut self, endpoint: &str) -> Result<(), ProtocolError> {
        self.expect_state("connect", &[SessionState::Disconnected])?;

        self.id = Uuid::new_v4();
        self.stats.reset();
        self.transition(SessionState::Connecting);
        self.log.info(format!("Connecting to {}...", endpoint));
        Ok(())
    }

    /// The transport never opened
    pub fn connect_failed(&mut self, err: &ConnectError) {
        self.log.error(format!("Connection failed: {}", err));
        self.teardown("connect failed");
    }

    /// `Connecting -> AwaitingDeviceList`: the config message goes out first
    pub fn channel_opened(&mut self, channel: ChannelHandle) -> Result<(), SessionError> {
        if let Err(e) = self.expect_state("open a channel", &[SessionState::Connecting]) {
            channel.close();
            return Err(e.into());
        }

        self.log.info("Connection established.");
        self.channel = Some(channel);

        let message = ControlMessage::Config(self.config);
        if let Err(e) = self.send(&message) {
            self.log.error(format!("Failed to send configuration: {}", e));
            self.teardown("config send failed");
            return Err(e);
        }

        self.transition(SessionState::AwaitingDeviceList);
        self.log.info(format!(
            "Configuration sent: {} Hz, {} channel(s), {}, {} frames per buffer",
            self.config.sample_rate_hz,
            self.config.channel_count,
            self.config.sample_format,
            self.config.server_buffer_frames
        ));
        Ok(())
    }

    /// Apply a text message received from the remote endpoint
    pub fn handle_message(&mut self, text: &str) -> Result<Option<SessionEvent>, ProtocolError> {
        let message = ControlMessage::from_json(text).map_err(|e| {
            tracing::warn!(session = %self.id, "Ignoring malformed control message: {}", e);
            e
        })?;

        match message {
            ControlMessage::Devices(devices) => self.devices_received(devices).map(Some),
            other => {
                tracing::warn!(session = %self.id, kind = other.kind(), "Ignoring unexpected control message");
                Err(ProtocolError::UnexpectedMessage(other.kind().to_string()))
            }
        }
    }

    /// `AwaitingDeviceList -> DeviceSelectionPending`
    fn devices_received(&mut self, devices: Vec<Device>) -> Result<SessionEvent, ProtocolError> {
        self.expect_state(
            "accept a device list",
            &[SessionState::AwaitingDeviceList, SessionState::DeviceSelectionPending],
        )?;

        let still_listed = self
            .selected_device
            .map(|index| devices.iter().any(|d| d.index == index))
            .unwrap_or(false);
        if !still_listed {
            let preferred = self
                .preferred_device
                .filter(|index| devices.iter().any(|d| d.index == *index));
            self.selected_device = preferred.or_else(|| devices.first().map(|d| d.index));
            self.selection_sent = false;
        }

        if devices.is_empty() {
            self.log.error("Remote endpoint reported no output devices.");
        } else {
            self.log.info(format!("Output device list received ({} devices).", devices.len()));
        }

        self.devices = devices.clone();
        self.transition(SessionState::DeviceSelectionPending);
        Ok(SessionEvent::DevicesReceived(devices))
    }

    /// Choose the remote output device. Repeatable until streaming starts.
    pub fn select_device(&mut self, index: u32) -> Result<(), SessionError> {
        self.expect_state("select a device", &[SessionState::DeviceSelectionPending])?;

        if !self.devices.iter().any(|d| d.index == index) {
            return Err(ProtocolError::UnknownDevice(index).into());
        }

        self.send(&ControlMessage::SelectDevice(index))?;
        self.selected_device = Some(index);
        self.selection_sent = true;
        self.log.info(format!("Output device selected: {}.", index));
        Ok(())
    }

    /// `DeviceSelectionPending -> Streaming`: acquire the microphone
    pub fn start_capture(&mut self) -> Result<(), SessionError> {
        self.expect_state("start capture", &[SessionState::DeviceSelectionPending])?;

        if self.devices.is_empty() {
            return Err(ProtocolError::NoDevices.into());
        }
        let index = self.selected_device.ok_or(ProtocolError::NoDeviceSelected)?;

        if !self.selection_sent {
            self.send(&ControlMessage::SelectDevice(index))?;
            self.selection_sent = true;
            self.log.info(format!("Output device selected: {}.", index));
        }

        let channel = match &self.channel {
            Some(channel) => channel.clone(),
            None => return Err(TransportError::NotOpen.into()),
        };

        let request = CaptureRequest::for_stream(
            &self.config,
            self.capture_block_frames,
            self.input_device.clone(),
        );
        let (tap, monitor) = level_monitor(self.config.channel_count, LEVEL_TAP_CAPACITY);
        let producer = FrameProducer::new(
            self.gate.clone(),
            self.gain.clone(),
            channel,
            self.config.sample_format,
            request.block_samples(),
            self.stats.clone(),
        )
        .with_tap(tap);

        self.log.info("Requesting microphone...");
        if let Err(e) = self.capture.start(&request, producer) {
            self.log.error(format!("Microphone unavailable: {}", e));
            self.teardown("capture failed");
            return Err(e.into());
        }

        self.level = Some(monitor);
        self.transition(SessionState::Streaming);
        self.log.info("Streaming started.");
        Ok(())
    }

    /// Operator stop. Safe from any state.
    pub fn stop(&mut self) {
        if self.state != SessionState::Disconnected {
            self.log.info("Streaming stopped.");
        }
        self.teardown("stopped");
    }

    /// The remote endpoint closed the channel
    pub fn channel_closed(&mut self, reason: Option<&str>) -> SessionEvent {
        let reason = match reason {
            Some(reason) if !reason.is_empty() => format!("Connection closed: {}", reason),
            _ => "Connection closed.".to_string(),
        };
        if self.state != SessionState::Disconnected {
            self.log.error(reason.clone());
        }
        self.teardown("channel closed");
        SessionEvent::Disconnected(reason)
    }

    /// The transport reported an error
    pub fn channel_error(&mut self, error: &TransportError) -> SessionEvent {
        let reason = format!("Connection error: {}", error);
        if self.state != SessionState::Disconnected {
            self.log.error(reason.clone());
        }
        self.teardown("channel error");
        SessionEvent::Disconnected(reason)
    }

    /// The capture backend failed after streaming started
    pub fn capture_failed(&mut self, error: &str) -> SessionEvent {
        let reason = format!("Microphone error: {}", error);
        self.log.error(reason.clone());
        self.teardown("capture error");
        SessionEvent::Disconnected(reason)
    }

    /// Release everything and return to `Disconnected`. Idempotent.
    fn teardown(&mut self, cause: &str) {
        let capture_running = self.capture.is_running();
        if self.state == SessionState::Disconnected && self.channel.is_none() && !capture_running {
            return;
        }

        // Close the gate first so late callbacks stop emitting
        self.transition(SessionState::Closed);

        if capture_running {
            self.capture.stop();
        }
        if let Some(channel) = self.channel.take() {
            channel.close();
        }

        self.devices.clear();
        self.selected_device = None;
        self.selection_sent = false;
        self.level = None;

        let stats = self.stats.snapshot();
        tracing::info!(
            session = %self.id,
            cause,
            frames_sent = stats.frames_sent,
            frames_dropped = stats.frames_dropped,
            bytes_sent = stats.bytes_sent,
            "Session torn down"
        );
        self.transition(SessionState::Disconnected);
    }
}

impl<C: CaptureSource> Drop for Session<C> {
    fn drop(&mut self) {
        self.teardown("dropped");
    }
}
