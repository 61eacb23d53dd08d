//! Async sender client
//!
//! Binds a WebSocket channel's events to the session state machine. All
//! methods run in the control domain; the capture callback only touches the
//! shared gate, gain and outbound queue.

use tokio::sync::mpsc;

use crate::audio::capture::CaptureSource;
use crate::error::SessionError;
use crate::meter::LevelReading;
use crate::network::{connect, endpoint_url, ChannelEvent};
use crate::protocol::StreamConfig;
use crate::session::{Session, SessionEvent, SessionOptions, SessionState, StatusSnapshot};

pub struct MicClient<C: CaptureSource> {
    session: Session<C>,
    events: Option<mpsc::Receiver<ChannelEvent>>,
    queue_capacity: usize,
}

impl<C: CaptureSource> MicClient<C> {
    pub fn new(config: StreamConfig, capture: C, options: SessionOptions, queue_capacity: usize) -> Self {
        Self {
            session: Session::new(config, capture, options),
            events: None,
            queue_capacity: queue_capacity.max(1),
        }
    }

    pub fn session(&self) -> &Session<C> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<C> {
        &mut self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.session.snapshot()
    }

    /// Open a channel and send the stream config
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<(), SessionError> {
        let url = endpoint_url(host, port)?;
        self.session.begin_connect(&url)?;

        match connect(&url, self.queue_capacity).await {
            Ok((handle, events)) => {
                self.events = Some(events);
                let opened = self.session.channel_opened(handle);
                if opened.is_err() {
                    self.events = None;
                }
                opened
            }
            Err(e) => {
                self.session.connect_failed(&e);
                Err(e.into())
            }
        }
    }

    /// Wait for the next channel event and apply it.
    ///
    /// Returns `None` when no channel is open. Cancel safe: nothing is lost
    /// if the future is dropped before completing.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        let events = self.events.as_mut()?;

        match events.recv().await {
            Some(ChannelEvent::Message(text)) => match self.session.handle_message(&text) {
                Ok(event) => event,
                Err(e) => Some(SessionEvent::MessageIgnored(e.to_string())),
            },
            Some(ChannelEvent::Closed(reason)) => {
                self.events = None;
                Some(self.session.channel_closed(reason.as_deref()))
            }
            Some(ChannelEvent::Error(error)) => {
                self.events = None;
                Some(self.session.channel_error(&error))
            }
            None => {
                self.events = None;
                Some(self.session.channel_closed(None))
            }
        }
    }

    pub fn select_device(&mut self, index: u32) -> Result<(), SessionError> {
        self.session.select_device(index)
    }

    pub fn start_capture(&mut self) -> Result<(), SessionError> {
        let started = self.session.start_capture();
        if started.is_err() && self.session.state() == SessionState::Disconnected {
            self.events = None;
        }
        started
    }

    /// Stop streaming and close the channel
    pub fn stop(&mut self) {
        self.events = None;
        self.session.stop();
    }

    pub fn set_gain(&self, value: f32) -> f32 {
        self.session.set_gain(value)
    }

    /// Tear the session down if the capture backend reported a failure
    pub fn poll_capture_error(&mut self) -> Option<SessionEvent> {
        let error = self.session.capture().poll_error()?;
        self.events = None;
        Some(self.session.capture_failed(&error.to_string()))
    }

    /// Advance the level monitor by one display tick
    pub fn tick_level(&mut self) -> Option<LevelReading> {
        self.session.level_monitor_mut().map(|monitor| monitor.tick())
    }
}
