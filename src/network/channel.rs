//! Outbound side of a duplex message channel
//!
//! Control messages and audio frames share one bounded FIFO queue, so the
//! order of successive sends is the order on the wire. The socket writer task
//! owns the receiving end.

use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

use crate::error::{SessionError, TransportError};
use crate::protocol::ControlMessage;

/// A message queued for transmission
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Structured control message, already serialized
    Text(String),
    /// One encoded audio frame
    Binary(Bytes),
}

/// Events delivered from the transport to the control domain.
///
/// A channel yields any number of `Message` events followed by exactly one
/// `Closed` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Message(String),
    Closed(Option<String>),
    Error(TransportError),
}

/// Cloneable sending half of a channel
#[derive(Clone, Debug)]
pub struct ChannelHandle {
    tx: mpsc::Sender<Outbound>,
    open: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl ChannelHandle {
    /// Create an open handle and the queue the writer drains
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = Self {
            tx,
            open: Arc::new(AtomicBool::new(true)),
            shutdown: Arc::new(Notify::new()),
        };
        (handle, rx)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Queue a control message. Never dropped silently: a full queue is an error.
    pub fn send_control(&self, message: &ControlMessage) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(TransportError::NotOpen.into());
        }

        let text = message.to_json()?;
        self.tx.try_send(Outbound::Text(text)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::NotOpen,
        })?;

        tracing::debug!(kind = message.kind(), "Queued control message");
        Ok(())
    }

    /// Queue an audio frame without blocking.
    ///
    /// Returns `false` when the frame was dropped because the channel is not
    /// open or the queue is full.
    #[inline]
    pub fn send_audio(&self, frame: Bytes) -> bool {
        self.is_open() && self.tx.try_send(Outbound::Binary(frame)).is_ok()
    }

    /// Close the channel. Safe to call any number of times; only the first
    /// call signals the writer.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.shutdown.notify_one();
        }
    }

    pub(crate) fn shutdown_signal(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }
}
