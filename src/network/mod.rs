//! Network subsystem: the outbound message queue and the WebSocket transport

pub mod channel;
pub mod ws;

pub use channel::{ChannelEvent, ChannelHandle, Outbound};
pub use ws::{connect, endpoint_url};
