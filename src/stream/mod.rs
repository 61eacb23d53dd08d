//! Audio-domain side of a session: the frame producer and the lock-free
//! state it shares with the control domain.

pub mod gate;
pub mod producer;

pub use gate::{Gain, SessionGate};
pub use producer::{FrameProducer, ProducerStats, ProducerStatsSnapshot};
