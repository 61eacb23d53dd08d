//! PCM sample codec
//!
//! A closed set of wire formats selected by [`SampleFormat`](crate::protocol::SampleFormat).
//! No compression: frames are raw little-endian samples.

pub mod pcm;

pub use pcm::{decode_frame, encode_i16, encode_i8, PcmEncoder};
