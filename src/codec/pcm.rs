//! Raw PCM conversion between normalized f32 samples and wire formats
//!
//! Integer formats use the asymmetric two's-complement scale: positive samples
//! are multiplied by the positive maximum (127 / 32767) and negative samples by
//! the magnitude of the negative minimum (128 / 32768), so both `-1.0` and
//! `1.0` land exactly on the type's limits.
//!
//! Rounding is to nearest with ties away from zero (`f32::round`).
//! Out-of-range input is clamped to `[-1.0, 1.0]`; NaN encodes as silence.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;
use crate::protocol::SampleFormat;

#[inline]
fn sanitize(sample: f32) -> f32 {
    if sample.is_nan() {
        0.0
    } else {
        sample.clamp(-1.0, 1.0)
    }
}

/// Encode one normalized sample as signed 8-bit PCM
#[inline]
pub fn encode_i8(sample: f32) -> i8 {
    let s = sanitize(sample);
    if s < 0.0 {
        (s * 128.0).round() as i8
    } else {
        (s * 127.0).round() as i8
    }
}

/// Encode one normalized sample as signed 16-bit PCM
#[inline]
pub fn encode_i16(sample: f32) -> i16 {
    let s = sanitize(sample);
    if s < 0.0 {
        (s * 32768.0).round() as i16
    } else {
        (s * 32767.0).round() as i16
    }
}

#[inline]
pub fn decode_i8(value: i8) -> f32 {
    if value < 0 {
        value as f32 / 128.0
    } else {
        value as f32 / 127.0
    }
}

#[inline]
pub fn decode_i16(value: i16) -> f32 {
    if value < 0 {
        value as f32 / 32768.0
    } else {
        value as f32 / 32767.0
    }
}

/// Block encoder for one wire format.
///
/// Each emitted frame owns its bytes and stays valid while the encoder moves
/// on. Space is reserved per block, so a block allocates whenever the previous
/// frame's storage has been handed to the transport.
pub struct PcmEncoder {
    format: SampleFormat,
    buffer: BytesMut,
}

impl PcmEncoder {
    pub fn new(format: SampleFormat) -> Self {
        Self {
            format,
            buffer: BytesMut::new(),
        }
    }

    /// Create an encoder with room for `samples` samples pre-reserved
    pub fn with_capacity(format: SampleFormat, samples: usize) -> Self {
        Self {
            format,
            buffer: BytesMut::with_capacity(samples * format.byte_width()),
        }
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Encode interleaved normalized samples into one wire frame
    pub fn encode(&mut self, samples: &[f32]) -> Bytes {
        self.buffer.reserve(samples.len() * self.format.byte_width());

        match self.format {
            SampleFormat::Int8 => {
                for &s in samples {
                    self.buffer.put_i8(encode_i8(s));
                }
            }
            SampleFormat::Int16 => {
                for &s in samples {
                    self.buffer.put_i16_le(encode_i16(s));
                }
            }
            SampleFormat::Float32 => {
                for &s in samples {
                    self.buffer.put_f32_le(s);
                }
            }
        }

        self.buffer.split().freeze()
    }
}

/// Decode one wire frame back to normalized samples, appending to `out`
pub fn decode_frame(
    format: SampleFormat,
    mut frame: &[u8],
    out: &mut Vec<f32>,
) -> Result<(), CodecError> {
    let width = format.byte_width();
    if frame.len() % width != 0 {
        return Err(CodecError::MisalignedFrame {
            len: frame.len(),
            width,
        });
    }

    out.reserve(frame.len() / width);
    match format {
        SampleFormat::Int8 => {
            while frame.has_remaining() {
                out.push(decode_i8(frame.get_i8()));
            }
        }
        SampleFormat::Int16 => {
            while frame.has_remaining() {
                out.push(decode_i16(frame.get_i16_le()));
            }
        }
        SampleFormat::Float32 => {
            while frame.has_remaining() {
                out.push(frame.get_f32_le());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_int16_asymmetric_limits() {
        assert_eq!(encode_i16(1.0), 32767);
        assert_eq!(encode_i16(-1.0), -32768);
        assert_eq!(encode_i16(0.0), 0);
    }

    #[test]
    fn test_int8_asymmetric_limits() {
        assert_eq!(encode_i8(1.0), 127);
        assert_eq!(encode_i8(-1.0), -128);
        assert_eq!(encode_i8(0.0), 0);
    }

    #[test]
    fn test_rounding_ties_away_from_zero() {
        // 0.5 * 32767 = 16383.5
        assert_eq!(encode_i16(0.5), 16384);
        assert_eq!(encode_i16(-0.5), -16384);
        // 0.5 * 127 = 63.5
        assert_eq!(encode_i8(0.5), 64);
        assert_eq!(encode_i8(-0.5), -64);
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        assert_eq!(encode_i16(2.5), 32767);
        assert_eq!(encode_i16(-7.0), -32768);
        assert_eq!(encode_i8(f32::INFINITY), 127);
        assert_eq!(encode_i8(f32::NEG_INFINITY), -128);
        assert_eq!(encode_i16(f32::NAN), 0);
    }

    #[test]
    fn test_encode_block_int16_little_endian() {
        let mut encoder = PcmEncoder::new(SampleFormat::Int16);
        let frame = encoder.encode(&[0.5, -0.5]);

        assert_eq!(frame.len(), 4);
        assert_eq!(i16::from_le_bytes([frame[0], frame[1]]), 16384);
        assert_eq!(i16::from_le_bytes([frame[2], frame[3]]), -16384);
    }

    #[test]
    fn test_encoder_reuse_produces_independent_frames() {
        let mut encoder = PcmEncoder::with_capacity(SampleFormat::Int8, 4);
        let first = encoder.encode(&[1.0, -1.0]);
        let second = encoder.encode(&[0.0, 0.0, 0.0]);

        assert_eq!(&first[..], &[127u8, 0x80]);
        assert_eq!(&second[..], &[0u8, 0, 0]);
    }

    #[test]
    fn test_encoder_handles_blocks_beyond_reserved_capacity() {
        let mut encoder = PcmEncoder::with_capacity(SampleFormat::Int16, 2);
        let small = encoder.encode(&[0.5, -0.5]);
        let large = encoder.encode(&[0.5; 1024]);
        let owned = Vec::from(small.clone());
        let after = encoder.encode(&[-0.5, 0.5]);

        assert_eq!(large.len(), 2048);
        assert!(large.chunks(2).all(|pair| pair == [0x00, 0x40]));
        assert_eq!(owned, vec![0x00, 0x40, 0x00, 0xC0]);
        assert_eq!(&after[..], &[0x00, 0xC0, 0x00, 0x40]);
    }

    #[test]
    fn test_decode_rejects_misaligned_frame() {
        let mut out = Vec::new();
        let err = decode_frame(SampleFormat::Int16, &[0u8, 1, 2], &mut out);
        assert!(matches!(
            err,
            Err(CodecError::MisalignedFrame { len: 3, width: 2 })
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_decode_int16_limits() {
        let mut encoder = PcmEncoder::new(SampleFormat::Int16);
        let frame = encoder.encode(&[1.0, -1.0, 0.0]);

        let mut out = Vec::new();
        decode_frame(SampleFormat::Int16, &frame, &mut out).unwrap();
        assert_eq!(out, vec![1.0, -1.0, 0.0]);
    }

    proptest! {
        #[test]
        fn prop_int16_within_range(s in -1.0f32..=1.0) {
            let v = encode_i16(s) as i32;
            prop_assert!((-32768..=32767).contains(&v));
        }

        #[test]
        fn prop_int8_within_range(s in -1.0f32..=1.0) {
            let v = encode_i8(s) as i32;
            prop_assert!((-128..=127).contains(&v));
        }

        #[test]
        fn prop_float32_is_identity(s in -1.0f32..=1.0) {
            let mut encoder = PcmEncoder::new(SampleFormat::Float32);
            let frame = encoder.encode(&[s]);
            let mut out = Vec::new();
            decode_frame(SampleFormat::Float32, &frame, &mut out).unwrap();
            prop_assert_eq!(out[0].to_bits(), s.to_bits());
        }

        #[test]
        fn prop_int16_decode_error_bounded(s in -1.0f32..=1.0) {
            let decoded = decode_i16(encode_i16(s));
            prop_assert!((decoded - s).abs() <= 1.0 / 32767.0);
        }

        #[test]
        fn prop_any_float_never_panics(s in any::<f32>()) {
            let _ = encode_i8(s);
            let _ = encode_i16(s);
        }
    }
}
