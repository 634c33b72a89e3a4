//! Float to PCM16 encoding

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::{BufMut, BytesMut};

use crate::audio::buffer::AudioFrame;
use crate::codec::EncodedPayload;

/// Encode a captured frame as mono PCM16 little-endian.
///
/// Samples outside [-1, 1] are clamped, NaN becomes silence. An empty frame
/// yields an empty payload.
pub fn encode(frame: &AudioFrame) -> EncodedPayload {
    let mut bytes = BytesMut::with_capacity(frame.samples.len() * 2);
    for &sample in &frame.samples {
        bytes.put_i16_le(float_to_i16(sample));
    }
    EncodedPayload::pcm(bytes.freeze(), frame.sample_rate)
}

/// Quantize one sample to signed 16 bits
#[inline]
pub fn float_to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

/// Base64 text for transports that need text framing
pub fn to_base64(payload: &EncodedPayload) -> String {
    STANDARD.encode(&payload.bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_little_endian_layout() {
        let frame = AudioFrame::new(vec![0.0, 1.0, -1.0], 16_000);
        let payload = encode(&frame);

        assert_eq!(payload.mime_type, "audio/pcm;rate=16000");
        assert_eq!(&payload.bytes[..], &[0x00, 0x00, 0xFF, 0x7F, 0x01, 0x80]);
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        assert_eq!(float_to_i16(3.5), i16::MAX);
        assert_eq!(float_to_i16(-7.0), -i16::MAX);
        assert_eq!(float_to_i16(f32::NAN), 0);
        assert_eq!(float_to_i16(f32::INFINITY), i16::MAX);
    }

    #[test]
    fn test_empty_frame() {
        let payload = encode(&AudioFrame::new(Vec::new(), 16_000));
        assert!(payload.is_empty());
        assert_eq!(to_base64(&payload), "");
    }

    #[test]
    fn test_base64_text_framing() {
        let frame = AudioFrame::new(vec![0.0, 1.0], 16_000);
        assert_eq!(to_base64(&encode(&frame)), "AAD/fw==");
    }
}
