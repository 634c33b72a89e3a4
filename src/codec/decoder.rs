//! PCM16 to float decoding

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;

use crate::audio::buffer::PlaybackItem;
use crate::codec::EncodedPayload;
use crate::error::CodecError;

/// Decode a PCM16 payload into a playback item.
///
/// The rate declared by the payload's mime type wins over `sample_rate`.
/// Rate conversion to the output device happens at render time.
pub fn decode(payload: &EncodedPayload, sample_rate: u32) -> Result<PlaybackItem, CodecError> {
    if payload.bytes.len() % 2 != 0 {
        return Err(CodecError::OddLength(payload.bytes.len()));
    }

    let rate = mime_sample_rate(&payload.mime_type).unwrap_or(sample_rate);
    if rate == 0 {
        return Err(CodecError::InvalidSampleRate(rate));
    }

    let samples = payload
        .bytes
        .chunks_exact(2)
        .map(|pair| i16_to_float(i16::from_le_bytes([pair[0], pair[1]])))
        .collect();

    Ok(PlaybackItem::new(samples, rate))
}

#[inline]
pub fn i16_to_float(value: i16) -> f32 {
    (value as f32 / i16::MAX as f32).max(-1.0)
}

/// Parse the `rate=` parameter of a PCM mime descriptor
pub fn mime_sample_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse().ok())
}

/// Decode a base64 text frame
pub fn from_base64(data: &str, mime_type: &str) -> Result<EncodedPayload, CodecError> {
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| CodecError::InvalidBase64(e.to_string()))?;
    Ok(EncodedPayload::new(Bytes::from(bytes), mime_type))
}
