//! PCM16 wire codec
//!
//! Converts captured float samples to the fixed mono PCM16 little-endian
//! wire format and back. Stateless; every function is pure.

pub mod decoder;
pub mod encoder;

pub use decoder::{decode, from_base64, mime_sample_rate};
pub use encoder::{encode, to_base64};

use bytes::Bytes;

use crate::constants::PCM_MIME_PREFIX;

/// Wire representation of one outbound frame or one inbound model chunk
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedPayload {
    /// PCM16 little-endian bytes
    pub bytes: Bytes,
    /// Mime descriptor, e.g. `audio/pcm;rate=16000`
    pub mime_type: String,
}

impl EncodedPayload {
    pub fn new(bytes: Bytes, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
        }
    }

    /// Payload tagged with the PCM mime descriptor for `sample_rate`
    pub fn pcm(bytes: Bytes, sample_rate: u32) -> Self {
        Self::new(bytes, pcm_mime(sample_rate))
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Mime descriptor identifying rate and encoding
pub fn pcm_mime(sample_rate: u32) -> String {
    format!("{};rate={}", PCM_MIME_PREFIX, sample_rate)
}
