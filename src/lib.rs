//! # Duplex Voice
//!
//! Real-time duplex voice sessions against a streaming language model:
//! the microphone is captured and streamed out while the model's spoken
//! replies are streamed back and played gap-free, with barge-in, muting
//! and volume metering.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                         SessionController (session)                      │
//! │                                                                          │
//! │  SEND PATH                                                               │
//! │  ┌─────────────┐   ┌──────────────┐   ┌──────────────┐   ┌────────────┐  │
//! │  │ Microphone  │──▶│CaptureSource │──▶│ PCM16 Encode │──▶│ Transport  │──┼──▶ model
//! │  │   (cpal)    │   │ mono 16 kHz  │   │   (codec)    │   │  Session   │  │
//! │  └─────────────┘   └──────┬───────┘   └──────────────┘   └─────┬──────┘  │
//! │                           │ level (also while muted)           │         │
//! │                           ▼                                    │         │
//! │                    on_input_volume                             │         │
//! │                                                                │         │
//! │  RECEIVE PATH                                                  ▼         │
//! │  ┌─────────────┐   ┌──────────────┐   ┌──────────────┐   ┌────────────┐  │
//! │  │  Speaker    │◀──│  CpalOutput  │◀──│  Playback    │◀──│ PCM16      │◀─┼─── model
//! │  │   (cpal)    │   │ mixer+clock  │   │  Scheduler   │   │ Decode     │  │
//! │  └─────────────┘   └──────────────┘   └──────▲───────┘   └────────────┘  │
//! │                                              │ interrupt (barge-in)      │
//! └──────────────────────────────────────────────┴───────────────────────────┘
//! ```
//!
//! Capture callbacks and transport events are funnelled into one task per
//! session and handled strictly in arrival order.

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{Error, Result};
pub use session::{SessionCallbacks, SessionController, SessionState};

/// Application-wide constants
pub mod constants {
    /// Sample rate of captured audio sent to the model
    pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

    /// Sample rate of model audio when the payload does not declare one
    pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

    /// Samples per capture block
    pub const CAPTURE_BLOCK_SIZE: usize = 512;

    /// Safety margin before the first item after the scheduler went idle
    pub const DEFAULT_LEAD_IN_MS: u32 = 50;

    /// How long a connect may wait for the backend's ready signal
    pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

    /// Mime type prefix of the fixed PCM16 wire format
    pub const PCM_MIME_PREFIX: &str = "audio/pcm";

    /// Default realtime endpoint
    pub const DEFAULT_ENDPOINT: &str = "ws://127.0.0.1:9000/realtime";

    /// Default model name announced in the setup message
    pub const DEFAULT_MODEL: &str = "voice-realtime";
}
