//! Session state machine
//!
//! ```text
//! Idle ──connect──▶ Connecting ──transport ready──▶ Open
//!                       │                            │
//!                       │                 disconnect / remote close / device lost
//!                       │                            ▼
//!                       │                         Closing ──▶ Closed
//!                       └──fail──▶ Error ◀──transport error──┘
//! Closed / Error ──connect──▶ Connecting
//! ```

use std::fmt;

/// States of one voice session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Never connected.
    #[default]
    Idle,

    /// Acquiring the microphone and waiting for the transport.
    Connecting,

    /// Audio flows in both directions.
    Open,

    /// Teardown in progress.
    Closing,

    /// Ended normally, or the device or remote side went away.
    Closed,

    /// Connect failed or the transport reported a fatal error.
    Error,
}

impl SessionState {
    /// `connect()` is a no-op in these states.
    ///
    /// ```
    /// use duplex_voice::SessionState;
    ///
    /// assert!(!SessionState::Idle.is_active());
    /// assert!(SessionState::Connecting.is_active());
    /// assert!(SessionState::Open.is_active());
    /// assert!(SessionState::Closing.is_active());
    /// assert!(!SessionState::Closed.is_active());
    /// assert!(!SessionState::Error.is_active());
    /// ```
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Open | SessionState::Closing
        )
    }

    /// Frames may only be captured and sent while open.
    pub fn can_send(&self) -> bool {
        *self == SessionState::Open
    }

    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Error => "error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
