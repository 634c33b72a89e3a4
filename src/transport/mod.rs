//! Bidirectional streaming transport
//!
//! [`TransportBackend`] opens the vendor channel; [`TransportSession`]
//! wraps it in the connection state machine:
//!
//! ```text
//! Idle ──connect──▶ Connecting ──ready──▶ Open ──close──▶ Closing ──▶ Closed
//!                        │                  │
//!                        └──fail/timeout──▶ Error ◀──backend error──┘
//! ```

pub mod websocket;

pub use websocket::WebSocketBackend;

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::codec::EncodedPayload;
use crate::error::TransportError;

/// Events pushed by the backend
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The backend accepted the session
    Ready,
    /// A chunk of model audio
    Payload(EncodedPayload),
    /// The remote side asks local playback to stop now
    Interrupted,
    /// The remote side closed the session
    Closed,
    /// The backend reported a failure
    Error(String),
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Opens channels to a streaming backend
#[async_trait]
pub trait TransportBackend: Send + Sync {
    /// Open a channel. Events, starting with `Ready`, go to `events`.
    async fn open(&self, events: EventSender) -> Result<Box<dyn TransportChannel>, TransportError>;
}

/// The send half of an open channel
pub trait TransportChannel: Send {
    /// Enqueue a payload; never blocks
    fn send(&mut self, payload: EncodedPayload) -> Result<(), TransportError>;

    /// Request an orderly shutdown. Idempotent.
    fn close(&mut self);
}

/// Connection states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Error,
}

impl TransportState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportState::Closed | TransportState::Error)
    }
}

/// One connection attempt and its lifetime
pub struct TransportSession {
    state: TransportState,
    channel: Option<Box<dyn TransportChannel>>,
    connect_timeout: Duration,
    frames_sent: u64,
}

impl TransportSession {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            state: TransportState::Idle,
            channel: None,
            connect_timeout,
            frames_sent: 0,
        }
    }

    /// Open the channel and wait for the backend's ready signal.
    ///
    /// Returns the receiver for all events after `Ready`. If the future is
    /// dropped while waiting for `Ready`, the half-open channel stays with
    /// the session and is released by [`TransportSession::close`].
    pub async fn connect(&mut self, backend: &dyn TransportBackend) -> Result<EventReceiver, TransportError> {
        if self.state != TransportState::Idle {
            return Err(TransportError::ConnectFailed(format!(
                "cannot connect from state {:?}",
                self.state
            )));
        }
        self.state = TransportState::Connecting;

        let deadline = tokio::time::Instant::now() + self.connect_timeout;
        let (tx, mut rx) = mpsc::unbounded_channel();

        match tokio::time::timeout_at(deadline, backend.open(tx)).await {
            Ok(Ok(channel)) => self.channel = Some(channel),
            Ok(Err(e)) => return Err(self.fail(e)),
            Err(_) => return Err(self.fail(TransportError::ConnectTimeout(self.connect_timeout))),
        }

        let ready = tokio::time::timeout_at(deadline, async {
            loop {
                match rx.recv().await {
                    Some(TransportEvent::Ready) => return Ok(()),
                    Some(TransportEvent::Error(reason)) => return Err(TransportError::ConnectFailed(reason)),
                    Some(TransportEvent::Closed) | None => {
                        return Err(TransportError::ConnectFailed("closed before ready".to_string()))
                    }
                    Some(other) => tracing::debug!("Ignoring {:?} before ready", other),
                }
            }
        })
        .await;

        match ready {
            Ok(Ok(())) => {
                self.state = TransportState::Open;
                tracing::debug!("Transport open");
                Ok(rx)
            }
            Ok(Err(e)) => Err(self.fail(e)),
            Err(_) => Err(self.fail(TransportError::ConnectTimeout(self.connect_timeout))),
        }
    }

    fn fail(&mut self, error: TransportError) -> TransportError {
        tracing::debug!("Transport connect failed: {}", error);
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.state = TransportState::Error;
        error
    }

    /// Fire-and-forget send; only valid while open
    pub fn send(&mut self, payload: EncodedPayload) -> Result<(), TransportError> {
        match (self.state, self.channel.as_mut()) {
            (TransportState::Open, Some(channel)) => {
                channel.send(payload)?;
                self.frames_sent += 1;
                Ok(())
            }
            _ => Err(TransportError::NotOpen),
        }
    }

    /// Orderly shutdown. Idempotent; never fails.
    pub fn close(&mut self) {
        if self.state.is_terminal() && self.channel.is_none() {
            return;
        }
        if self.state != TransportState::Error {
            self.state = TransportState::Closing;
        }
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        if self.state == TransportState::Closing {
            self.state = TransportState::Closed;
        }
    }

    /// The remote side closed the channel
    pub fn mark_closed(&mut self) {
        self.channel.take();
        if !self.state.is_terminal() {
            self.state = TransportState::Closed;
        }
    }

    /// The backend reported a failure
    pub fn mark_error(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        if !self.state.is_terminal() {
            self.state = TransportState::Error;
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }
}
