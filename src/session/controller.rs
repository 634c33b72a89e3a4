//! Session controller
//!
//! Owns the capture, transport and playback triad of one voice session.
//! Capture callbacks (audio thread) and transport events (network task)
//! are funnelled into a single pump task per session, which handles them
//! strictly one at a time: frames leave in the order captured, payloads
//! are scheduled in the order received, and an interrupt is applied before
//! any later payload is scheduled.
//!
//! Shared state sits behind one mutex. A generation counter identifies the
//! current session; a connect or pump from an older generation finds it
//! changed and backs out. User callbacks always run after the lock is
//! released.

use parking_lot::Mutex;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::audio::buffer::AudioFrame;
use crate::audio::capture::{CaptureSource, InputDevice};
use crate::audio::playback::{AudioOutput, PlaybackScheduler};
use crate::codec::{decode, encode, EncodedPayload};
use crate::config::AppConfig;
use crate::constants::*;
use crate::error::{AudioError, Error, Result, TransportError};
use crate::session::callbacks::SessionCallbacks;
use crate::session::state::SessionState;
use crate::transport::{EventReceiver, TransportBackend, TransportEvent, TransportSession};

/// Per-session tunables
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Rate assumed for inbound audio without a declared rate
    pub playback_sample_rate: u32,
    pub lead_in: Duration,
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            lead_in: Duration::from_millis(DEFAULT_LEAD_IN_MS as u64),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }
}

impl From<&AppConfig> for SessionConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            playback_sample_rate: config.playback.sample_rate,
            lead_in: config.playback.lead_in(),
            connect_timeout: config.transport.connect_timeout(),
        }
    }
}

/// Counters for the current (or last) session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    pub frames_captured: u64,
    pub frames_sent: u64,
    /// Captured while muted and not sent
    pub frames_muted: u64,
    pub payloads_received: u64,
    /// Inbound payloads that failed to decode
    pub payloads_dropped: u64,
    pub interrupts: u64,
}

#[derive(Default)]
struct Counters {
    frames_captured: AtomicU64,
    frames_sent: AtomicU64,
    frames_muted: AtomicU64,
    payloads_received: AtomicU64,
    payloads_dropped: AtomicU64,
    interrupts: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SessionStats {
        SessionStats {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_muted: self.frames_muted.load(Ordering::Relaxed),
            payloads_received: self.payloads_received.load(Ordering::Relaxed),
            payloads_dropped: self.payloads_dropped.load(Ordering::Relaxed),
            interrupts: self.interrupts.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.frames_captured,
            &self.frames_sent,
            &self.frames_muted,
            &self.payloads_received,
            &self.payloads_dropped,
            &self.interrupts,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Capture side events, forwarded from the audio thread
enum CaptureEvent {
    Frame(AudioFrame),
    Level(f32),
    DeviceLost(AudioError),
}

/// How an open session ended
enum Ending {
    Disconnected,
    RemoteClosed,
    DeviceLost,
    Failed(Error),
}

/// Resources of an open session
struct Live {
    capture: Box<dyn CaptureSource>,
    transport: TransportSession,
    scheduler: PlaybackScheduler,
    shutdown: oneshot::Sender<()>,
}

impl Live {
    /// Close transport, stop capture, silence playback, stop the pump.
    fn release(mut self) {
        self.transport.close();
        self.capture.stop();
        self.scheduler.stop_all();
        let _ = self.shutdown.send(());
    }
}

/// Everything `open` acquired, not yet committed
struct Opened {
    live: Live,
    events: EventReceiver,
    captured: mpsc::UnboundedReceiver<CaptureEvent>,
    shutdown: oneshot::Receiver<()>,
}

struct Core {
    state: SessionState,
    generation: u64,
    session_id: Option<Uuid>,
    muted: bool,
    /// Mute requested while not open; applied at the open transition
    pending_mute: Option<bool>,
    callbacks: Option<Arc<SessionCallbacks>>,
    /// Fired by `disconnect()` to abort an in-flight connect
    cancel: Option<oneshot::Sender<()>>,
    live: Option<Live>,
}

impl Core {
    /// The open session of `generation`, if it is still the current one
    fn live_for(&mut self, generation: u64) -> Option<&mut Live> {
        if self.generation != generation || !self.state.can_send() {
            return None;
        }
        self.live.as_mut()
    }
}

struct Inner {
    config: SessionConfig,
    input: Arc<dyn InputDevice>,
    backend: Arc<dyn TransportBackend>,
    output: Arc<dyn AudioOutput>,
    core: Mutex<Core>,
    counters: Counters,
}

/// Real-time duplex voice session
///
/// ```no_run
/// use std::sync::Arc;
/// use duplex_voice::audio::{CpalOutput, MicrophoneInput};
/// use duplex_voice::config::AppConfig;
/// use duplex_voice::session::SessionConfig;
/// use duplex_voice::transport::WebSocketBackend;
/// use duplex_voice::{SessionCallbacks, SessionController};
///
/// # async fn run() -> duplex_voice::Result<()> {
/// let config = AppConfig::load()?;
/// let controller = SessionController::new(
///     SessionConfig::from(&config),
///     Arc::new(MicrophoneInput::new(config.audio.clone())),
///     Arc::new(WebSocketBackend::new(config.transport.clone())),
///     Arc::new(CpalOutput::open(config.audio.output_device.as_deref())?),
/// );
///
/// controller
///     .connect(SessionCallbacks::new().on_close(|| println!("closed")))
///     .await?;
/// controller.toggle_mute(true);
/// controller.disconnect();
/// # Ok(())
/// # }
/// ```
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        input: Arc<dyn InputDevice>,
        backend: Arc<dyn TransportBackend>,
        output: Arc<dyn AudioOutput>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                input,
                backend,
                output,
                core: Mutex::new(Core {
                    state: SessionState::Idle,
                    generation: 0,
                    session_id: None,
                    muted: false,
                    pending_mute: None,
                    callbacks: None,
                    cancel: None,
                    live: None,
                }),
                counters: Counters::default(),
            }),
        }
    }

    /// Acquire the microphone, open the transport and start both pipelines.
    ///
    /// Resolves once the session is open. A no-op while a session is
    /// connecting, open or closing. On failure the microphone is released,
    /// the state is left at `Error` and `on_error` fires. Returns
    /// [`Error::Cancelled`] if `disconnect()` ran while connecting.
    pub async fn connect(&self, callbacks: SessionCallbacks) -> Result<()> {
        let callbacks = Arc::new(callbacks);
        let (cancel, cancelled) = oneshot::channel();
        let generation = {
            let mut core = self.inner.core.lock();
            if core.state.is_active() {
                tracing::debug!("connect() ignored while {}", core.state);
                return Ok(());
            }
            core.generation += 1;
            core.state = SessionState::Connecting;
            core.muted = false;
            core.callbacks = Some(callbacks.clone());
            core.cancel = Some(cancel);
            core.generation
        };
        self.inner.counters.reset();
        callbacks.state(SessionState::Connecting);

        match self.inner.open(generation, cancelled).await {
            Ok(opened) => Inner::commit(&self.inner, generation, opened, callbacks),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => self.inner.fail(generation, e, &callbacks),
        }
    }

    /// Stop sending captured frames without stopping capture.
    ///
    /// Before the session is open the request is queued and applied at the
    /// moment the send path starts.
    pub fn toggle_mute(&self, muted: bool) {
        let mut core = self.inner.core.lock();
        if core.state == SessionState::Open {
            core.muted = muted;
            core.pending_mute = None;
        } else {
            core.pending_mute = Some(muted);
        }
        tracing::debug!("Mute {}", if muted { "on" } else { "off" });
    }

    pub fn is_muted(&self) -> bool {
        let core = self.inner.core.lock();
        match core.pending_mute {
            Some(muted) if core.state != SessionState::Open => muted,
            _ => core.muted,
        }
    }

    /// End the session. Idempotent, and safe while `connect()` is in flight.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    pub fn state(&self) -> SessionState {
        self.inner.core.lock().state
    }

    pub fn stats(&self) -> SessionStats {
        self.inner.counters.snapshot()
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.inner.disconnect();
    }
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.core.lock().generation == generation
    }

    /// Acquire capture and transport for `generation`.
    ///
    /// `cancelled` resolves when `disconnect()` abandons this connect; the
    /// microphone and any half-open channel are released right away.
    async fn open(&self, generation: u64, mut cancelled: oneshot::Receiver<()>) -> Result<Opened> {
        let mut capture = self.input.acquire()?;

        let mut transport = TransportSession::new(self.config.connect_timeout);
        let connected = tokio::select! {
            result = transport.connect(self.backend.as_ref()) => Some(result),
            _ = &mut cancelled => None,
        };
        let events = match connected {
            Some(Ok(events)) => events,
            Some(Err(e)) => {
                capture.stop();
                return Err(e.into());
            }
            None => {
                tracing::debug!("Connect {} cancelled while waiting for the transport", generation);
                transport.close();
                capture.stop();
                return Err(Error::Cancelled);
            }
        };

        if !self.is_current(generation) {
            tracing::debug!("Connect {} cancelled, releasing", generation);
            transport.close();
            capture.stop();
            return Err(Error::Cancelled);
        }

        let (capture_tx, captured) = mpsc::unbounded_channel();
        let frames = capture_tx.clone();
        let levels = capture_tx.clone();
        capture.on_device_lost(Box::new(move |e| {
            let _ = capture_tx.send(CaptureEvent::DeviceLost(e));
        }));
        let started = capture.start(
            Box::new(move |frame| {
                let _ = frames.send(CaptureEvent::Frame(frame));
            }),
            Box::new(move |level| {
                let _ = levels.send(CaptureEvent::Level(level));
            }),
        );
        if let Err(e) = started {
            transport.close();
            capture.stop();
            return Err(e.into());
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        Ok(Opened {
            live: Live {
                capture,
                transport,
                scheduler: PlaybackScheduler::new(self.output.clone(), self.config.lead_in),
                shutdown,
            },
            events,
            captured,
            shutdown: shutdown_rx,
        })
    }

    /// Publish an opened session and start its pump
    fn commit(
        self: &Arc<Self>,
        generation: u64,
        opened: Opened,
        callbacks: Arc<SessionCallbacks>,
    ) -> Result<()> {
        let Opened {
            live,
            events,
            captured,
            shutdown,
        } = opened;

        let session_id = {
            let mut core = self.core.lock();
            if core.generation != generation {
                drop(core);
                live.release();
                return Err(Error::Cancelled);
            }
            core.cancel = None;
            // Muting and the open transition happen together
            core.muted = core.pending_mute.take().unwrap_or(false);
            core.live = Some(live);
            core.state = SessionState::Open;
            let id = Uuid::new_v4();
            core.session_id = Some(id);
            id
        };

        tracing::info!("Session {} open", session_id);
        callbacks.state(SessionState::Open);
        tokio::spawn(pump(self.clone(), generation, callbacks, events, captured, shutdown));
        Ok(())
    }

    /// Record a connect failure for `generation`
    fn fail(&self, generation: u64, error: Error, callbacks: &SessionCallbacks) -> Result<()> {
        {
            let mut core = self.core.lock();
            if core.generation != generation {
                return Err(Error::Cancelled);
            }
            core.cancel = None;
            core.state = SessionState::Error;
        }
        tracing::error!("Connect failed: {}", error);
        callbacks.state(SessionState::Error);
        callbacks.error(&error);
        Err(error)
    }

    fn disconnect(&self) {
        let mut core = self.core.lock();
        let state = core.state;
        match state {
            SessionState::Connecting => {
                // The in-flight connect is woken and releases what it
                // acquired
                core.generation += 1;
                core.state = SessionState::Closed;
                if let Some(cancel) = core.cancel.take() {
                    let _ = cancel.send(());
                }
                let callbacks = core.callbacks.clone();
                drop(core);
                tracing::info!("Connect abandoned");
                if let Some(callbacks) = callbacks {
                    callbacks.state(SessionState::Closed);
                }
            }
            SessionState::Open => {
                let generation = core.generation;
                drop(core);
                self.end(generation, Ending::Disconnected);
            }
            _ => tracing::debug!("disconnect() ignored while {}", state),
        }
    }

    /// Tear down the open session of `generation`. Only the first caller
    /// for a given session does anything.
    fn end(&self, generation: u64, ending: Ending) {
        let (live, callbacks) = {
            let mut core = self.core.lock();
            if core.generation != generation || core.state != SessionState::Open {
                return;
            }
            // Stop sending first
            core.state = SessionState::Closing;
            core.muted = false;
            (core.live.take(), core.callbacks.clone())
        };
        if let Some(callbacks) = &callbacks {
            callbacks.state(SessionState::Closing);
        }

        if let Some(live) = live {
            live.release();
        }

        let final_state = match ending {
            Ending::Failed(_) => SessionState::Error,
            _ => SessionState::Closed,
        };
        let session_id = {
            let mut core = self.core.lock();
            core.state = final_state;
            core.session_id.take()
        };

        let stats = self.counters.snapshot();
        let id = session_id.map(|id| id.to_string()).unwrap_or_default();
        match &ending {
            Ending::Disconnected => tracing::info!("Session {} disconnected", id),
            Ending::RemoteClosed => tracing::info!("Session {} closed by remote", id),
            Ending::DeviceLost => tracing::warn!("Session {} ended: input device lost", id),
            Ending::Failed(e) => tracing::error!("Session {} failed: {}", id, e),
        }
        tracing::debug!(
            "Session {}: {} frames captured, {} sent, {} muted, {} payloads received, {} dropped, {} interrupts",
            id,
            stats.frames_captured,
            stats.frames_sent,
            stats.frames_muted,
            stats.payloads_received,
            stats.payloads_dropped,
            stats.interrupts
        );

        if let Some(callbacks) = callbacks {
            callbacks.state(final_state);
            if let Ending::Failed(error) = &ending {
                callbacks.error(error);
            }
            callbacks.close();
        }
    }

    fn on_transport_event(
        &self,
        generation: u64,
        callbacks: &SessionCallbacks,
        event: TransportEvent,
    ) -> ControlFlow<()> {
        match event {
            TransportEvent::Ready => {}
            TransportEvent::Payload(payload) => self.play(generation, callbacks, payload),
            TransportEvent::Interrupted => {
                let mut core = self.core.lock();
                if let Some(live) = core.live_for(generation) {
                    live.scheduler.interrupt();
                    Counters::bump(&self.counters.interrupts);
                }
            }
            TransportEvent::Closed => {
                // Already gone on the remote side; nothing left to close
                if let Some(live) = self.core.lock().live_for(generation) {
                    live.transport.mark_closed();
                }
                self.end(generation, Ending::RemoteClosed);
                return ControlFlow::Break(());
            }
            TransportEvent::Error(reason) => {
                if let Some(live) = self.core.lock().live_for(generation) {
                    live.transport.mark_error();
                }
                self.end(generation, Ending::Failed(TransportError::Backend(reason).into()));
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn on_capture_event(
        &self,
        generation: u64,
        callbacks: &SessionCallbacks,
        event: CaptureEvent,
    ) -> ControlFlow<()> {
        match event {
            CaptureEvent::Level(level) => callbacks.input_volume(level),
            CaptureEvent::Frame(frame) => self.send_frame(generation, frame),
            CaptureEvent::DeviceLost(e) => {
                tracing::warn!("{}", e);
                self.end(generation, Ending::DeviceLost);
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn send_frame(&self, generation: u64, frame: AudioFrame) {
        Counters::bump(&self.counters.frames_captured);

        let mut core = self.core.lock();
        let muted = core.muted;
        let Some(live) = core.live_for(generation) else {
            return;
        };
        if muted {
            Counters::bump(&self.counters.frames_muted);
            return;
        }
        match live.transport.send(encode(&frame)) {
            Ok(()) => Counters::bump(&self.counters.frames_sent),
            Err(e) => tracing::warn!("Failed to send frame: {}", e),
        }
    }

    fn play(&self, generation: u64, callbacks: &SessionCallbacks, payload: EncodedPayload) {
        Counters::bump(&self.counters.payloads_received);

        let item = match decode(&payload, self.config.playback_sample_rate) {
            Ok(item) => item,
            Err(e) => {
                tracing::warn!("Dropping inbound payload: {}", e);
                Counters::bump(&self.counters.payloads_dropped);
                return;
            }
        };

        let level = item.level();
        {
            let mut core = self.core.lock();
            let Some(live) = core.live_for(generation) else {
                return;
            };
            live.scheduler.enqueue(item);
        }
        callbacks.output_volume(level);
    }
}

/// Event loop of one open session
async fn pump(
    inner: Arc<Inner>,
    generation: u64,
    callbacks: Arc<SessionCallbacks>,
    mut events: EventReceiver,
    mut captured: mpsc::UnboundedReceiver<CaptureEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    loop {
        // Teardown wins over anything still queued
        match shutdown.try_recv() {
            Err(TryRecvError::Empty) => {}
            _ => break,
        }
        let step = tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => {
                // A vanished backend is a remote close
                let event = event.unwrap_or(TransportEvent::Closed);
                inner.on_transport_event(generation, &callbacks, event)
            }
            Some(event) = captured.recv() => inner.on_capture_event(generation, &callbacks, event),
        };
        if step.is_break() {
            break;
        }
    }
    tracing::debug!("Session pump {} finished", generation);
}
