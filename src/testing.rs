//! In-memory stand-ins for the microphone, backend and output clock

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use crate::audio::buffer::AudioFrame;
use crate::audio::capture::{CaptureSource, DeviceLostCallback, FrameCallback, InputDevice, LevelCallback};
use crate::audio::playback::{AudioOutput, ScheduledSource, SourceId};
use crate::codec::EncodedPayload;
use crate::constants::CAPTURE_SAMPLE_RATE;
use crate::error::{AudioError, TransportError};
use crate::transport::{EventSender, TransportBackend, TransportChannel, TransportEvent};

/// Output clock driven by the test
pub struct FakeOutput {
    now: Mutex<f64>,
    started: Mutex<Vec<ScheduledSource>>,
    stopped: Mutex<Vec<SourceId>>,
    epoch: AtomicU64,
}

impl FakeOutput {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(0.0),
            started: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, seconds: f64) {
        *self.now.lock() += seconds;
    }

    pub fn set_time(&self, seconds: f64) {
        *self.now.lock() = seconds;
    }

    pub fn started(&self) -> Vec<ScheduledSource> {
        self.started.lock().clone()
    }

    pub fn stopped(&self) -> Vec<SourceId> {
        self.stopped.lock().clone()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }
}

impl AudioOutput for FakeOutput {
    fn current_time(&self) -> f64 {
        *self.now.lock()
    }

    fn start_source(&self, source: ScheduledSource) {
        self.started.lock().push(source);
    }

    fn stop_source(&self, id: SourceId) {
        self.stopped.lock().push(id);
    }

    fn set_epoch(&self, epoch: u64) {
        self.epoch.store(epoch, Ordering::SeqCst);
    }
}

/// Backend whose remote side is driven by the test
pub struct FakeBackend {
    ready: bool,
    refusal: Option<String>,
    gate: Option<Arc<Notify>>,
    opens: AtomicUsize,
    events: Mutex<Option<EventSender>>,
    sent: Arc<Mutex<Vec<EncodedPayload>>>,
    closes: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            ready: true,
            refusal: None,
            gate: None,
            opens: AtomicUsize::new(0),
            events: Mutex::new(None),
            sent: Arc::new(Mutex::new(Vec::new())),
            closes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Open succeeds but `Ready` never arrives
    pub fn without_ready(mut self) -> Self {
        self.ready = false;
        self
    }

    /// Open fails with `ConnectFailed`
    pub fn refusing(mut self, reason: &str) -> Self {
        self.refusal = Some(reason.to_string());
        self
    }

    /// Open never completes
    pub fn gated(mut self) -> Self {
        self.gate = Some(Arc::new(Notify::new()));
        self
    }

    /// Push an event as if the remote side sent it
    pub fn emit(&self, event: TransportEvent) {
        if let Some(events) = self.events.lock().as_ref() {
            let _ = events.send(event);
        }
    }

    pub fn sent(&self) -> Vec<EncodedPayload> {
        self.sent.lock().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportBackend for FakeBackend {
    async fn open(&self, events: EventSender) -> Result<Box<dyn TransportChannel>, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if let Some(reason) = &self.refusal {
            return Err(TransportError::ConnectFailed(reason.clone()));
        }
        if self.ready {
            let _ = events.send(TransportEvent::Ready);
        }
        // Held so the event stream stays open
        *self.events.lock() = Some(events);

        Ok(Box::new(FakeChannel {
            closed: false,
            sent: self.sent.clone(),
            closes: self.closes.clone(),
        }))
    }
}

struct FakeChannel {
    closed: bool,
    sent: Arc<Mutex<Vec<EncodedPayload>>>,
    closes: Arc<AtomicUsize>,
}

impl TransportChannel for FakeChannel {
    fn send(&mut self, payload: EncodedPayload) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::NotOpen);
        }
        self.sent.lock().push(payload);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[derive(Default)]
struct MicState {
    running: bool,
    on_frame: Option<FrameCallback>,
    on_level: Option<LevelCallback>,
    device_lost: Option<DeviceLostCallback>,
}

/// Microphone fed by the test
#[derive(Default)]
pub struct FakeMic {
    deny: bool,
    acquired: AtomicUsize,
    shared: Arc<MicShared>,
}

#[derive(Default)]
struct MicShared {
    state: Mutex<MicState>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl FakeMic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every acquire fails with `PermissionDenied`
    pub fn denying() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    /// Deliver one block through the running capture, if any
    pub fn push(&self, samples: Vec<f32>) {
        let mut state = self.shared.state.lock();
        if !state.running {
            return;
        }
        let frame = AudioFrame::new(samples, CAPTURE_SAMPLE_RATE);
        if let Some(on_level) = state.on_level.as_mut() {
            on_level(frame.level());
        }
        if let Some(on_frame) = state.on_frame.as_mut() {
            on_frame(frame);
        }
    }

    /// Simulate the device disappearing mid-stream
    pub fn lose_device(&self) {
        let callback = self.shared.state.lock().device_lost.take();
        if let Some(callback) = callback {
            callback(AudioError::DeviceLost("unplugged".to_string()));
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    pub fn acquire_count(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn start_count(&self) -> usize {
        self.shared.starts.load(Ordering::SeqCst)
    }

    /// Captures released, counted once per capture
    pub fn stop_count(&self) -> usize {
        self.shared.stops.load(Ordering::SeqCst)
    }
}

impl InputDevice for FakeMic {
    fn acquire(&self) -> Result<Box<dyn CaptureSource>, AudioError> {
        if self.deny {
            return Err(AudioError::PermissionDenied("denied by user".to_string()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeCapture {
            shared: self.shared.clone(),
            released: AtomicBool::new(false),
        }))
    }
}

struct FakeCapture {
    shared: Arc<MicShared>,
    released: AtomicBool,
}

impl CaptureSource for FakeCapture {
    fn start(&mut self, on_frame: FrameCallback, on_level: LevelCallback) -> Result<(), AudioError> {
        let mut state = self.shared.state.lock();
        state.running = true;
        state.on_frame = Some(on_frame);
        state.on_level = Some(on_level);
        self.shared.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.shared.state.lock();
        state.running = false;
        state.on_frame = None;
        state.on_level = None;
        state.device_lost = None;
        self.shared.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn on_device_lost(&mut self, callback: DeviceLostCallback) {
        self.shared.state.lock().device_lost = Some(callback);
    }

    fn is_running(&self) -> bool {
        !self.released.load(Ordering::SeqCst) && self.shared.state.lock().running
    }
}

impl Drop for FakeCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
