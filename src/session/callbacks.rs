//! UI-facing session callbacks

use crate::error::Error;
use crate::session::state::SessionState;

type StateFn = Box<dyn Fn(SessionState) + Send + Sync>;
type VolumeFn = Box<dyn Fn(f32) + Send + Sync>;
type ErrorFn = Box<dyn Fn(&Error) + Send + Sync>;
type CloseFn = Box<dyn Fn() + Send + Sync>;

/// Hooks invoked by the controller. All are optional.
///
/// Callbacks never run while the controller holds its internal lock, so
/// they may call back into the controller (for example `toggle_mute`).
/// Volume callbacks fire once per block and should return quickly.
#[derive(Default)]
pub struct SessionCallbacks {
    on_state: Option<StateFn>,
    on_input_volume: Option<VolumeFn>,
    on_output_volume: Option<VolumeFn>,
    on_error: Option<ErrorFn>,
    on_close: Option<CloseFn>,
}

impl SessionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every state transition
    pub fn on_state(mut self, f: impl Fn(SessionState) + Send + Sync + 'static) -> Self {
        self.on_state = Some(Box::new(f));
        self
    }

    /// Level of each captured block, reported even while muted
    pub fn on_input_volume(mut self, f: impl Fn(f32) + Send + Sync + 'static) -> Self {
        self.on_input_volume = Some(Box::new(f));
        self
    }

    /// Level of each decoded item, reported before it is scheduled
    pub fn on_output_volume(mut self, f: impl Fn(f32) + Send + Sync + 'static) -> Self {
        self.on_output_volume = Some(Box::new(f));
        self
    }

    /// Connect failures and fatal transport errors
    pub fn on_error(mut self, f: impl Fn(&Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    /// An open session ended, for whatever reason
    pub fn on_close(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Box::new(f));
        self
    }

    pub(crate) fn state(&self, state: SessionState) {
        if let Some(f) = &self.on_state {
            f(state);
        }
    }

    pub(crate) fn input_volume(&self, level: f32) {
        if let Some(f) = &self.on_input_volume {
            f(level);
        }
    }

    pub(crate) fn output_volume(&self, level: f32) {
        if let Some(f) = &self.on_output_volume {
            f(level);
        }
    }

    pub(crate) fn error(&self, error: &Error) {
        if let Some(f) = &self.on_error {
            f(error);
        }
    }

    pub(crate) fn close(&self) {
        if let Some(f) = &self.on_close {
            f();
        }
    }
}
