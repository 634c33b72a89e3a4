//! Voice session orchestration

pub mod callbacks;
pub mod controller;
pub mod state;

pub use callbacks::SessionCallbacks;
pub use controller::{SessionConfig, SessionController, SessionStats};
pub use state::SessionState;
