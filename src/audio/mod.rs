//! Audio subsystem module

pub mod buffer;
pub mod capture;
pub mod device;
pub mod output;
pub mod playback;
pub mod resample;

pub use buffer::{AudioFrame, BlockAccumulator, PlaybackItem};
pub use capture::{CaptureSource, InputDevice, MicrophoneCapture, MicrophoneInput};
pub use device::{list_devices, AudioDeviceInfo};
pub use output::{CpalOutput, Mixer};
pub use playback::{AudioOutput, PlaybackScheduler, ScheduledSource, SourceId};
