//! Microphone capture
//!
//! The cpal stream lives on its own thread for the lifetime of the
//! capture; the callback downmixes, resamples to the wire rate, cuts fixed
//! blocks and reports each block's level and samples.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::bounded;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::{AudioFrame, BlockAccumulator};
use crate::audio::device::find_input_device;
use crate::audio::resample::{downmix, LinearResampler};
use crate::config::AudioConfig;
use crate::error::AudioError;

/// Receives every captured block
pub type FrameCallback = Box<dyn FnMut(AudioFrame) + Send>;

/// Receives the level of every captured block
pub type LevelCallback = Box<dyn FnMut(f32) + Send>;

/// Side channel for device loss; invoked at most once per capture
pub type DeviceLostCallback = Box<dyn FnOnce(AudioError) + Send>;

/// A running microphone stream.
pub trait CaptureSource: Send {
    /// Begin invoking the callbacks once per block.
    fn start(&mut self, on_frame: FrameCallback, on_level: LevelCallback) -> Result<(), AudioError>;

    /// Stop the stream and release the device. Idempotent.
    fn stop(&mut self);

    /// Register the device-loss side channel.
    fn on_device_lost(&mut self, callback: DeviceLostCallback);

    fn is_running(&self) -> bool;
}

/// Grants access to a microphone.
pub trait InputDevice: Send + Sync {
    /// Acquire the microphone, failing with `PermissionDenied` when access
    /// is refused or no device exists.
    fn acquire(&self) -> Result<Box<dyn CaptureSource>, AudioError>;
}

/// cpal-backed microphone provider
pub struct MicrophoneInput {
    config: AudioConfig,
}

impl MicrophoneInput {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }
}

impl InputDevice for MicrophoneInput {
    fn acquire(&self) -> Result<Box<dyn CaptureSource>, AudioError> {
        Ok(Box::new(MicrophoneCapture::open(&self.config)?))
    }
}

/// Per-callback processing state, owned by the stream callback
struct CaptureProcessor {
    running: Arc<AtomicBool>,
    channels: u16,
    target_rate: u32,
    resampler: LinearResampler,
    accumulator: BlockAccumulator,
    scratch: Vec<f32>,
    on_frame: FrameCallback,
    on_level: LevelCallback,
    blocks: Arc<AtomicU64>,
}

impl CaptureProcessor {
    fn process(&mut self, data: &[f32]) {
        if !self.running.load(Ordering::Relaxed) {
            return;
        }

        let mono = downmix(data, self.channels);
        self.scratch.clear();
        self.resampler.process(&mono, &mut self.scratch);

        let target_rate = self.target_rate;
        let on_frame = &mut self.on_frame;
        let on_level = &mut self.on_level;
        let blocks = &self.blocks;
        self.accumulator.push(&self.scratch, |block| {
            let frame = AudioFrame::new(block, target_rate);
            // Metering reflects physical input, independent of mute
            on_level(frame.level());
            on_frame(frame);
            blocks.fetch_add(1, Ordering::Relaxed);
        });
    }
}

/// Microphone capture on a cpal input device
pub struct MicrophoneCapture {
    device: Option<cpal::Device>,
    config: StreamConfig,
    sample_format: SampleFormat,
    target_rate: u32,
    block_size: usize,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    device_lost: Arc<Mutex<Option<DeviceLostCallback>>>,
    blocks: Arc<AtomicU64>,
}

impl MicrophoneCapture {
    /// Acquire the configured (or default) input device
    pub fn open(config: &AudioConfig) -> Result<Self, AudioError> {
        let device = find_input_device(config.input_device.as_deref())?;
        let default_config = device
            .default_input_config()
            .map_err(|e| AudioError::PermissionDenied(e.to_string()))?;

        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        tracing::debug!(
            "Acquired input device {} ({} Hz, {} ch, {:?})",
            name,
            default_config.sample_rate().0,
            default_config.channels(),
            default_config.sample_format()
        );

        Ok(Self {
            sample_format: default_config.sample_format(),
            config: default_config.into(),
            device: Some(device),
            target_rate: config.capture_sample_rate,
            block_size: config.block_size,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            device_lost: Arc::new(Mutex::new(None)),
            blocks: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Blocks delivered since start
    pub fn blocks_captured(&self) -> u64 {
        self.blocks.load(Ordering::Relaxed)
    }

    /// Native rate of the device stream
    pub fn device_sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }
}

impl CaptureSource for MicrophoneCapture {
    fn start(&mut self, on_frame: FrameCallback, on_level: LevelCallback) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        let device = self
            .device
            .take()
            .ok_or_else(|| AudioError::StreamError("capture already released".to_string()))?;

        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let running = self.running.clone();
        let running_for_loop = self.running.clone();
        let device_lost = self.device_lost.clone();
        let config = self.config.clone();
        let sample_format = self.sample_format;

        let mut processor = CaptureProcessor {
            running: self.running.clone(),
            channels: config.channels,
            target_rate: self.target_rate,
            resampler: LinearResampler::new(config.sample_rate.0, self.target_rate),
            accumulator: BlockAccumulator::new(self.block_size),
            scratch: Vec::new(),
            on_frame,
            on_level,
            blocks: self.blocks.clone(),
        };

        running.store(true, Ordering::SeqCst);

        let handle = thread::Builder::new()
            .name("voice-capture".to_string())
            .spawn(move || {
                let on_error = move |err: cpal::StreamError| match err {
                    cpal::StreamError::DeviceNotAvailable => {
                        if let Some(callback) = device_lost.lock().take() {
                            callback(AudioError::DeviceLost("input device disconnected".to_string()));
                        }
                    }
                    other => tracing::warn!("Input stream error: {}", other),
                };

                let stream = match sample_format {
                    SampleFormat::F32 => device.build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| processor.process(data),
                        on_error,
                        None,
                    ),
                    SampleFormat::I16 => device.build_input_stream(
                        &config,
                        move |data: &[i16], _: &cpal::InputCallbackInfo| {
                            let converted: Vec<f32> =
                                data.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
                            processor.process(&converted);
                        },
                        on_error,
                        None,
                    ),
                    other => {
                        let _ = ready_tx.send(Err(AudioError::UnsupportedFormat(format!("{:?}", other))));
                        return;
                    }
                };

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(cpal::BuildStreamError::DeviceNotAvailable) => {
                        let _ = ready_tx.send(Err(AudioError::PermissionDenied(
                            "input device not available".to_string(),
                        )));
                        return;
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep thread alive while running
                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }

                // Stream is dropped here, stopping capture
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::debug!(
                    "Capture started: device {} Hz resampled to {} Hz",
                    self.device_sample_rate(),
                    self.target_rate
                );
                Ok(())
            }
            Ok(Err(e)) => {
                self.stop();
                Err(e)
            }
            Err(_) => {
                self.stop();
                Err(AudioError::StreamError("capture thread exited".to_string()))
            }
        }
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.device_lost.lock().take();
        self.device.take();

        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            tracing::debug!("Capture stopped after {} blocks", self.blocks_captured());
        }
    }

    fn on_device_lost(&mut self, callback: DeviceLostCallback) {
        *self.device_lost.lock() = Some(callback);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn processor(
        channels: u16,
        device_rate: u32,
        frames: Arc<StdMutex<Vec<AudioFrame>>>,
        levels: Arc<StdMutex<Vec<f32>>>,
    ) -> CaptureProcessor {
        CaptureProcessor {
            running: Arc::new(AtomicBool::new(true)),
            channels,
            target_rate: 16_000,
            resampler: LinearResampler::new(device_rate, 16_000),
            accumulator: BlockAccumulator::new(512),
            scratch: Vec::new(),
            on_frame: Box::new(move |f| frames.lock().unwrap().push(f)),
            on_level: Box::new(move |l| levels.lock().unwrap().push(l)),
            blocks: Arc::new(AtomicU64::new(0)),
        }
    }

    #[test]
    fn test_processor_emits_blocks_at_target_rate() {
        let frames = Arc::new(StdMutex::new(Vec::new()));
        let levels = Arc::new(StdMutex::new(Vec::new()));
        let mut processor = processor(2, 48_000, frames.clone(), levels.clone());

        // 100 ms of stereo at 48 kHz in 10 ms callbacks -> 1600 mono samples at 16 kHz
        for _ in 0..10 {
            processor.process(&[0.5f32; 960]);
        }

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.len() == 512 && f.sample_rate == 16_000));
        assert_eq!(levels.lock().unwrap().len(), 3);
        assert_eq!(processor.blocks.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_processor_idle_when_stopped() {
        let frames = Arc::new(StdMutex::new(Vec::new()));
        let levels = Arc::new(StdMutex::new(Vec::new()));
        let mut processor = processor(1, 16_000, frames.clone(), levels.clone());
        processor.running.store(false, Ordering::SeqCst);

        processor.process(&[0.1f32; 2048]);
        assert!(frames.lock().unwrap().is_empty());
        assert!(levels.lock().unwrap().is_empty());
    }

    #[test]
    fn test_capture_stop_is_idempotent() {
        // Only runs where a microphone is present
        let Ok(mut capture) = MicrophoneCapture::open(&AudioConfig::default()) else {
            return;
        };
        capture.stop();
        capture.stop();
        assert!(!capture.is_running());
    }
}
