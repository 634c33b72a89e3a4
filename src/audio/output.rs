//! Audio output to a cpal device
//!
//! The render callback owns a [`Mixer`] and receives commands over a
//! lock-free channel. Frames rendered so far are published through an
//! atomic and serve as the output clock for the playback scheduler.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::device::find_output_device;
use crate::audio::playback::{AudioOutput, ScheduledSource, SourceId};
use crate::audio::resample::interpolate;
use crate::error::AudioError;

/// Commands from the scheduler to the render callback
#[derive(Debug)]
pub enum MixerCommand {
    Start(ScheduledSource),
    Stop(SourceId),
    Epoch(u64),
}

struct MixerSource {
    id: SourceId,
    epoch: u64,
    start_frame: u64,
    end_frame: u64,
    /// Source samples advanced per output frame
    step: f64,
    samples: Vec<f32>,
}

/// Sample-accurate mixer of scheduled sources
pub struct Mixer {
    sample_rate: u32,
    frames_rendered: u64,
    epoch: u64,
    sources: Vec<MixerSource>,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames_rendered: 0,
            epoch: 0,
            sources: Vec::new(),
        }
    }

    pub fn apply(&mut self, command: MixerCommand) {
        match command {
            MixerCommand::Start(source) => self.start(source),
            MixerCommand::Stop(id) => self.sources.retain(|s| s.id != id),
            MixerCommand::Epoch(epoch) => self.set_epoch(epoch),
        }
    }

    fn start(&mut self, source: ScheduledSource) {
        if source.epoch < self.epoch {
            tracing::trace!("Dropping stale source {} from epoch {}", source.id, source.epoch);
            return;
        }

        let rate = self.sample_rate as f64;
        // Boundaries are rounded from absolute times so that back-to-back
        // sources share the exact same frame
        let start_frame = (source.start_time * rate).round() as u64;
        let end_frame = (source.end_time() * rate).round() as u64;
        if end_frame <= self.frames_rendered {
            return;
        }

        self.sources.push(MixerSource {
            id: source.id,
            epoch: source.epoch,
            start_frame,
            end_frame,
            step: source.item.sample_rate as f64 / rate,
            samples: source.item.samples,
        });
    }

    pub fn set_epoch(&mut self, epoch: u64) {
        self.epoch = self.epoch.max(epoch);
        let current = self.epoch;
        self.sources.retain(|s| s.epoch >= current);
    }

    /// Render interleaved output and advance the clock
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        out.fill(0.0);
        let channels = channels.max(1);
        let frames = (out.len() / channels) as u64;
        let first = self.frames_rendered;
        let last = first + frames;

        for source in &self.sources {
            let from = source.start_frame.max(first);
            let to = source.end_frame.min(last);
            for frame in from..to {
                let pos = (frame - source.start_frame) as f64 * source.step;
                let value = interpolate(&source.samples, pos);
                let offset = (frame - first) as usize * channels;
                for sample in &mut out[offset..offset + channels] {
                    *sample += value;
                }
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.frames_rendered = last;
        self.sources.retain(|s| s.end_frame > last);
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    /// Output clock in seconds
    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    pub fn active_sources(&self) -> usize {
        self.sources.len()
    }
}

/// Output stream on a cpal device
pub struct CpalOutput {
    sample_rate: u32,
    channels: u16,
    commands: Sender<MixerCommand>,
    frames_rendered: Arc<AtomicU64>,
    epoch: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl CpalOutput {
    /// Open the configured (or default) output device and start rendering
    pub fn open(device_name: Option<&str>) -> Result<Self, AudioError> {
        let device = find_output_device(device_name)?;
        let default_config = device
            .default_output_config()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
        let sample_format = default_config.sample_format();
        let config: StreamConfig = default_config.into();

        let sample_rate = config.sample_rate.0;
        let channels = config.channels;
        let (command_tx, command_rx) = unbounded::<MixerCommand>();
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);
        let frames_rendered = Arc::new(AtomicU64::new(0));
        let epoch = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));

        let mut renderer = Renderer {
            mixer: Mixer::new(sample_rate),
            commands: command_rx,
            epoch: epoch.clone(),
            frames_rendered: frames_rendered.clone(),
            channels: channels as usize,
            scratch: Vec::new(),
        };
        let running_for_loop = running.clone();

        let handle = thread::Builder::new()
            .name("voice-output".to_string())
            .spawn(move || {
                let on_error = |err: cpal::StreamError| tracing::warn!("Output stream error: {}", err);

                let stream = match sample_format {
                    SampleFormat::F32 => device.build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| renderer.render(data),
                        on_error,
                        None,
                    ),
                    SampleFormat::I16 => device.build_output_stream(
                        &config,
                        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| renderer.render_i16(data),
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

                while running_for_loop.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let output = Self {
            sample_rate,
            channels,
            commands: command_tx,
            frames_rendered,
            epoch,
            running,
            thread_handle: Mutex::new(Some(handle)),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::info!("Output stream started at {} Hz, {} ch", sample_rate, channels);
                Ok(output)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(AudioError::StreamError("output thread exited".to_string())),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Stop rendering and release the device. Idempotent.
    pub fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl AudioOutput for CpalOutput {
    fn current_time(&self) -> f64 {
        self.frames_rendered.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn start_source(&self, source: ScheduledSource) {
        let _ = self.commands.send(MixerCommand::Start(source));
    }

    fn stop_source(&self, id: SourceId) {
        let _ = self.commands.send(MixerCommand::Stop(id));
    }

    fn set_epoch(&self, epoch: u64) {
        // Visible to the next callback even before the command is drained
        self.epoch.fetch_max(epoch, Ordering::AcqRel);
        let _ = self.commands.send(MixerCommand::Epoch(epoch));
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

/// State owned by the render callback
struct Renderer {
    mixer: Mixer,
    commands: Receiver<MixerCommand>,
    epoch: Arc<AtomicU64>,
    frames_rendered: Arc<AtomicU64>,
    channels: usize,
    scratch: Vec<f32>,
}

impl Renderer {
    fn render(&mut self, data: &mut [f32]) {
        self.mixer.set_epoch(self.epoch.load(Ordering::Acquire));
        while let Ok(command) = self.commands.try_recv() {
            self.mixer.apply(command);
        }
        self.mixer.render(data, self.channels);
        self.frames_rendered
            .store(self.mixer.frames_rendered(), Ordering::Release);
    }

    fn render_i16(&mut self, data: &mut [i16]) {
        let mut scratch = std::mem::take(&mut self.scratch);
        scratch.resize(data.len(), 0.0);
        self.render(&mut scratch);
        for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
            *out = (sample * i16::MAX as f32) as i16;
        }
        self.scratch = scratch;
    }
}
