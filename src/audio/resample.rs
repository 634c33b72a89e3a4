//! Channel downmix and sample-rate conversion.
//!
//! Capture devices run at whatever rate and channel count the host offers;
//! the wire format is mono at a fixed rate. [`downmix`] averages channels
//! and [`LinearResampler`] converts the rate across callback boundaries
//! without resetting its phase. [`interpolate`] is the same linear kernel,
//! used by the output mixer to read model audio at the device rate.

/// Mix interleaved multi-channel audio down to mono by averaging channels.
pub fn downmix(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Linearly interpolated sample at fractional position `pos`.
///
/// Positions past the end return silence.
#[inline]
pub fn interpolate(samples: &[f32], pos: f64) -> f32 {
    let idx = pos as usize;
    if idx >= samples.len() {
        return 0.0;
    }
    let frac = (pos - idx as f64) as f32;
    match samples.get(idx + 1) {
        Some(&next) if frac > 0.0 => samples[idx] * (1.0 - frac) + next * frac,
        _ => samples[idx],
    }
}

/// Streaming linear resampler.
///
/// Keeps the last input sample and the fractional read position between
/// calls, so consecutive chunks resample as one continuous signal.
pub struct LinearResampler {
    from_rate: u32,
    to_rate: u32,
    step: f64,
    /// Read position; index 0 is `prev`, index i > 0 is `input[i - 1]`
    pos: f64,
    prev: f32,
}

impl LinearResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        let step = if to_rate == 0 {
            1.0
        } else {
            from_rate as f64 / to_rate as f64
        };
        Self {
            from_rate,
            to_rate,
            step,
            pos: 1.0,
            prev: 0.0,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate
    }

    /// Resample `input`, appending the result to `output`
    pub fn process(&mut self, input: &[f32], output: &mut Vec<f32>) {
        if self.is_passthrough() {
            output.extend_from_slice(input);
            return;
        }
        if input.is_empty() {
            return;
        }

        let last = input.len() as f64;
        let prev = self.prev;
        let at = |i: usize| if i == 0 { prev } else { input[i - 1] };

        while self.pos < last {
            let idx = self.pos as usize;
            let frac = (self.pos - idx as f64) as f32;
            let sample = if frac > 0.0 {
                at(idx) * (1.0 - frac) + at(idx + 1) * frac
            } else {
                at(idx)
            };
            output.push(sample);
            self.pos += self.step;
        }

        self.pos -= last;
        self.prev = input[input.len() - 1];
    }
}
