//! Inference-time perturbations that produce the extra rows of a feature matrix.

use crate::dsp::{fix_length, resample, ResampleError, Stft};
use rand::Rng;
use rand_distr::StandardNormal;

pub const NOISE_SCALE: f32 = 0.035;
pub const STRETCH_RATE: f32 = 0.8;
pub const PITCH_STEPS: f32 = 1.0;
const BINS_PER_OCTAVE: f32 = 12.0;

/// Gaussian noise scaled to a random fraction of the peak magnitude.
pub fn add_noise<R: Rng>(samples: &[f32], rng: &mut R) -> Vec<f32> {
    let peak = samples.iter().fold(0.0f32, |m, &x| m.max(x.abs()));
    let amplitude = NOISE_SCALE * rng.random::<f32>() * peak;
    samples
        .iter()
        .map(|&x| {
            let n: f32 = rng.sample(StandardNormal);
            x + amplitude * n
        })
        .collect()
}

/// Phase-vocoder stretch; output has `round(len / rate)` samples.
pub fn time_stretch(stft: &Stft, samples: &[f32], rate: f32) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let spectrum = stft.forward(samples);
    let stretched = stft.phase_vocoder(&spectrum, rate);
    let length = (samples.len() as f64 / f64::from(rate)).round() as usize;
    stft.inverse(&stretched, length)
}

/// Shift pitch by `n_steps` semitones while keeping the length unchanged.
pub fn pitch_shift(
    stft: &Stft,
    samples: &[f32],
    sample_rate: u32,
    n_steps: f32,
) -> Result<Vec<f32>, ResampleError> {
    if samples.is_empty() {
        return Ok(Vec::new());
    }
    let rate = 2.0f32.powf(-n_steps / BINS_PER_OCTAVE);
    let stretched = time_stretch(stft, samples, rate);
    let sr = f64::from(sample_rate);
    let shifted = resample(&stretched, sr / f64::from(rate), sr)?;
    Ok(fix_length(shifted, samples.len()))
}
