//! Per-chunk acoustic feature vectors.
//!
//! A chunk becomes three rows: the clean signal, a noisy copy, and a
//! stretched-then-pitched copy. Each row concatenates the frame means of
//! zero-crossing rate, chroma, MFCC, RMS energy and mel band energy.

mod augment;

use crate::dsp::{
    chroma_filterbank, dct_ortho_matrix, estimate_tuning, frame_signal, mel_filterbank,
    power_to_db, PadMode, ResampleError, Stft, HOP_LENGTH, N_FFT,
};
use ndarray::{Array1, Array2, Axis};
use rand::Rng;

pub use augment::{add_noise, pitch_shift, time_stretch, NOISE_SCALE, PITCH_STEPS, STRETCH_RATE};

pub const N_CHROMA: usize = 12;
pub const N_MFCC: usize = 20;
pub const N_MELS: usize = 128;
pub const FEATURE_WIDTH: usize = 1 + N_CHROMA + N_MFCC + 1 + N_MELS;
pub const ROWS_PER_CHUNK: usize = 3;

const ZERO_CROSSING_THRESHOLD: f32 = 1e-10;
const DB_AMIN: f32 = 1e-10;
const DB_TOP: f32 = 80.0;

/// Rows are original, noise, stretch+pitch.
pub type FeatureMatrix = Array2<f32>;

#[derive(thiserror::Error, Debug)]
pub enum FeatureError {
    #[error("no audio samples to analyse")]
    EmptySignal,
    #[error("augmentation failed: {0}")]
    Augment(#[from] ResampleError),
    #[error("feature vector contains non-finite values")]
    NonFinite,
    #[error("feature matrix shape: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, FeatureError>;

#[derive(Debug, Clone)]
pub struct FeatureExtractor {
    sample_rate: u32,
    stft: Stft,
    mel_basis: Array2<f32>,
    /// Chroma weights at zero tuning deviation.
    chroma_basis: Array2<f32>,
    dct: Array2<f32>,
}

impl FeatureExtractor {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            stft: Stft::new(N_FFT, HOP_LENGTH),
            mel_basis: mel_filterbank(
                sample_rate,
                N_FFT,
                N_MELS,
                0.0,
                f64::from(sample_rate) / 2.0,
            ),
            chroma_basis: chroma_filterbank(sample_rate, N_FFT, N_CHROMA, 0.0),
            dct: dct_ortho_matrix(N_MFCC, N_MELS),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// One `FEATURE_WIDTH` vector; a pure function of `samples`.
    ///
    /// Any non-empty signal works: frames are centered and zero-padded, so
    /// even a handful of samples yields one frame.
    pub fn extract(&self, samples: &[f32]) -> Result<Vec<f32>> {
        if samples.is_empty() {
            return Err(FeatureError::EmptySignal);
        }

        let magnitude = self.stft.forward(samples).mapv(|c| c.norm());
        let power = magnitude.mapv(|m| m * m);

        let mel = self.mel_basis.dot(&power);
        let mfcc = self.dct.dot(&power_to_db(&mel, DB_AMIN, DB_TOP));

        let mut features = Vec::with_capacity(FEATURE_WIDTH);
        features.push(zero_crossing_rate(samples));
        features.extend(frame_mean(&self.chroma(&magnitude)));
        features.extend(frame_mean(&mfcc));
        features.push(rms_energy(samples));
        features.extend(frame_mean(&mel));

        if features.iter().any(|v| !v.is_finite()) {
            return Err(FeatureError::NonFinite);
        }
        debug_assert_eq!(features.len(), FEATURE_WIDTH);
        Ok(features)
    }

    /// The 3 x `FEATURE_WIDTH` matrix for one chunk.
    pub fn extract_augmented<R: Rng>(&self, samples: &[f32], rng: &mut R) -> Result<FeatureMatrix> {
        let original = self.extract(samples)?;

        let noisy = add_noise(samples, rng);
        let with_noise = self.extract(&noisy)?;

        let stretched = time_stretch(&self.stft, samples, STRETCH_RATE);
        let pitched = pitch_shift(&self.stft, &stretched, self.sample_rate, PITCH_STEPS)?;
        let with_pitch = self.extract(&pitched)?;

        let mut flat = Vec::with_capacity(ROWS_PER_CHUNK * FEATURE_WIDTH);
        flat.extend(original);
        flat.extend(with_noise);
        flat.extend(with_pitch);
        Ok(Array2::from_shape_vec((ROWS_PER_CHUNK, FEATURE_WIDTH), flat)?)
    }

    fn chroma(&self, magnitude: &Array2<f32>) -> Array2<f32> {
        let tuning = estimate_tuning(magnitude, self.sample_rate, N_FFT, N_CHROMA);
        let mut chroma = if tuning == 0.0 {
            self.chroma_basis.dot(magnitude)
        } else {
            chroma_filterbank(self.sample_rate, N_FFT, N_CHROMA, tuning).dot(magnitude)
        };
        for mut column in chroma.columns_mut() {
            let peak = column.iter().fold(0.0f32, |m, &x| m.max(x.abs()));
            if peak > f32::MIN_POSITIVE {
                column.mapv_inplace(|x| x / peak);
            }
        }
        chroma
    }
}

fn frame_mean(values: &Array2<f32>) -> Array1<f32> {
    values
        .mean_axis(Axis(1))
        .unwrap_or_else(|| Array1::zeros(values.nrows()))
}

fn zero_crossing_rate(samples: &[f32]) -> f32 {
    let frames = frame_signal(samples, N_FFT, HOP_LENGTH, PadMode::Edge);
    if frames.is_empty() {
        return 0.0;
    }
    let total: f32 = frames
        .iter()
        .map(|frame| {
            let crossings = frame
                .windows(2)
                .filter(|w| is_negative(w[0]) != is_negative(w[1]))
                .count();
            crossings as f32 / frame.len() as f32
        })
        .sum();
    total / frames.len() as f32
}

// Near-zero samples count as positive.
fn is_negative(x: f32) -> bool {
    x.abs() > ZERO_CROSSING_THRESHOLD && x < 0.0
}

fn rms_energy(samples: &[f32]) -> f32 {
    let frames = frame_signal(samples, N_FFT, HOP_LENGTH, PadMode::Constant);
    if frames.is_empty() {
        return 0.0;
    }
    let total: f32 = frames
        .iter()
        .map(|frame| (frame.iter().map(|x| x * x).sum::<f32>() / frame.len() as f32).sqrt())
        .sum();
    total / frames.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::f32::consts::PI;

    const SR: u32 = 22_050;

    fn tone(freq: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / SR as f32).sin() * amplitude)
            .collect()
    }

    #[test]
    fn width_is_162() {
        assert_eq!(FEATURE_WIDTH, 162);
        let fx = FeatureExtractor::new(SR);
        let v = fx.extract(&tone(440.0, 0.5, SR as usize)).unwrap();
        assert_eq!(v.len(), FEATURE_WIDTH);
    }

    #[test]
    fn empty_input_is_an_error() {
        let fx = FeatureExtractor::new(SR);
        assert!(matches!(fx.extract(&[]), Err(FeatureError::EmptySignal)));
    }

    #[test]
    fn windows_shorter_than_one_frame_still_extract() {
        let fx = FeatureExtractor::new(SR);
        // 0.08 s, what is left of a 0.68 s chunk after the 0.6 s offset.
        let short = tone(440.0, 0.5, 1_764);
        let v = fx.extract(&short).unwrap();
        assert_eq!(v.len(), FEATURE_WIDTH);
        assert!(v.iter().all(|x| x.is_finite()));

        let m = fx
            .extract_augmented(&short, &mut StdRng::seed_from_u64(3))
            .unwrap();
        assert_eq!(m.dim(), (ROWS_PER_CHUNK, FEATURE_WIDTH));
        assert!(fx.extract(&[0.1; 100]).is_ok());
    }

    #[test]
    fn chroma_follows_a_detuned_pitch_class() {
        let fx = FeatureExtractor::new(SR);
        // 0.3 of a semitone flat of A440 still reads as A once tuning is estimated.
        let detuned = 440.0 * 2f32.powf(-0.3 / 12.0);
        let v = fx.extract(&tone(detuned, 0.5, SR as usize)).unwrap();
        let chroma = &v[1..1 + N_CHROMA];
        assert!((chroma[9] - 1.0).abs() < 1e-3, "{chroma:?}");
    }

    #[test]
    fn rms_of_constant_signal_accounts_for_zero_padding() {
        let fx = FeatureExtractor::new(SR);
        let v = fx.extract(&vec![0.5f32; 20_480]).unwrap();
        let rms = v[1 + N_CHROMA + N_MFCC];
        // Interior frames are exactly 0.5; edge frames are half padding.
        assert!(rms > 0.45 && rms <= 0.5, "rms {rms}");
    }

    #[test]
    fn zero_crossing_rate_tracks_frequency() {
        let low = zero_crossing_rate(&tone(100.0, 0.5, SR as usize));
        let high = zero_crossing_rate(&tone(1_000.0, 0.5, SR as usize));
        // A sine crosses zero twice per period.
        assert!((high - 2.0 * 1_000.0 / SR as f32).abs() < 0.01, "zcr {high}");
        assert!(high > 5.0 * low);
        assert_eq!(zero_crossing_rate(&[0.0; 4096]), 0.0);
    }

    #[test]
    fn chroma_of_a440_peaks_on_a() {
        let fx = FeatureExtractor::new(SR);
        let v = fx.extract(&tone(440.0, 0.5, SR as usize)).unwrap();
        let chroma = &v[1..1 + N_CHROMA];
        let best = chroma
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(best, 9);
        assert!((chroma[9] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn original_row_is_deterministic_and_noise_row_follows_seed() {
        let fx = FeatureExtractor::new(SR);
        let samples = tone(300.0, 0.4, 2 * SR as usize);
        let a = fx
            .extract_augmented(&samples, &mut StdRng::seed_from_u64(42))
            .unwrap();
        let b = fx
            .extract_augmented(&samples, &mut StdRng::seed_from_u64(42))
            .unwrap();
        let c = fx
            .extract_augmented(&samples, &mut StdRng::seed_from_u64(43))
            .unwrap();
        assert_eq!(a.dim(), (ROWS_PER_CHUNK, FEATURE_WIDTH));
        assert_eq!(a, b);
        assert_eq!(a.row(0), c.row(0));
        assert_eq!(a.row(0).to_vec(), fx.extract(&samples).unwrap());
        assert!(a.iter().all(|x| x.is_finite()));
    }
}
