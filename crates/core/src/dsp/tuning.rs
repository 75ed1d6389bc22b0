//! Tuning deviation from A440, in fractions of a chroma bin.

use ndarray::Array2;

const PIP_FMIN: f64 = 150.0;
const PIP_FMAX: f64 = 4000.0;
const PIP_THRESHOLD: f32 = 0.1;
const TUNING_RESOLUTION: f64 = 0.01;

/// Octave number of `hz` relative to A0 of the given tuning.
pub fn hz_to_octs(hz: f64, tuning: f64, bins_per_octave: usize) -> f64 {
    let a440 = 440.0 * 2f64.powf(tuning / bins_per_octave as f64);
    (hz / (a440 / 16.0)).log2()
}

/// Estimate tuning from a magnitude spectrogram shaped `(n_fft / 2 + 1, n_frames)`.
///
/// Picks interpolated spectral peaks between 150 Hz and 4 kHz, keeps those at
/// or above the median peak magnitude, and returns the most common deviation
/// from the equal-tempered grid in `[-0.5, 0.5)`.
pub fn estimate_tuning(
    magnitude: &Array2<f32>,
    sample_rate: u32,
    n_fft: usize,
    bins_per_octave: usize,
) -> f64 {
    let peaks = spectral_peaks(magnitude, sample_rate, n_fft);
    if peaks.is_empty() {
        return 0.0;
    }

    let mut mags: Vec<f32> = peaks.iter().map(|&(_, m)| m).collect();
    let threshold = median(&mut mags);
    let pitches: Vec<f64> = peaks
        .into_iter()
        .filter(|&(_, m)| m >= threshold)
        .map(|(p, _)| p)
        .collect();
    pitch_tuning(&pitches, bins_per_octave)
}

/// Most frequent deviation (histogram mode, 0.01 resolution) of `frequencies`.
pub fn pitch_tuning(frequencies: &[f64], bins_per_octave: usize) -> f64 {
    let n_bins = (1.0 / TUNING_RESOLUTION).ceil() as usize;
    let mut counts = vec![0usize; n_bins];
    let mut any = false;

    for &f in frequencies.iter().filter(|&&f| f > 0.0) {
        let octs = hz_to_octs(f, 0.0, bins_per_octave);
        let mut residual = (bins_per_octave as f64 * octs).rem_euclid(1.0);
        if residual >= 0.5 {
            residual -= 1.0;
        }
        let bin = ((residual + 0.5) / TUNING_RESOLUTION).floor() as usize;
        counts[bin.min(n_bins - 1)] += 1;
        any = true;
    }
    if !any {
        return 0.0;
    }

    // First maximum wins, like a left-edge histogram mode.
    let mut best = 0;
    for (i, &c) in counts.iter().enumerate() {
        if c > counts[best] {
            best = i;
        }
    }
    -0.5 + best as f64 * TUNING_RESOLUTION
}

/// `(frequency, magnitude)` of every thresholded local maximum in range.
fn spectral_peaks(magnitude: &Array2<f32>, sample_rate: u32, n_fft: usize) -> Vec<(f64, f32)> {
    let (n_bins, n_frames) = magnitude.dim();
    if n_bins < 3 {
        return Vec::new();
    }
    let bin_hz = f64::from(sample_rate) / n_fft as f64;
    let fmax = PIP_FMAX.min(f64::from(sample_rate) / 2.0);

    let mut peaks = Vec::new();
    for t in 0..n_frames {
        let column = magnitude.column(t);
        let frame_max = column.iter().fold(0.0f32, |m, &x| m.max(x));
        let floor = PIP_THRESHOLD * frame_max;
        let gated = |k: usize| if column[k] > floor { column[k] } else { 0.0 };

        for k in 1..n_bins {
            let freq = k as f64 * bin_hz;
            if freq < PIP_FMIN || freq >= fmax {
                continue;
            }
            let here = gated(k);
            let next = if k + 1 < n_bins { gated(k + 1) } else { here };
            if !(here > gated(k - 1) && here >= next) {
                continue;
            }

            let (shift, avg) = if k + 1 < n_bins {
                let a = column[k + 1] + column[k - 1] - 2.0 * column[k];
                let b = (column[k + 1] - column[k - 1]) / 2.0;
                let shift = if b.abs() < a.abs() { -b / a } else { 0.0 };
                (shift, b)
            } else {
                (0.0, column[k] - column[k - 1])
            };
            let pitch = (k as f64 + f64::from(shift)) * bin_hz;
            peaks.push((pitch, column[k] + 0.5 * avg * shift));
        }
    }
    peaks
}

fn median(values: &mut [f32]) -> f32 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::{Stft, HOP_LENGTH, N_FFT};
    use std::f32::consts::PI;

    const SR: u32 = 22_050;

    fn magnitude_of_tone(freq: f32) -> Array2<f32> {
        let samples: Vec<f32> = (0..SR as usize)
            .map(|i| (2.0 * PI * freq * i as f32 / SR as f32).sin() * 0.5)
            .collect();
        Stft::new(N_FFT, HOP_LENGTH).forward(&samples).mapv(|c| c.norm())
    }

    #[test]
    fn in_tune_a440_has_near_zero_deviation() {
        let tuning = estimate_tuning(&magnitude_of_tone(440.0), SR, N_FFT, 12);
        assert!(tuning.abs() <= 0.06, "tuning {tuning}");
    }

    #[test]
    fn quarter_tone_sharp_is_detected() {
        let sharp = 440.0 * 2f32.powf(0.25 / 12.0);
        let tuning = estimate_tuning(&magnitude_of_tone(sharp), SR, N_FFT, 12);
        assert!((tuning - 0.25).abs() <= 0.06, "tuning {tuning}");
    }

    #[test]
    fn silence_defaults_to_zero() {
        let silent = Array2::<f32>::zeros((1025, 10));
        assert_eq!(estimate_tuning(&silent, SR, N_FFT, 12), 0.0);
        assert_eq!(pitch_tuning(&[], 12), 0.0);
    }

    #[test]
    fn pitch_tuning_takes_the_histogram_mode() {
        let flat = 440.0 * 2f64.powf(-0.2 / 12.0);
        let tuning = pitch_tuning(&[flat, flat, 440.0], 12);
        assert!((tuning + 0.2).abs() < 0.011, "tuning {tuning}");
    }
}
