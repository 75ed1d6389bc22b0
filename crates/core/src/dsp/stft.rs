use ndarray::Array2;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// How a signal is extended before centered framing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PadMode {
    /// Zeros on both sides.
    Constant,
    /// Repeat the first/last sample.
    Edge,
}

/// Periodic Hann window (the `fftbins=True` flavour).
pub fn hann_window(window_length: usize) -> Vec<f32> {
    (0..window_length)
        .map(|i| 0.5 - 0.5 * ((2.0 * PI * i as f32) / window_length as f32).cos())
        .collect()
}

fn pad_centered(samples: &[f32], pad: usize, mode: PadMode) -> Vec<f32> {
    let mut padded = Vec::with_capacity(samples.len() + 2 * pad);
    let (head, tail) = match mode {
        PadMode::Constant => (0.0, 0.0),
        PadMode::Edge => (
            samples.first().copied().unwrap_or(0.0),
            samples.last().copied().unwrap_or(0.0),
        ),
    };
    padded.resize(pad, head);
    padded.extend_from_slice(samples);
    padded.resize(pad + samples.len() + pad, tail);
    padded
}

/// Centered frames of `frame_length` taken every `hop_length` samples.
///
/// Yields `1 + len / hop_length` frames, matching librosa's `center=True`.
pub fn frame_signal(
    samples: &[f32],
    frame_length: usize,
    hop_length: usize,
    mode: PadMode,
) -> Vec<Vec<f32>> {
    let padded = pad_centered(samples, frame_length / 2, mode);
    if padded.len() < frame_length {
        return Vec::new();
    }
    let n_frames = 1 + (padded.len() - frame_length) / hop_length;
    (0..n_frames)
        .map(|t| padded[t * hop_length..t * hop_length + frame_length].to_vec())
        .collect()
}

/// Forward/inverse short-time Fourier transform with a fixed geometry.
#[derive(Clone)]
pub struct Stft {
    n_fft: usize,
    hop_length: usize,
    window: Vec<f32>,
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
}

impl std::fmt::Debug for Stft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stft")
            .field("n_fft", &self.n_fft)
            .field("hop_length", &self.hop_length)
            .finish()
    }
}

impl Stft {
    pub fn new(n_fft: usize, hop_length: usize) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        Self {
            n_fft,
            hop_length,
            window: hann_window(n_fft),
            forward: planner.plan_fft_forward(n_fft),
            inverse: planner.plan_fft_inverse(n_fft),
        }
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }

    pub fn hop_length(&self) -> usize {
        self.hop_length
    }

    pub fn n_bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    /// Complex spectrogram shaped `(n_bins, n_frames)`, zero-padded and centered.
    pub fn forward(&self, samples: &[f32]) -> Array2<Complex<f32>> {
        let frames = frame_signal(samples, self.n_fft, self.hop_length, PadMode::Constant);
        let n_bins = self.n_bins();
        let mut spectrum = Array2::<Complex<f32>>::zeros((n_bins, frames.len()));
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.n_fft];

        for (t, frame) in frames.iter().enumerate() {
            for (slot, (&x, &w)) in buffer.iter_mut().zip(frame.iter().zip(&self.window)) {
                *slot = Complex::new(x * w, 0.0);
            }
            self.forward.process(&mut buffer);
            for k in 0..n_bins {
                spectrum[[k, t]] = buffer[k];
            }
        }

        spectrum
    }

    /// Overlap-add inverse of [`Stft::forward`], trimmed or zero-padded to `length`.
    pub fn inverse(&self, spectrum: &Array2<Complex<f32>>, length: usize) -> Vec<f32> {
        let n_frames = spectrum.ncols();
        let n_bins = self.n_bins();
        if n_frames == 0 {
            return vec![0.0; length];
        }

        let expected = self.n_fft + self.hop_length * (n_frames - 1);
        let mut signal = vec![0.0f32; expected];
        let mut window_sum = vec![0.0f32; expected];
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.n_fft];
        let scale = 1.0 / self.n_fft as f32;

        for t in 0..n_frames {
            for k in 0..n_bins {
                buffer[k] = spectrum[[k, t]];
            }
            // Hermitian completion; DC and Nyquist are real for a real signal.
            buffer[0].im = 0.0;
            buffer[n_bins - 1].im = 0.0;
            for k in 1..n_bins - 1 {
                buffer[self.n_fft - k] = spectrum[[k, t]].conj();
            }
            self.inverse.process(&mut buffer);

            let start = t * self.hop_length;
            for i in 0..self.n_fft {
                let w = self.window[i];
                signal[start + i] += buffer[i].re * scale * w;
                window_sum[start + i] += w * w;
            }
        }

        for (s, &w) in signal.iter_mut().zip(&window_sum) {
            if w > f32::MIN_POSITIVE {
                *s /= w;
            }
        }

        let offset = self.n_fft / 2;
        let mut out: Vec<f32> = signal.into_iter().skip(offset).take(length).collect();
        out.resize(length, 0.0);
        out
    }

    /// Phase-vocoder time stretch: `rate > 1` speeds up, `rate < 1` slows down.
    pub fn phase_vocoder(&self, spectrum: &Array2<Complex<f32>>, rate: f32) -> Array2<Complex<f32>> {
        let n_bins = spectrum.nrows();
        let n_frames = spectrum.ncols();
        if n_frames == 0 {
            return Array2::zeros((n_bins, 0));
        }

        let n_steps = (n_frames as f64 / f64::from(rate)).ceil() as usize;
        let steps: Vec<f32> = (0..n_steps).map(|i| i as f32 * rate).collect();

        let phi_advance: Vec<f32> = (0..n_bins)
            .map(|k| {
                if n_bins > 1 {
                    PI * self.hop_length as f32 * k as f32 / (n_bins - 1) as f32
                } else {
                    0.0
                }
            })
            .collect();

        let column = |idx: usize, k: usize| -> Complex<f32> {
            if idx < n_frames {
                spectrum[[k, idx]]
            } else {
                Complex::new(0.0, 0.0)
            }
        };

        let mut phase_acc: Vec<f32> = (0..n_bins).map(|k| spectrum[[k, 0]].arg()).collect();
        let mut stretched = Array2::<Complex<f32>>::zeros((n_bins, steps.len()));

        for (t, &step) in steps.iter().enumerate() {
            let left = step.floor() as usize;
            let alpha = step - step.floor();
            for k in 0..n_bins {
                let c0 = column(left, k);
                let c1 = column(left + 1, k);
                let mag = (1.0 - alpha) * c0.norm() + alpha * c1.norm();
                stretched[[k, t]] = Complex::from_polar(mag, phase_acc[k]);

                let mut dphase = c1.arg() - c0.arg() - phi_advance[k];
                dphase -= 2.0 * PI * (dphase / (2.0 * PI)).round();
                phase_acc[k] += phi_advance[k] + dphase;
            }
        }

        stretched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hann_window_is_periodic() {
        let w = hann_window(8);
        assert!((w[0] - 0.0).abs() < 1e-6);
        assert!((w[4] - 1.0).abs() < 1e-6);
        assert!((w[2] - w[6]).abs() < 1e-6);
    }

    #[test]
    fn centered_frame_count_matches_librosa() {
        let samples = vec![0.1f32; 22_050];
        let frames = frame_signal(&samples, 2048, 512, PadMode::Constant);
        assert_eq!(frames.len(), 1 + 22_050 / 512);
        assert!(frames.iter().all(|f| f.len() == 2048));
    }

    #[test]
    fn edge_padding_repeats_boundary_samples() {
        let frames = frame_signal(&[3.0, 4.0], 4, 2, PadMode::Edge);
        assert_eq!(frames[0], vec![3.0, 3.0, 3.0, 4.0]);
    }

    #[test]
    fn forward_then_inverse_reconstructs_signal() {
        let stft = Stft::new(512, 128);
        let signal: Vec<f32> = (0..4000)
            .map(|i| (2.0 * PI * 440.0 * i as f32 / 16_000.0).sin() * 0.5)
            .collect();
        let spec = stft.forward(&signal);
        let rebuilt = stft.inverse(&spec, signal.len());
        assert_eq!(rebuilt.len(), signal.len());
        let max_err = signal
            .iter()
            .zip(&rebuilt)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max);
        assert!(max_err < 1e-3, "max reconstruction error {max_err}");
    }

    #[test]
    fn phase_vocoder_scales_frame_count() {
        let stft = Stft::new(512, 128);
        let signal = vec![0.25f32; 8000];
        let spec = stft.forward(&signal);
        let slower = stft.phase_vocoder(&spec, 0.8);
        let expected = (spec.ncols() as f32 / 0.8).ceil() as usize;
        assert_eq!(slower.ncols(), expected);
        assert_eq!(slower.nrows(), spec.nrows());
    }
}
