use super::tuning::hz_to_octs;
use ndarray::Array2;

/// Convert Hz to Mel scale (Slaney formula)
pub fn hz_to_mel_slaney(hz: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4f64).ln() / 27.0;

    if hz >= min_log_hz {
        min_log_mel + (hz / min_log_hz).ln() / logstep
    } else {
        hz / f_sp
    }
}

/// Convert Mel to Hz scale (Slaney formula)
pub fn mel_to_hz_slaney(mel: f64) -> f64 {
    let f_sp = 200.0 / 3.0;
    let min_log_hz = 1000.0;
    let min_log_mel = min_log_hz / f_sp;
    let logstep = (6.4f64).ln() / 27.0;

    if mel >= min_log_mel {
        min_log_hz * (logstep * (mel - min_log_mel)).exp()
    } else {
        f_sp * mel
    }
}

/// Slaney-normalized mel filterbank shaped `(n_mels, n_fft / 2 + 1)`.
pub fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize, fmin: f64, fmax: f64) -> Array2<f32> {
    let freq_bins = n_fft / 2 + 1;
    let mut filterbank = Array2::<f32>::zeros((n_mels, freq_bins));

    let fftfreqs: Vec<f64> = (0..freq_bins)
        .map(|k| k as f64 * f64::from(sample_rate) / n_fft as f64)
        .collect();

    let fmin_mel = hz_to_mel_slaney(fmin);
    let fmax_mel = hz_to_mel_slaney(fmax);
    let mel_f: Vec<f64> = (0..=n_mels + 1)
        .map(|i| {
            let mel = fmin_mel + (fmax_mel - fmin_mel) * i as f64 / (n_mels + 1) as f64;
            mel_to_hz_slaney(mel)
        })
        .collect();

    let fdiff: Vec<f64> = mel_f.windows(2).map(|w| w[1] - w[0]).collect();

    for i in 0..n_mels {
        let enorm = 2.0 / (mel_f[i + 2] - mel_f[i]);
        for k in 0..freq_bins {
            let lower = (fftfreqs[k] - mel_f[i]) / fdiff[i];
            let upper = (mel_f[i + 2] - fftfreqs[k]) / fdiff[i + 1];
            filterbank[[i, k]] = (0.0f64.max(lower.min(upper)) * enorm) as f32;
        }
    }

    filterbank
}

/// Chroma filterbank shaped `(n_chroma, n_fft / 2 + 1)`, starting at C.
///
/// Gaussian bumps in log-frequency, each FFT column L2-normalized, then
/// weighted by a Gaussian centred on octave 5 with a two-octave width.
/// `tuning` shifts the grid by a fraction of a chroma bin.
pub fn chroma_filterbank(
    sample_rate: u32,
    n_fft: usize,
    n_chroma: usize,
    tuning: f64,
) -> Array2<f32> {
    let n_chroma_f = n_chroma as f64;

    let mut frqbins: Vec<f64> = Vec::with_capacity(n_fft);
    for k in 1..n_fft {
        let freq = k as f64 * f64::from(sample_rate) / n_fft as f64;
        frqbins.push(n_chroma_f * hz_to_octs(freq, tuning, n_chroma));
    }
    let first = frqbins.first().copied().unwrap_or(0.0) - 1.5 * n_chroma_f;
    frqbins.insert(0, first);

    let mut binwidth: Vec<f64> = frqbins
        .windows(2)
        .map(|w| (w[1] - w[0]).max(1.0))
        .collect();
    binwidth.push(1.0);

    let half = (n_chroma_f / 2.0).round();
    let mut weights = Array2::<f64>::zeros((n_chroma, n_fft));
    for c in 0..n_chroma {
        for k in 0..n_fft {
            let d = frqbins[k] - c as f64;
            let d = (d + half + 10.0 * n_chroma_f).rem_euclid(n_chroma_f) - half;
            weights[[c, k]] = (-0.5 * (2.0 * d / binwidth[k]).powi(2)).exp();
        }
    }

    for k in 0..n_fft {
        let norm = (0..n_chroma).map(|c| weights[[c, k]].powi(2)).sum::<f64>().sqrt();
        let octave_weight = (-0.5 * ((frqbins[k] / n_chroma_f - 5.0) / 2.0).powi(2)).exp();
        for c in 0..n_chroma {
            if norm > 0.0 {
                weights[[c, k]] /= norm;
            }
            weights[[c, k]] *= octave_weight;
        }
    }

    // Rotate so that row 0 is C rather than A.
    let shift = 3 * (n_chroma / 12);
    let freq_bins = n_fft / 2 + 1;
    let mut out = Array2::<f32>::zeros((n_chroma, freq_bins));
    for c in 0..n_chroma {
        let src = (c + shift) % n_chroma;
        for k in 0..freq_bins {
            out[[c, k]] = weights[[src, k]] as f32;
        }
    }
    out
}

/// Orthonormal DCT-II basis shaped `(n_out, n_in)`.
pub fn dct_ortho_matrix(n_out: usize, n_in: usize) -> Array2<f32> {
    let n = n_in as f64;
    let mut basis = Array2::<f32>::zeros((n_out, n_in));
    for k in 0..n_out {
        let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        for i in 0..n_in {
            let angle = std::f64::consts::PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n);
            basis[[k, i]] = (scale * angle.cos()) as f32;
        }
    }
    basis
}

/// Power spectrogram to decibels (ref = 1.0), floored at `max - top_db`.
pub fn power_to_db(power: &Array2<f32>, amin: f32, top_db: f32) -> Array2<f32> {
    let db = power.mapv(|x| 10.0 * x.max(amin).log10());
    let peak = db.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !peak.is_finite() {
        return db;
    }
    let floor = peak - top_db;
    db.mapv(|x| x.max(floor))
}
