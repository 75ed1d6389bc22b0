//! Sample-rate conversion using rubato's sinc resampler.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

const CHUNK_SIZE: usize = 1024;

#[derive(thiserror::Error, Debug)]
pub enum ResampleError {
    #[error("invalid resampling ratio {0}")]
    InvalidRatio(f64),
    #[error("failed to build resampler: {0}")]
    Construction(String),
    #[error("resampling failed: {0}")]
    Process(String),
}

/// Pad with zeros or truncate to exactly `length` samples.
pub fn fix_length(mut samples: Vec<f32>, length: usize) -> Vec<f32> {
    samples.resize(length, 0.0);
    samples
}

/// Resample mono audio from `from_hz` to `to_hz`.
///
/// The output is delay-compensated and has `ceil(len * to_hz / from_hz)` samples.
pub fn resample(samples: &[f32], from_hz: f64, to_hz: f64) -> Result<Vec<f32>, ResampleError> {
    if samples.is_empty() {
        return Ok(Vec::new());
    }
    let ratio = to_hz / from_hz;
    if !ratio.is_finite() || ratio <= 0.0 {
        return Err(ResampleError::InvalidRatio(ratio));
    }
    if (ratio - 1.0).abs() < f64::EPSILON {
        return Ok(samples.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK_SIZE, 1)
        .map_err(|e| ResampleError::Construction(e.to_string()))?;

    let expected = (samples.len() as f64 * ratio).ceil() as usize;
    let delay = resampler.output_delay();
    let wanted = expected + delay;

    let mut output = Vec::with_capacity(wanted + CHUNK_SIZE);
    let mut pos = 0;
    while output.len() < wanted {
        let input: Vec<Vec<f32>> = if pos < samples.len() {
            let end = (pos + CHUNK_SIZE).min(samples.len());
            let mut chunk = samples[pos..end].to_vec();
            chunk.resize(CHUNK_SIZE, 0.0);
            vec![chunk]
        } else {
            // Flush the filter tail with silence.
            vec![vec![0.0; CHUNK_SIZE]]
        };

        let result = resampler
            .process(&input, None)
            .map_err(|e| ResampleError::Process(e.to_string()))?;
        if let Some(channel) = result.first() {
            output.extend_from_slice(channel);
        }
        pos += CHUNK_SIZE;
    }

    Ok(output.into_iter().skip(delay).take(expected).collect())
}
