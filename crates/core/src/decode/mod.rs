#[cfg(feature = "ffmpeg-sidecar")]
mod ffmpeg;
mod symphonia;

use crate::config::DecoderKind;
use crate::dsp::ResampleError;
use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "ffmpeg-sidecar")]
pub use ffmpeg::FfmpegAudioDecoder;
pub use self::symphonia::SymphoniaAudioDecoder;

/// Mono PCM audio at a known sample rate.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PcmClip {
    pub sample_rate: u32,
    pub samples: Vec<f32>,
}

impl PcmClip {
    pub fn new(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            samples,
        }
    }

    pub fn empty(sample_rate: u32) -> Self {
        Self::new(sample_rate, Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        duration_from_sample_count(self.sample_rate, 1, self.samples.len())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("unsupported or corrupt audio: {0}")]
    Unsupported(String),

    #[error("no decodable audio track")]
    NoAudioTrack,

    #[error("audio decode failed: {0}")]
    Decode(String),

    #[error("ffmpeg unavailable: {0}")]
    FfmpegUnavailable(String),

    #[error("ffmpeg failed: {0}")]
    FfmpegFailed(String),

    #[error("invalid pcm output: {0}")]
    InvalidPcm(String),

    #[error(transparent)]
    Resample(#[from] ResampleError),

    #[error("scratch io failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode task aborted: {0}")]
    Join(String),
}

pub type Result<T> = std::result::Result<T, DecodeError>;

/// Turns an uploaded file into mono PCM at the decoder's output rate.
///
/// `scratch` is a directory owned by the current request; backends that need a
/// seekable file may write there and must not touch anything outside it.
pub trait AudioDecoder: Send + Sync {
    fn decode<'a>(&'a self, upload: Bytes, scratch: &'a Path) -> BoxFuture<'a, Result<PcmClip>>;
}

#[derive(Clone)]
pub struct Decoder {
    inner: Arc<dyn AudioDecoder>,
}

impl Decoder {
    pub fn new(inner: Arc<dyn AudioDecoder>) -> Self {
        Self { inner }
    }

    /// The backend selected by configuration, producing audio at `output_rate`.
    pub fn from_kind(kind: DecoderKind, output_rate: u32) -> Result<Self> {
        match kind {
            DecoderKind::Symphonia => Ok(Self::new(Arc::new(SymphoniaAudioDecoder::new(
                output_rate,
            )))),
            #[cfg(feature = "ffmpeg-sidecar")]
            DecoderKind::Ffmpeg => Ok(Self::new(Arc::new(FfmpegAudioDecoder::new(output_rate)))),
            #[cfg(not(feature = "ffmpeg-sidecar"))]
            DecoderKind::Ffmpeg => Err(DecodeError::FfmpegUnavailable(
                "built without the ffmpeg-sidecar feature".to_owned(),
            )),
        }
    }

    pub async fn decode(&self, upload: Bytes, scratch: &Path) -> Result<PcmClip> {
        self.inner.decode(upload, scratch).await
    }
}

pub fn i16_to_f32_pcm(samples: &[i16]) -> Vec<f32> {
    if samples.is_empty() {
        return Vec::new();
    }
    let scale = 1.0f32 / 32768.0f32;
    samples.iter().map(|&s| f32::from(s) * scale).collect()
}

/// Average interleaved channels into one.
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

pub fn duration_from_sample_count(
    sample_rate_hz: u32,
    channels: u16,
    sample_count: usize,
) -> Duration {
    if sample_rate_hz == 0 || channels == 0 {
        return Duration::from_secs(0);
    }
    let frames = sample_count / usize::from(channels);
    let micros = (u128::from(frames as u64) * 1_000_000u128) / u128::from(sample_rate_hz);
    Duration::from_micros(micros.min(u128::from(u64::MAX)) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i16_to_f32_basic() {
        let v = i16_to_f32_pcm(&[-32768, -1, 0, 1, 32767]);
        assert!((v[0] + 1.0).abs() < 1e-6);
        assert!((v[2] - 0.0).abs() < 1e-6);
        assert!(v[4] <= 1.0);
        assert!(v[4] > 0.9999);
    }

    #[test]
    fn duration_from_sample_count_mono_22k() {
        let d = duration_from_sample_count(22_050, 1, 22_050);
        assert_eq!(d.as_secs(), 1);
        let d = duration_from_sample_count(22_050, 2, 22_050);
        assert_eq!(d.as_millis(), 500);
    }

    #[test]
    fn downmix_averages_interleaved_frames() {
        let mono = downmix_to_mono(&[1.0, 0.0, 0.5, 0.5, -1.0, 1.0], 2);
        assert_eq!(mono, vec![0.5, 0.5, 0.0]);
        assert_eq!(downmix_to_mono(&[0.3, 0.4], 1), vec![0.3, 0.4]);
    }

    #[tokio::test]
    async fn symphonia_kind_decodes_empty_upload() {
        let decoder = Decoder::from_kind(DecoderKind::Symphonia, 22_050).unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let clip = decoder.decode(Bytes::new(), scratch.path()).await.unwrap();
        assert_eq!(clip, PcmClip::empty(22_050));
    }

    #[test]
    fn clip_duration_uses_sample_rate() {
        let clip = PcmClip::new(22_050, vec![0.0; 11_025]);
        assert_eq!(clip.duration().as_millis(), 500);
        assert!(PcmClip::empty(22_050).is_empty());
    }
}
