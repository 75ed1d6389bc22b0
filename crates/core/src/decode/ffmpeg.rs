use crate::decode::{AudioDecoder, DecodeError, PcmClip, Result};
use bytes::Bytes;
use ffmpeg_sidecar::{download, paths::ffmpeg_path};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;

const UPLOAD_FILE_NAME: &str = "upload.bin";

/// Decodes through an ffmpeg subprocess; handles containers symphonia cannot
/// (e.g. webm/opus from browser recorders).
#[derive(Clone, Debug)]
pub struct FfmpegAudioDecoder {
    output_rate: u32,
    /// Set once the binary has been located or downloaded.
    ready: Arc<OnceCell<()>>,
}

impl FfmpegAudioDecoder {
    pub fn new(output_rate: u32) -> Self {
        Self {
            output_rate,
            ready: Arc::new(OnceCell::new()),
        }
    }

    /// Locate or download ffmpeg on the blocking pool; runs at most once per
    /// decoder, a failed attempt is retried by the next call.
    pub async fn ensure_ffmpeg_available(&self) -> Result<()> {
        self.ready
            .get_or_try_init(|| async {
                tokio::task::spawn_blocking(download::auto_download)
                    .await
                    .map_err(|e| DecodeError::Join(e.to_string()))?
                    .map_err(|e| DecodeError::FfmpegUnavailable(e.to_string()))
            })
            .await
            .map(|_| ())
    }

    fn parse_f32le_mono(raw: &[u8]) -> Result<Vec<f32>> {
        if raw.len() % 4 != 0 {
            return Err(DecodeError::InvalidPcm(format!(
                "f32le byte length must be multiple of 4, got {}",
                raw.len()
            )));
        }
        let mut out = Vec::with_capacity(raw.len() / 4);
        for chunk in raw.chunks_exact(4) {
            out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
        Ok(out)
    }

    async fn decode_with_ffmpeg(&self, upload: Bytes, scratch: &Path) -> Result<Vec<f32>> {
        // ffmpeg needs a seekable input for containers with trailing indexes (mp4/m4a).
        let input_path = scratch.join(UPLOAD_FILE_NAME);
        tokio::fs::write(&input_path, &upload).await?;

        let rate = self.output_rate.to_string();
        let output = tokio::process::Command::new(ffmpeg_path())
            .args(["-hide_banner", "-nostdin", "-loglevel", "error", "-i"])
            .arg(&input_path)
            .args([
                "-vn", "-sn", "-dn", "-ac", "1", "-ar", rate.as_str(), "-f", "f32le", "-acodec",
                "pcm_f32le", "pipe:1",
            ])
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DecodeError::FfmpegFailed(e.to_string()))?;

        if !output.status.success() {
            let stderr_s = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            return Err(DecodeError::FfmpegFailed(format!(
                "exit_code={:?} stderr={stderr_s}",
                output.status.code()
            )));
        }

        Self::parse_f32le_mono(&output.stdout)
    }
}

impl AudioDecoder for FfmpegAudioDecoder {
    fn decode<'a>(&'a self, upload: Bytes, scratch: &'a Path) -> BoxFuture<'a, Result<PcmClip>> {
        async move {
            if upload.is_empty() {
                return Ok(PcmClip::empty(self.output_rate));
            }
            self.ensure_ffmpeg_available().await?;
            let samples = self.decode_with_ffmpeg(upload, scratch).await?;
            tracing::debug!(
                output_rate = self.output_rate,
                samples = samples.len(),
                "decoded upload with ffmpeg"
            );
            Ok(PcmClip::new(self.output_rate, samples))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_f32le_rejects_non_multiple_of_4() {
        let err = FfmpegAudioDecoder::parse_f32le_mono(&[0, 1, 2]).unwrap_err();
        let s = err.to_string();
        assert!(s.contains("multiple of 4"));
    }

    #[test]
    fn parse_f32le_reads_little_endian_floats() {
        let mut raw = Vec::new();
        for f in [0.0f32, -0.5f32, 1.0f32] {
            raw.extend_from_slice(&f.to_le_bytes());
        }
        let out = FfmpegAudioDecoder::parse_f32le_mono(&raw).unwrap();
        assert_eq!(out, vec![0.0, -0.5, 1.0]);
    }

    #[tokio::test]
    async fn empty_upload_short_circuits_without_ffmpeg() {
        let decoder = FfmpegAudioDecoder::new(22_050);
        let scratch = tempfile::tempdir().unwrap();
        let clip = decoder.decode(Bytes::new(), scratch.path()).await.unwrap();
        assert!(clip.is_empty());
        assert_eq!(clip.sample_rate, 22_050);
        assert!(!decoder.ready.initialized());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn ready_decoder_goes_straight_to_the_subprocess() {
        let decoder = FfmpegAudioDecoder::new(22_050);
        decoder.ready.set(()).unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let err = decoder
            .decode(Bytes::from_static(b"definitely not audio"), scratch.path())
            .await
            .unwrap_err();
        // Either no ffmpeg on PATH or ffmpeg rejecting the input; never a download.
        assert!(matches!(err, DecodeError::FfmpegFailed(_)), "{err}");
        assert!(scratch.path().join(UPLOAD_FILE_NAME).exists());
    }
}
