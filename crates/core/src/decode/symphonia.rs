use crate::decode::{downmix_to_mono, AudioDecoder, DecodeError, PcmClip, Result};
use crate::dsp::resample;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::io::Cursor;
use std::path::Path;
use ::symphonia::core::audio::SampleBuffer;
use ::symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use ::symphonia::core::errors::Error as SymphoniaError;
use ::symphonia::core::formats::FormatOptions;
use ::symphonia::core::io::MediaSourceStream;
use ::symphonia::core::meta::MetadataOptions;
use ::symphonia::core::probe::Hint;

/// In-process decoder for the containers symphonia understands (WAV, MP3, AAC/M4A, ...).
#[derive(Clone, Debug)]
pub struct SymphoniaAudioDecoder {
    output_rate: u32,
}

impl SymphoniaAudioDecoder {
    pub fn new(output_rate: u32) -> Self {
        Self { output_rate }
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Decode every packet of the first audio track into interleaved f32.
    fn decode_interleaved(upload: Bytes) -> Result<(Vec<f32>, u32, usize)> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(upload)), Default::default());

        let probed = ::symphonia::default::get_probe()
            .format(
                &Hint::new(),
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

        let mut format = probed.format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(DecodeError::NoAudioTrack)?;

        let track_id = track.id;
        let sample_rate = track.codec_params.sample_rate.ok_or_else(|| {
            DecodeError::Unsupported("audio track does not declare a sample rate".to_owned())
        })?;
        let mut channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(0);

        let mut decoder = ::symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Unsupported(e.to_string()))?;

        let mut interleaved: Vec<f32> = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(_)) => break,
                Err(SymphoniaError::ResetRequired) => {
                    decoder.reset();
                    continue;
                }
                Err(e) => return Err(DecodeError::Decode(e.to_string())),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    channels = spec.channels.count();
                    let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buf.copy_interleaved_ref(decoded);
                    interleaved.extend_from_slice(buf.samples());
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!(error = %e, "skipping undecodable packet");
                }
                Err(e) => return Err(DecodeError::Decode(e.to_string())),
            }
        }

        Ok((interleaved, sample_rate, channels.max(1)))
    }

    fn decode_blocking(output_rate: u32, upload: Bytes) -> Result<PcmClip> {
        if upload.is_empty() {
            return Ok(PcmClip::empty(output_rate));
        }

        let (interleaved, native_rate, channels) = Self::decode_interleaved(upload)?;
        let mono = downmix_to_mono(&interleaved, channels);
        let samples = resample(&mono, f64::from(native_rate), f64::from(output_rate))?;

        tracing::debug!(
            native_rate,
            channels,
            output_rate,
            samples = samples.len(),
            "decoded upload"
        );

        Ok(PcmClip::new(output_rate, samples))
    }
}

impl AudioDecoder for SymphoniaAudioDecoder {
    fn decode<'a>(&'a self, upload: Bytes, _scratch: &'a Path) -> BoxFuture<'a, Result<PcmClip>> {
        let output_rate = self.output_rate;
        async move {
            tokio::task::spawn_blocking(move || Self::decode_blocking(output_rate, upload))
                .await
                .map_err(|e| DecodeError::Join(e.to_string()))?
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::f32::consts::PI;

    fn wav_bytes(sample_rate: u32, channels: u16, frames: usize) -> Bytes {
        let spec = WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..frames {
                let v = (2.0 * PI * 330.0 * i as f32 / sample_rate as f32).sin() * 0.4;
                for _ in 0..channels {
                    writer.write_sample((v * i16::MAX as f32) as i16).unwrap();
                }
            }
            writer.finalize().unwrap();
        }
        Bytes::from(cursor.into_inner())
    }

    #[tokio::test]
    async fn decodes_stereo_wav_to_mono_at_output_rate() {
        let decoder = SymphoniaAudioDecoder::new(22_050);
        let scratch = tempfile::tempdir().unwrap();
        let clip = decoder
            .decode(wav_bytes(44_100, 2, 44_100), scratch.path())
            .await
            .unwrap();
        assert_eq!(clip.sample_rate, 22_050);
        assert_eq!(clip.samples.len(), 22_050);
        let peak = clip.samples.iter().fold(0.0f32, |m, &x| m.max(x.abs()));
        assert!(peak > 0.3 && peak < 0.5, "peak {peak}");
    }

    #[tokio::test]
    async fn native_rate_is_passed_through() {
        let decoder = SymphoniaAudioDecoder::new(22_050);
        let scratch = tempfile::tempdir().unwrap();
        let clip = decoder
            .decode(wav_bytes(22_050, 1, 5_000), scratch.path())
            .await
            .unwrap();
        assert_eq!(clip.samples.len(), 5_000);
    }

    #[tokio::test]
    async fn empty_upload_yields_empty_clip() {
        let decoder = SymphoniaAudioDecoder::new(22_050);
        let scratch = tempfile::tempdir().unwrap();
        let clip = decoder.decode(Bytes::new(), scratch.path()).await.unwrap();
        assert!(clip.is_empty());
    }

    #[tokio::test]
    async fn garbage_is_reported_as_unsupported() {
        let decoder = SymphoniaAudioDecoder::new(22_050);
        let scratch = tempfile::tempdir().unwrap();
        let err = decoder
            .decode(Bytes::from_static(b"definitely not audio"), scratch.path())
            .await
            .unwrap_err();
        assert!(matches!(err, DecodeError::Unsupported(_)), "{err}");
    }
}
