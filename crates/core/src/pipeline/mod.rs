use crate::{
    classifier::{ClassifierError, EmotionClassifier, SharedClassifier},
    config::{AnalysisConfig, ServiceConfig},
    decode::{DecodeError, Decoder, PcmClip},
    emotion::{mean_distribution, percentages, predicted_labels, Emotion, EmotionScores},
    features::{FeatureError, FeatureExtractor},
    scaler::{ScalerError, ScalerMode},
    segment,
};
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;

const SCRATCH_PREFIX: &str = "emotion-";

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("failed to create scratch directory: {0}")]
    Scratch(#[source] std::io::Error),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Features(#[from] FeatureError),
    #[error(transparent)]
    Scaler(#[from] ScalerError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error("recording too short to analyse: {duration_ms} ms, every segment ends before the {offset_ms} ms trim offset")]
    TrimmedAway { duration_ms: u64, offset_ms: u64 },
    #[error("analysis task aborted: {0}")]
    Join(String),
}

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub analysis: AnalysisConfig,
    pub scratch_root: PathBuf,
}

impl PipelineConfig {
    pub fn from_service(service: &ServiceConfig) -> Self {
        Self {
            analysis: service.analysis.clone(),
            scratch_root: service.scratch_root().to_path_buf(),
        }
    }
}

/// Everything one upload produced.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PredictionOutcome {
    pub labels: Vec<String>,
    pub percentages: Vec<f32>,
    pub mean_distribution: Vec<f32>,
    /// Arg-max label of every scored row, in segment order.
    pub segment_labels: Vec<Emotion>,
    pub segments_scored: usize,
    pub segments_skipped: usize,
}

/// Upload in, emotion percentages out.
#[derive(Clone)]
pub struct EmotionPipeline {
    decoder: Decoder,
    classifier: SharedClassifier,
    scaler: Arc<ScalerMode>,
    extractor: Arc<FeatureExtractor>,
    config: PipelineConfig,
}

impl EmotionPipeline {
    pub fn new(
        decoder: Decoder,
        classifier: SharedClassifier,
        scaler: ScalerMode,
        config: PipelineConfig,
    ) -> Self {
        Self {
            decoder,
            classifier,
            scaler: Arc::new(scaler),
            extractor: Arc::new(FeatureExtractor::new(config.analysis.sample_rate)),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub async fn analyze(&self, upload: Bytes) -> Result<PredictionOutcome, PipelineError> {
        let started = Instant::now();
        let upload_bytes = upload.len();

        let scratch = create_scratch_dir(&self.config.scratch_root)?;
        let result = self.analyze_in(upload, scratch.path()).await;
        release_scratch_dir(scratch);

        match &result {
            Ok(outcome) => tracing::info!(
                upload_bytes,
                segments_scored = outcome.segments_scored,
                segments_skipped = outcome.segments_skipped,
                classifier = self.classifier.name(),
                scaler = self.scaler.name(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "analysis complete"
            ),
            Err(e) => tracing::warn!(
                upload_bytes,
                error = %e,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "analysis failed"
            ),
        }
        result
    }

    async fn analyze_in(
        &self,
        upload: Bytes,
        scratch: &Path,
    ) -> Result<PredictionOutcome, PipelineError> {
        let clip = self.decoder.decode(upload, scratch).await?;
        tracing::debug!(
            sample_rate = clip.sample_rate,
            duration_ms = clip.duration().as_millis() as u64,
            "decoded upload"
        );

        let extractor = Arc::clone(&self.extractor);
        let scaler = Arc::clone(&self.scaler);
        let classifier = Arc::clone(&self.classifier);
        let analysis = self.config.analysis.clone();

        tokio::task::spawn_blocking(move || {
            score_clip(&clip, &analysis, &extractor, &scaler, classifier.as_ref())
        })
        .await
        .map_err(|e| PipelineError::Join(e.to_string()))?
    }
}

fn create_scratch_dir(root: &Path) -> Result<TempDir, PipelineError> {
    std::fs::create_dir_all(root).map_err(PipelineError::Scratch)?;
    tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .tempdir_in(root)
        .map_err(PipelineError::Scratch)
}

fn release_scratch_dir(dir: TempDir) {
    let path = dir.path().to_path_buf();
    if let Err(e) = dir.close() {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove scratch directory");
    }
}

fn score_clip(
    clip: &PcmClip,
    analysis: &AnalysisConfig,
    extractor: &FeatureExtractor,
    scaler: &ScalerMode,
    classifier: &dyn EmotionClassifier,
) -> Result<PredictionOutcome, PipelineError> {
    let mut rng = match analysis.noise_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let segments = segment::split(clip, analysis.segment);
    let mut rows: Vec<EmotionScores> = Vec::with_capacity(segments.len() * 3);
    let mut skipped = 0usize;

    for seg in &segments {
        let window = seg.trimmed(clip.sample_rate, &analysis.trim);
        if window.is_empty() {
            tracing::warn!(
                segment = seg.index,
                samples = seg.samples.len(),
                "segment ends before the trim offset; skipped"
            );
            skipped += 1;
            continue;
        }
        let features = extractor.extract_augmented(window, &mut rng)?;
        let scaled = scaler.standardize(&features)?;
        rows.extend(classifier.predict(&scaled)?);
    }

    if clip.is_empty() {
        return Err(FeatureError::EmptySignal.into());
    }
    if rows.is_empty() {
        return Err(PipelineError::TrimmedAway {
            duration_ms: clip.duration().as_millis() as u64,
            offset_ms: (f64::from(analysis.trim.offset_secs) * 1000.0).round() as u64,
        });
    }

    let segment_labels = predicted_labels(&rows);
    tracing::debug!(
        labels = ?segment_labels.iter().map(|e| e.as_str()).collect::<Vec<_>>(),
        "per-row predictions"
    );

    Ok(PredictionOutcome {
        labels: Emotion::labels(),
        percentages: percentages(&rows).to_vec(),
        mean_distribution: mean_distribution(&rows).to_vec(),
        segment_labels,
        segments_scored: segments.len() - skipped,
        segments_skipped: skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{EmotionClassifier, FixedEmotionClassifier};
    use crate::config::DecoderKind;
    use hound::{SampleFormat, WavSpec, WavWriter};
    use std::f32::consts::PI;
    use std::io::Cursor;

    fn wav_bytes(secs: f32) -> Bytes {
        let spec = WavSpec {
            channels: 1,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = WavWriter::new(&mut cursor, spec).unwrap();
            let frames = (secs * 22_050.0) as usize;
            for i in 0..frames {
                let t = i as f32 / 22_050.0;
                let v = (2.0 * PI * 220.0 * t).sin() * 0.3 + (2.0 * PI * 660.0 * t).sin() * 0.1;
                writer.write_sample((v * i16::MAX as f32) as i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        Bytes::from(cursor.into_inner())
    }

    fn pipeline(scratch_root: &Path, classifier: Arc<dyn EmotionClassifier>) -> EmotionPipeline {
        let analysis = AnalysisConfig {
            noise_seed: Some(7),
            ..AnalysisConfig::default()
        };
        EmotionPipeline::new(
            Decoder::from_kind(DecoderKind::Symphonia, analysis.sample_rate).unwrap(),
            classifier,
            ScalerMode::PerSegment,
            PipelineConfig {
                analysis,
                scratch_root: scratch_root.to_path_buf(),
            },
        )
    }

    fn scratch_is_empty(root: &Path) -> bool {
        std::fs::read_dir(root).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn seven_seconds_yields_two_scored_segments() {
        let root = tempfile::tempdir().unwrap();
        let scores = [0.05, 0.05, 0.40, 0.10, 0.10, 0.10, 0.10, 0.10];
        let p = pipeline(root.path(), Arc::new(FixedEmotionClassifier::new(scores)));

        let outcome = p.analyze(wav_bytes(7.0)).await.unwrap();

        assert_eq!(outcome.segments_scored, 2);
        assert_eq!(outcome.segments_skipped, 0);
        assert_eq!(outcome.labels, Emotion::labels());
        assert_eq!(outcome.percentages.len(), 8);
        let total: f32 = outcome.percentages.iter().sum();
        assert!((total - 100.0).abs() <= 0.1, "{total}");
        assert!((outcome.percentages[2] - 40.0).abs() < 1e-3);
        assert_eq!(outcome.segment_labels, vec![Emotion::Happy; 6]);
        assert!(scratch_is_empty(root.path()));
    }

    #[tokio::test]
    async fn short_tail_segment_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        let p = pipeline(root.path(), Arc::new(FixedEmotionClassifier::uniform()));
        // Second segment is 0.6 s long, nothing survives the trim offset.
        let outcome = p.analyze(wav_bytes(5.6)).await.unwrap();
        assert_eq!(outcome.segments_scored, 1);
        assert_eq!(outcome.segments_skipped, 1);
        assert!(outcome.percentages.iter().all(|&v| (v - 12.5).abs() < 1e-3));
    }

    #[tokio::test]
    async fn sub_frame_window_after_trim_is_still_scored() {
        let root = tempfile::tempdir().unwrap();
        let scores = [0.10, 0.10, 0.10, 0.10, 0.30, 0.10, 0.10, 0.10];
        let p = pipeline(root.path(), Arc::new(FixedEmotionClassifier::new(scores)));
        // 0.68 s leaves 0.08 s (1764 samples) after the 0.6 s offset.
        let outcome = p.analyze(wav_bytes(0.68)).await.unwrap();
        assert_eq!(outcome.segments_scored, 1);
        assert_eq!(outcome.segments_skipped, 0);
        assert_eq!(outcome.percentages.len(), 8);
        assert!((outcome.percentages[4] - 30.0).abs() < 1e-3);
        assert_eq!(outcome.segment_labels, vec![Emotion::Angry; 3]);
    }

    #[tokio::test]
    async fn recording_shorter_than_trim_offset_is_reported_as_such() {
        let root = tempfile::tempdir().unwrap();
        let p = pipeline(root.path(), Arc::new(FixedEmotionClassifier::uniform()));
        let err = p.analyze(wav_bytes(0.5)).await.unwrap_err();
        assert!(
            matches!(err, PipelineError::TrimmedAway { offset_ms: 600, .. }),
            "{err}"
        );
        assert!(scratch_is_empty(root.path()));
    }

    #[tokio::test]
    async fn empty_upload_is_an_empty_signal_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let p = pipeline(root.path(), Arc::new(FixedEmotionClassifier::uniform()));
        let err = p.analyze(Bytes::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::Features(FeatureError::EmptySignal)), "{err}");
        assert!(scratch_is_empty(root.path()));
    }

    #[tokio::test]
    async fn corrupt_upload_is_a_decode_error_and_cleans_up() {
        let root = tempfile::tempdir().unwrap();
        let p = pipeline(root.path(), Arc::new(FixedEmotionClassifier::uniform()));
        let err = p
            .analyze(Bytes::from_static(b"RIFF but not really a wave file"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)), "{err}");
        assert!(scratch_is_empty(root.path()));
    }

    #[tokio::test]
    async fn fixed_seed_makes_runs_reproducible() {
        let root = tempfile::tempdir().unwrap();
        let p = pipeline(root.path(), Arc::new(FixedEmotionClassifier::uniform()));
        let upload = wav_bytes(3.0);
        let a = p.analyze(upload.clone()).await.unwrap();
        let b = p.analyze(upload).await.unwrap();
        assert_eq!(a, b);
    }
}
