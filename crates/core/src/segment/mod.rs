use crate::config::{SegmentLength, TrimWindow};
use crate::decode::PcmClip;
use std::time::Duration;

/// A borrowed, fixed-length window of a recording.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment<'a> {
    pub index: usize,
    pub start: Duration,
    pub samples: &'a [f32],
}

impl<'a> Segment<'a> {
    /// The part of this segment that is actually analysed.
    pub fn trimmed(&self, sample_rate: u32, window: &TrimWindow) -> &'a [f32] {
        trim(self.samples, sample_rate, window)
    }
}

/// Cut `clip` into consecutive windows of `length`; the last one may be shorter.
pub fn split(clip: &PcmClip, length: SegmentLength) -> Vec<Segment<'_>> {
    let frames = length.frames_for_sample_rate(clip.sample_rate);
    clip.samples
        .chunks(frames)
        .enumerate()
        .map(|(index, samples)| Segment {
            index,
            start: offset_duration(index * frames, clip.sample_rate),
            samples,
        })
        .collect()
}

/// Skip `offset_secs` and keep at most `max_secs`; empty when the offset
/// runs past the end.
pub fn trim<'a>(samples: &'a [f32], sample_rate: u32, window: &TrimWindow) -> &'a [f32] {
    let rate = f64::from(sample_rate);
    let start = (f64::from(window.offset_secs) * rate).round() as usize;
    let max_len = (f64::from(window.max_secs) * rate).round() as usize;
    if start >= samples.len() {
        return &[];
    }
    let end = start.saturating_add(max_len).min(samples.len());
    &samples[start..end]
}

fn offset_duration(sample_index: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(sample_index as f64 / f64::from(sample_rate))
}
