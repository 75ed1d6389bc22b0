//! Reduce per-row classifier outputs to one distribution per recording.

use super::{Emotion, EmotionScores, EMOTION_COUNT};

/// Elementwise mean over all rows; zeros when there are none.
pub fn mean_distribution(rows: &[EmotionScores]) -> EmotionScores {
    let mut mean = [0.0f32; EMOTION_COUNT];
    if rows.is_empty() {
        return mean;
    }
    for (i, slot) in mean.iter_mut().enumerate() {
        let sum: f64 = rows.iter().map(|r| f64::from(r[i])).sum();
        *slot = (sum / rows.len() as f64) as f32;
    }
    mean
}

/// Share of the summed confidence per label, in percent, rounded to 2 decimals.
///
/// All zeros when the total confidence is zero.
pub fn percentages(rows: &[EmotionScores]) -> EmotionScores {
    let mut totals = [0.0f64; EMOTION_COUNT];
    for row in rows {
        for (total, &p) in totals.iter_mut().zip(row.iter()) {
            *total += f64::from(p);
        }
    }
    let grand: f64 = totals.iter().sum();
    let mut out = [0.0f32; EMOTION_COUNT];
    if !(grand.is_finite() && grand > 0.0) {
        return out;
    }
    for (slot, total) in out.iter_mut().zip(totals) {
        *slot = round2(100.0 * total / grand) as f32;
    }
    out
}

/// Arg-max label of each row; ties go to the earlier label.
pub fn predicted_labels(rows: &[EmotionScores]) -> Vec<Emotion> {
    rows.iter()
        .map(|row| {
            let mut best = 0;
            for (i, &p) in row.iter().enumerate() {
                if p > row[best] {
                    best = i;
                }
            }
            Emotion::ALL[best]
        })
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
