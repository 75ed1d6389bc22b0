pub mod aggregate;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use aggregate::{mean_distribution, percentages, predicted_labels};

/// The classes the model was trained on, in output-column order.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Sad,
    Disgust,
    Happy,
    Neutral,
    Angry,
    Calm,
    Surprise,
    Fear,
}

pub const EMOTION_COUNT: usize = 8;

/// One probability per [`Emotion`], indexed by [`Emotion::index`].
pub type EmotionScores = [f32; EMOTION_COUNT];

impl Emotion {
    pub const ALL: [Emotion; EMOTION_COUNT] = [
        Emotion::Sad,
        Emotion::Disgust,
        Emotion::Happy,
        Emotion::Neutral,
        Emotion::Angry,
        Emotion::Calm,
        Emotion::Surprise,
        Emotion::Fear,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Emotion::Sad => "sad",
            Emotion::Disgust => "disgust",
            Emotion::Happy => "happy",
            Emotion::Neutral => "neutral",
            Emotion::Angry => "angry",
            Emotion::Calm => "calm",
            Emotion::Surprise => "surprise",
            Emotion::Fear => "fear",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Label strings in column order, as persisted and returned.
    pub fn labels() -> Vec<String> {
        Self::ALL.iter().map(|e| e.as_str().to_owned()).collect()
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown emotion label '{0}'")]
pub struct UnknownEmotion(pub String);

impl FromStr for Emotion {
    type Err = UnknownEmotion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|e| e.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownEmotion(s.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_order_is_fixed() {
        assert_eq!(
            Emotion::labels(),
            vec!["sad", "disgust", "happy", "neutral", "angry", "calm", "surprise", "fear"]
        );
        for (i, e) in Emotion::ALL.iter().enumerate() {
            assert_eq!(e.index(), i);
            assert_eq!(Emotion::from_index(i), Some(*e));
        }
        assert_eq!(Emotion::from_index(EMOTION_COUNT), None);
    }

    #[test]
    fn serde_and_parse_use_lowercase_labels() {
        assert_eq!(serde_json::to_string(&Emotion::Surprise).unwrap(), "\"surprise\"");
        assert_eq!("Calm".parse::<Emotion>().unwrap(), Emotion::Calm);
        assert!("excited".parse::<Emotion>().is_err());
    }
}
