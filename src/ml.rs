//! Keyword-based sentiment classifier.
//!
//! Counts which terms of a fixed positive and negative word list occur in the
//! text and picks the side with more hits. It has no dependencies and cannot
//! fail, so it is the classifier of record whenever the transformer model is
//! unavailable or rejects an input.

use once_cell::sync::Lazy;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fmt;
use utoipa::ToSchema;

/// Score reported when one side wins the keyword count.
pub const DECISIVE_SCORE: f32 = 0.85;
/// Score reported for ties, including texts without any listed term.
pub const NEUTRAL_SCORE: f32 = 0.60;

static POSITIVE_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    vec![
        "good", "great", "love", "amazing", "stunning", "awesome", "breathtaking",
        "fantastic", "enjoyed",
    ]
    .into_iter()
    .collect()
});

static NEGATIVE_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    vec![
        "bad", "boring", "slow", "terrible", "awful", "overhyped", "hate", "dull",
        "disappointing",
    ]
    .into_iter()
    .collect()
});

/// Sentiment class assigned to a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Positive,
    Negative,
    Neutral,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Positive => "POSITIVE",
            Label::Negative => "NEGATIVE",
            Label::Neutral => "NEUTRAL",
        }
    }

    /// Maps a free-form label (model output, older snapshots) onto the three
    /// classes. Anything that does not start with `POS` or `NEG` is neutral.
    pub fn from_raw(raw: &str) -> Self {
        let upper = raw.trim().to_uppercase();
        if upper.starts_with("POS") {
            Label::Positive
        } else if upper.starts_with("NEG") {
            Label::Negative
        } else {
            Label::Neutral
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Label::from_raw(&raw))
    }
}

/// Label plus confidence for one text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Prediction {
    pub label: Label,
    #[schema(example = 0.85)]
    pub score: f32,
}

/// Number of distinct positive and negative terms found in `text`.
///
/// Matching is case-insensitive substring presence; a term that appears
/// several times still counts once.
pub fn keyword_counts(text: &str) -> (usize, usize) {
    let lowercase_text = text.to_lowercase();
    let positive_count = POSITIVE_WORDS
        .iter()
        .filter(|w| lowercase_text.contains(*w))
        .count();
    let negative_count = NEGATIVE_WORDS
        .iter()
        .filter(|w| lowercase_text.contains(*w))
        .count();
    (positive_count, negative_count)
}

/// Classifies a single text by keyword count.
pub fn classify(text: &str) -> Prediction {
    let (positive_count, negative_count) = keyword_counts(text);

    if positive_count > negative_count {
        Prediction { label: Label::Positive, score: DECISIVE_SCORE }
    } else if negative_count > positive_count {
        Prediction { label: Label::Negative, score: DECISIVE_SCORE }
    } else {
        Prediction { label: Label::Neutral, score: NEUTRAL_SCORE }
    }
}

/// Classifies every text, preserving order.
pub fn classify_batch<S: AsRef<str>>(texts: &[S]) -> Vec<Prediction> {
    texts.iter().map(|t| classify(t.as_ref())).collect()
}
