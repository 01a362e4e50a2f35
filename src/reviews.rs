//! Review records and the ways they enter the system: file upload, the
//! bundled sample, mock generation and single manual additions.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// Upper bound for `/generate`.
pub const MAX_GENERATED: usize = 5_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Review {
    #[serde(default)]
    #[schema(example = "Amazing movie with stunning visuals!")]
    pub text: String,
    #[serde(default)]
    pub source: Option<String>,
    /// ISO-8601, e.g. `2024-03-01T12:00:00Z`.
    #[serde(default)]
    pub timestamp: Option<String>,
}

impl Review {
    pub fn new(text: impl Into<String>, source: Option<String>, timestamp: Option<String>) -> Self {
        Self {
            text: text.into(),
            source,
            timestamp,
        }
    }
}

/// Second-precision UTC timestamp with a `Z` suffix.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    text: Option<String>,
    source: Option<String>,
    timestamp: Option<String>,
}

/// Parses an uploaded file into reviews, dropping rows without text.
///
/// Files named `*.csv` are read as CSV with a header row (`text`, `source`,
/// `timestamp`; extra columns are ignored). Anything else must be a JSON array
/// of review objects. Invalid UTF-8 is replaced, not rejected.
pub fn parse_upload(filename: &str, bytes: &[u8]) -> Result<Vec<Review>> {
    let content = String::from_utf8_lossy(bytes);
    let reviews = if filename.to_lowercase().ends_with(".csv") {
        parse_csv(&content)?
    } else {
        parse_json(&content)?
    };

    Ok(reviews
        .into_iter()
        .filter(|r| !r.text.trim().is_empty())
        .collect())
}

fn parse_csv(content: &str) -> Result<Vec<Review>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut reviews = Vec::new();
    for (line, row) in rdr.deserialize::<CsvRow>().enumerate() {
        let row = row.with_context(|| format!("invalid CSV record {}", line + 1))?;
        reviews.push(Review::new(row.text.unwrap_or_default(), row.source, row.timestamp));
    }
    Ok(reviews)
}

fn parse_json(content: &str) -> Result<Vec<Review>> {
    let data: Value = serde_json::from_str(content).context("invalid JSON")?;
    let items = match data {
        Value::Array(items) => items,
        _ => bail!("JSON must be a list of review objects"),
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let obj = item
                .as_object()
                .ok_or_else(|| anyhow!("item {} is not a review object", i))?;
            let field = |name: &str| obj.get(name).and_then(Value::as_str).map(str::to_string);
            Ok(Review::new(
                field("text").unwrap_or_default(),
                field("source"),
                field("timestamp"),
            ))
        })
        .collect()
}

const POSITIVE_TEMPLATES: &[&str] = &[
    "Amazing movie with stunning visuals!",
    "Great acting and beautiful score.",
    "Loved it, a must watch.",
    "Fantastic world-building and direction.",
    "I enjoyed every minute!",
];

const NEGATIVE_TEMPLATES: &[&str] = &[
    "Boring and too slow.",
    "I hate the pacing, overhyped.",
    "Terrible writing and confusing plot.",
    "Awful experience, not worth it.",
    "Disappointing and dull.",
];

const NEUTRAL_TEMPLATES: &[&str] = &[
    "It was okay, nothing special.",
    "Fine movie with some good moments.",
    "Average overall.",
    "Mixed feelings about it.",
    "Neutral on this one.",
];

/// Positive / negative / neutral counts for `count` mock reviews:
/// 40% and 30% rounded down, the rest neutral, each at least one.
pub fn mock_split(count: usize) -> (usize, usize, usize) {
    let positive = (count * 2 / 5).max(1);
    let negative = (count * 3 / 10).max(1);
    let neutral = count.saturating_sub(positive + negative).max(1);
    (positive, negative, neutral)
}

/// Builds mock reviews from fixed templates, grouped positive, negative, neutral.
pub fn generate_mock<R: Rng + ?Sized>(count: usize, rng: &mut R, at: DateTime<Utc>) -> Vec<Review> {
    let (positive, negative, neutral) = mock_split(count.min(MAX_GENERATED));
    let timestamp = format_timestamp(at);

    let mut rows = Vec::with_capacity(positive + negative + neutral);
    for (templates, n) in [
        (POSITIVE_TEMPLATES, positive),
        (NEGATIVE_TEMPLATES, negative),
        (NEUTRAL_TEMPLATES, neutral),
    ] {
        for _ in 0..n {
            let text = templates.choose(rng).copied().unwrap_or_default();
            rows.push(Review::new(text, Some("mock".to_string()), Some(timestamp.clone())));
        }
    }
    rows
}

/// Reviews written to `samples/` on first start.
pub fn builtin_sample() -> Vec<Review> {
    let entries: &[(&str, &str, &str)] = &[
        ("Breathtaking visuals and a score that shakes the seats. Loved every frame.", "letterboxd", "2024-03-01T19:12:00Z"),
        ("Stunning world-building, the desert has never looked this good.", "imdb", "2024-03-01T21:40:00Z"),
        ("Great performances all round, especially in the second half.", "rottentomatoes", "2024-03-02T08:05:00Z"),
        ("Fantastic sound design. I enjoyed it even more on the second watch.", "letterboxd", "2024-03-02T14:30:00Z"),
        ("An awesome sequel that improves on the first part in every way.", "imdb", "2024-03-03T10:11:00Z"),
        ("Way too slow in the middle and the romance felt dull.", "imdb", "2024-03-03T18:45:00Z"),
        ("Overhyped. Pretty to look at but boring as a story.", "letterboxd", "2024-03-04T09:20:00Z"),
        ("Disappointing ending that leaves everything for a third film.", "rottentomatoes", "2024-03-04T22:02:00Z"),
        ("The dialogue was terrible in places.", "imdb", "2024-03-05T12:00:00Z"),
        ("Long runtime, solid cast, I have mixed feelings.", "letterboxd", "2024-03-05T16:48:00Z"),
        ("Watched it in IMAX. It is a spectacle, whatever else you think of it.", "imdb", "2024-03-06T20:15:00Z"),
        ("Faithful to the book, for better and worse.", "rottentomatoes", "2024-03-07T11:37:00Z"),
    ];

    entries
        .iter()
        .map(|(text, source, ts)| Review::new(*text, Some(source.to_string()), Some(ts.to_string())))
        .collect()
}
