//! Analysis rows, the derived summary and CSV export.

use crate::ml::{Label, Prediction};
use crate::reviews::Review;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Quotes returned per side in a summary.
pub const TOP_QUOTES: usize = 5;

/// One classified review. Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AnalysisRow {
    pub text: String,
    pub source: Option<String>,
    pub timestamp: Option<String>,
    pub label: Label,
    #[serde(default)]
    pub score: f32,
}

impl AnalysisRow {
    pub fn new(review: Review, prediction: Prediction) -> Self {
        Self {
            text: review.text,
            source: review.source,
            timestamp: review.timestamp,
            label: prediction.label,
            score: prediction.score,
        }
    }
}

/// Pairs reviews with their predictions positionally.
pub fn build_rows(reviews: Vec<Review>, predictions: Vec<Prediction>) -> Vec<AnalysisRow> {
    reviews
        .into_iter()
        .zip(predictions)
        .map(|(review, prediction)| AnalysisRow::new(review, prediction))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Summary {
    #[schema(example = "tt1160419")]
    pub imdb_id: String,
    pub total: usize,
    pub positives: usize,
    pub negatives: usize,
    pub neutral: usize,
    pub positivity_ratio: f64,
    pub avg_confidence: f64,
    pub top_positive_quotes: Vec<String>,
    pub top_negative_quotes: Vec<String>,
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Highest-scoring texts with `label`, ties kept in row order.
fn top_quotes(rows: &[AnalysisRow], label: Label) -> Vec<String> {
    let mut matching: Vec<&AnalysisRow> = rows.iter().filter(|r| r.label == label).collect();
    matching.sort_by(|a, b| b.score.total_cmp(&a.score));
    matching
        .into_iter()
        .take(TOP_QUOTES)
        .map(|r| r.text.clone())
        .collect()
}

pub fn summarize(imdb_id: &str, rows: &[AnalysisRow]) -> Summary {
    let total = rows.len();
    let positives = rows.iter().filter(|r| r.label == Label::Positive).count();
    let negatives = rows.iter().filter(|r| r.label == Label::Negative).count();
    let neutral = total - positives - negatives;

    let (positivity_ratio, avg_confidence) = if total == 0 {
        (0.0, 0.0)
    } else {
        let score_sum: f64 = rows.iter().map(|r| r.score as f64).sum();
        (
            round4(positives as f64 / total as f64),
            round4(score_sum / total as f64),
        )
    };

    Summary {
        imdb_id: imdb_id.to_string(),
        total,
        positives,
        negatives,
        neutral,
        positivity_ratio,
        avg_confidence,
        top_positive_quotes: top_quotes(rows, Label::Positive),
        top_negative_quotes: top_quotes(rows, Label::Negative),
    }
}

/// CSV with columns `text,source,timestamp,label,score`.
pub fn export_csv(rows: &[AnalysisRow]) -> Result<Vec<u8>> {
    // header is written explicitly so an empty export still has one
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    wtr.write_record(["text", "source", "timestamp", "label", "score"])?;
    for row in rows {
        wtr.serialize(row)?;
    }
    Ok(wtr.into_inner().map_err(|e| e.into_error())?)
}
