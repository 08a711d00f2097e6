//! Confidence scoring and result aggregation.

use serde::{Deserialize, Serialize};

use crate::snapshot::{DetectionResult, MatchRecord};

/// Confidence tier for operator display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn from_score(score: u8) -> Self {
        if score >= 80 {
            ConfidenceLevel::High
        } else if score >= 50 {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
        }
    }
}

/// Combine per-rule match confidences into a detector score.
///
/// The score is the maximum of the detector's base confidence and every
/// match confidence, boosted by 2 per match up to 15, capped at 100.
/// Only invoked for detectors with at least one match.
pub fn calculate_confidence(matches: &[MatchRecord], base_confidence: u8) -> u8 {
    let max_confidence = matches
        .iter()
        .map(|m| m.confidence)
        .fold(base_confidence, u8::max);

    let boost = (matches.len().saturating_mul(2)).min(15) as u8;

    max_confidence.saturating_add(boost).min(100)
}

/// Summary statistics over a result set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultSummary {
    pub total: usize,
    pub antibot: usize,
    pub captcha: usize,
    pub fingerprint: usize,
    pub high_confidence: usize,
    pub medium_confidence: usize,
    pub low_confidence: usize,
    /// Integer-rounded mean confidence; 0 for an empty set.
    pub average_confidence: u8,
}

/// Aggregate a result set: counts by category, counts by confidence
/// tier, and the rounded mean confidence. Category classification is
/// fuzzy, by substring on the category label.
pub fn aggregate(results: &[DetectionResult]) -> ResultSummary {
    let mut summary = ResultSummary {
        total: results.len(),
        ..Default::default()
    };

    let mut total_confidence = 0u32;
    for result in results {
        let label = result.category.label().to_lowercase();
        if label.contains("anti") || label.contains("bot") {
            summary.antibot += 1;
        } else if label.contains("captcha") {
            summary.captcha += 1;
        } else if label.contains("fingerprint") {
            summary.fingerprint += 1;
        }

        total_confidence += u32::from(result.confidence);
        match ConfidenceLevel::from_score(result.confidence) {
            ConfidenceLevel::High => summary.high_confidence += 1,
            ConfidenceLevel::Medium => summary.medium_confidence += 1,
            ConfidenceLevel::Low => summary.low_confidence += 1,
        }
    }

    if !results.is_empty() {
        summary.average_confidence =
            ((total_confidence as f64 / results.len() as f64).round()) as u8;
    }

    summary
}

/// Badge text for a detection count: empty when clean, capped at "99+".
pub fn badge_text(count: usize) -> String {
    if count == 0 {
        String::new()
    } else if count > 99 {
        "99+".to_string()
    } else {
        count.to_string()
    }
}

/// Badge color: green when clean, orange for a couple of detections,
/// red beyond that.
pub fn badge_color(count: usize) -> &'static str {
    if count == 0 {
        "#4CAF50"
    } else if count <= 2 {
        "#FFA500"
    } else {
        "#FF4444"
    }
}
