//! Detection Confidence Analyzer
//!
//! Turns raw ranked classifier output into a normalized species label, a
//! composite confidence, a quality tier and the save/notify decision.
//!
//! Steps, in order:
//! 1. Error / empty handling
//! 2. Label normalization ([`labels`])
//! 3. Confidence-gap quality tier
//! 4. Ensemble blend of the top two predictions when they are close
//! 5. Quality adjustment (×1.05 high, ×0.95 low)
//! 6. Temporal boost from the camera's recent detections
//! 7. Save / notify decision
//!
//! The analyzer is pure: no I/O and no state, so both ingestion paths share
//! it freely.

pub mod labels;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::services::classifier::{ClassifierOutcome, RawPrediction};
pub use labels::{normalize_label, UNKNOWN};

/// Top score required for the `high` tier
pub const HIGH_CONFIDENCE: f64 = 0.7;
/// Minimum gap between the top two predictions for the `high` tier
pub const HIGH_GAP: f64 = 0.2;
/// Top score required for the `medium` tier; also the temporal boost floor
pub const MEDIUM_CONFIDENCE: f64 = 0.5;
/// Gap below which a medium-band top prediction is blended with the runner-up
pub const ENSEMBLE_GAP: f64 = 0.15;
pub const ENSEMBLE_TOP_WEIGHT: f64 = 0.7;
pub const ENSEMBLE_SECOND_WEIGHT: f64 = 0.3;
pub const HIGH_QUALITY_FACTOR: f64 = 1.05;
pub const LOW_QUALITY_FACTOR: f64 = 0.95;
/// Per-recurrence temporal boost step
pub const TEMPORAL_STEP: f64 = 0.02;
pub const TEMPORAL_MAX_BOOST: f64 = 1.10;
/// Minimum confidence for any save
pub const SAVE_THRESHOLD: f64 = 0.15;
/// `Unknown` labels need at least this much to be saved
pub const UNKNOWN_SAVE_THRESHOLD: f64 = 0.2;
pub const NOTIFY_THRESHOLD: f64 = 0.7;
/// Placeholder confidence for a successful call with zero predictions
pub const NO_PREDICTIONS_CONFIDENCE: f64 = 0.1;
/// Predictions kept in `all_predictions`
pub const MAX_PREDICTIONS: usize = 5;

/// Coarse confidence bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    High,
    Medium,
    Low,
    Error,
    NoPredictions,
}

impl QualityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::High => "high",
            QualityTier::Medium => "medium",
            QualityTier::Low => "low",
            QualityTier::Error => "error",
            QualityTier::NoPredictions => "no_predictions",
        }
    }
}

/// A prediction after label normalization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub score: f64,
}

/// How recent history influenced the result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalContext {
    /// Detections in the supplied window
    pub window_size: usize,
    /// Most frequent species in the window
    pub dominant_species: Option<String>,
    /// Occurrences of the dominant species
    pub dominant_count: usize,
    /// Multiplier applied (1.0 when no boost)
    pub boost: f64,
}

/// Analyzer output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub species: String,
    pub confidence: f64,
    pub quality_tier: QualityTier,
    pub top_prediction: Option<Prediction>,
    pub second_prediction: Option<Prediction>,
    pub confidence_gap: f64,
    pub all_predictions: Vec<Prediction>,
    pub should_save: bool,
    pub should_notify: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporal_context: Option<TemporalContext>,
    /// Classifier error message for the `error` tier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AnalysisResult {
    fn without_predictions(tier: QualityTier, confidence: f64, error: Option<String>) -> Self {
        Self {
            species: UNKNOWN.to_string(),
            confidence,
            quality_tier: tier,
            top_prediction: None,
            second_prediction: None,
            confidence_gap: 0.0,
            all_predictions: Vec::new(),
            should_save: false,
            should_notify: false,
            temporal_context: None,
            error,
        }
    }
}

/// Analyze one classification outcome
///
/// `recent_species` is the camera's last-hour detection species, when the
/// caller has it; `None` disables the temporal boost.
pub fn analyze(outcome: &ClassifierOutcome, recent_species: Option<&[String]>) -> AnalysisResult {
    let raw = match outcome {
        Err(e) => {
            return AnalysisResult::without_predictions(QualityTier::Error, 0.0, Some(e.to_string()))
        }
        Ok(raw) if raw.is_empty() => {
            return AnalysisResult::without_predictions(
                QualityTier::NoPredictions,
                NO_PREDICTIONS_CONFIDENCE,
                None,
            )
        }
        Ok(raw) => raw,
    };

    let predictions = normalize_predictions(raw);
    let top = predictions[0].clone();
    let second = predictions.get(1).cloned();

    let gap = confidence_gap(top.score, second.as_ref().map(|p| p.score));
    let quality_tier = quality_tier(top.score, gap);

    let mut confidence = match &second {
        Some(second) if ensemble_applies(top.score, gap) => ensemble_blend(top.score, second.score),
        _ => top.score,
    };

    confidence = apply_quality_adjustment(confidence, quality_tier);

    let species = top.label.clone();
    let temporal_context = recent_species.map(|window| {
        let context = temporal_context(&species, confidence, window);
        confidence = clamp_unit(confidence * context.boost);
        context
    });

    AnalysisResult {
        should_save: should_save(&species, confidence),
        should_notify: should_notify(confidence),
        species,
        confidence,
        quality_tier,
        top_prediction: Some(top),
        second_prediction: second,
        confidence_gap: gap,
        all_predictions: predictions.into_iter().take(MAX_PREDICTIONS).collect(),
        temporal_context,
        error: None,
    }
}

/// Normalize labels and order by score, highest first
///
/// Non-finite scores count as 0; scores are clamped to [0, 1].
pub fn normalize_predictions(raw: &[RawPrediction]) -> Vec<Prediction> {
    let mut predictions: Vec<Prediction> = raw
        .iter()
        .map(|p| Prediction {
            label: normalize_label(&p.prediction),
            score: if p.prediction_score.is_finite() {
                clamp_unit(p.prediction_score)
            } else {
                0.0
            },
        })
        .collect();
    predictions.sort_by(|a, b| b.score.total_cmp(&a.score));
    predictions
}

/// `top - second`, or `top` alone when there is no runner-up
pub fn confidence_gap(top: f64, second: Option<f64>) -> f64 {
    match second {
        Some(second) => top - second,
        None => top,
    }
}

pub fn quality_tier(top: f64, gap: f64) -> QualityTier {
    if top >= HIGH_CONFIDENCE && gap >= HIGH_GAP {
        QualityTier::High
    } else if top >= MEDIUM_CONFIDENCE {
        QualityTier::Medium
    } else {
        QualityTier::Low
    }
}

fn ensemble_applies(top: f64, gap: f64) -> bool {
    (MEDIUM_CONFIDENCE..HIGH_CONFIDENCE).contains(&top) && gap < ENSEMBLE_GAP
}

pub fn ensemble_blend(top: f64, second: f64) -> f64 {
    ENSEMBLE_TOP_WEIGHT * top + ENSEMBLE_SECOND_WEIGHT * second
}

pub fn apply_quality_adjustment(confidence: f64, tier: QualityTier) -> f64 {
    let adjusted = match tier {
        QualityTier::High => confidence * HIGH_QUALITY_FACTOR,
        QualityTier::Low => confidence * LOW_QUALITY_FACTOR,
        _ => confidence,
    };
    clamp_unit(adjusted)
}

/// Boost for a species that dominates the camera's recent history
fn temporal_context(species: &str, confidence: f64, window: &[String]) -> TemporalContext {
    let (dominant_species, dominant_count) = match most_frequent(window) {
        Some((s, c)) => (Some(s), c),
        None => (None, 0),
    };

    let boost = match &dominant_species {
        Some(dominant) if dominant == species && confidence >= MEDIUM_CONFIDENCE => {
            TEMPORAL_MAX_BOOST.min(1.0 + TEMPORAL_STEP * dominant_count as f64)
        }
        _ => 1.0,
    };

    TemporalContext {
        window_size: window.len(),
        dominant_species,
        dominant_count,
        boost,
    }
}

/// Most frequent entry; ties go to the entry seen first
fn most_frequent(window: &[String]) -> Option<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for species in window {
        *counts.entry(species.as_str()).or_insert(0) += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for species in window {
        let count = counts[species.as_str()];
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((species.as_str(), count));
        }
    }
    best.map(|(s, c)| (s.to_string(), c))
}

/// Persist decision, including the low-confidence `Unknown` carve-out
pub fn should_save(species: &str, confidence: f64) -> bool {
    confidence >= SAVE_THRESHOLD && !(species == UNKNOWN && confidence < UNKNOWN_SAVE_THRESHOLD)
}

pub fn should_notify(confidence: f64) -> bool {
    confidence >= NOTIFY_THRESHOLD
}

fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::classifier::ClassifierError;

    fn outcome(preds: &[(&str, f64)]) -> ClassifierOutcome {
        Ok(preds.iter().map(|(l, s)| RawPrediction::new(*l, *s)).collect())
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_error_tier() {
        let result = analyze(&Err(ClassifierError::Timeout), None);
        assert_eq!(result.quality_tier, QualityTier::Error);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.species, UNKNOWN);
        assert!(!result.should_save);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_no_predictions_tier() {
        let result = analyze(&Ok(Vec::new()), None);
        assert_eq!(result.quality_tier, QualityTier::NoPredictions);
        assert!(approx(result.confidence, 0.1));
        assert!(!result.should_save);
        assert!(!result.should_notify);
    }

    #[test]
    fn test_ensemble_blend_when_close() {
        let result = analyze(&outcome(&[("Deer", 0.6), ("Elk", 0.5)]), None);
        assert_eq!(result.quality_tier, QualityTier::Medium);
        assert!(approx(result.confidence, 0.57), "got {}", result.confidence);
        assert_eq!(result.species, "Deer");
    }

    #[test]
    fn test_no_blend_with_clear_winner() {
        let result = analyze(&outcome(&[("Deer", 0.8), ("Fox", 0.1)]), None);
        assert_eq!(result.quality_tier, QualityTier::High);
        assert!(approx(result.confidence, 0.84), "got {}", result.confidence);
    }

    #[test]
    fn test_medium_band_wide_gap_does_not_blend() {
        let result = analyze(&outcome(&[("Deer", 0.65), ("Fox", 0.4)]), None);
        assert_eq!(result.quality_tier, QualityTier::Medium);
        assert!(approx(result.confidence, 0.65));
    }

    #[test]
    fn test_single_prediction_gap_is_top_score() {
        let result = analyze(&outcome(&[("Deer", 0.75)]), None);
        assert!(approx(result.confidence_gap, 0.75));
        assert_eq!(result.quality_tier, QualityTier::High);
        assert!(result.second_prediction.is_none());
    }

    #[test]
    fn test_low_tier_penalty() {
        let result = analyze(&outcome(&[("Deer", 0.4), ("Fox", 0.3)]), None);
        assert_eq!(result.quality_tier, QualityTier::Low);
        assert!(approx(result.confidence, 0.38));
    }

    #[test]
    fn test_high_boost_is_clamped() {
        let result = analyze(&outcome(&[("Deer", 0.99)]), None);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_confidence_always_in_unit_range() {
        let scores = [-1.0, 0.0, 0.05, 0.15, 0.49, 0.5, 0.55, 0.69, 0.7, 0.95, 1.0, 1.7, f64::NAN];
        let window: Vec<String> = vec!["Deer".to_string(); 10];
        for &a in &scores {
            for &b in &scores {
                for window in [None, Some(window.as_slice())] {
                    let result = analyze(&outcome(&[("Deer", a), ("Fox", b)]), window);
                    assert!(
                        (0.0..=1.0).contains(&result.confidence),
                        "confidence {} out of range for ({}, {})",
                        result.confidence,
                        a,
                        b
                    );
                }
            }
        }
    }

    #[test]
    fn test_predictions_sorted_and_truncated() {
        let result = analyze(
            &outcome(&[
                ("a", 0.1),
                ("b", 0.2),
                ("c", 0.9),
                ("d", 0.3),
                ("e", 0.05),
                ("f", 0.4),
            ]),
            None,
        );
        assert_eq!(result.all_predictions.len(), MAX_PREDICTIONS);
        assert_eq!(result.all_predictions[0].label, "c");
        assert_eq!(result.species, "c");
    }

    #[test]
    fn test_temporal_boost_scales_with_recurrence() {
        let window: Vec<String> = ["Deer", "Deer", "Fox", "Deer"].iter().map(|s| s.to_string()).collect();
        let result = analyze(&outcome(&[("Deer", 0.6), ("Fox", 0.2)]), Some(&window));
        let context = result.temporal_context.unwrap();
        assert_eq!(context.dominant_species.as_deref(), Some("Deer"));
        assert_eq!(context.dominant_count, 3);
        assert!(approx(context.boost, 1.06));
        assert!(approx(result.confidence, 0.6 * 1.06));
    }

    #[test]
    fn test_temporal_boost_is_capped() {
        let window: Vec<String> = vec!["Deer".to_string(); 20];
        let result = analyze(&outcome(&[("Deer", 0.6), ("Fox", 0.2)]), Some(&window));
        assert!(approx(result.temporal_context.unwrap().boost, TEMPORAL_MAX_BOOST));
        assert!(approx(result.confidence, 0.66));
    }

    #[test]
    fn test_temporal_boost_requires_medium_confidence() {
        let window: Vec<String> = vec!["Deer".to_string(); 5];
        let result = analyze(&outcome(&[("Deer", 0.45), ("Fox", 0.1)]), Some(&window));
        assert!(approx(result.temporal_context.unwrap().boost, 1.0));
        assert!(approx(result.confidence, 0.45 * 0.95));
    }

    #[test]
    fn test_temporal_boost_requires_matching_species() {
        let window: Vec<String> = vec!["Fox".to_string(); 5];
        let result = analyze(&outcome(&[("Deer", 0.6), ("Fox", 0.2)]), Some(&window));
        assert!(approx(result.temporal_context.unwrap().boost, 1.0));
    }

    #[test]
    fn test_save_decision_boundaries() {
        assert!(!should_save(UNKNOWN, 0.19));
        assert!(should_save(UNKNOWN, 0.21));
        assert!(should_save("Deer", 0.15));
        assert!(!should_save("Deer", 0.14));
    }

    #[test]
    fn test_notify_threshold() {
        assert!(should_notify(0.7));
        assert!(!should_notify(0.69));
    }

    #[test]
    fn test_taxonomy_end_to_end() {
        let result = analyze(
            &outcome(&[("uuid;Mammalia;Deer", 0.82), ("uuid;Mammalia;Fox", 0.30)]),
            None,
        );
        assert_eq!(result.species, "Deer");
        assert_eq!(result.quality_tier, QualityTier::High);
        assert!(approx(result.confidence, 0.82 * 1.05));
        assert!(result.should_save);
        assert!(result.should_notify);
    }
}
