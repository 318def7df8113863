//! Typed per-feature settings bags.
//!
//! A [`crate::model::FeatureConfig`] stores its settings as raw JSON; at
//! resolution time the bag (plus any survey-override patch) is deep-merged
//! and parsed into the concrete struct for the feature type. Every field
//! has a serde default so partial bags and partial patches both work.

use crate::error::{InsightsError, Result};
use crate::model::FeatureKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-check penalty weights for the quality detector. They are expected
/// to sum to roughly 1.0 but are not renormalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub speeding: f64,
    pub straight_lining: f64,
    pub low_variance: f64,
    pub gibberish: f64,
    pub patterns: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            speeding: 0.25,
            straight_lining: 0.25,
            low_variance: 0.20,
            gibberish: 0.15,
            patterns: 0.15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    pub weights: QualityWeights,
    /// Score at or above which a response is auto-accepted.
    pub accept_threshold: f64,
    /// Score at or below which a response is auto-rejected.
    pub reject_threshold: f64,
    /// Minimum plausible total completion time, seconds.
    pub min_total_secs: f64,
    /// Minimum plausible average time per question, seconds.
    pub min_secs_per_question: f64,
    /// Modal-answer share above which choice answers count as straight-lining.
    pub straight_line_ratio: f64,
    /// Std-dev floor for numeric-scale answers.
    pub variance_floor: f64,
    /// Share of flagged free-text answers above which gibberish is flagged.
    pub gibberish_ratio: f64,
    /// Run length of identical consecutive answers that triggers a flag.
    pub identical_run_length: usize,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            weights: QualityWeights::default(),
            accept_threshold: 80.0,
            reject_threshold: 30.0,
            min_total_secs: 30.0,
            min_secs_per_question: 1.5,
            straight_line_ratio: 0.8,
            variance_floor: 0.5,
            gibberish_ratio: 0.3,
            identical_run_length: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentimentSettings {
    /// Half-width of the symmetric mixed band around zero.
    pub mixed_band: f64,
    /// Half-width of the true-neutral sub-band inside the mixed band.
    pub neutral_band: f64,
    /// Confidence ceiling for the rule-based path.
    pub max_confidence: f64,
    /// Concurrency cap for batch analysis.
    pub batch_concurrency: usize,
    /// Maximum keywords returned per text.
    pub max_keywords: usize,
}

impl Default for SentimentSettings {
    fn default() -> Self {
        Self {
            mixed_band: 0.2,
            neutral_band: 0.05,
            max_confidence: 0.85,
            batch_concurrency: 10,
            max_keywords: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DropoutSettings {
    pub base_probability: f64,
    /// Probability thresholds for medium/high/critical risk.
    pub medium_threshold: f64,
    pub high_threshold: f64,
    pub critical_threshold: f64,
    /// Expected seconds per answered question; pacing outside the band
    /// formed by the two ratios raises risk.
    pub expected_secs_per_question: f64,
    pub too_fast_ratio: f64,
    pub too_slow_ratio: f64,
}

impl Default for DropoutSettings {
    fn default() -> Self {
        Self {
            base_probability: 0.3,
            medium_threshold: 0.3,
            high_threshold: 0.55,
            critical_threshold: 0.75,
            expected_secs_per_question: 12.0,
            too_fast_ratio: 0.3,
            too_slow_ratio: 3.0,
        }
    }
}

/// Closed union over the three settings shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectorSettings {
    Quality(QualitySettings),
    Sentiment(SentimentSettings),
    Dropout(DropoutSettings),
}

impl DetectorSettings {
    pub fn defaults_for(kind: FeatureKind) -> Self {
        match kind {
            FeatureKind::ResponseQuality => DetectorSettings::Quality(QualitySettings::default()),
            FeatureKind::SentimentAnalysis => {
                DetectorSettings::Sentiment(SentimentSettings::default())
            }
            FeatureKind::DropoutPrediction => DetectorSettings::Dropout(DropoutSettings::default()),
        }
    }

    /// Parse a raw settings bag for the given feature type, with an
    /// optional override patch merged over it first. Unknown keys are
    /// tolerated; missing keys fall back to the defaults above.
    pub fn from_bags(kind: FeatureKind, base: &Value, patch: Option<&Value>) -> Result<Self> {
        let mut merged = base.clone();
        if let Some(patch) = patch {
            merged = merge_json(&merged, patch);
        }
        if merged.is_null() {
            return Ok(Self::defaults_for(kind));
        }
        let parse_err = |e: serde_json::Error| {
            InsightsError::Config(format!("invalid {kind} settings bag: {e}"))
        };
        match kind {
            FeatureKind::ResponseQuality => serde_json::from_value(merged)
                .map(DetectorSettings::Quality)
                .map_err(parse_err),
            FeatureKind::SentimentAnalysis => serde_json::from_value(merged)
                .map(DetectorSettings::Sentiment)
                .map_err(parse_err),
            FeatureKind::DropoutPrediction => serde_json::from_value(merged)
                .map(DetectorSettings::Dropout)
                .map_err(parse_err),
        }
    }
}

/// Deep-merge `patch` over `base`: objects merge key by key, anything
/// else is replaced. Same policy as the YAML config overlay.
pub fn merge_json(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            let mut result = base_map.clone();
            for (key, patch_value) in patch_map {
                let merged = match base_map.get(key) {
                    Some(base_value) => merge_json(base_value, patch_value),
                    None => patch_value.clone(),
                };
                result.insert(key.clone(), merged);
            }
            Value::Object(result)
        }
        (_, Value::Null) => base.clone(),
        (_, patch_value) => patch_value.clone(),
    }
}
