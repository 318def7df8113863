//! Response-quality detector.
//!
//! Runs five independent checks over a response's answer set; each check
//! yields a penalty in 0..=100 and possibly a flag. Contributions are
//! combined as `weight * penalty * severity_factor` and subtracted from
//! 100, so a single high-severity signal can sink a response on its own.

use crate::detectors::{ProviderBinding, RULE_BASED};
use crate::error::{InsightsError, Result};
use crate::model::{
    AnswerInput, FlagKind, QualityAssessment, QualityFlag, QualityInput, Recommendation, Severity,
};
use crate::providers::PredictRequest;
use crate::settings::QualitySettings;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

static KEYBOARD_MASH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)qwert|asdf|zxcv|hjkl|uiop|12345").expect("valid regex"));

fn severity_factor(severity: Severity) -> f64 {
    match severity {
        Severity::Low => 1.0,
        Severity::Medium => 1.5,
        Severity::High => 2.0,
    }
}

struct CheckOutcome {
    penalty: f64,
    flag: Option<QualityFlag>,
}

impl CheckOutcome {
    fn clean() -> Self {
        Self {
            penalty: 0.0,
            flag: None,
        }
    }

    fn flagged(kind: FlagKind, severity: Severity, penalty: f64, message: String) -> Self {
        Self {
            penalty,
            flag: Some(QualityFlag {
                kind,
                severity,
                message,
            }),
        }
    }
}

pub struct QualityDetector {
    settings: QualitySettings,
    binding: Option<ProviderBinding>,
}

impl QualityDetector {
    pub fn new(settings: QualitySettings) -> Self {
        Self {
            settings,
            binding: None,
        }
    }

    pub fn with_provider(settings: QualitySettings, binding: ProviderBinding) -> Self {
        Self {
            settings,
            binding: Some(binding),
        }
    }

    pub async fn assess(&self, input: &QualityInput) -> QualityAssessment {
        if let Some(binding) = &self.binding {
            if binding.provider.is_model_ready(&binding.model_name).await {
                match self.assess_with_model(input, binding).await {
                    Ok(assessment) => return assessment,
                    Err(err) => {
                        warn!(
                            response_id = input.response_id,
                            "quality model scoring failed, using rule-based path: {err}"
                        );
                    }
                }
            }
        }
        self.assess_with_rules(input)
    }

    /// Map a 0..=100 score onto a recommendation. Thresholds are
    /// inclusive: a score equal to the accept threshold accepts.
    pub fn recommendation_for(&self, score: f64) -> Recommendation {
        if score >= self.settings.accept_threshold {
            Recommendation::Accept
        } else if score <= self.settings.reject_threshold {
            Recommendation::Reject
        } else {
            Recommendation::Review
        }
    }

    pub fn assess_with_rules(&self, input: &QualityInput) -> QualityAssessment {
        let weights = &self.settings.weights;
        let checks = [
            (self.check_speeding(input), weights.speeding),
            (self.check_straight_lining(input), weights.straight_lining),
            (self.check_low_variance(input), weights.low_variance),
            (self.check_gibberish(input), weights.gibberish),
            (self.check_patterns(input), weights.patterns),
        ];

        let mut weighted_penalty = 0.0;
        let mut flags = Vec::new();
        for (outcome, weight) in checks {
            let factor = outcome
                .flag
                .as_ref()
                .map(|f| severity_factor(f.severity))
                .unwrap_or(1.0);
            weighted_penalty += weight * outcome.penalty * factor;
            if let Some(flag) = outcome.flag {
                flags.push(flag);
            }
        }

        let score = (100.0 - weighted_penalty).clamp(0.0, 100.0);
        let confidence = (0.6 + 0.015 * input.answers.len().min(20) as f64).min(0.9);

        debug!(
            response_id = input.response_id,
            score,
            flags = flags.len(),
            "rule-based quality assessment"
        );

        QualityAssessment {
            recommendation: self.recommendation_for(score),
            score,
            flags,
            confidence,
            model_version: RULE_BASED.to_string(),
        }
    }

    // -- the five checks ----------------------------------------------------

    fn check_speeding(&self, input: &QualityInput) -> CheckOutcome {
        let question_count = input.answers.len().max(1) as f64;
        let total_ratio = input.total_time_secs / self.settings.min_total_secs;
        let per_question_ratio =
            (input.total_time_secs / question_count) / self.settings.min_secs_per_question;
        let ratio = total_ratio.min(per_question_ratio);

        if ratio >= 1.0 {
            return CheckOutcome::clean();
        }
        let (severity, penalty) = if ratio <= 1.0 / 3.0 {
            (Severity::High, 100.0)
        } else if ratio <= 2.0 / 3.0 {
            (Severity::Medium, 70.0)
        } else {
            (Severity::Low, 40.0)
        };
        CheckOutcome::flagged(
            FlagKind::Speeding,
            severity,
            penalty,
            format!(
                "completed in {:.1}s, below the {:.0}s minimum for {} questions",
                input.total_time_secs,
                self.settings
                    .min_total_secs
                    .max(question_count * self.settings.min_secs_per_question),
                input.answers.len()
            ),
        )
    }

    fn check_straight_lining(&self, input: &QualityInput) -> CheckOutcome {
        let choice_values: Vec<&str> = input
            .answers
            .iter()
            .filter(|a| a.question_type.is_choice())
            .map(|a| a.value.as_str())
            .collect();
        if choice_values.len() < 3 {
            return CheckOutcome::clean();
        }
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for value in &choice_values {
            *counts.entry(value).or_insert(0) += 1;
        }
        let modal = counts.values().copied().max().unwrap_or(0);
        let share = modal as f64 / choice_values.len() as f64;
        if share < self.settings.straight_line_ratio {
            return CheckOutcome::clean();
        }
        let (severity, penalty) = if share >= 0.95 {
            (Severity::High, 100.0)
        } else if share >= 0.875 {
            (Severity::Medium, 75.0)
        } else {
            (Severity::Low, 50.0)
        };
        CheckOutcome::flagged(
            FlagKind::StraightLining,
            severity,
            penalty,
            format!(
                "{:.0}% of choice answers share the same value",
                share * 100.0
            ),
        )
    }

    fn check_low_variance(&self, input: &QualityInput) -> CheckOutcome {
        let values: Vec<f64> = input
            .answers
            .iter()
            .filter(|a| a.question_type.is_numeric_scale())
            .filter_map(|a| a.value.trim().parse::<f64>().ok())
            .collect();
        if values.len() < 3 {
            return CheckOutcome::clean();
        }
        let std_dev = std_deviation(&values);
        if std_dev >= self.settings.variance_floor {
            return CheckOutcome::clean();
        }
        let penalty = ((1.0 - std_dev / self.settings.variance_floor) * 100.0).clamp(0.0, 100.0);
        let severity = if penalty >= 80.0 {
            Severity::High
        } else if penalty >= 50.0 {
            Severity::Medium
        } else {
            Severity::Low
        };
        CheckOutcome::flagged(
            FlagKind::LowVariance,
            severity,
            penalty,
            format!(
                "scale answers vary by only {std_dev:.2} (floor {:.2})",
                self.settings.variance_floor
            ),
        )
    }

    fn check_gibberish(&self, input: &QualityInput) -> CheckOutcome {
        let texts: Vec<&AnswerInput> = input
            .answers
            .iter()
            .filter(|a| a.question_type.is_free_text())
            .collect();
        if texts.is_empty() {
            return CheckOutcome::clean();
        }
        let flagged = texts
            .iter()
            .filter(|a| looks_like_gibberish(&a.value))
            .count();
        let ratio = flagged as f64 / texts.len() as f64;
        if ratio <= self.settings.gibberish_ratio {
            return CheckOutcome::clean();
        }
        let severity = if ratio >= 0.75 {
            Severity::High
        } else if ratio >= 0.5 {
            Severity::Medium
        } else {
            Severity::Low
        };
        CheckOutcome::flagged(
            FlagKind::Gibberish,
            severity,
            (ratio * 100.0).min(100.0),
            format!("{flagged} of {} free-text answers look like gibberish", texts.len()),
        )
    }

    fn check_patterns(&self, input: &QualityInput) -> CheckOutcome {
        let values: Vec<&str> = input.answers.iter().map(|a| a.value.as_str()).collect();
        let run_threshold = self.settings.identical_run_length.max(2);

        let longest_run = longest_identical_run(&values);
        if longest_run >= run_threshold {
            let over = (longest_run - run_threshold) as f64;
            let penalty = (40.0 + 15.0 * over).min(100.0);
            let severity = if longest_run >= run_threshold + 3 {
                Severity::High
            } else if longest_run >= run_threshold + 1 {
                Severity::Medium
            } else {
                Severity::Low
            };
            return CheckOutcome::flagged(
                FlagKind::PatternDetected,
                severity,
                penalty,
                format!("{longest_run} identical answers in a row"),
            );
        }

        if let Some(cycle_len) = repeating_cycle(&values) {
            return CheckOutcome::flagged(
                FlagKind::PatternDetected,
                Severity::Medium,
                70.0,
                format!("answers repeat in a cycle of {cycle_len}"),
            );
        }

        CheckOutcome::clean()
    }

    // -- ML path ------------------------------------------------------------

    async fn assess_with_model(
        &self,
        input: &QualityInput,
        binding: &ProviderBinding,
    ) -> Result<QualityAssessment> {
        let request = PredictRequest {
            model: binding.model_name.clone(),
            features: self.extract_features(input),
        };
        let prediction = tokio::time::timeout(binding.timeout, binding.provider.predict(&request))
            .await
            .map_err(|_| InsightsError::provider("quality predict timed out"))??;

        let score = match &prediction.value {
            Value::Number(n) => n.as_f64(),
            Value::Object(map) => map.get("score").and_then(Value::as_f64),
            _ => None,
        }
        .ok_or_else(|| InsightsError::provider("quality prediction has no numeric score"))?
        .clamp(0.0, 100.0);

        // Flags stay rule-derived for explainability; the model owns the score.
        let rule_result = self.assess_with_rules(input);
        Ok(QualityAssessment {
            recommendation: self.recommendation_for(score),
            score,
            flags: rule_result.flags,
            confidence: prediction.confidence.unwrap_or(0.75),
            model_version: binding.model_name.clone(),
        })
    }

    fn extract_features(&self, input: &QualityInput) -> HashMap<String, Value> {
        let question_count = input.answers.len().max(1) as f64;
        let numeric: Vec<f64> = input
            .answers
            .iter()
            .filter(|a| a.question_type.is_numeric_scale())
            .filter_map(|a| a.value.trim().parse::<f64>().ok())
            .collect();
        let choice_values: Vec<&str> = input
            .answers
            .iter()
            .filter(|a| a.question_type.is_choice())
            .map(|a| a.value.as_str())
            .collect();
        let straight_share = if choice_values.is_empty() {
            0.0
        } else {
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for value in &choice_values {
                *counts.entry(value).or_insert(0) += 1;
            }
            counts.values().copied().max().unwrap_or(0) as f64 / choice_values.len() as f64
        };
        let text_lengths: Vec<usize> = input
            .answers
            .iter()
            .filter(|a| a.question_type.is_free_text())
            .map(|a| a.value.len())
            .collect();

        let mut features = HashMap::new();
        features.insert("total_time_secs".to_string(), json!(input.total_time_secs));
        features.insert(
            "secs_per_question".to_string(),
            json!(input.total_time_secs / question_count),
        );
        features.insert(
            "time_ratio".to_string(),
            json!(input.total_time_secs / self.settings.min_total_secs),
        );
        features.insert("device".to_string(), json!(input.device.to_string()));
        features.insert("answer_count".to_string(), json!(input.answers.len()));
        features.insert("straight_line_share".to_string(), json!(straight_share));
        features.insert("numeric_std_dev".to_string(), json!(std_deviation(&numeric)));
        features.insert("text_answer_count".to_string(), json!(text_lengths.len()));
        features.insert(
            "mean_text_length".to_string(),
            json!(if text_lengths.is_empty() {
                0.0
            } else {
                text_lengths.iter().sum::<usize>() as f64 / text_lengths.len() as f64
            }),
        );
        features
    }
}

fn std_deviation(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn longest_identical_run(values: &[&str]) -> usize {
    let mut longest = 0;
    let mut current = 0;
    let mut previous: Option<&str> = None;
    for value in values {
        if previous == Some(*value) {
            current += 1;
        } else {
            current = 1;
            previous = Some(*value);
        }
        longest = longest.max(current);
    }
    longest
}

/// Detect a short cycle (length 2..=4) repeating at least three times in
/// a row anywhere in the sequence. Cycles of a single value are the
/// identical-run case and are excluded here.
fn repeating_cycle(values: &[&str]) -> Option<usize> {
    for cycle_len in 2..=4usize {
        let needed = cycle_len * 3;
        if values.len() < needed {
            continue;
        }
        'start: for start in 0..=(values.len() - needed) {
            let pattern = &values[start..start + cycle_len];
            if pattern.iter().all(|v| *v == pattern[0]) {
                continue;
            }
            for repeat in 1..3 {
                let window = &values[start + repeat * cycle_len..start + (repeat + 1) * cycle_len];
                if window != pattern {
                    continue 'start;
                }
            }
            return Some(cycle_len);
        }
    }
    None
}

/// True when any character repeats `run` or more times in a row.
fn has_char_run(text: &str, run: usize) -> bool {
    let mut current = 0;
    let mut previous = None;
    for c in text.chars() {
        if previous == Some(c) {
            current += 1;
        } else {
            current = 1;
            previous = Some(c);
        }
        if current >= run {
            return true;
        }
    }
    false
}

fn looks_like_gibberish(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.len() < 5 {
        return false;
    }
    if KEYBOARD_MASH.is_match(trimmed) || has_char_run(trimmed, 4) {
        return true;
    }

    let letters: Vec<char> = trimmed
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect();
    if letters.len() >= 6 {
        let vowels = letters
            .iter()
            .filter(|c| "aeiouAEIOU".contains(**c))
            .count();
        let consonants = letters.len() - vowels;
        if vowels == 0 || consonants as f64 / vowels.max(1) as f64 >= 5.0 {
            return true;
        }
    }

    let words: Vec<&str> = trimmed.split_whitespace().collect();
    if !words.is_empty() {
        let mean_len =
            words.iter().map(|w| w.len()).sum::<usize>() as f64 / words.len() as f64;
        if mean_len > 14.0 || (words.len() >= 3 && mean_len < 2.0) {
            return true;
        }
    }
    false
}
