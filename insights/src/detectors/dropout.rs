//! Drop-out risk predictor.
//!
//! Starts from a base probability and multiplies independently computed
//! factor multipliers (progress, pacing, device, time of day, weekday,
//! survey length, history). Progress dominates: very early progress
//! raises risk most and near-completion sharply lowers it. Intervention
//! choice is a decision table over (risk level, progress ratio), not the
//! raw probability.

use crate::detectors::{ProviderBinding, RULE_BASED};
use crate::error::{InsightsError, Result};
use crate::model::{
    DeviceType, DropoutForecast, DropoutInput, Intervention, InterventionKind, RiskFactor,
    RiskLevel,
};
use crate::providers::PredictRequest;
use crate::settings::DropoutSettings;
use rand::seq::SliceRandom;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

pub struct DropoutDetector {
    settings: DropoutSettings,
    binding: Option<ProviderBinding>,
}

struct Factor {
    name: &'static str,
    multiplier: f64,
    description: String,
}

impl Factor {
    fn new(name: &'static str, multiplier: f64, description: impl Into<String>) -> Self {
        Self {
            name,
            multiplier,
            description: description.into(),
        }
    }
}

impl DropoutDetector {
    pub fn new(settings: DropoutSettings) -> Self {
        Self {
            settings,
            binding: None,
        }
    }

    pub fn with_provider(settings: DropoutSettings, binding: ProviderBinding) -> Self {
        Self {
            settings,
            binding: Some(binding),
        }
    }

    pub async fn predict(&self, input: &DropoutInput) -> DropoutForecast {
        if let Some(binding) = &self.binding {
            if binding.provider.is_model_ready(&binding.model_name).await {
                match self.predict_with_model(input, binding).await {
                    Ok(forecast) => return forecast,
                    Err(err) => {
                        warn!(
                            response_id = input.response_id,
                            "dropout model scoring failed, using rule-based path: {err}"
                        );
                    }
                }
            }
        }
        self.predict_with_rules(input)
    }

    /// Map a probability onto a risk level; thresholds are inclusive
    /// lower bounds.
    pub fn risk_for(&self, probability: f64) -> RiskLevel {
        if probability >= self.settings.critical_threshold {
            RiskLevel::Critical
        } else if probability >= self.settings.high_threshold {
            RiskLevel::High
        } else if probability >= self.settings.medium_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    pub fn predict_with_rules(&self, input: &DropoutInput) -> DropoutForecast {
        let factors = self.compute_factors(input);
        let mut probability = self.settings.base_probability;
        for factor in &factors {
            probability *= factor.multiplier;
        }
        let probability = probability.clamp(0.0, 1.0);

        let risk = self.risk_for(probability);
        let intervention = self.pick_intervention(risk, input);
        let mut confidence = 0.6f64;
        if input.questions_answered > 0 {
            confidence += 0.1;
        }
        if input.previous_dropouts.is_some() {
            confidence += 0.05;
        }
        let confidence = confidence.min(0.85);

        debug!(
            response_id = input.response_id,
            probability,
            %risk,
            "rule-based dropout prediction"
        );

        DropoutForecast {
            probability,
            risk,
            intervention,
            confidence,
            factors: factors
                .into_iter()
                .map(|f| RiskFactor {
                    name: f.name.to_string(),
                    impact: (f.multiplier - 1.0).clamp(-1.0, 1.0),
                    description: f.description,
                })
                .collect(),
            model_version: RULE_BASED.to_string(),
        }
    }

    fn compute_factors(&self, input: &DropoutInput) -> Vec<Factor> {
        let mut factors = Vec::new();
        let progress = input.progress_ratio();

        let (multiplier, description) = if progress < 0.1 {
            (1.5, "respondent has barely started")
        } else if progress < 0.25 {
            (1.3, "early in the survey")
        } else if progress < 0.5 {
            (1.1, "first half of the survey")
        } else if progress < 0.75 {
            (0.9, "past the halfway point")
        } else if progress < 0.9 {
            (0.7, "most of the survey is done")
        } else {
            (0.4, "nearly complete")
        };
        factors.push(Factor::new("progress", multiplier, description));

        if input.questions_answered > 0 {
            let secs_per_question = input.elapsed_secs / f64::from(input.questions_answered);
            let expected = self.settings.expected_secs_per_question;
            if secs_per_question < expected * self.settings.too_fast_ratio {
                factors.push(Factor::new(
                    "pacing",
                    1.3,
                    format!("rushing at {secs_per_question:.1}s per question"),
                ));
            } else if secs_per_question > expected * self.settings.too_slow_ratio {
                factors.push(Factor::new(
                    "pacing",
                    1.25,
                    format!("struggling at {secs_per_question:.1}s per question"),
                ));
            } else {
                factors.push(Factor::new("pacing", 1.0, "steady pace"));
            }
        }

        let (multiplier, description) = match input.device {
            DeviceType::Mobile => (1.2, "mobile respondents abandon more often"),
            DeviceType::Tablet => (1.1, "tablet respondents abandon slightly more often"),
            DeviceType::Desktop => (0.95, "desktop respondents tend to finish"),
            DeviceType::Unknown => (1.0, "unknown device"),
        };
        factors.push(Factor::new("device", multiplier, description));

        let (multiplier, description) = match input.hour_of_day {
            0..=5 => (1.3, "overnight sessions drop off most"),
            6..=8 => (1.1, "early-morning session"),
            9..=11 | 14..=17 => (0.95, "daytime session"),
            18..=21 => (0.9, "peak evening hours"),
            _ => (1.15, "late-night session"),
        };
        factors.push(Factor::new("time_of_day", multiplier, description));

        let (multiplier, description) = match input.day_of_week {
            0 | 4 => (1.05, "start/end of the work week"),
            5 | 6 => (1.1, "weekend session"),
            _ => (1.0, "mid-week session"),
        };
        factors.push(Factor::new("day_of_week", multiplier, description));

        let (multiplier, description) = match input.total_questions {
            0..=5 => (0.85, "very short survey"),
            6..=15 => (1.0, "average-length survey"),
            16..=30 => (1.1, "long survey"),
            _ => (1.25, "very long survey"),
        };
        factors.push(Factor::new("survey_length", multiplier, description));

        if let Some(count) = input.previous_dropouts {
            let multiplier = (1.0 + 0.1 * f64::from(count)).min(1.5);
            factors.push(Factor::new(
                "history",
                multiplier,
                format!("{count} previous abandoned surveys"),
            ));
        }

        factors
    }

    fn pick_intervention(&self, risk: RiskLevel, input: &DropoutInput) -> Intervention {
        let progress = input.progress_ratio();
        // critical risk always protects what the respondent already entered
        let kind = match risk {
            RiskLevel::Critical => InterventionKind::SaveProgress,
            RiskLevel::High => {
                if progress < 0.3 {
                    InterventionKind::Simplify
                } else if input.elapsed_secs > 900.0 {
                    InterventionKind::BreakSuggestion
                } else if progress < 0.7 {
                    InterventionKind::Encouragement
                } else {
                    InterventionKind::TimeEstimate
                }
            }
            RiskLevel::Medium => {
                if progress < 0.3 {
                    InterventionKind::ProgressBar
                } else if progress < 0.7 {
                    InterventionKind::TimeEstimate
                } else {
                    InterventionKind::Encouragement
                }
            }
            RiskLevel::Low => InterventionKind::None,
        };
        Intervention {
            message: pick_message(kind),
            kind,
        }
    }

    // -- ML path ------------------------------------------------------------

    async fn predict_with_model(
        &self,
        input: &DropoutInput,
        binding: &ProviderBinding,
    ) -> Result<DropoutForecast> {
        let mut features = HashMap::new();
        features.insert("progress_ratio".to_string(), json!(input.progress_ratio()));
        features.insert(
            "questions_ratio".to_string(),
            json!(f64::from(input.questions_answered) / f64::from(input.total_questions)),
        );
        features.insert("elapsed_secs".to_string(), json!(input.elapsed_secs));
        features.insert("device".to_string(), json!(input.device.to_string()));
        features.insert("hour_of_day".to_string(), json!(input.hour_of_day));
        features.insert("day_of_week".to_string(), json!(input.day_of_week));
        features.insert("total_questions".to_string(), json!(input.total_questions));
        if let Some(count) = input.previous_dropouts {
            features.insert("previous_dropouts".to_string(), json!(count));
        }
        let request = PredictRequest {
            model: binding.model_name.clone(),
            features,
        };
        let prediction = tokio::time::timeout(binding.timeout, binding.provider.predict(&request))
            .await
            .map_err(|_| InsightsError::provider("dropout predict timed out"))??;

        let probability = match &prediction.value {
            Value::Number(n) => n.as_f64(),
            Value::Object(map) => map.get("probability").and_then(Value::as_f64),
            _ => None,
        }
        .ok_or_else(|| InsightsError::provider("dropout prediction has no probability"))?
        .clamp(0.0, 1.0);

        let risk = self.risk_for(probability);
        // keep the factor breakdown rule-derived so callers always get
        // an explanation, whichever path scored
        let rule_forecast = self.predict_with_rules(input);
        Ok(DropoutForecast {
            probability,
            risk,
            intervention: self.pick_intervention(risk, input),
            confidence: prediction.confidence.unwrap_or(0.75),
            factors: rule_forecast.factors,
            model_version: binding.model_name.clone(),
        })
    }
}

/// One message chosen at random from the pool for the intervention kind,
/// for variety across repeated prompts.
fn pick_message(kind: InterventionKind) -> Option<String> {
    let pool: &[&str] = match kind {
        InterventionKind::None => return None,
        InterventionKind::ProgressBar => &[
            "You're making progress — the bar below shows how far you've come.",
            "Keep an eye on the progress bar; every answer moves it forward.",
        ],
        InterventionKind::Encouragement => &[
            "You're doing great — your answers really help.",
            "Thanks for sticking with it, you're further along than you think.",
            "Great going so far. Your input matters to us.",
        ],
        InterventionKind::Simplify => &[
            "Short on time? The remaining questions are quick ones.",
            "The next section is shorter than it looks.",
        ],
        InterventionKind::SaveProgress => &[
            "Your progress is saved — you can pick up right where you left off.",
            "Don't worry about losing your answers; we've saved them for you.",
        ],
        InterventionKind::TimeEstimate => &[
            "Only a couple of minutes left to finish.",
            "You're almost there — about two minutes to go.",
        ],
        InterventionKind::BreakSuggestion => &[
            "Need a breather? Take a short break, your answers will wait.",
            "Feel free to pause — we'll keep your place.",
        ],
    };
    pool.choose(&mut rand::thread_rng())
        .map(|m| (*m).to_string())
}
