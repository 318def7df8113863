//! Free-text sentiment analyzer.
//!
//! The rule-based path walks tokens against fixed lexicons, tracking a
//! negation flag and an intensifier multiplier that both reset once they
//! have been applied to the next sentiment-bearing word. The normalized
//! score lands in -1..=1 and is mapped to a category through a symmetric
//! mixed band around zero with a narrower true-neutral sub-band.

use crate::detectors::{ProviderBinding, RULE_BASED};
use crate::error::{InsightsError, Result};
use crate::model::{Sentiment, SentimentInput, SentimentResult};
use crate::providers::{PredictRequest, Prediction};
use crate::settings::SentimentSettings;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

static POSITIVE_WORDS: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("good", 0.6),
        ("great", 0.8),
        ("excellent", 0.9),
        ("amazing", 0.9),
        ("awesome", 0.9),
        ("fantastic", 0.9),
        ("wonderful", 0.9),
        ("love", 0.8),
        ("loved", 0.8),
        ("like", 0.5),
        ("liked", 0.5),
        ("enjoy", 0.7),
        ("enjoyed", 0.7),
        ("helpful", 0.6),
        ("easy", 0.5),
        ("clear", 0.5),
        ("pleasant", 0.6),
        ("happy", 0.7),
        ("satisfied", 0.7),
        ("perfect", 0.9),
        ("best", 0.8),
        ("useful", 0.6),
        ("smooth", 0.5),
        ("fast", 0.4),
        ("intuitive", 0.6),
        ("recommend", 0.6),
    ])
});

static NEGATIVE_WORDS: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("bad", 0.6),
        ("terrible", 0.9),
        ("awful", 0.9),
        ("horrible", 0.9),
        ("worst", 0.9),
        ("hate", 0.8),
        ("hated", 0.8),
        ("dislike", 0.6),
        ("poor", 0.6),
        ("confusing", 0.6),
        ("frustrating", 0.7),
        ("frustrated", 0.7),
        ("annoying", 0.7),
        ("broken", 0.7),
        ("slow", 0.5),
        ("difficult", 0.5),
        ("hard", 0.4),
        ("useless", 0.8),
        ("disappointing", 0.8),
        ("disappointed", 0.8),
        ("boring", 0.6),
        ("unclear", 0.5),
        ("buggy", 0.7),
        ("angry", 0.7),
        ("sad", 0.6),
        ("problem", 0.4),
        ("problems", 0.4),
    ])
});

static NEGATIONS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "not", "no", "never", "don't", "dont", "doesn't", "doesnt", "didn't", "didnt", "isn't",
        "isnt", "wasn't", "wasnt", "aren't", "arent", "won't", "wont", "can't", "cant", "cannot",
        "hardly", "barely", "neither", "nor",
    ]
});

static INTENSIFIERS: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    HashMap::from([
        ("very", 1.5),
        ("really", 1.5),
        ("extremely", 2.0),
        ("absolutely", 2.0),
        ("incredibly", 2.0),
        ("totally", 1.8),
        ("so", 1.3),
        ("quite", 1.2),
        ("somewhat", 0.7),
        ("slightly", 0.5),
    ])
});

static EMOTION_KEYWORDS: Lazy<Vec<(&'static str, Vec<&'static str>)>> = Lazy::new(|| {
    vec![
        (
            "joy",
            vec!["happy", "love", "loved", "enjoy", "enjoyed", "delighted", "glad", "fun"],
        ),
        (
            "sadness",
            vec!["sad", "unhappy", "disappointed", "disappointing", "miss", "regret"],
        ),
        (
            "anger",
            vec!["angry", "furious", "hate", "hated", "annoying", "frustrating", "frustrated"],
        ),
        (
            "fear",
            vec!["afraid", "worried", "scared", "anxious", "concerned", "nervous"],
        ),
        (
            "surprise",
            vec!["surprised", "surprising", "unexpected", "shocked", "wow"],
        ),
    ]
});

static STOPWORDS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "the", "a", "an", "and", "or", "but", "is", "are", "was", "were", "it", "this", "that",
        "i", "we", "you", "they", "he", "she", "of", "to", "in", "on", "for", "with", "at", "all",
        "my", "your", "its", "be", "been", "am", "as", "if", "so", "very", "really",
    ]
});

pub struct SentimentAnalyzer {
    settings: SentimentSettings,
    binding: Option<ProviderBinding>,
}

impl SentimentAnalyzer {
    pub fn new(settings: SentimentSettings) -> Self {
        Self {
            settings,
            binding: None,
        }
    }

    pub fn with_provider(settings: SentimentSettings, binding: ProviderBinding) -> Self {
        Self {
            settings,
            binding: Some(binding),
        }
    }

    pub async fn analyze(&self, input: &SentimentInput) -> SentimentResult {
        if let Some(binding) = &self.binding {
            if binding.provider.is_model_ready(&binding.model_name).await {
                match self.analyze_with_model(input, binding).await {
                    Ok(result) => return result,
                    Err(err) => {
                        warn!("sentiment model scoring failed, using rule-based path: {err}");
                    }
                }
            }
        }
        self.analyze_with_rules(input)
    }

    /// Analyze many texts with a bounded concurrency window rather than
    /// unbounded parallelism. Results keep the input order.
    pub async fn analyze_batch(&self, inputs: &[SentimentInput]) -> Vec<Result<SentimentResult>> {
        let futures: Vec<_> = inputs.iter().map(|input| self.analyze_one(input)).collect();
        stream::iter(futures)
            .buffered(self.settings.batch_concurrency.max(1))
            .collect()
            .await
    }

    async fn analyze_one(&self, input: &SentimentInput) -> Result<SentimentResult> {
        input.validate().map_err(InsightsError::Validation)?;
        Ok(self.analyze(input).await)
    }

    pub fn analyze_with_rules(&self, input: &SentimentInput) -> SentimentResult {
        let tokens = tokenize(&input.text);

        let mut total = 0.0;
        let mut positive_hits = 0usize;
        let mut negative_hits = 0usize;
        let mut negated = false;
        let mut multiplier = 1.0;

        for token in &tokens {
            if NEGATIONS.contains(&token.as_str()) {
                negated = true;
                continue;
            }
            if let Some(boost) = INTENSIFIERS.get(token.as_str()) {
                multiplier *= boost;
                continue;
            }
            let signed = if let Some(weight) = POSITIVE_WORDS.get(token.as_str()) {
                Some(*weight)
            } else {
                NEGATIVE_WORDS.get(token.as_str()).map(|w| -w)
            };
            if let Some(base) = signed {
                let mut contribution = base * multiplier;
                if negated {
                    contribution = -contribution;
                }
                if contribution > 0.0 {
                    positive_hits += 1;
                } else {
                    negative_hits += 1;
                }
                total += contribution;
                // both reset once applied to a sentiment-bearing word
                negated = false;
                multiplier = 1.0;
            }
        }

        let sentiment_words = positive_hits + negative_hits;
        let score = if sentiment_words == 0 {
            0.0
        } else {
            (total / sentiment_words as f64).clamp(-1.0, 1.0)
        };

        let sentiment =
            self.categorize(score, positive_hits, negative_hits);
        let confidence = (0.3 + 0.02 * tokens.len().min(20) as f64
            + 0.08 * sentiment_words.min(5) as f64)
            .min(self.settings.max_confidence);

        debug!(score, %sentiment, "rule-based sentiment");

        SentimentResult {
            sentiment,
            score,
            confidence,
            emotions: detect_emotions(&tokens),
            keywords: extract_keywords(&tokens, self.settings.max_keywords),
            model_version: RULE_BASED.to_string(),
        }
    }

    fn categorize(&self, score: f64, positive_hits: usize, negative_hits: usize) -> Sentiment {
        if score.abs() <= self.settings.neutral_band {
            Sentiment::Neutral
        } else if score.abs() <= self.settings.mixed_band {
            if positive_hits > 0 && negative_hits > 0 {
                Sentiment::Mixed
            } else {
                Sentiment::Neutral
            }
        } else if score > 0.0 {
            Sentiment::Positive
        } else {
            Sentiment::Negative
        }
    }

    // -- ML path ------------------------------------------------------------

    async fn analyze_with_model(
        &self,
        input: &SentimentInput,
        binding: &ProviderBinding,
    ) -> Result<SentimentResult> {
        let mut features = HashMap::new();
        features.insert("text".to_string(), json!(input.text));
        if let Some(question) = &input.question_text {
            features.insert("question".to_string(), json!(question));
        }
        if let Some(title) = &input.survey_title {
            features.insert("survey_title".to_string(), json!(title));
        }
        if let Some(language) = &input.language {
            features.insert("language".to_string(), json!(language));
        }
        let request = PredictRequest {
            model: binding.model_name.clone(),
            features,
        };
        let prediction = tokio::time::timeout(binding.timeout, binding.provider.predict(&request))
            .await
            .map_err(|_| InsightsError::provider("sentiment predict timed out"))??;

        self.parse_prediction(input, &prediction, &binding.model_name)
    }

    /// Providers answer in several shapes: a bare label, a bare score,
    /// or a structured object. Normalize all of them.
    fn parse_prediction(
        &self,
        input: &SentimentInput,
        prediction: &Prediction,
        model_name: &str,
    ) -> Result<SentimentResult> {
        let (sentiment, score) = match &prediction.value {
            Value::String(label) => {
                let sentiment = parse_label(label)?;
                let magnitude = prediction
                    .probabilities
                    .as_ref()
                    .and_then(|p| p.get(label))
                    .copied()
                    .unwrap_or(0.6);
                (sentiment, directional_score(sentiment, magnitude))
            }
            Value::Number(n) => {
                let score = n
                    .as_f64()
                    .ok_or_else(|| InsightsError::provider("non-finite sentiment score"))?
                    .clamp(-1.0, 1.0);
                (self.categorize_score_only(score), score)
            }
            Value::Object(map) => {
                let label = map
                    .get("sentiment")
                    .or_else(|| map.get("label"))
                    .and_then(Value::as_str);
                let score = map.get("score").and_then(Value::as_f64);
                match (label, score) {
                    (Some(label), Some(score)) => (parse_label(label)?, score.clamp(-1.0, 1.0)),
                    (Some(label), None) => {
                        let sentiment = parse_label(label)?;
                        (sentiment, directional_score(sentiment, 0.6))
                    }
                    (None, Some(score)) => {
                        let score = score.clamp(-1.0, 1.0);
                        (self.categorize_score_only(score), score)
                    }
                    (None, None) => {
                        return Err(InsightsError::provider(
                            "sentiment prediction object has neither label nor score",
                        ))
                    }
                }
            }
            other => {
                return Err(InsightsError::provider(format!(
                    "unexpected sentiment prediction shape: {other}"
                )))
            }
        };

        let tokens = tokenize(&input.text);
        let keywords = match &prediction.value {
            Value::Object(map) => map
                .get("keywords")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect::<Vec<_>>()
                })
                .filter(|k| !k.is_empty())
                // provider supplied none: fall back to lexicon extraction
                .unwrap_or_else(|| extract_keywords(&tokens, self.settings.max_keywords)),
            _ => extract_keywords(&tokens, self.settings.max_keywords),
        };

        Ok(SentimentResult {
            sentiment,
            score,
            confidence: prediction.confidence.unwrap_or(0.7),
            emotions: detect_emotions(&tokens),
            keywords,
            model_version: model_name.to_string(),
        })
    }

    fn categorize_score_only(&self, score: f64) -> Sentiment {
        if score.abs() <= self.settings.mixed_band {
            Sentiment::Neutral
        } else if score > 0.0 {
            Sentiment::Positive
        } else {
            Sentiment::Negative
        }
    }
}

fn parse_label(label: &str) -> Result<Sentiment> {
    match label.to_ascii_lowercase().as_str() {
        "positive" | "pos" => Ok(Sentiment::Positive),
        "negative" | "neg" => Ok(Sentiment::Negative),
        "neutral" => Ok(Sentiment::Neutral),
        "mixed" => Ok(Sentiment::Mixed),
        other => Err(InsightsError::provider(format!(
            "unknown sentiment label '{other}'"
        ))),
    }
}

fn directional_score(sentiment: Sentiment, magnitude: f64) -> f64 {
    let magnitude = magnitude.clamp(0.0, 1.0);
    match sentiment {
        Sentiment::Positive => magnitude,
        Sentiment::Negative => -magnitude,
        Sentiment::Neutral | Sentiment::Mixed => 0.0,
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn detect_emotions(tokens: &[String]) -> Option<HashMap<String, f64>> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for (emotion, keywords) in EMOTION_KEYWORDS.iter() {
        let count = tokens
            .iter()
            .filter(|t| keywords.contains(&t.as_str()))
            .count();
        if count > 0 {
            counts.insert(emotion.to_string(), count);
        }
    }
    if counts.is_empty() {
        return None;
    }
    let max = *counts.values().max().unwrap_or(&1) as f64;
    Some(
        counts
            .into_iter()
            .map(|(emotion, count)| (emotion, count as f64 / max))
            .collect(),
    )
}

fn extract_keywords(tokens: &[String], limit: usize) -> Vec<String> {
    let mut counts: Vec<(String, usize, bool)> = Vec::new();
    for token in tokens {
        if token.len() < 3 || STOPWORDS.contains(&token.as_str()) {
            continue;
        }
        let bearing = POSITIVE_WORDS.contains_key(token.as_str())
            || NEGATIVE_WORDS.contains_key(token.as_str());
        match counts.iter_mut().find(|(t, _, _)| t == token) {
            Some(entry) => entry.1 += 1,
            None => counts.push((token.clone(), 1, bearing)),
        }
    }
    // sentiment-bearing words first, then by frequency
    counts.sort_by(|a, b| (b.2, b.1).cmp(&(a.2, a.1)));
    counts.into_iter().take(limit).map(|(t, _, _)| t).collect()
}
