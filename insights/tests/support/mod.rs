#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use insights::error::{InsightsError, Result};
use insights::model::{
    AnswerInput, DeviceType, DropoutInput, DropoutStats, FeatureConfig, FeatureConfigUpdate,
    FeatureKind, ModelId, NewFeatureConfig, PageProbability, ProviderConfig, QualityInput,
    QualityStats, QuestionType, RetryPolicy, SentimentInput, SentimentStats, SurveyOverride,
    SurveyOverrideUpsert,
};
use insights::providers::{
    BatchPrediction, BatchPredictRequest, ConnectionCheck, ModelInfo, ModelProvider, ModelStatus,
    Prediction, PredictRequest, TrainingSpec,
};
use insights::storage::{
    ConfigStorage, NewDropoutPrediction, NewQualityScore, NewSentimentScore, ScoreStorage,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

// ---------------------------------------------------------------------------
// In-memory storage
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    next_id: ModelId,
    configs: Vec<FeatureConfig>,
    overrides: Vec<SurveyOverride>,
    providers: Vec<ProviderConfig>,
    quality: Vec<(ModelId, NewQualityScore)>,
    sentiment: Vec<(ModelId, NewSentimentScore)>,
    dropout: Vec<(ModelId, NewDropoutPrediction, bool)>,
}

impl Inner {
    fn next(&mut self) -> ModelId {
        self.next_id += 1;
        self.next_id
    }
}

/// Storage double backing both traits, so service tests run without a
/// database.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_provider_config(&self, kind: &str, enabled: bool) -> ModelId {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next();
        inner.providers.push(ProviderConfig {
            id,
            name: format!("provider-{id}"),
            kind: kind.to_string(),
            endpoint: "http://localhost:9999".to_string(),
            api_key: None,
            enabled,
            retry: RetryPolicy::default(),
        });
        id
    }

    pub fn quality_record_count(&self) -> usize {
        self.inner.lock().unwrap().quality.len()
    }

    pub fn sentiment_record_count(&self) -> usize {
        self.inner.lock().unwrap().sentiment.len()
    }

    pub fn dropout_record_count(&self) -> usize {
        self.inner.lock().unwrap().dropout.len()
    }

    pub fn sentiment_records(&self) -> Vec<NewSentimentScore> {
        self.inner
            .lock()
            .unwrap()
            .sentiment
            .iter()
            .map(|(_, r)| r.clone())
            .collect()
    }

    pub fn last_quality_record(&self) -> Option<NewQualityScore> {
        self.inner
            .lock()
            .unwrap()
            .quality
            .last()
            .map(|(_, r)| r.clone())
    }

    pub fn last_dropout_record(&self) -> Option<NewDropoutPrediction> {
        self.inner
            .lock()
            .unwrap()
            .dropout
            .last()
            .map(|(_, r, _)| r.clone())
    }
}

#[async_trait]
impl ConfigStorage for MemoryStorage {
    async fn create_feature_config(&self, new: &NewFeatureConfig) -> Result<FeatureConfig> {
        let mut inner = self.inner.lock().unwrap();
        if inner
            .configs
            .iter()
            .any(|c| c.feature == new.feature && c.name == new.name)
        {
            return Err(InsightsError::Config(format!(
                "a {} config named '{}' already exists",
                new.feature, new.name
            )));
        }
        let id = inner.next();
        let now = Utc::now();
        let config = FeatureConfig {
            id,
            feature: new.feature,
            name: new.name.clone(),
            enabled: new.enabled,
            is_global: new.is_global,
            provider_config_id: new.provider_config_id,
            model_name: new.model_name.clone(),
            settings: new.settings.clone(),
            confidence_threshold: new.confidence_threshold,
            batch_size: new.batch_size,
            timeout_secs: new.timeout_secs,
            created_at: now,
            updated_at: now,
        };
        inner.configs.push(config.clone());
        Ok(config)
    }

    async fn get_feature_config(&self, id: ModelId) -> Result<Option<FeatureConfig>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .configs
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn list_feature_configs(&self, kind: Option<FeatureKind>) -> Result<Vec<FeatureConfig>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .configs
            .iter()
            .filter(|c| kind.map_or(true, |k| c.feature == k))
            .cloned()
            .collect())
    }

    async fn update_feature_config(
        &self,
        id: ModelId,
        update: &FeatureConfigUpdate,
    ) -> Result<FeatureConfig> {
        let mut inner = self.inner.lock().unwrap();
        let config = inner
            .configs
            .iter_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| InsightsError::NotFound(format!("feature config {id}")))?;
        if let Some(name) = &update.name {
            config.name = name.clone();
        }
        if let Some(enabled) = update.enabled {
            config.enabled = enabled;
        }
        if let Some(is_global) = update.is_global {
            config.is_global = is_global;
        }
        if let Some(provider_config_id) = update.provider_config_id {
            config.provider_config_id = provider_config_id;
        }
        if let Some(model_name) = &update.model_name {
            config.model_name = model_name.clone();
        }
        if let Some(settings) = &update.settings {
            config.settings = settings.clone();
        }
        if let Some(threshold) = update.confidence_threshold {
            config.confidence_threshold = threshold;
        }
        if let Some(batch_size) = update.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(timeout_secs) = update.timeout_secs {
            config.timeout_secs = timeout_secs;
        }
        config.updated_at = Utc::now();
        Ok(config.clone())
    }

    async fn delete_feature_config(&self, id: ModelId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.configs.len();
        inner.configs.retain(|c| c.id != id);
        if inner.configs.len() == before {
            return Err(InsightsError::NotFound(format!("feature config {id}")));
        }
        inner.overrides.retain(|o| o.feature_config_id != id);
        Ok(())
    }

    async fn upsert_survey_override(
        &self,
        feature_config_id: ModelId,
        survey_id: ModelId,
        upsert: &SurveyOverrideUpsert,
    ) -> Result<SurveyOverride> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.configs.iter().any(|c| c.id == feature_config_id) {
            return Err(InsightsError::NotFound(format!(
                "feature config {feature_config_id}"
            )));
        }
        if let Some(existing) = inner
            .overrides
            .iter_mut()
            .find(|o| o.feature_config_id == feature_config_id && o.survey_id == survey_id)
        {
            existing.enabled = upsert.enabled;
            existing.settings_patch = upsert.settings_patch.clone();
            return Ok(existing.clone());
        }
        let id = inner.next();
        let result = SurveyOverride {
            id,
            feature_config_id,
            survey_id,
            enabled: upsert.enabled,
            settings_patch: upsert.settings_patch.clone(),
            created_at: Utc::now(),
        };
        inner.overrides.push(result.clone());
        Ok(result)
    }

    async fn get_survey_override(
        &self,
        feature_config_id: ModelId,
        survey_id: ModelId,
    ) -> Result<Option<SurveyOverride>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .overrides
            .iter()
            .find(|o| o.feature_config_id == feature_config_id && o.survey_id == survey_id)
            .cloned())
    }

    async fn delete_survey_override(
        &self,
        feature_config_id: ModelId,
        survey_id: ModelId,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.overrides.len();
        inner
            .overrides
            .retain(|o| !(o.feature_config_id == feature_config_id && o.survey_id == survey_id));
        if inner.overrides.len() == before {
            return Err(InsightsError::NotFound(format!(
                "override for config {feature_config_id}, survey {survey_id}"
            )));
        }
        Ok(())
    }

    async fn find_override_for_survey(
        &self,
        kind: FeatureKind,
        survey_id: ModelId,
    ) -> Result<Option<(FeatureConfig, SurveyOverride)>> {
        let inner = self.inner.lock().unwrap();
        for survey_override in inner.overrides.iter().filter(|o| o.survey_id == survey_id) {
            if let Some(config) = inner
                .configs
                .iter()
                .find(|c| c.id == survey_override.feature_config_id && c.feature == kind)
            {
                return Ok(Some((config.clone(), survey_override.clone())));
            }
        }
        Ok(None)
    }

    async fn first_enabled_global(&self, kind: FeatureKind) -> Result<Option<FeatureConfig>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .configs
            .iter()
            .filter(|c| c.feature == kind && c.enabled && c.is_global)
            .min_by_key(|c| c.id)
            .cloned())
    }

    async fn get_provider_config(&self, id: ModelId) -> Result<Option<ProviderConfig>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .providers
            .iter()
            .find(|p| p.id == id)
            .cloned())
    }
}

#[async_trait]
impl ScoreStorage for MemoryStorage {
    async fn save_quality_score(&self, record: &NewQualityScore) -> Result<ModelId> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next();
        inner.quality.push((id, record.clone()));
        Ok(id)
    }

    async fn save_sentiment_score(&self, record: &NewSentimentScore) -> Result<ModelId> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next();
        inner.sentiment.push((id, record.clone()));
        Ok(id)
    }

    async fn save_dropout_prediction(&self, record: &NewDropoutPrediction) -> Result<ModelId> {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next();
        inner.dropout.push((id, record.clone(), false));
        Ok(id)
    }

    async fn mark_intervention_shown(&self, prediction_id: ModelId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .dropout
            .iter_mut()
            .find(|(id, _, _)| *id == prediction_id)
            .ok_or_else(|| {
                InsightsError::NotFound(format!("dropout prediction {prediction_id}"))
            })?;
        entry.2 = true;
        Ok(())
    }

    async fn quality_stats(&self, survey_id: ModelId) -> Result<QualityStats> {
        let inner = self.inner.lock().unwrap();
        let records: Vec<_> = inner
            .quality
            .iter()
            .filter(|(_, r)| r.survey_id == survey_id)
            .collect();
        let total = records.len() as i64;
        let mean_score = if records.is_empty() {
            0.0
        } else {
            records.iter().map(|(_, r)| r.score).sum::<f64>() / total as f64
        };
        let mut recommendations = HashMap::new();
        for (_, record) in &records {
            *recommendations
                .entry(record.recommendation.to_string())
                .or_insert(0) += 1;
        }
        Ok(QualityStats {
            total,
            mean_score,
            recommendations,
            flag_counts: HashMap::new(),
        })
    }

    async fn sentiment_stats(&self, survey_id: ModelId) -> Result<SentimentStats> {
        let inner = self.inner.lock().unwrap();
        let records: Vec<_> = inner
            .sentiment
            .iter()
            .filter(|(_, r)| r.survey_id == Some(survey_id))
            .collect();
        let total = records.len() as i64;
        let mean_score = if records.is_empty() {
            0.0
        } else {
            records.iter().map(|(_, r)| r.score).sum::<f64>() / total as f64
        };
        let mut sentiments = HashMap::new();
        for (_, record) in &records {
            *sentiments.entry(record.sentiment.to_string()).or_insert(0) += 1;
        }
        Ok(SentimentStats {
            total,
            mean_score,
            sentiments,
        })
    }

    async fn dropout_stats(&self, survey_id: ModelId) -> Result<DropoutStats> {
        let inner = self.inner.lock().unwrap();
        let records: Vec<_> = inner
            .dropout
            .iter()
            .filter(|(_, r, _)| r.survey_id == survey_id)
            .collect();
        let total = records.len() as i64;
        let mean_probability = if records.is_empty() {
            0.0
        } else {
            records.iter().map(|(_, r, _)| r.probability).sum::<f64>() / total as f64
        };
        let mut risk_levels = HashMap::new();
        let mut pages: HashMap<i32, (f64, i64)> = HashMap::new();
        for (_, record, _) in &records {
            *risk_levels.entry(record.risk.to_string()).or_insert(0) += 1;
            let entry = pages.entry(record.current_page).or_insert((0.0, 0));
            entry.0 += record.probability;
            entry.1 += 1;
        }
        let mut per_page: Vec<PageProbability> = pages
            .into_iter()
            .map(|(page, (sum, count))| PageProbability {
                page,
                mean_probability: sum / count as f64,
                count,
            })
            .collect();
        per_page.sort_by_key(|p| p.page);
        Ok(DropoutStats {
            total,
            mean_probability,
            risk_levels,
            interventions_shown: records.iter().filter(|(_, _, shown)| *shown).count() as i64,
            per_page,
        })
    }
}

// ---------------------------------------------------------------------------
// Scripted provider
// ---------------------------------------------------------------------------

/// Provider double with a fixed model status and scripted predictions.
pub struct MockProvider {
    pub status: ModelStatus,
    pub prediction: Option<Prediction>,
    pub predict_calls: AtomicUsize,
}

impl MockProvider {
    pub fn ready_with(value: serde_json::Value) -> Self {
        Self {
            status: ModelStatus::Ready,
            prediction: Some(Prediction {
                value,
                confidence: Some(0.9),
                probabilities: None,
            }),
            predict_calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            status: ModelStatus::Ready,
            prediction: None,
            predict_calls: AtomicUsize::new(0),
        }
    }

    pub fn not_ready() -> Self {
        Self {
            status: ModelStatus::Training,
            prediction: None,
            predict_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn test_connection(&self) -> ConnectionCheck {
        ConnectionCheck {
            ok: true,
            latency_ms: 1,
            message: None,
        }
    }

    async fn create_model(&self, spec: &TrainingSpec) -> Result<ModelInfo> {
        Ok(ModelInfo {
            name: spec.model_name.clone(),
            status: ModelStatus::Training,
            detail: None,
        })
    }

    async fn model_info(&self, name: &str) -> Result<ModelInfo> {
        Ok(ModelInfo {
            name: name.to_string(),
            status: self.status,
            detail: None,
        })
    }

    async fn predict(&self, _request: &PredictRequest) -> Result<Prediction> {
        self.predict_calls.fetch_add(1, Ordering::SeqCst);
        self.prediction
            .clone()
            .ok_or_else(|| InsightsError::provider("scripted predict failure"))
    }

    async fn batch_predict(&self, request: &BatchPredictRequest) -> Result<BatchPrediction> {
        let mut batch = BatchPrediction::default();
        for (index, _) in request.items.iter().enumerate() {
            match self.prediction.clone() {
                Some(prediction) => batch.predictions.push(Some(prediction)),
                None => {
                    batch.predictions.push(None);
                    batch.errors.push((index, "scripted failure".to_string()));
                }
            }
        }
        Ok(batch)
    }

    async fn delete_model(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![])
    }
}

// ---------------------------------------------------------------------------
// Input builders
// ---------------------------------------------------------------------------

pub fn answer(id: ModelId, question_type: QuestionType, value: &str) -> AnswerInput {
    AnswerInput {
        question_id: id,
        question_type,
        value: value.to_string(),
        time_spent_secs: None,
    }
}

pub fn quality_input(answers: Vec<AnswerInput>, total_time_secs: f64) -> QualityInput {
    QualityInput {
        response_id: 101,
        survey_id: 7,
        answers,
        total_time_secs,
        device: DeviceType::Desktop,
    }
}

pub fn sentiment_input(text: &str) -> SentimentInput {
    SentimentInput {
        text: text.to_string(),
        question_text: None,
        survey_title: None,
        language: None,
        survey_id: Some(7),
        response_id: Some(101),
        answer_id: None,
    }
}

pub fn dropout_input() -> DropoutInput {
    DropoutInput {
        response_id: 101,
        survey_id: 7,
        current_page: 2,
        total_pages: 10,
        questions_answered: 6,
        total_questions: 20,
        elapsed_secs: 80.0,
        device: DeviceType::Desktop,
        hour_of_day: 15,
        day_of_week: 2,
        previous_dropouts: None,
    }
}
