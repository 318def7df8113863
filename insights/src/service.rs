//! Orchestration over resolution, detectors, providers and persistence.
//!
//! Each scoring call validates its input, resolves the effective config,
//! obtains a detector (cached per config and survey) and persists the
//! outcome. Persistence failures are logged and absorbed; the caller
//! still gets the score.

use crate::detectors::{DropoutDetector, ProviderBinding, QualityDetector, SentimentAnalyzer};
use crate::error::{InsightsError, Result};
use crate::model::{
    DropoutForecast, DropoutInput, DropoutStats, FeatureConfig, FeatureConfigUpdate, FeatureKind,
    ModelId, NewFeatureConfig, QualityAssessment, QualityInput, QualityStats, SentimentInput,
    SentimentResult, SentimentStats, SurveyOverride, SurveyOverrideUpsert,
};
use crate::providers::{ConnectionCheck, ModelProvider, ProviderCache, ProviderFactory};
use crate::resolver::{ConfigResolver, ResolvedConfig};
use crate::settings::DetectorSettings;
use crate::storage::{
    ConfigStorage, NewDropoutPrediction, NewQualityScore, NewSentimentScore, ScoreStorage,
};
use metrics::{counter, histogram};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Detector cache key: the config id plus the survey whose override (if
/// any) shaped the settings.
type DetectorKey = (ModelId, Option<ModelId>);

/// A scoring outcome together with how it was produced and stored.
/// `record_id` is None when persistence failed; the score itself is
/// still valid.
#[derive(Debug, Clone)]
pub struct Scored<T> {
    pub result: T,
    pub feature_config_id: ModelId,
    pub record_id: Option<ModelId>,
    pub processing_ms: i64,
}

/// Batch outcome for sentiment; per-item results keep request order.
#[derive(Debug)]
pub struct BatchScored {
    pub results: Vec<Result<SentimentResult>>,
    pub feature_config_id: ModelId,
    pub processing_ms: i64,
}

pub struct InsightsService {
    configs: Arc<dyn ConfigStorage>,
    scores: Arc<dyn ScoreStorage>,
    resolver: ConfigResolver,
    factory: Arc<ProviderFactory>,
    providers: ProviderCache,
    quality_detectors: Mutex<HashMap<DetectorKey, Arc<QualityDetector>>>,
    sentiment_analyzers: Mutex<HashMap<DetectorKey, Arc<SentimentAnalyzer>>>,
    dropout_detectors: Mutex<HashMap<DetectorKey, Arc<DropoutDetector>>>,
}

impl InsightsService {
    pub fn new(
        configs: Arc<dyn ConfigStorage>,
        scores: Arc<dyn ScoreStorage>,
        factory: Arc<ProviderFactory>,
        provider_cache_size: usize,
    ) -> Self {
        Self {
            resolver: ConfigResolver::new(configs.clone()),
            configs,
            scores,
            factory,
            providers: ProviderCache::new(provider_cache_size),
            quality_detectors: Mutex::new(HashMap::new()),
            sentiment_analyzers: Mutex::new(HashMap::new()),
            dropout_detectors: Mutex::new(HashMap::new()),
        }
    }

    // -----------------------------------------------------------------
    // Scoring
    // -----------------------------------------------------------------

    pub async fn assess_quality(
        &self,
        input: &QualityInput,
        config_id: Option<ModelId>,
    ) -> Result<Scored<QualityAssessment>> {
        input.validate().map_err(InsightsError::Validation)?;
        let resolved = self
            .resolve(FeatureKind::ResponseQuality, Some(input.survey_id), config_id)
            .await?;
        let detector = self
            .quality_detector(&resolved, cache_survey(config_id, Some(input.survey_id)))
            .await?;

        let started = Instant::now();
        let assessment = detector.assess(input).await;
        let processing_ms = started.elapsed().as_millis() as i64;
        record_scoring_metrics(FeatureKind::ResponseQuality, &assessment.model_version, processing_ms);

        let record_id = self
            .persist(
                "quality score",
                self.scores.save_quality_score(&NewQualityScore {
                    response_id: input.response_id,
                    survey_id: input.survey_id,
                    feature_config_id: resolved.config.id,
                    score: assessment.score,
                    recommendation: assessment.recommendation,
                    confidence: assessment.confidence,
                    flags: serde_json::to_value(&assessment.flags).unwrap_or_default(),
                    processing_ms,
                    model_version: assessment.model_version.clone(),
                }),
            )
            .await;

        Ok(Scored {
            result: assessment,
            feature_config_id: resolved.config.id,
            record_id,
            processing_ms,
        })
    }

    pub async fn analyze_sentiment(
        &self,
        input: &SentimentInput,
        config_id: Option<ModelId>,
    ) -> Result<Scored<SentimentResult>> {
        input.validate().map_err(InsightsError::Validation)?;
        let resolved = self
            .resolve(FeatureKind::SentimentAnalysis, input.survey_id, config_id)
            .await?;
        let analyzer = self
            .sentiment_analyzer(&resolved, cache_survey(config_id, input.survey_id))
            .await?;

        let started = Instant::now();
        let result = analyzer.analyze(input).await;
        let processing_ms = started.elapsed().as_millis() as i64;
        record_scoring_metrics(FeatureKind::SentimentAnalysis, &result.model_version, processing_ms);

        let record_id = self
            .persist(
                "sentiment score",
                self.scores
                    .save_sentiment_score(&sentiment_record(input, &resolved, &result, processing_ms)),
            )
            .await;

        Ok(Scored {
            result,
            feature_config_id: resolved.config.id,
            record_id,
            processing_ms,
        })
    }

    /// Batch sentiment. One bad item yields an error slot in that
    /// position; the rest of the batch is unaffected.
    pub async fn analyze_sentiment_batch(
        &self,
        inputs: &[SentimentInput],
        config_id: Option<ModelId>,
    ) -> Result<BatchScored> {
        if inputs.is_empty() {
            return Err(InsightsError::validation("batch must not be empty"));
        }
        let survey_id = inputs.iter().find_map(|i| i.survey_id);
        let resolved = self
            .resolve(FeatureKind::SentimentAnalysis, survey_id, config_id)
            .await?;
        if inputs.len() > resolved.config.batch_size as usize {
            return Err(InsightsError::Validation(format!(
                "batch of {} exceeds the configured limit of {}",
                inputs.len(),
                resolved.config.batch_size
            )));
        }
        let analyzer = self
            .sentiment_analyzer(&resolved, cache_survey(config_id, survey_id))
            .await?;

        let started = Instant::now();
        let results = analyzer.analyze_batch(inputs).await;
        let processing_ms = started.elapsed().as_millis() as i64;
        // batch items run concurrently; the per-record latency is the
        // batch's share, not the whole window
        let per_item_ms = processing_ms / inputs.len() as i64;

        for (input, result) in inputs.iter().zip(&results) {
            if let Ok(result) = result {
                record_scoring_metrics(
                    FeatureKind::SentimentAnalysis,
                    &result.model_version,
                    per_item_ms,
                );
                self.persist(
                    "sentiment score",
                    self.scores
                        .save_sentiment_score(&sentiment_record(input, &resolved, result, per_item_ms)),
                )
                .await;
            }
        }

        Ok(BatchScored {
            results,
            feature_config_id: resolved.config.id,
            processing_ms,
        })
    }

    pub async fn predict_dropout(
        &self,
        input: &DropoutInput,
        config_id: Option<ModelId>,
    ) -> Result<Scored<DropoutForecast>> {
        input.validate().map_err(InsightsError::Validation)?;
        let resolved = self
            .resolve(FeatureKind::DropoutPrediction, Some(input.survey_id), config_id)
            .await?;
        let detector = self
            .dropout_detector(&resolved, cache_survey(config_id, Some(input.survey_id)))
            .await?;

        let started = Instant::now();
        let forecast = detector.predict(input).await;
        let processing_ms = started.elapsed().as_millis() as i64;
        record_scoring_metrics(FeatureKind::DropoutPrediction, &forecast.model_version, processing_ms);

        let record_id = self
            .persist(
                "dropout prediction",
                self.scores.save_dropout_prediction(&NewDropoutPrediction {
                    response_id: input.response_id,
                    survey_id: input.survey_id,
                    feature_config_id: resolved.config.id,
                    probability: forecast.probability,
                    risk: forecast.risk,
                    intervention_kind: forecast.intervention.kind,
                    factors: serde_json::to_value(&forecast.factors).unwrap_or_default(),
                    confidence: forecast.confidence,
                    current_page: input.current_page as i32,
                    processing_ms,
                    model_version: forecast.model_version.clone(),
                }),
            )
            .await;

        Ok(Scored {
            result: forecast,
            feature_config_id: resolved.config.id,
            record_id,
            processing_ms,
        })
    }

    pub async fn mark_intervention_shown(&self, prediction_id: ModelId) -> Result<()> {
        self.scores.mark_intervention_shown(prediction_id).await?;
        counter!("insights_interventions_shown_total").increment(1);
        Ok(())
    }

    // -----------------------------------------------------------------
    // Statistics
    // -----------------------------------------------------------------

    pub async fn quality_stats(&self, survey_id: ModelId) -> Result<QualityStats> {
        self.scores.quality_stats(survey_id).await
    }

    pub async fn sentiment_stats(&self, survey_id: ModelId) -> Result<SentimentStats> {
        self.scores.sentiment_stats(survey_id).await
    }

    pub async fn dropout_stats(&self, survey_id: ModelId) -> Result<DropoutStats> {
        self.scores.dropout_stats(survey_id).await
    }

    // -----------------------------------------------------------------
    // Configuration surface
    // -----------------------------------------------------------------

    pub async fn create_config(&self, new: &NewFeatureConfig) -> Result<FeatureConfig> {
        // reject bags that would fail at resolution time
        DetectorSettings::from_bags(new.feature, &new.settings, None)?;
        if let Some(provider_id) = new.provider_config_id {
            self.require_provider_config(provider_id).await?;
        }
        let config = self.configs.create_feature_config(new).await?;
        info!(config_id = config.id, feature = %config.feature, name = %config.name, "feature config created");
        Ok(config)
    }

    pub async fn get_config(&self, id: ModelId) -> Result<FeatureConfig> {
        self.configs
            .get_feature_config(id)
            .await?
            .ok_or_else(|| InsightsError::NotFound(format!("feature config {id}")))
    }

    pub async fn list_configs(&self, kind: Option<FeatureKind>) -> Result<Vec<FeatureConfig>> {
        self.configs.list_feature_configs(kind).await
    }

    pub async fn update_config(
        &self,
        id: ModelId,
        update: &FeatureConfigUpdate,
    ) -> Result<FeatureConfig> {
        if update.settings.is_some() || update.provider_config_id.is_some() {
            let existing = self.get_config(id).await?;
            if let Some(settings) = &update.settings {
                DetectorSettings::from_bags(existing.feature, settings, None)?;
            }
            if let Some(Some(provider_id)) = update.provider_config_id {
                self.require_provider_config(provider_id).await?;
            }
        }
        let config = self.configs.update_feature_config(id, update).await?;
        self.invalidate_config(id);
        info!(config_id = id, "feature config updated");
        Ok(config)
    }

    pub async fn delete_config(&self, id: ModelId) -> Result<()> {
        self.configs.delete_feature_config(id).await?;
        self.invalidate_config(id);
        info!(config_id = id, "feature config deleted");
        Ok(())
    }

    pub async fn upsert_override(
        &self,
        config_id: ModelId,
        survey_id: ModelId,
        upsert: &SurveyOverrideUpsert,
    ) -> Result<SurveyOverride> {
        let config = self.get_config(config_id).await?;
        // the merged bag must still parse
        DetectorSettings::from_bags(config.feature, &config.settings, Some(&upsert.settings_patch))?;
        let result = self
            .configs
            .upsert_survey_override(config_id, survey_id, upsert)
            .await?;
        self.invalidate_survey(config_id, survey_id);
        info!(config_id, survey_id, enabled = upsert.enabled, "survey override upserted");
        Ok(result)
    }

    pub async fn get_override(
        &self,
        config_id: ModelId,
        survey_id: ModelId,
    ) -> Result<SurveyOverride> {
        self.configs
            .get_survey_override(config_id, survey_id)
            .await?
            .ok_or_else(|| {
                InsightsError::NotFound(format!(
                    "override for config {config_id} and survey {survey_id}"
                ))
            })
    }

    pub async fn delete_override(&self, config_id: ModelId, survey_id: ModelId) -> Result<()> {
        self.configs
            .delete_survey_override(config_id, survey_id)
            .await?;
        self.invalidate_survey(config_id, survey_id);
        info!(config_id, survey_id, "survey override deleted");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Providers and caches
    // -----------------------------------------------------------------

    /// Connectivity probe against a provider, bypassing the cache so a
    /// stale connection cannot mask an outage.
    pub async fn test_provider(&self, provider_id: ModelId) -> Result<ConnectionCheck> {
        let config = self.require_provider_config(provider_id).await?;
        let provider = self.factory.build(&config)?;
        Ok(provider.test_connection().await)
    }

    /// Drop all cached detectors and provider connections. The next
    /// scoring call rebuilds from storage.
    pub fn clear_caches(&self) {
        self.quality_detectors.lock().expect("detector cache poisoned").clear();
        self.sentiment_analyzers.lock().expect("detector cache poisoned").clear();
        self.dropout_detectors.lock().expect("detector cache poisoned").clear();
        self.providers.clear();
        info!("detector and provider caches cleared");
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    async fn resolve(
        &self,
        kind: FeatureKind,
        survey_id: Option<ModelId>,
        config_id: Option<ModelId>,
    ) -> Result<ResolvedConfig> {
        match config_id {
            Some(id) => self.resolver.resolve_by_id(kind, id).await,
            None => self
                .resolver
                .resolve(kind, survey_id)
                .await?
                .ok_or_else(|| {
                    InsightsError::FeatureDisabled(format!("{kind} is not enabled here"))
                }),
        }
    }

    async fn require_provider_config(
        &self,
        provider_id: ModelId,
    ) -> Result<crate::model::ProviderConfig> {
        self.configs
            .get_provider_config(provider_id)
            .await?
            .ok_or_else(|| InsightsError::NotFound(format!("provider config {provider_id}")))
    }

    /// Provider binding for a resolved config, if it references a model.
    /// Build or connection failures degrade to rule-based scoring.
    async fn binding_for(&self, resolved: &ResolvedConfig) -> Option<ProviderBinding> {
        let provider_id = resolved.config.provider_config_id?;
        let model_name = resolved.config.model_name.clone()?;

        let provider = match self.provider(provider_id).await {
            Ok(provider) => provider,
            Err(e) => {
                warn!(provider_id, error = %e, "provider unavailable, scoring falls back to rules");
                return None;
            }
        };
        Some(ProviderBinding {
            provider,
            model_name,
            timeout: Duration::from_secs(resolved.config.timeout_secs.max(1) as u64),
        })
    }

    async fn provider(&self, provider_id: ModelId) -> Result<Arc<dyn ModelProvider>> {
        if let Some(provider) = self.providers.get(provider_id) {
            return Ok(provider);
        }
        let config = self.require_provider_config(provider_id).await?;
        let provider = self.factory.build(&config)?;
        provider.initialize().await?;
        self.providers.insert(provider_id, provider.clone());
        Ok(provider)
    }

    async fn quality_detector(
        &self,
        resolved: &ResolvedConfig,
        survey_id: Option<ModelId>,
    ) -> Result<Arc<QualityDetector>> {
        let key = (resolved.config.id, survey_id);
        if let Some(detector) = self
            .quality_detectors
            .lock()
            .expect("detector cache poisoned")
            .get(&key)
        {
            return Ok(detector.clone());
        }
        let DetectorSettings::Quality(settings) = resolved.settings.clone() else {
            return Err(settings_shape_error(&resolved.config));
        };
        let detector = Arc::new(match self.binding_for(resolved).await {
            Some(binding) => QualityDetector::with_provider(settings, binding),
            None => QualityDetector::new(settings),
        });
        // concurrent builders race; last insert wins, both are equivalent
        self.quality_detectors
            .lock()
            .expect("detector cache poisoned")
            .insert(key, detector.clone());
        Ok(detector)
    }

    async fn sentiment_analyzer(
        &self,
        resolved: &ResolvedConfig,
        survey_id: Option<ModelId>,
    ) -> Result<Arc<SentimentAnalyzer>> {
        let key = (resolved.config.id, survey_id);
        if let Some(analyzer) = self
            .sentiment_analyzers
            .lock()
            .expect("detector cache poisoned")
            .get(&key)
        {
            return Ok(analyzer.clone());
        }
        let DetectorSettings::Sentiment(settings) = resolved.settings.clone() else {
            return Err(settings_shape_error(&resolved.config));
        };
        let analyzer = Arc::new(match self.binding_for(resolved).await {
            Some(binding) => SentimentAnalyzer::with_provider(settings, binding),
            None => SentimentAnalyzer::new(settings),
        });
        self.sentiment_analyzers
            .lock()
            .expect("detector cache poisoned")
            .insert(key, analyzer.clone());
        Ok(analyzer)
    }

    async fn dropout_detector(
        &self,
        resolved: &ResolvedConfig,
        survey_id: Option<ModelId>,
    ) -> Result<Arc<DropoutDetector>> {
        let key = (resolved.config.id, survey_id);
        if let Some(detector) = self
            .dropout_detectors
            .lock()
            .expect("detector cache poisoned")
            .get(&key)
        {
            return Ok(detector.clone());
        }
        let DetectorSettings::Dropout(settings) = resolved.settings.clone() else {
            return Err(settings_shape_error(&resolved.config));
        };
        let detector = Arc::new(match self.binding_for(resolved).await {
            Some(binding) => DropoutDetector::with_provider(settings, binding),
            None => DropoutDetector::new(settings),
        });
        self.dropout_detectors
            .lock()
            .expect("detector cache poisoned")
            .insert(key, detector.clone());
        Ok(detector)
    }

    fn invalidate_config(&self, config_id: ModelId) {
        self.quality_detectors
            .lock()
            .expect("detector cache poisoned")
            .retain(|(id, _), _| *id != config_id);
        self.sentiment_analyzers
            .lock()
            .expect("detector cache poisoned")
            .retain(|(id, _), _| *id != config_id);
        self.dropout_detectors
            .lock()
            .expect("detector cache poisoned")
            .retain(|(id, _), _| *id != config_id);
    }

    fn invalidate_survey(&self, config_id: ModelId, survey_id: ModelId) {
        let key = (config_id, Some(survey_id));
        self.quality_detectors
            .lock()
            .expect("detector cache poisoned")
            .remove(&key);
        self.sentiment_analyzers
            .lock()
            .expect("detector cache poisoned")
            .remove(&key);
        self.dropout_detectors
            .lock()
            .expect("detector cache poisoned")
            .remove(&key);
    }

    /// Await a save, demoting failure to a log line. Scoring results are
    /// reported to the caller even when the record is lost.
    async fn persist(
        &self,
        what: &str,
        save: impl std::future::Future<Output = Result<ModelId>>,
    ) -> Option<ModelId> {
        match save.await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(error = %e, "failed to persist {what}");
                counter!("insights_persist_failures_total").increment(1);
                None
            }
        }
    }
}

/// Cache detectors under the survey only when the survey can actually
/// shape them: an explicit config id bypasses override resolution.
fn cache_survey(config_id: Option<ModelId>, survey_id: Option<ModelId>) -> Option<ModelId> {
    if config_id.is_some() {
        None
    } else {
        survey_id
    }
}

fn settings_shape_error(config: &FeatureConfig) -> InsightsError {
    InsightsError::Internal(format!(
        "settings shape does not match feature {} for config {}",
        config.feature, config.id
    ))
}

fn sentiment_record(
    input: &SentimentInput,
    resolved: &ResolvedConfig,
    result: &SentimentResult,
    processing_ms: i64,
) -> NewSentimentScore {
    NewSentimentScore {
        survey_id: input.survey_id,
        response_id: input.response_id,
        answer_id: input.answer_id,
        feature_config_id: resolved.config.id,
        sentiment: result.sentiment,
        score: result.score,
        confidence: result.confidence,
        details: json!({
            "emotions": result.emotions,
            "keywords": result.keywords,
        }),
        processing_ms,
        model_version: result.model_version.clone(),
    }
}

fn record_scoring_metrics(kind: FeatureKind, model_version: &str, processing_ms: i64) {
    counter!(
        "insights_scores_total",
        "feature" => kind.to_string(),
        "model" => model_version.to_string()
    )
    .increment(1);
    histogram!("insights_scoring_duration_ms", "feature" => kind.to_string())
        .record(processing_ms as f64);
}
