//! Persistence seams for the insights engine.
//!
//! Two traits: [`ConfigStorage`] for the configuration rows the resolver
//! and CRUD surface work with, [`ScoreStorage`] for the immutable score
//! records and the aggregate statistics computed from them. The
//! production implementation backs both with one Postgres pool.

pub mod postgres;

pub use postgres::PgInsightsStorage;

use crate::error::Result;
use crate::model::{
    DropoutStats, FeatureConfig, FeatureConfigUpdate, FeatureKind, InterventionKind, ModelId,
    NewFeatureConfig, ProviderConfig, QualityStats, Recommendation, RiskLevel, Sentiment,
    SentimentStats, SurveyOverride, SurveyOverrideUpsert,
};
use async_trait::async_trait;
use serde_json::Value;

/// Insert shape for a quality score record.
#[derive(Debug, Clone)]
pub struct NewQualityScore {
    pub response_id: ModelId,
    pub survey_id: ModelId,
    pub feature_config_id: ModelId,
    pub score: f64,
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub flags: Value,
    pub processing_ms: i64,
    pub model_version: String,
}

/// Insert shape for a sentiment score record.
#[derive(Debug, Clone)]
pub struct NewSentimentScore {
    pub survey_id: Option<ModelId>,
    pub response_id: Option<ModelId>,
    pub answer_id: Option<ModelId>,
    pub feature_config_id: ModelId,
    pub sentiment: Sentiment,
    pub score: f64,
    pub confidence: f64,
    pub details: Value,
    pub processing_ms: i64,
    pub model_version: String,
}

/// Insert shape for a dropout prediction record.
#[derive(Debug, Clone)]
pub struct NewDropoutPrediction {
    pub response_id: ModelId,
    pub survey_id: ModelId,
    pub feature_config_id: ModelId,
    pub probability: f64,
    pub risk: RiskLevel,
    pub intervention_kind: InterventionKind,
    pub factors: Value,
    pub confidence: f64,
    pub current_page: i32,
    pub processing_ms: i64,
    pub model_version: String,
}

#[async_trait]
pub trait ConfigStorage: Send + Sync {
    async fn create_feature_config(&self, new: &NewFeatureConfig) -> Result<FeatureConfig>;

    async fn get_feature_config(&self, id: ModelId) -> Result<Option<FeatureConfig>>;

    async fn list_feature_configs(&self, kind: Option<FeatureKind>) -> Result<Vec<FeatureConfig>>;

    async fn update_feature_config(
        &self,
        id: ModelId,
        update: &FeatureConfigUpdate,
    ) -> Result<FeatureConfig>;

    /// Deleting a config cascades to its survey overrides.
    async fn delete_feature_config(&self, id: ModelId) -> Result<()>;

    async fn upsert_survey_override(
        &self,
        feature_config_id: ModelId,
        survey_id: ModelId,
        upsert: &SurveyOverrideUpsert,
    ) -> Result<SurveyOverride>;

    async fn get_survey_override(
        &self,
        feature_config_id: ModelId,
        survey_id: ModelId,
    ) -> Result<Option<SurveyOverride>>;

    async fn delete_survey_override(
        &self,
        feature_config_id: ModelId,
        survey_id: ModelId,
    ) -> Result<()>;

    /// Override joined to a config of the requested feature type for the
    /// survey, if any exists (enabled or not).
    async fn find_override_for_survey(
        &self,
        kind: FeatureKind,
        survey_id: ModelId,
    ) -> Result<Option<(FeatureConfig, SurveyOverride)>>;

    /// First enabled global config of the feature type.
    async fn first_enabled_global(&self, kind: FeatureKind) -> Result<Option<FeatureConfig>>;

    /// Provider row with decrypted credentials, as exposed by the
    /// platform's provider-config subsystem.
    async fn get_provider_config(&self, id: ModelId) -> Result<Option<ProviderConfig>>;
}

#[async_trait]
pub trait ScoreStorage: Send + Sync {
    async fn save_quality_score(&self, record: &NewQualityScore) -> Result<ModelId>;

    async fn save_sentiment_score(&self, record: &NewSentimentScore) -> Result<ModelId>;

    async fn save_dropout_prediction(&self, record: &NewDropoutPrediction) -> Result<ModelId>;

    /// The one allowed mutation on a score record.
    async fn mark_intervention_shown(&self, prediction_id: ModelId) -> Result<()>;

    async fn quality_stats(&self, survey_id: ModelId) -> Result<QualityStats>;

    async fn sentiment_stats(&self, survey_id: ModelId) -> Result<SentimentStats>;

    async fn dropout_stats(&self, survey_id: ModelId) -> Result<DropoutStats>;
}
