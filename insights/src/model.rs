use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum_macros::{Display, EnumString};

pub type ModelId = i64;

/// The three scoring features the engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FeatureKind {
    ResponseQuality,
    SentimentAnalysis,
    DropoutPrediction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceType {
    Desktop,
    Tablet,
    Mobile,
    Unknown,
}

// ---------------------------------------------------------------------------
// Configuration rows
// ---------------------------------------------------------------------------

/// Retry/timeout policy for calls against a model-serving provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 250,
            timeout_secs: 30,
        }
    }
}

/// A model-serving backend the platform can delegate scoring to.
/// Credential material arrives here already decrypted; the provider-config
/// CRUD itself lives outside this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: ModelId,
    pub name: String,
    /// Provider-kind tag, resolved through the factory registry ("http", ...).
    pub kind: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub enabled: bool,
    #[serde(default)]
    pub retry: RetryPolicy,
}

/// One named configuration row per feature type.
///
/// Global configs are the fallback defaults; non-global configs are only
/// reachable through an explicit config id. `settings` is the raw
/// feature-type-specific bag, parsed into [`crate::settings::DetectorSettings`]
/// at resolution time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub id: ModelId,
    pub feature: FeatureKind,
    pub name: String,
    pub enabled: bool,
    pub is_global: bool,
    pub provider_config_id: Option<ModelId>,
    pub model_name: Option<String>,
    pub settings: serde_json::Value,
    pub confidence_threshold: f64,
    pub batch_size: i32,
    pub timeout_secs: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payload for creating a feature config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFeatureConfig {
    pub feature: FeatureKind,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub is_global: bool,
    pub provider_config_id: Option<ModelId>,
    pub model_name: Option<String>,
    #[serde(default)]
    pub settings: serde_json::Value,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    #[serde(default = "default_batch_size")]
    pub batch_size: i32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: i64,
}

fn default_true() -> bool {
    true
}

fn default_confidence_threshold() -> f64 {
    0.5
}

fn default_batch_size() -> i32 {
    25
}

fn default_timeout_secs() -> i64 {
    30
}

/// Partial update for a feature config; absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureConfigUpdate {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub is_global: Option<bool>,
    pub provider_config_id: Option<Option<ModelId>>,
    pub model_name: Option<Option<String>>,
    pub settings: Option<serde_json::Value>,
    pub confidence_threshold: Option<f64>,
    pub batch_size: Option<i32>,
    pub timeout_secs: Option<i64>,
}

/// Per-survey exception to a feature config, unique per
/// (feature_config_id, survey_id). `enabled = false` switches the feature
/// off for that survey outright; otherwise `settings_patch` is merged over
/// the parent config's settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyOverride {
    pub id: ModelId,
    pub feature_config_id: ModelId,
    pub survey_id: ModelId,
    pub enabled: bool,
    pub settings_patch: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveyOverrideUpsert {
    pub enabled: bool,
    #[serde(default)]
    pub settings_patch: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Response quality
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum QuestionType {
    SingleChoice,
    MultipleChoice,
    Dropdown,
    Scale,
    Rating,
    Nps,
    Text,
    Number,
    Date,
    Boolean,
}

impl QuestionType {
    /// Choice-style questions considered by the straight-lining check.
    pub fn is_choice(&self) -> bool {
        matches!(
            self,
            QuestionType::SingleChoice | QuestionType::MultipleChoice | QuestionType::Dropdown
        )
    }

    /// Numeric-scale questions considered by the low-variance check.
    pub fn is_numeric_scale(&self) -> bool {
        matches!(
            self,
            QuestionType::Scale | QuestionType::Rating | QuestionType::Nps
        )
    }

    pub fn is_free_text(&self) -> bool {
        matches!(self, QuestionType::Text)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerInput {
    pub question_id: ModelId,
    pub question_type: QuestionType,
    pub value: String,
    pub time_spent_secs: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityInput {
    pub response_id: ModelId,
    pub survey_id: ModelId,
    pub answers: Vec<AnswerInput>,
    pub total_time_secs: f64,
    #[serde(default = "default_device")]
    pub device: DeviceType,
}

fn default_device() -> DeviceType {
    DeviceType::Unknown
}

impl QualityInput {
    pub fn validate(&self) -> Result<(), String> {
        if self.answers.is_empty() {
            return Err("answers must not be empty".to_string());
        }
        if self.total_time_secs < 0.0 {
            return Err("total_time_secs must be non-negative".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FlagKind {
    Speeding,
    StraightLining,
    LowVariance,
    Gibberish,
    PatternDetected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Recommendation {
    Accept,
    Review,
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityFlag {
    pub kind: FlagKind,
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityAssessment {
    /// 0..=100, higher is better.
    pub score: f64,
    pub flags: Vec<QualityFlag>,
    pub recommendation: Recommendation,
    pub confidence: f64,
    /// "rule-based" or the remote model name.
    pub model_version: String,
}

// ---------------------------------------------------------------------------
// Sentiment
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentInput {
    pub text: String,
    pub question_text: Option<String>,
    pub survey_title: Option<String>,
    pub language: Option<String>,
    pub survey_id: Option<ModelId>,
    pub response_id: Option<ModelId>,
    pub answer_id: Option<ModelId>,
}

impl SentimentInput {
    pub fn validate(&self) -> Result<(), String> {
        if self.text.trim().is_empty() {
            return Err("text must not be empty".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
    Mixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentResult {
    pub sentiment: Sentiment,
    /// -1.0..=1.0, negative to positive.
    pub score: f64,
    pub confidence: f64,
    pub emotions: Option<HashMap<String, f64>>,
    pub keywords: Vec<String>,
    pub model_version: String,
}

// ---------------------------------------------------------------------------
// Drop-out prediction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropoutInput {
    pub response_id: ModelId,
    pub survey_id: ModelId,
    pub current_page: u32,
    pub total_pages: u32,
    pub questions_answered: u32,
    pub total_questions: u32,
    pub elapsed_secs: f64,
    #[serde(default = "default_device")]
    pub device: DeviceType,
    /// 0..=23, respondent-local.
    pub hour_of_day: u8,
    /// 0 = Monday .. 6 = Sunday.
    pub day_of_week: u8,
    pub previous_dropouts: Option<u32>,
}

impl DropoutInput {
    pub fn validate(&self) -> Result<(), String> {
        if self.total_pages == 0 {
            return Err("total_pages must be at least 1".to_string());
        }
        if self.total_questions == 0 {
            return Err("total_questions must be at least 1".to_string());
        }
        if self.hour_of_day > 23 {
            return Err("hour_of_day must be 0..=23".to_string());
        }
        if self.day_of_week > 6 {
            return Err("day_of_week must be 0..=6".to_string());
        }
        Ok(())
    }

    pub fn progress_ratio(&self) -> f64 {
        f64::from(self.current_page) / f64::from(self.total_pages)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InterventionKind {
    None,
    ProgressBar,
    Encouragement,
    Simplify,
    SaveProgress,
    TimeEstimate,
    BreakSuggestion,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intervention {
    pub kind: InterventionKind,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    /// Signed impact in -1.0..=1.0; positive raises drop-out risk.
    pub impact: f64,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropoutForecast {
    /// 0.0..=1.0.
    pub probability: f64,
    pub risk: RiskLevel,
    pub intervention: Intervention,
    pub confidence: f64,
    pub factors: Vec<RiskFactor>,
    pub model_version: String,
}

// ---------------------------------------------------------------------------
// Persisted score records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityScoreRecord {
    pub id: ModelId,
    pub response_id: ModelId,
    pub survey_id: ModelId,
    pub feature_config_id: ModelId,
    pub score: f64,
    pub recommendation: Recommendation,
    pub confidence: f64,
    pub flags: serde_json::Value,
    pub processing_ms: i64,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentScoreRecord {
    pub id: ModelId,
    pub survey_id: Option<ModelId>,
    pub response_id: Option<ModelId>,
    pub answer_id: Option<ModelId>,
    pub feature_config_id: ModelId,
    pub sentiment: Sentiment,
    pub score: f64,
    pub confidence: f64,
    /// Emotions and keywords, as produced by the analyzer.
    pub details: serde_json::Value,
    pub processing_ms: i64,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DropoutPredictionRecord {
    pub id: ModelId,
    pub response_id: ModelId,
    pub survey_id: ModelId,
    pub feature_config_id: ModelId,
    pub probability: f64,
    pub risk: RiskLevel,
    pub intervention_kind: InterventionKind,
    pub factors: serde_json::Value,
    pub confidence: f64,
    pub current_page: i32,
    pub processing_ms: i64,
    pub model_version: String,
    /// The single allowed mutation: set once after the respondent actually
    /// saw the suggested intervention.
    pub intervention_shown: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Aggregate statistics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityStats {
    pub total: i64,
    pub mean_score: f64,
    pub recommendations: HashMap<String, i64>,
    pub flag_counts: HashMap<String, i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SentimentStats {
    pub total: i64,
    pub mean_score: f64,
    pub sentiments: HashMap<String, i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageProbability {
    pub page: i32,
    pub mean_probability: f64,
    pub count: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DropoutStats {
    pub total: i64,
    pub mean_probability: f64,
    pub risk_levels: HashMap<String, i64>,
    pub interventions_shown: i64,
    pub per_page: Vec<PageProbability>,
}
