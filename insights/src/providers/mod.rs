//! Model-serving provider abstraction.
//!
//! A provider is an external backend the detectors can delegate scoring
//! to. Every public call retries transient failures with exponential
//! backoff; after the retries are exhausted the error is returned and
//! the calling detector falls back to its rule-based path.

pub mod cache;
pub mod factory;
pub mod http;
pub mod retry;

pub use cache::ProviderCache;
pub use factory::ProviderFactory;
pub use http::HttpServingProvider;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Closed model-lifecycle status set. Provider-native vocabularies are
/// mapped onto this in each implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    Training,
    Ready,
    Failed,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub status: ModelStatus,
    pub detail: Option<String>,
}

/// Submission for an asynchronous remote training job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSpec {
    pub model_name: String,
    pub dataset: Value,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    pub model: String,
    pub features: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub value: Value,
    pub confidence: Option<f64>,
    pub probabilities: Option<HashMap<String, f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPredictRequest {
    pub model: String,
    pub items: Vec<HashMap<String, Value>>,
}

/// Per-item batch outcome: `predictions[i]` is None exactly when
/// `errors` carries an entry for index `i`.
#[derive(Debug, Clone, Default)]
pub struct BatchPrediction {
    pub predictions: Vec<Option<Prediction>>,
    pub errors: Vec<(usize, String)>,
}

/// Result of a non-throwing connectivity probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionCheck {
    pub ok: bool,
    pub latency_ms: u64,
    pub message: Option<String>,
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Establish the connection; fails fast with a descriptive error if
    /// the backend is unreachable.
    async fn initialize(&self) -> Result<()>;

    /// Probe connectivity. Never returns an error; failures are reported
    /// inside the check.
    async fn test_connection(&self) -> ConnectionCheck;

    /// Submit an asynchronous training job. Returns a `training` status;
    /// poll [`ModelProvider::model_info`] for completion.
    async fn create_model(&self, spec: &TrainingSpec) -> Result<ModelInfo>;

    async fn model_info(&self, name: &str) -> Result<ModelInfo>;

    async fn is_model_ready(&self, name: &str) -> bool {
        matches!(
            self.model_info(name).await,
            Ok(info) if info.status == ModelStatus::Ready
        )
    }

    async fn predict(&self, request: &PredictRequest) -> Result<Prediction>;

    /// N predictions with per-item failure reporting; a bad item does
    /// not abort the batch.
    async fn batch_predict(&self, request: &BatchPredictRequest) -> Result<BatchPrediction>;

    async fn delete_model(&self, name: &str) -> Result<()>;

    async fn list_models(&self) -> Result<Vec<ModelInfo>>;
}
