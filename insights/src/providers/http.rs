//! Generic REST model-serving provider.
//!
//! Talks to any backend exposing the plain model-server surface:
//! `POST /models`, `GET /models/{name}`, `POST /models/{name}/predict`,
//! `POST /models/{name}/predict-batch`, `DELETE /models/{name}`,
//! `GET /models` and `GET /health`. Authenticates with a bearer token
//! when the provider config carries one.

use crate::error::{InsightsError, Result};
use crate::model::ProviderConfig;
use crate::providers::retry::with_retry;
use crate::providers::{
    BatchPrediction, BatchPredictRequest, ConnectionCheck, ModelInfo, ModelProvider, ModelStatus,
    PredictRequest, Prediction, TrainingSpec,
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

pub struct HttpServingProvider {
    config: ProviderConfig,
    client: reqwest::Client,
    base: String,
}

/// Map a provider-native status word onto the closed status set.
pub fn map_provider_status(raw: &str) -> ModelStatus {
    match raw.to_ascii_lowercase().as_str() {
        "training" | "pending" | "creating" | "queued" => ModelStatus::Training,
        "ready" | "deployed" | "active" | "available" => ModelStatus::Ready,
        "failed" | "error" | "cancelled" => ModelStatus::Failed,
        _ => ModelStatus::Unknown,
    }
}

#[derive(Deserialize)]
struct WireModelInfo {
    name: String,
    status: String,
    #[serde(default)]
    detail: Option<String>,
}

impl WireModelInfo {
    fn into_model_info(self) -> ModelInfo {
        ModelInfo {
            status: map_provider_status(&self.status),
            name: self.name,
            detail: self.detail,
        }
    }
}

#[derive(Deserialize)]
struct WirePrediction {
    prediction: Value,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    probabilities: Option<HashMap<String, f64>>,
}

impl WirePrediction {
    fn into_prediction(self) -> Prediction {
        Prediction {
            value: self.prediction,
            confidence: self.confidence,
            probabilities: self.probabilities,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum WireBatchItem {
    Ok(WirePrediction),
    Err { error: String },
}

#[derive(Deserialize)]
struct WireBatchResponse {
    predictions: Vec<WireBatchItem>,
}

#[derive(Deserialize)]
struct WireModelList {
    models: Vec<WireModelInfo>,
}

impl HttpServingProvider {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let base = Url::parse(&config.endpoint)
            .map_err(|e| InsightsError::Config(format!("bad provider endpoint: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.retry.timeout_secs))
            .build()
            .map_err(|e| InsightsError::provider(format!("failed to build http client: {e}")))?;
        Ok(Self {
            base: base.as_str().trim_end_matches('/').to_string(),
            config,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .request(self.client.get(self.url(path)))
            .send()
            .await
            .map_err(|e| InsightsError::provider(format!("GET {path}: {e}")))?
            .error_for_status()
            .map_err(|e| InsightsError::provider(format!("GET {path}: {e}")))?;
        response
            .json()
            .await
            .map_err(|e| InsightsError::provider(format!("GET {path}: malformed response: {e}")))
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &impl serde::Serialize,
    ) -> Result<T> {
        let response = self
            .request(self.client.post(self.url(path)))
            .json(body)
            .send()
            .await
            .map_err(|e| InsightsError::provider(format!("POST {path}: {e}")))?
            .error_for_status()
            .map_err(|e| InsightsError::provider(format!("POST {path}: {e}")))?;
        response
            .json()
            .await
            .map_err(|e| InsightsError::provider(format!("POST {path}: malformed response: {e}")))
    }
}

#[async_trait]
impl ModelProvider for HttpServingProvider {
    async fn initialize(&self) -> Result<()> {
        let check = self.test_connection().await;
        if check.ok {
            debug!(
                provider = %self.config.name,
                latency_ms = check.latency_ms,
                "provider connection established"
            );
            Ok(())
        } else {
            Err(InsightsError::provider(format!(
                "provider '{}' unreachable at {}: {}",
                self.config.name,
                self.config.endpoint,
                check.message.unwrap_or_else(|| "no detail".to_string())
            )))
        }
    }

    async fn test_connection(&self) -> ConnectionCheck {
        let started = Instant::now();
        let outcome = self
            .request(self.client.get(self.url("health")))
            .send()
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(response) if response.status().is_success() => ConnectionCheck {
                ok: true,
                latency_ms,
                message: None,
            },
            Ok(response) => ConnectionCheck {
                ok: false,
                latency_ms,
                message: Some(format!("health returned {}", response.status())),
            },
            Err(e) => ConnectionCheck {
                ok: false,
                latency_ms,
                message: Some(e.to_string()),
            },
        }
    }

    async fn create_model(&self, spec: &TrainingSpec) -> Result<ModelInfo> {
        with_retry(&self.config.retry, "create_model", |_| async {
            let info: WireModelInfo = self.post_json("models", spec).await?;
            Ok(info.into_model_info())
        })
        .await
    }

    async fn model_info(&self, name: &str) -> Result<ModelInfo> {
        with_retry(&self.config.retry, "model_info", |_| async {
            let info: WireModelInfo = self.get_json(&format!("models/{name}")).await?;
            Ok(info.into_model_info())
        })
        .await
    }

    async fn predict(&self, request: &PredictRequest) -> Result<Prediction> {
        with_retry(&self.config.retry, "predict", |_| async {
            let wire: WirePrediction = self
                .post_json(
                    &format!("models/{}/predict", request.model),
                    &request.features,
                )
                .await?;
            Ok(wire.into_prediction())
        })
        .await
    }

    async fn batch_predict(&self, request: &BatchPredictRequest) -> Result<BatchPrediction> {
        with_retry(&self.config.retry, "batch_predict", |_| async {
            let wire: WireBatchResponse = self
                .post_json(
                    &format!("models/{}/predict-batch", request.model),
                    &serde_json::json!({ "items": request.items }),
                )
                .await?;
            let mut batch = BatchPrediction::default();
            for (index, item) in wire.predictions.into_iter().enumerate() {
                match item {
                    WireBatchItem::Ok(p) => batch.predictions.push(Some(p.into_prediction())),
                    WireBatchItem::Err { error } => {
                        batch.predictions.push(None);
                        batch.errors.push((index, error));
                    }
                }
            }
            Ok(batch)
        })
        .await
    }

    async fn delete_model(&self, name: &str) -> Result<()> {
        with_retry(&self.config.retry, "delete_model", |_| async {
            self.request(self.client.delete(self.url(&format!("models/{name}"))))
                .send()
                .await
                .map_err(|e| InsightsError::provider(format!("DELETE models/{name}: {e}")))?
                .error_for_status()
                .map_err(|e| InsightsError::provider(format!("DELETE models/{name}: {e}")))?;
            Ok(())
        })
        .await
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        with_retry(&self.config.retry, "list_models", |_| async {
            let wire: WireModelList = self.get_json("models").await?;
            Ok(wire
                .models
                .into_iter()
                .map(WireModelInfo::into_model_info)
                .collect())
        })
        .await
    }
}
