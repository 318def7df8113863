//! HTTP surface for the insights engine.

use crate::error::InsightsError;
use crate::model::{
    DropoutInput, FeatureConfigUpdate, FeatureKind, ModelId, NewFeatureConfig, QualityInput,
    SentimentInput, SurveyOverrideUpsert,
};
use crate::service::{InsightsService, Scored};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use common::config::BackendConfig;
use http::header;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::error::Error;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<InsightsService>,
}

impl IntoResponse for InsightsError {
    fn into_response(self) -> Response {
        let status = match &self {
            InsightsError::Validation(_) | InsightsError::Config(_) => StatusCode::BAD_REQUEST,
            InsightsError::NotFound(_) => StatusCode::NOT_FOUND,
            InsightsError::FeatureDisabled(_) => StatusCode::CONFLICT,
            InsightsError::Database(_)
            | InsightsError::Provider(_)
            | InsightsError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct QualityRequest {
    #[serde(flatten)]
    input: QualityInput,
    config_id: Option<ModelId>,
}

#[derive(Debug, Deserialize)]
struct SentimentRequest {
    #[serde(flatten)]
    input: SentimentInput,
    config_id: Option<ModelId>,
}

#[derive(Debug, Deserialize)]
struct SentimentBatchRequest {
    inputs: Vec<SentimentInput>,
    config_id: Option<ModelId>,
}

#[derive(Debug, Deserialize)]
struct DropoutRequest {
    #[serde(flatten)]
    input: DropoutInput,
    config_id: Option<ModelId>,
}

#[derive(Debug, Deserialize)]
struct ListConfigsParams {
    feature: Option<FeatureKind>,
}

#[derive(Debug, Serialize)]
struct ScoredResponse<T: Serialize> {
    #[serde(flatten)]
    result: T,
    feature_config_id: ModelId,
    record_id: Option<ModelId>,
    processing_ms: i64,
}

impl<T: Serialize> From<Scored<T>> for ScoredResponse<T> {
    fn from(scored: Scored<T>) -> Self {
        Self {
            result: scored.result,
            feature_config_id: scored.feature_config_id,
            record_id: scored.record_id,
            processing_ms: scored.processing_ms,
        }
    }
}

async fn assess_quality(
    State(state): State<AppState>,
    Json(request): Json<QualityRequest>,
) -> Result<Response, InsightsError> {
    let scored = state
        .service
        .assess_quality(&request.input, request.config_id)
        .await?;
    Ok(Json(ScoredResponse::from(scored)).into_response())
}

async fn analyze_sentiment(
    State(state): State<AppState>,
    Json(request): Json<SentimentRequest>,
) -> Result<Response, InsightsError> {
    let scored = state
        .service
        .analyze_sentiment(&request.input, request.config_id)
        .await?;
    Ok(Json(ScoredResponse::from(scored)).into_response())
}

async fn analyze_sentiment_batch(
    State(state): State<AppState>,
    Json(request): Json<SentimentBatchRequest>,
) -> Result<Response, InsightsError> {
    let batch = state
        .service
        .analyze_sentiment_batch(&request.inputs, request.config_id)
        .await?;
    let results: Vec<serde_json::Value> = batch
        .results
        .iter()
        .map(|item| match item {
            Ok(result) => serde_json::to_value(result).unwrap_or_default(),
            Err(e) => json!({ "error": e.to_string() }),
        })
        .collect();
    Ok(Json(json!({
        "results": results,
        "feature_config_id": batch.feature_config_id,
        "processing_ms": batch.processing_ms,
    }))
    .into_response())
}

async fn predict_dropout(
    State(state): State<AppState>,
    Json(request): Json<DropoutRequest>,
) -> Result<Response, InsightsError> {
    let scored = state
        .service
        .predict_dropout(&request.input, request.config_id)
        .await?;
    Ok(Json(ScoredResponse::from(scored)).into_response())
}

async fn intervention_shown(
    State(state): State<AppState>,
    Path(prediction_id): Path<ModelId>,
) -> Result<StatusCode, InsightsError> {
    state.service.mark_intervention_shown(prediction_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn quality_stats(
    State(state): State<AppState>,
    Path(survey_id): Path<ModelId>,
) -> Result<Response, InsightsError> {
    Ok(Json(state.service.quality_stats(survey_id).await?).into_response())
}

async fn sentiment_stats(
    State(state): State<AppState>,
    Path(survey_id): Path<ModelId>,
) -> Result<Response, InsightsError> {
    Ok(Json(state.service.sentiment_stats(survey_id).await?).into_response())
}

async fn dropout_stats(
    State(state): State<AppState>,
    Path(survey_id): Path<ModelId>,
) -> Result<Response, InsightsError> {
    Ok(Json(state.service.dropout_stats(survey_id).await?).into_response())
}

async fn create_config(
    State(state): State<AppState>,
    Json(new): Json<NewFeatureConfig>,
) -> Result<Response, InsightsError> {
    let config = state.service.create_config(&new).await?;
    Ok((StatusCode::CREATED, Json(config)).into_response())
}

async fn list_configs(
    State(state): State<AppState>,
    Query(params): Query<ListConfigsParams>,
) -> Result<Response, InsightsError> {
    Ok(Json(state.service.list_configs(params.feature).await?).into_response())
}

async fn get_config(
    State(state): State<AppState>,
    Path(id): Path<ModelId>,
) -> Result<Response, InsightsError> {
    Ok(Json(state.service.get_config(id).await?).into_response())
}

async fn update_config(
    State(state): State<AppState>,
    Path(id): Path<ModelId>,
    Json(update): Json<FeatureConfigUpdate>,
) -> Result<Response, InsightsError> {
    Ok(Json(state.service.update_config(id, &update).await?).into_response())
}

async fn delete_config(
    State(state): State<AppState>,
    Path(id): Path<ModelId>,
) -> Result<StatusCode, InsightsError> {
    state.service.delete_config(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn upsert_override(
    State(state): State<AppState>,
    Path((config_id, survey_id)): Path<(ModelId, ModelId)>,
    Json(upsert): Json<SurveyOverrideUpsert>,
) -> Result<Response, InsightsError> {
    let result = state
        .service
        .upsert_override(config_id, survey_id, &upsert)
        .await?;
    Ok(Json(result).into_response())
}

async fn get_override(
    State(state): State<AppState>,
    Path((config_id, survey_id)): Path<(ModelId, ModelId)>,
) -> Result<Response, InsightsError> {
    Ok(Json(state.service.get_override(config_id, survey_id).await?).into_response())
}

async fn delete_override(
    State(state): State<AppState>,
    Path((config_id, survey_id)): Path<(ModelId, ModelId)>,
) -> Result<StatusCode, InsightsError> {
    state.service.delete_override(config_id, survey_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn test_provider(
    State(state): State<AppState>,
    Path(provider_id): Path<ModelId>,
) -> Result<Response, InsightsError> {
    Ok(Json(state.service.test_provider(provider_id).await?).into_response())
}

async fn clear_caches(State(state): State<AppState>) -> StatusCode {
    state.service.clear_caches();
    StatusCode::NO_CONTENT
}

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK").into_response()
}

pub fn router(service: Arc<InsightsService>, cors_origin: Option<&str>) -> Result<Router, Box<dyn Error + Send + Sync>> {
    let cors = match cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin.parse::<header::HeaderValue>()?)
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let state = AppState { service };
    Ok(Router::new()
        .route("/api/insights/quality/assess", post(assess_quality))
        .route("/api/insights/sentiment/analyze", post(analyze_sentiment))
        .route(
            "/api/insights/sentiment/analyze-batch",
            post(analyze_sentiment_batch),
        )
        .route("/api/insights/dropout/predict", post(predict_dropout))
        .route(
            "/api/insights/dropout/{id}/intervention-shown",
            post(intervention_shown),
        )
        .route(
            "/api/insights/surveys/{survey_id}/quality/stats",
            get(quality_stats),
        )
        .route(
            "/api/insights/surveys/{survey_id}/sentiment/stats",
            get(sentiment_stats),
        )
        .route(
            "/api/insights/surveys/{survey_id}/dropout/stats",
            get(dropout_stats),
        )
        .route("/api/insights/configs", get(list_configs).post(create_config))
        .route(
            "/api/insights/configs/{id}",
            get(get_config).put(update_config).delete(delete_config),
        )
        .route(
            "/api/insights/configs/{id}/overrides/{survey_id}",
            get(get_override).put(upsert_override).delete(delete_override),
        )
        .route("/api/insights/providers/{id}/test", post(test_provider))
        .route("/api/insights/cache/clear", post(clear_caches))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state))
}

pub async fn run_backend(
    config: &BackendConfig,
    service: Arc<InsightsService>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let app = router(service, config.cors_origin.as_deref())?;

    tracing::info!("Starting insights backend at {}", config.server_address);
    let listener = tokio::net::TcpListener::bind(&config.server_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
