//! Postgres-backed storage for configs, overrides and score records.

use crate::error::{InsightsError, Result};
use crate::model::{
    DropoutStats, FeatureConfig, FeatureConfigUpdate, FeatureKind, ModelId, NewFeatureConfig,
    PageProbability, ProviderConfig, QualityStats, RetryPolicy, SentimentStats, SurveyOverride,
    SurveyOverrideUpsert,
};
use crate::storage::{
    ConfigStorage, NewDropoutPrediction, NewQualityScore, NewSentimentScore, ScoreStorage,
};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::debug;

#[derive(Clone)]
pub struct PgInsightsStorage {
    pool: PgPool,
}

fn parse_enum<T: FromStr>(raw: &str, what: &str) -> Result<T> {
    raw.parse()
        .map_err(|_| InsightsError::Internal(format!("unexpected {what} value '{raw}' in storage")))
}

fn feature_config_from_row(row: &PgRow) -> Result<FeatureConfig> {
    Ok(FeatureConfig {
        id: row.get("id"),
        feature: parse_enum(row.get::<String, _>("feature").as_str(), "feature kind")?,
        name: row.get("name"),
        enabled: row.get("enabled"),
        is_global: row.get("is_global"),
        provider_config_id: row.get("provider_config_id"),
        model_name: row.get("model_name"),
        settings: row.get("settings"),
        confidence_threshold: row.get("confidence_threshold"),
        batch_size: row.get("batch_size"),
        timeout_secs: row.get("timeout_secs"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn survey_override_from_row(row: &PgRow) -> SurveyOverride {
    SurveyOverride {
        id: row.get("id"),
        feature_config_id: row.get("feature_config_id"),
        survey_id: row.get("survey_id"),
        enabled: row.get("enabled"),
        settings_patch: row.get("settings_patch"),
        created_at: row.get("created_at"),
    }
}

const FEATURE_CONFIG_COLUMNS: &str = "id, feature, name, enabled, is_global, provider_config_id, \
     model_name, settings, confidence_threshold, batch_size, timeout_secs, created_at, updated_at";

impl PgInsightsStorage {
    pub async fn new(database_url: &str) -> std::result::Result<Self, sqlx::Error> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the engine's tables when they do not exist yet.
    pub async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS provider_configs (
                id              BIGSERIAL PRIMARY KEY,
                name            TEXT NOT NULL,
                kind            TEXT NOT NULL,
                endpoint        TEXT NOT NULL,
                api_key         TEXT,
                enabled         BOOLEAN NOT NULL DEFAULT TRUE,
                max_attempts    INTEGER NOT NULL DEFAULT 3,
                base_delay_ms   BIGINT NOT NULL DEFAULT 250,
                timeout_secs    BIGINT NOT NULL DEFAULT 30,
                created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feature_configs (
                id                   BIGSERIAL PRIMARY KEY,
                feature              TEXT NOT NULL,
                name                 TEXT NOT NULL,
                enabled              BOOLEAN NOT NULL DEFAULT TRUE,
                is_global            BOOLEAN NOT NULL DEFAULT FALSE,
                provider_config_id   BIGINT REFERENCES provider_configs(id),
                model_name           TEXT,
                settings             JSONB NOT NULL DEFAULT '{}'::jsonb,
                confidence_threshold DOUBLE PRECISION NOT NULL DEFAULT 0.5,
                batch_size           INTEGER NOT NULL DEFAULT 25,
                timeout_secs         BIGINT NOT NULL DEFAULT 30,
                created_at           TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at           TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (feature, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS survey_overrides (
                id                 BIGSERIAL PRIMARY KEY,
                feature_config_id  BIGINT NOT NULL
                                   REFERENCES feature_configs(id) ON DELETE CASCADE,
                survey_id          BIGINT NOT NULL,
                enabled            BOOLEAN NOT NULL DEFAULT TRUE,
                settings_patch     JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at         TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (feature_config_id, survey_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quality_scores (
                id                 BIGSERIAL PRIMARY KEY,
                response_id        BIGINT NOT NULL,
                survey_id          BIGINT NOT NULL,
                feature_config_id  BIGINT NOT NULL,
                score              DOUBLE PRECISION NOT NULL,
                recommendation     TEXT NOT NULL,
                confidence         DOUBLE PRECISION NOT NULL,
                flags              JSONB NOT NULL DEFAULT '[]'::jsonb,
                processing_ms      BIGINT NOT NULL,
                model_version      TEXT NOT NULL,
                created_at         TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sentiment_scores (
                id                 BIGSERIAL PRIMARY KEY,
                survey_id          BIGINT,
                response_id        BIGINT,
                answer_id          BIGINT,
                feature_config_id  BIGINT NOT NULL,
                sentiment          TEXT NOT NULL,
                score              DOUBLE PRECISION NOT NULL,
                confidence         DOUBLE PRECISION NOT NULL,
                details            JSONB NOT NULL DEFAULT '{}'::jsonb,
                processing_ms      BIGINT NOT NULL,
                model_version      TEXT NOT NULL,
                created_at         TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dropout_predictions (
                id                 BIGSERIAL PRIMARY KEY,
                response_id        BIGINT NOT NULL,
                survey_id          BIGINT NOT NULL,
                feature_config_id  BIGINT NOT NULL,
                probability        DOUBLE PRECISION NOT NULL,
                risk               TEXT NOT NULL,
                intervention_kind  TEXT NOT NULL,
                factors            JSONB NOT NULL DEFAULT '[]'::jsonb,
                confidence         DOUBLE PRECISION NOT NULL,
                current_page       INTEGER NOT NULL,
                processing_ms      BIGINT NOT NULL,
                model_version      TEXT NOT NULL,
                intervention_shown BOOLEAN NOT NULL DEFAULT FALSE,
                created_at         TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("insights schema initialized");
        Ok(())
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}

#[async_trait]
impl ConfigStorage for PgInsightsStorage {
    async fn create_feature_config(&self, new: &NewFeatureConfig) -> Result<FeatureConfig> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO feature_configs
                (feature, name, enabled, is_global, provider_config_id, model_name,
                 settings, confidence_threshold, batch_size, timeout_secs)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {FEATURE_CONFIG_COLUMNS}
            "#
        ))
        .bind(new.feature.to_string())
        .bind(&new.name)
        .bind(new.enabled)
        .bind(new.is_global)
        .bind(new.provider_config_id)
        .bind(&new.model_name)
        .bind(&new.settings)
        .bind(new.confidence_threshold)
        .bind(new.batch_size)
        .bind(new.timeout_secs)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                InsightsError::Config(format!(
                    "a {} config named '{}' already exists",
                    new.feature, new.name
                ))
            } else {
                e.into()
            }
        })?;
        feature_config_from_row(&row)
    }

    async fn get_feature_config(&self, id: ModelId) -> Result<Option<FeatureConfig>> {
        let row = sqlx::query(&format!(
            "SELECT {FEATURE_CONFIG_COLUMNS} FROM feature_configs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(feature_config_from_row).transpose()
    }

    async fn list_feature_configs(&self, kind: Option<FeatureKind>) -> Result<Vec<FeatureConfig>> {
        let rows = match kind {
            Some(kind) => {
                sqlx::query(&format!(
                    "SELECT {FEATURE_CONFIG_COLUMNS} FROM feature_configs \
                     WHERE feature = $1 ORDER BY id"
                ))
                .bind(kind.to_string())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {FEATURE_CONFIG_COLUMNS} FROM feature_configs ORDER BY id"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(feature_config_from_row).collect()
    }

    async fn update_feature_config(
        &self,
        id: ModelId,
        update: &FeatureConfigUpdate,
    ) -> Result<FeatureConfig> {
        let existing = self
            .get_feature_config(id)
            .await?
            .ok_or_else(|| InsightsError::NotFound(format!("feature config {id}")))?;

        let name = update.name.clone().unwrap_or(existing.name);
        let enabled = update.enabled.unwrap_or(existing.enabled);
        let is_global = update.is_global.unwrap_or(existing.is_global);
        let provider_config_id = update
            .provider_config_id
            .unwrap_or(existing.provider_config_id);
        let model_name = update.model_name.clone().unwrap_or(existing.model_name);
        let settings = update.settings.clone().unwrap_or(existing.settings);
        let confidence_threshold = update
            .confidence_threshold
            .unwrap_or(existing.confidence_threshold);
        let batch_size = update.batch_size.unwrap_or(existing.batch_size);
        let timeout_secs = update.timeout_secs.unwrap_or(existing.timeout_secs);

        let row = sqlx::query(&format!(
            r#"
            UPDATE feature_configs SET
                name = $2, enabled = $3, is_global = $4, provider_config_id = $5,
                model_name = $6, settings = $7, confidence_threshold = $8,
                batch_size = $9, timeout_secs = $10, updated_at = NOW()
            WHERE id = $1
            RETURNING {FEATURE_CONFIG_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(name)
        .bind(enabled)
        .bind(is_global)
        .bind(provider_config_id)
        .bind(model_name)
        .bind(settings)
        .bind(confidence_threshold)
        .bind(batch_size)
        .bind(timeout_secs)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                InsightsError::Config("a config with that name already exists".to_string())
            } else {
                e.into()
            }
        })?;
        feature_config_from_row(&row)
    }

    async fn delete_feature_config(&self, id: ModelId) -> Result<()> {
        let result = sqlx::query("DELETE FROM feature_configs WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(InsightsError::NotFound(format!("feature config {id}")));
        }
        Ok(())
    }

    async fn upsert_survey_override(
        &self,
        feature_config_id: ModelId,
        survey_id: ModelId,
        upsert: &SurveyOverrideUpsert,
    ) -> Result<SurveyOverride> {
        // make a missing parent a clean not-found instead of an FK error
        self.get_feature_config(feature_config_id)
            .await?
            .ok_or_else(|| {
                InsightsError::NotFound(format!("feature config {feature_config_id}"))
            })?;

        let row = sqlx::query(
            r#"
            INSERT INTO survey_overrides (feature_config_id, survey_id, enabled, settings_patch)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (feature_config_id, survey_id)
            DO UPDATE SET enabled = EXCLUDED.enabled, settings_patch = EXCLUDED.settings_patch
            RETURNING id, feature_config_id, survey_id, enabled, settings_patch, created_at
            "#,
        )
        .bind(feature_config_id)
        .bind(survey_id)
        .bind(upsert.enabled)
        .bind(&upsert.settings_patch)
        .fetch_one(&self.pool)
        .await?;
        Ok(survey_override_from_row(&row))
    }

    async fn get_survey_override(
        &self,
        feature_config_id: ModelId,
        survey_id: ModelId,
    ) -> Result<Option<SurveyOverride>> {
        let row = sqlx::query(
            "SELECT id, feature_config_id, survey_id, enabled, settings_patch, created_at \
             FROM survey_overrides WHERE feature_config_id = $1 AND survey_id = $2",
        )
        .bind(feature_config_id)
        .bind(survey_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(survey_override_from_row))
    }

    async fn delete_survey_override(
        &self,
        feature_config_id: ModelId,
        survey_id: ModelId,
    ) -> Result<()> {
        let result =
            sqlx::query("DELETE FROM survey_overrides WHERE feature_config_id = $1 AND survey_id = $2")
                .bind(feature_config_id)
                .bind(survey_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
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
        let row = sqlx::query(
            r#"
            SELECT fc.id, fc.feature, fc.name, fc.enabled, fc.is_global,
                   fc.provider_config_id, fc.model_name, fc.settings,
                   fc.confidence_threshold, fc.batch_size, fc.timeout_secs,
                   fc.created_at, fc.updated_at,
                   so.id AS override_id, so.feature_config_id, so.survey_id,
                   so.enabled AS override_enabled, so.settings_patch,
                   so.created_at AS override_created_at
            FROM survey_overrides so
            JOIN feature_configs fc ON fc.id = so.feature_config_id
            WHERE fc.feature = $1 AND so.survey_id = $2
            ORDER BY so.id
            LIMIT 1
            "#,
        )
        .bind(kind.to_string())
        .bind(survey_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let config = feature_config_from_row(&row)?;
                let survey_override = SurveyOverride {
                    id: row.get("override_id"),
                    feature_config_id: row.get("feature_config_id"),
                    survey_id: row.get("survey_id"),
                    enabled: row.get("override_enabled"),
                    settings_patch: row.get("settings_patch"),
                    created_at: row.get("override_created_at"),
                };
                Ok(Some((config, survey_override)))
            }
            None => Ok(None),
        }
    }

    async fn first_enabled_global(&self, kind: FeatureKind) -> Result<Option<FeatureConfig>> {
        let row = sqlx::query(&format!(
            "SELECT {FEATURE_CONFIG_COLUMNS} FROM feature_configs \
             WHERE feature = $1 AND enabled AND is_global ORDER BY id LIMIT 1"
        ))
        .bind(kind.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(feature_config_from_row).transpose()
    }

    async fn get_provider_config(&self, id: ModelId) -> Result<Option<ProviderConfig>> {
        let row = sqlx::query(
            "SELECT id, name, kind, endpoint, api_key, enabled, max_attempts, \
             base_delay_ms, timeout_secs FROM provider_configs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| ProviderConfig {
            id: row.get("id"),
            name: row.get("name"),
            kind: row.get("kind"),
            endpoint: row.get("endpoint"),
            api_key: row.get("api_key"),
            enabled: row.get("enabled"),
            retry: RetryPolicy {
                max_attempts: row.get::<i32, _>("max_attempts").max(1) as u32,
                base_delay_ms: row.get::<i64, _>("base_delay_ms").max(0) as u64,
                timeout_secs: row.get::<i64, _>("timeout_secs").max(1) as u64,
            },
        }))
    }
}

#[async_trait]
impl ScoreStorage for PgInsightsStorage {
    async fn save_quality_score(&self, record: &NewQualityScore) -> Result<ModelId> {
        let row = sqlx::query(
            r#"
            INSERT INTO quality_scores
                (response_id, survey_id, feature_config_id, score, recommendation,
                 confidence, flags, processing_ms, model_version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(record.response_id)
        .bind(record.survey_id)
        .bind(record.feature_config_id)
        .bind(record.score)
        .bind(record.recommendation.to_string())
        .bind(record.confidence)
        .bind(&record.flags)
        .bind(record.processing_ms)
        .bind(&record.model_version)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    async fn save_sentiment_score(&self, record: &NewSentimentScore) -> Result<ModelId> {
        let row = sqlx::query(
            r#"
            INSERT INTO sentiment_scores
                (survey_id, response_id, answer_id, feature_config_id, sentiment,
                 score, confidence, details, processing_ms, model_version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(record.survey_id)
        .bind(record.response_id)
        .bind(record.answer_id)
        .bind(record.feature_config_id)
        .bind(record.sentiment.to_string())
        .bind(record.score)
        .bind(record.confidence)
        .bind(&record.details)
        .bind(record.processing_ms)
        .bind(&record.model_version)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    async fn save_dropout_prediction(&self, record: &NewDropoutPrediction) -> Result<ModelId> {
        let row = sqlx::query(
            r#"
            INSERT INTO dropout_predictions
                (response_id, survey_id, feature_config_id, probability, risk,
                 intervention_kind, factors, confidence, current_page,
                 processing_ms, model_version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(record.response_id)
        .bind(record.survey_id)
        .bind(record.feature_config_id)
        .bind(record.probability)
        .bind(record.risk.to_string())
        .bind(record.intervention_kind.to_string())
        .bind(&record.factors)
        .bind(record.confidence)
        .bind(record.current_page)
        .bind(record.processing_ms)
        .bind(&record.model_version)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    async fn mark_intervention_shown(&self, prediction_id: ModelId) -> Result<()> {
        let result =
            sqlx::query("UPDATE dropout_predictions SET intervention_shown = TRUE WHERE id = $1")
                .bind(prediction_id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(InsightsError::NotFound(format!(
                "dropout prediction {prediction_id}"
            )));
        }
        Ok(())
    }

    async fn quality_stats(&self, survey_id: ModelId) -> Result<QualityStats> {
        let summary = sqlx::query(
            "SELECT COUNT(*) AS total, COALESCE(AVG(score), 0) AS mean_score \
             FROM quality_scores WHERE survey_id = $1",
        )
        .bind(survey_id)
        .fetch_one(&self.pool)
        .await?;

        let recommendation_rows = sqlx::query(
            "SELECT recommendation, COUNT(*) AS count FROM quality_scores \
             WHERE survey_id = $1 GROUP BY recommendation",
        )
        .bind(survey_id)
        .fetch_all(&self.pool)
        .await?;

        let flag_rows = sqlx::query(
            "SELECT flag->>'kind' AS kind, COUNT(*) AS count \
             FROM quality_scores, jsonb_array_elements(flags) AS flag \
             WHERE survey_id = $1 GROUP BY flag->>'kind'",
        )
        .bind(survey_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(QualityStats {
            total: summary.get("total"),
            mean_score: summary.get("mean_score"),
            recommendations: histogram(&recommendation_rows, "recommendation"),
            flag_counts: histogram(&flag_rows, "kind"),
        })
    }

    async fn sentiment_stats(&self, survey_id: ModelId) -> Result<SentimentStats> {
        let summary = sqlx::query(
            "SELECT COUNT(*) AS total, COALESCE(AVG(score), 0) AS mean_score \
             FROM sentiment_scores WHERE survey_id = $1",
        )
        .bind(survey_id)
        .fetch_one(&self.pool)
        .await?;

        let sentiment_rows = sqlx::query(
            "SELECT sentiment, COUNT(*) AS count FROM sentiment_scores \
             WHERE survey_id = $1 GROUP BY sentiment",
        )
        .bind(survey_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(SentimentStats {
            total: summary.get("total"),
            mean_score: summary.get("mean_score"),
            sentiments: histogram(&sentiment_rows, "sentiment"),
        })
    }

    async fn dropout_stats(&self, survey_id: ModelId) -> Result<DropoutStats> {
        let summary = sqlx::query(
            r#"
            SELECT COUNT(*) AS total,
                   COALESCE(AVG(probability), 0) AS mean_probability,
                   COUNT(*) FILTER (WHERE intervention_shown) AS interventions_shown
            FROM dropout_predictions WHERE survey_id = $1
            "#,
        )
        .bind(survey_id)
        .fetch_one(&self.pool)
        .await?;

        let risk_rows = sqlx::query(
            "SELECT risk, COUNT(*) AS count FROM dropout_predictions \
             WHERE survey_id = $1 GROUP BY risk",
        )
        .bind(survey_id)
        .fetch_all(&self.pool)
        .await?;

        let page_rows = sqlx::query(
            "SELECT current_page, AVG(probability) AS mean_probability, COUNT(*) AS count \
             FROM dropout_predictions WHERE survey_id = $1 \
             GROUP BY current_page ORDER BY current_page",
        )
        .bind(survey_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(DropoutStats {
            total: summary.get("total"),
            mean_probability: summary.get("mean_probability"),
            risk_levels: histogram(&risk_rows, "risk"),
            interventions_shown: summary.get("interventions_shown"),
            per_page: page_rows
                .iter()
                .map(|row| PageProbability {
                    page: row.get("current_page"),
                    mean_probability: row.get("mean_probability"),
                    count: row.get("count"),
                })
                .collect(),
        })
    }
}

fn histogram(rows: &[PgRow], key_column: &str) -> HashMap<String, i64> {
    rows.iter()
        .map(|row| {
            (
                row.get::<String, _>(key_column),
                row.get::<i64, _>("count"),
            )
        })
        .collect()
}
