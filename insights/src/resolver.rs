//! Effective-configuration resolution.
//!
//! For (feature type, survey): a survey override wins. A disabled
//! override turns the feature off for that survey; an enabled one has
//! its settings patch merged over the parent config. With no override
//! the first enabled global config of the type applies.

use crate::error::{InsightsError, Result};
use crate::model::{FeatureConfig, FeatureKind, ModelId};
use crate::settings::DetectorSettings;
use crate::storage::ConfigStorage;
use std::sync::Arc;
use tracing::debug;

/// A feature config with its settings bag already merged and parsed.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config: FeatureConfig,
    pub settings: DetectorSettings,
}

pub struct ConfigResolver {
    storage: Arc<dyn ConfigStorage>,
}

impl ConfigResolver {
    pub fn new(storage: Arc<dyn ConfigStorage>) -> Self {
        Self { storage }
    }

    /// Effective config for (feature type, survey). `Ok(None)` means the
    /// feature is unavailable: either explicitly disabled for the survey
    /// or no enabled global config exists.
    pub async fn resolve(
        &self,
        kind: FeatureKind,
        survey_id: Option<ModelId>,
    ) -> Result<Option<ResolvedConfig>> {
        if let Some(survey_id) = survey_id {
            if let Some((config, survey_override)) = self
                .storage
                .find_override_for_survey(kind, survey_id)
                .await?
            {
                if !survey_override.enabled {
                    debug!(survey_id, %kind, "feature explicitly disabled by survey override");
                    return Ok(None);
                }
                let settings = DetectorSettings::from_bags(
                    kind,
                    &config.settings,
                    Some(&survey_override.settings_patch),
                )?;
                return Ok(Some(ResolvedConfig { config, settings }));
            }
        }

        match self.storage.first_enabled_global(kind).await? {
            Some(config) => {
                let settings = DetectorSettings::from_bags(kind, &config.settings, None)?;
                Ok(Some(ResolvedConfig { config, settings }))
            }
            None => Ok(None),
        }
    }

    /// Explicit config id bypasses resolution entirely; the config must
    /// still exist, match the feature type and be enabled.
    pub async fn resolve_by_id(
        &self,
        kind: FeatureKind,
        config_id: ModelId,
    ) -> Result<ResolvedConfig> {
        let config = self
            .storage
            .get_feature_config(config_id)
            .await?
            .ok_or_else(|| InsightsError::NotFound(format!("feature config {config_id}")))?;
        if config.feature != kind {
            return Err(InsightsError::Config(format!(
                "config {config_id} is a {} config, not {kind}",
                config.feature
            )));
        }
        if !config.enabled {
            return Err(InsightsError::FeatureDisabled(format!(
                "config {config_id} is disabled"
            )));
        }
        let settings = DetectorSettings::from_bags(kind, &config.settings, None)?;
        Ok(ResolvedConfig { config, settings })
    }
}
