//! Provider construction, keyed by provider-kind tag.
//!
//! Third-party provider kinds register a builder under their tag instead
//! of extending a closed match, so new backends plug in without touching
//! this module.

use crate::error::{InsightsError, Result};
use crate::model::ProviderConfig;
use crate::providers::{HttpServingProvider, ModelProvider};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub type ProviderBuilder =
    Arc<dyn Fn(&ProviderConfig) -> Result<Arc<dyn ModelProvider>> + Send + Sync>;

pub struct ProviderFactory {
    builders: RwLock<HashMap<String, ProviderBuilder>>,
}

impl ProviderFactory {
    pub fn new() -> Self {
        Self {
            builders: RwLock::new(HashMap::new()),
        }
    }

    /// Factory with the built-in provider kinds registered.
    pub fn with_defaults() -> Self {
        let factory = Self::new();
        factory.register("http", |config| {
            Ok(Arc::new(HttpServingProvider::new(config.clone())?) as Arc<dyn ModelProvider>)
        });
        factory
    }

    pub fn register<F>(&self, kind: &str, builder: F)
    where
        F: Fn(&ProviderConfig) -> Result<Arc<dyn ModelProvider>> + Send + Sync + 'static,
    {
        self.builders
            .write()
            .expect("provider registry poisoned")
            .insert(kind.to_string(), Arc::new(builder));
    }

    pub fn build(&self, config: &ProviderConfig) -> Result<Arc<dyn ModelProvider>> {
        if !config.enabled {
            return Err(InsightsError::Config(format!(
                "provider '{}' is disabled",
                config.name
            )));
        }
        let builder = self
            .builders
            .read()
            .expect("provider registry poisoned")
            .get(&config.kind)
            .cloned()
            .ok_or_else(|| {
                InsightsError::Config(format!("unknown provider kind '{}'", config.kind))
            })?;
        builder(config)
    }
}

impl Default for ProviderFactory {
    fn default() -> Self {
        Self::with_defaults()
    }
}
