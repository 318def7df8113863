use serde::Deserialize;
use std::{error::Error, fs};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CommonConfig {
    pub project_name: String,
    pub database_url: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BackendConfig {
    pub server_address: String,
    pub log_level: String,
    #[serde(default)]
    pub cors_origin: Option<String>,
}

/// Tunables for the scoring engine itself. Everything here has a
/// serde default so a minimal config file stays minimal.
#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_provider_cache_size")]
    pub provider_cache_size: usize,
    #[serde(default = "default_retry_attempts")]
    pub provider_retry_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub provider_retry_base_delay_ms: u64,
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
}

fn default_provider_cache_size() -> usize {
    10
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    250
}

fn default_provider_timeout_secs() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            provider_cache_size: default_provider_cache_size(),
            provider_retry_attempts: default_retry_attempts(),
            provider_retry_base_delay_ms: default_retry_base_delay_ms(),
            provider_timeout_secs: default_provider_timeout_secs(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    pub common: CommonConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

impl Config {
    pub fn load(config_path: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let contents = fs::read_to_string(config_path)?;
        let config = serde_yml::from_str(&contents)?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_defaults_fill_in_when_section_is_missing() {
        let yaml = r#"
common:
  project_name: insights
  database_url: postgres://localhost/insights
backend:
  server_address: 127.0.0.1:8085
  log_level: info
"#;
        let config: Config = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.engine.provider_cache_size, 10);
        assert_eq!(config.engine.provider_retry_attempts, 3);
        assert_eq!(config.common.project_name, "insights");
    }
}
