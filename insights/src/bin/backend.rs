use std::error::Error;
use std::sync::Arc;

use insights::api::run_backend;
use insights::bootstrap::{initialize_executable, initialize_metrics, initialize_tracing};
use insights::providers::ProviderFactory;
use insights::service::InsightsService;
use insights::storage::PgInsightsStorage;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = initialize_executable()?;
    initialize_tracing(&config.backend.log_level);
    initialize_metrics();

    let storage = Arc::new(PgInsightsStorage::new(&config.common.database_url).await?);
    storage.initialize_schema().await?;

    let service = Arc::new(InsightsService::new(
        storage.clone(),
        storage,
        Arc::new(ProviderFactory::with_defaults()),
        config.engine.provider_cache_size,
    ));

    run_backend(&config.backend, service).await
}
