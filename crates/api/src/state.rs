use std::sync::Arc;

use anyhow::bail;
use journey_domain::clock::{Clock, SystemClock};
use journey_domain::runtime::JourneyRuntimeService;
use journey_infra::catalog::CatalogConfigSource;
use journey_infra::config::AppConfig;
use journey_infra::repositories::InMemoryRuntimeStore;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub runtime: Arc<JourneyRuntimeService>,
    pub catalog: CatalogConfigSource,
    /// Set when the catalog came from `config.catalog_path`; refresh re-reads it.
    pub catalog_from_file: bool,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        if !config.data_backend.eq_ignore_ascii_case("memory") {
            bail!("unsupported data backend: {}", config.data_backend);
        }
        let catalog = CatalogConfigSource::load(&config.catalog_path).await?;
        tracing::info!(path = %config.catalog_path, "journey catalog loaded");
        let mut state = Self::with_catalog(config, catalog, Arc::new(SystemClock));
        state.catalog_from_file = true;
        Ok(state)
    }

    /// Wires the engine over an in-memory store and the given catalog.
    pub fn with_catalog(
        config: AppConfig,
        catalog: CatalogConfigSource,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let runtime = JourneyRuntimeService::new(
            Arc::new(InMemoryRuntimeStore::new()),
            Arc::new(catalog.clone()),
            clock,
            config.runtime_settings(),
        );
        Self {
            config,
            runtime: Arc::new(runtime),
            catalog,
            catalog_from_file: false,
        }
    }
}
