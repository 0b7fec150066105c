use std::path::PathBuf;
use std::sync::Arc;

use iproxy_config::ConfigStore;
use iproxy_logging::Logger;
use iproxy_provider_core::ProviderRegistry;
use iproxy_storage::ArtifactStore;

/// Process-wide wiring: the config store owns the runtime document, the
/// registry owns the adapters, the artifact store owns the storage dir.
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub registry: Arc<ProviderRegistry>,
    pub artifacts: Arc<ArtifactStore>,
    pub logger: Logger,
    pub data_dir: PathBuf,
}

impl AppState {
    pub fn new(
        config: Arc<ConfigStore>,
        registry: Arc<ProviderRegistry>,
        artifacts: Arc<ArtifactStore>,
        logger: Logger,
        data_dir: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            artifacts,
            logger,
            data_dir,
        })
    }

    pub fn provider_enabled(&self, name: &str) -> bool {
        self.config
            .get()
            .provider(name)
            .map(|settings| settings.is_enabled())
            .unwrap_or(true)
    }
}
