use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use serde_json::Value as JsonValue;
use tokio::sync::Mutex;

use iproxy_common::TaskKind;
use iproxy_logging::Logger;

use crate::document::{
    ProviderSettings, PromptOptimizerConfig, RuntimeConfig, StorageConfig, TaskDefaults,
};
use crate::env_overlay;

const MODULE: &str = "Config";
const FILE_NAME: &str = "runtime-config.json";

/// Optional overrides for the `system` section; `None` leaves a field alone.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemPatch {
    pub global_access_key: Option<String>,
    pub relay: Option<bool>,
    pub backend: Option<bool>,
    pub port: Option<u16>,
    pub api_timeout_ms: Option<u64>,
    pub max_body_size: Option<usize>,
    pub cors: Option<bool>,
    pub request_logging: Option<bool>,
    pub health_check: Option<bool>,
}

/// Exclusive owner of the runtime document. Readers take `Arc` snapshots;
/// writers serialize through an async gate, swap the snapshot under a short
/// critical section, then persist to disk.
pub struct ConfigStore {
    path: PathBuf,
    current: RwLock<Arc<RuntimeConfig>>,
    write_gate: Mutex<()>,
    logger: Logger,
    ephemeral: bool,
}

impl ConfigStore {
    /// Load (or create) the document under `data_dir`. A legacy copy next to
    /// the data dir is read when the new location is absent; the first
    /// persisted write is the migration.
    pub async fn load(data_dir: PathBuf, logger: Logger) -> Arc<Self> {
        let path = data_dir.join(FILE_NAME);
        let legacy = data_dir
            .parent()
            .map(|parent| parent.join(FILE_NAME))
            .filter(|candidate| *candidate != path);

        let mut needs_write = false;
        let raw = match tokio::fs::read(&path).await {
            Ok(bytes) => parse_raw(&bytes, &logger),
            Err(_) => {
                needs_write = true;
                match legacy {
                    Some(legacy_path) => match tokio::fs::read(&legacy_path).await {
                        Ok(bytes) => {
                            logger.info(
                                MODULE,
                                format!("migrating legacy config from {}", legacy_path.display()),
                            );
                            parse_raw(&bytes, &logger)
                        }
                        Err(_) => JsonValue::Object(Default::default()),
                    },
                    None => JsonValue::Object(Default::default()),
                }
            }
        };

        let (mut config, changed) = RuntimeConfig::sanitize(&raw);
        if changed {
            needs_write = true;
        }
        if env_overlay::apply(&mut config) {
            needs_write = true;
        }

        let store = Arc::new(Self {
            path,
            current: RwLock::new(Arc::new(config)),
            write_gate: Mutex::new(()),
            logger,
            ephemeral: false,
        });
        if needs_write {
            store.persist_current().await;
        }
        store
    }

    /// In-memory store for tests; mutations skip disk but keep every other
    /// code path.
    pub fn in_memory(config: RuntimeConfig, logger: Logger) -> Arc<Self> {
        Arc::new(Self {
            path: PathBuf::from(FILE_NAME),
            current: RwLock::new(Arc::new(config)),
            write_gate: Mutex::new(()),
            logger,
            ephemeral: true,
        })
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Current snapshot. Callers must not hold it across admin mutations and
    /// expect fresh data; re-read instead.
    pub fn get(&self) -> Arc<RuntimeConfig> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub async fn replace_all(&self, config: RuntimeConfig) {
        let _gate = self.write_gate.lock().await;
        self.swap(config);
        self.persist_current().await;
    }

    pub async fn update_system(&self, patch: SystemPatch) {
        self.mutate(|config| {
            let system = &mut config.system;
            if let Some(key) = patch.global_access_key {
                system.global_access_key = (!key.is_empty()).then_some(key);
            }
            if let Some(relay) = patch.relay {
                system.modes.relay = relay;
            }
            if let Some(backend) = patch.backend {
                system.modes.backend = backend;
            }
            if let Some(port) = patch.port {
                system.port = port;
            }
            if let Some(timeout) = patch.api_timeout_ms {
                system.api_timeout_ms = timeout;
            }
            if let Some(max_body) = patch.max_body_size {
                system.max_body_size = max_body;
            }
            if let Some(cors) = patch.cors {
                system.cors = cors;
            }
            if let Some(request_logging) = patch.request_logging {
                system.request_logging = request_logging;
            }
            if let Some(health_check) = patch.health_check {
                system.health_check = health_check;
            }
        })
        .await;
    }

    pub async fn set_provider_enabled(&self, name: &str, enabled: bool) {
        self.mutate(|config| {
            config
                .providers
                .entry(name.to_string())
                .or_default()
                .enabled = Some(enabled);
        })
        .await;
    }

    pub async fn set_provider_settings(&self, name: &str, settings: ProviderSettings) {
        self.mutate(|config| {
            config.providers.insert(name.to_string(), settings);
        })
        .await;
    }

    pub async fn set_task_defaults(&self, name: &str, task: TaskKind, defaults: TaskDefaults) {
        self.mutate(|config| {
            *config
                .providers
                .entry(name.to_string())
                .or_default()
                .task_mut(task) = Some(defaults);
        })
        .await;
    }

    pub async fn set_prompt_optimizer(&self, optimizer: PromptOptimizerConfig) {
        self.mutate(|config| config.prompt_optimizer = optimizer).await;
    }

    pub async fn set_storage(&self, storage: StorageConfig) {
        self.mutate(|config| config.storage = storage).await;
    }

    pub(crate) async fn mutate<F>(&self, apply: F)
    where
        F: FnOnce(&mut RuntimeConfig),
    {
        let _gate = self.write_gate.lock().await;
        let mut next = (*self.get()).clone();
        apply(&mut next);
        self.swap(next);
        self.persist_current().await;
    }

    fn swap(&self, config: RuntimeConfig) {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::new(config);
    }

    /// Write failures are logged, never fatal; the in-memory copy stays
    /// authoritative until the next successful write.
    async fn persist_current(&self) {
        if self.ephemeral {
            return;
        }
        let snapshot = self.get();
        match serde_json::to_vec_pretty(snapshot.as_ref()) {
            Ok(bytes) => {
                if let Some(parent) = self.path.parent() {
                    let _ = tokio::fs::create_dir_all(parent).await;
                }
                if let Err(err) = tokio::fs::write(&self.path, bytes).await {
                    self.logger
                        .error(MODULE, format!("config write failed: {err}"));
                }
            }
            Err(err) => {
                self.logger
                    .error(MODULE, format!("config serialize failed: {err}"));
            }
        }
    }
}

fn parse_raw(bytes: &[u8], logger: &Logger) -> JsonValue {
    match serde_json::from_slice(bytes) {
        Ok(value) => value,
        Err(err) => {
            logger.error(MODULE, format!("config parse failed, using defaults: {err}"));
            JsonValue::Object(Default::default())
        }
    }
}
