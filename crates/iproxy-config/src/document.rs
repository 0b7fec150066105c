use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use iproxy_common::TaskKind;

/// Deserialize a field leniently: a wrong-typed value becomes `None` instead
/// of failing the whole section. Sanitization then drops it on rewrite.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(T::deserialize(value).ok())
}

/// Lenient section parse: a wrong-typed section resets to its default.
fn lenient_section<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    Ok(lenient(deserializer)?.unwrap_or_default())
}

/// Lenient map parse: bad entries are dropped one by one.
fn lenient_map<'de, D, T>(deserializer: D) -> Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw: Option<BTreeMap<String, JsonValue>> = lenient(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(name, value)| T::deserialize(value).ok().map(|parsed| (name, parsed)))
        .collect())
}

/// Lenient key-pool parse: bad items drop individually, and duplicate keys
/// within one pool keep only the first occurrence.
fn lenient_pools<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<KeyItem>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, JsonValue>> = lenient(deserializer)?;
    let mut pools = BTreeMap::new();
    for (provider, value) in raw.unwrap_or_default() {
        let Some(entries) = value.as_array() else {
            continue;
        };
        let mut items: Vec<KeyItem> = Vec::new();
        for entry in entries {
            let Ok(item) = KeyItem::deserialize(entry.clone()) else {
                continue;
            };
            if items.iter().any(|existing| existing.key == item.key) {
                continue;
            }
            items.push(item);
        }
        pools.insert(provider, items);
    }
    Ok(pools)
}

macro_rules! lenient_scalar {
    ($name:ident, $ty:ty, $default:expr) => {
        fn $name<'de, D>(deserializer: D) -> Result<$ty, D::Error>
        where
            D: Deserializer<'de>,
        {
            Ok(lenient(deserializer)?.unwrap_or_else(|| $default))
        }
    };
}

lenient_scalar!(lenient_port, u16, default_port());
lenient_scalar!(lenient_api_timeout, u64, default_api_timeout_ms());
lenient_scalar!(lenient_max_body, usize, default_max_body_size());
lenient_scalar!(lenient_true, bool, true);
lenient_scalar!(lenient_false, bool, false);
lenient_scalar!(lenient_string, String, String::new());
lenient_scalar!(lenient_optimizer_len, usize, default_optimizer_max_length());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModesConfig {
    #[serde(default = "default_true_value", deserialize_with = "lenient_true")]
    pub relay: bool,
    #[serde(default = "default_true_value", deserialize_with = "lenient_true")]
    pub backend: bool,
}

impl Default for ModesConfig {
    fn default() -> Self {
        Self {
            relay: true,
            backend: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemConfig {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub global_access_key: Option<String>,
    #[serde(default, deserialize_with = "lenient_section")]
    pub modes: ModesConfig,
    #[serde(default = "default_port", deserialize_with = "lenient_port")]
    pub port: u16,
    #[serde(default = "default_api_timeout_ms", deserialize_with = "lenient_api_timeout")]
    pub api_timeout_ms: u64,
    #[serde(default = "default_max_body_size", deserialize_with = "lenient_max_body")]
    pub max_body_size: usize,
    #[serde(default = "default_true_value", deserialize_with = "lenient_true")]
    pub cors: bool,
    #[serde(default = "default_true_value", deserialize_with = "lenient_true")]
    pub request_logging: bool,
    #[serde(default = "default_true_value", deserialize_with = "lenient_true")]
    pub health_check: bool,
}

fn default_port() -> u16 {
    3000
}

fn default_api_timeout_ms() -> u64 {
    60_000
}

fn default_max_body_size() -> usize {
    50 * 1024 * 1024
}

fn default_true_value() -> bool {
    true
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            global_access_key: None,
            modes: ModesConfig::default(),
            port: default_port(),
            api_timeout_ms: default_api_timeout_ms(),
            max_body_size: default_max_body_size(),
            cors: true,
            request_logging: true,
            health_check: true,
        }
    }
}

/// Per-task defaults a provider advertises in the runtime document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefaults {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub weight: Option<i64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub prompt_optimizer: Option<TaskOptimizerFlags>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOptimizerFlags {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub translate: Option<bool>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub expand: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSettings {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub text: Option<TaskDefaults>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub edit: Option<TaskDefaults>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub blend: Option<TaskDefaults>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub default_steps: Option<u32>,
}

impl ProviderSettings {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn task(&self, task: TaskKind) -> Option<&TaskDefaults> {
        match task {
            TaskKind::Text => self.text.as_ref(),
            TaskKind::Edit => self.edit.as_ref(),
            TaskKind::Blend => self.blend.as_ref(),
        }
    }

    pub fn task_mut(&mut self, task: TaskKind) -> &mut Option<TaskDefaults> {
        match task {
            TaskKind::Text => &mut self.text,
            TaskKind::Edit => &mut self.edit,
            TaskKind::Blend => &mut self.blend,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    #[default]
    Active,
    Disabled,
    RateLimited,
}

/// One upstream credential in a provider's rotating pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyItem {
    pub id: String,
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true_value")]
    pub enabled: bool,
    #[serde(default)]
    pub status: KeyStatus,
    #[serde(default)]
    pub error_count: u32,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub total_calls: u64,
    /// Epoch ms; 0 means never used.
    #[serde(default)]
    pub last_used: i64,
    #[serde(default)]
    pub added_at: i64,
    #[serde(default)]
    pub provider: String,
}

impl KeyItem {
    pub fn new(provider: &str, key: String, name: String) -> Self {
        Self {
            id: iproxy_common::new_id(),
            key,
            name,
            enabled: true,
            status: KeyStatus::Active,
            error_count: 0,
            success_count: 0,
            total_calls: 0,
            last_used: 0,
            added_at: iproxy_common::epoch_ms(),
            provider: provider.to_string(),
        }
    }

    pub fn is_selectable(&self) -> bool {
        self.enabled && self.status == KeyStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptOptimizerConfig {
    #[serde(default, deserialize_with = "lenient_string")]
    pub base_url: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub api_key: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub model: String,
    #[serde(default, deserialize_with = "lenient_false")]
    pub enable_translate: bool,
    #[serde(default, deserialize_with = "lenient_false")]
    pub enable_expand: bool,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub translate_prompt: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub expand_prompt: Option<String>,
    #[serde(
        default = "default_optimizer_max_length",
        deserialize_with = "lenient_optimizer_len"
    )]
    pub translate_max_length: usize,
    #[serde(
        default = "default_optimizer_max_length",
        deserialize_with = "lenient_optimizer_len"
    )]
    pub expand_max_length: usize,
}

fn default_optimizer_max_length() -> usize {
    5000
}

impl Default for PromptOptimizerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: String::new(),
            model: String::new(),
            enable_translate: false,
            enable_expand: false,
            translate_prompt: None,
            expand_prompt: None,
            translate_max_length: default_optimizer_max_length(),
            expand_max_length: default_optimizer_max_length(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3Config {
    #[serde(default, deserialize_with = "lenient_string")]
    pub endpoint: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub bucket: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub access_key: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub secret_key: String,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
}

impl S3Config {
    pub fn is_valid(&self) -> bool {
        !self.endpoint.is_empty()
            && !self.bucket.is_empty()
            && !self.access_key.is_empty()
            && !self.secret_key.is_empty()
    }
}

/// HTTP image host used when an upstream needs URL image inputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageHostConfig {
    #[serde(default, deserialize_with = "lenient_string")]
    pub upload_url: String,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub auth_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Config>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub image_host: Option<ImageHostConfig>,
}

/// The persisted runtime document: single source of truth for the gateway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeConfig {
    #[serde(default, deserialize_with = "lenient_section")]
    pub system: SystemConfig,
    #[serde(default, deserialize_with = "lenient_map")]
    pub providers: BTreeMap<String, ProviderSettings>,
    #[serde(default, deserialize_with = "lenient_pools")]
    pub key_pools: BTreeMap<String, Vec<KeyItem>>,
    #[serde(default, deserialize_with = "lenient_section")]
    pub prompt_optimizer: PromptOptimizerConfig,
    #[serde(default, deserialize_with = "lenient_section")]
    pub storage: StorageConfig,
}

impl RuntimeConfig {
    /// Parse a raw document, dropping unknown and wrong-typed fields and
    /// duplicate pool keys. Returns the sanitized config and whether the
    /// canonical form differs from the input (in which case the caller
    /// rewrites the file).
    pub fn sanitize(raw: &JsonValue) -> (Self, bool) {
        let config: RuntimeConfig = serde_json::from_value(raw.clone()).unwrap_or_default();
        let canonical = serde_json::to_value(&config).unwrap_or(JsonValue::Null);
        let changed = canonical != *raw;
        (config, changed)
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderSettings> {
        self.providers.get(name)
    }

    pub fn task_defaults(&self, provider: &str, task: TaskKind) -> Option<&TaskDefaults> {
        self.provider(provider).and_then(|p| p.task(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let (config, changed) = RuntimeConfig::sanitize(&serde_json::json!({}));
        assert!(changed);
        assert_eq!(config.system.port, 3000);
        assert_eq!(config.system.api_timeout_ms, 60_000);
        assert!(config.system.modes.relay);
        assert!(config.system.modes.backend);
    }

    #[test]
    fn wrong_typed_fields_drop_without_losing_the_section() {
        let raw = serde_json::json!({
            "system": { "globalAccessKey": 42, "port": "not-a-port", "cors": false },
        });
        let (config, changed) = RuntimeConfig::sanitize(&raw);
        assert!(changed);
        assert_eq!(config.system.global_access_key, None);
        assert_eq!(config.system.port, 3000);
        assert!(!config.system.cors);
    }

    #[test]
    fn canonical_document_does_not_trigger_rewrite() {
        let base = serde_json::to_value(RuntimeConfig::default()).unwrap();
        let (_, changed) = RuntimeConfig::sanitize(&base);
        assert!(!changed);

        let mut with_junk = base.clone();
        with_junk["bogus"] = serde_json::json!(true);
        let (_, changed) = RuntimeConfig::sanitize(&with_junk);
        assert!(changed);
    }

    #[test]
    fn duplicate_pool_keys_keep_first() {
        let raw = serde_json::json!({
            "keyPools": {
                "Gitee": [
                    {"id": "1", "key": "k", "name": "a"},
                    {"id": "2", "key": "k", "name": "b"},
                    {"id": "3", "key": "other", "name": "c"},
                ],
            },
        });
        let (config, _) = RuntimeConfig::sanitize(&raw);
        let pool = &config.key_pools["Gitee"];
        assert_eq!(pool.len(), 2);
        assert_eq!(pool[0].id, "1");
    }

    #[test]
    fn key_items_round_trip_in_camel_case() {
        let item = KeyItem::new("Gitee", "abcd1234".to_string(), "k1".to_string());
        let value = serde_json::to_value(&item).unwrap();
        assert!(value.get("errorCount").is_some());
        assert!(value.get("addedAt").is_some());
        let back: KeyItem = serde_json::from_value(value).unwrap();
        assert_eq!(back, item);
    }
}
