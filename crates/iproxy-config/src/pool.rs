//! Credential-pool operations over `runtime.keyPools`. The pool is a view:
//! every mutation goes through the config store's writer so the document on
//! disk stays the single source of truth.

use rand::seq::IndexedRandom;

use iproxy_common::{epoch_ms, FailureReason};

use crate::document::{KeyItem, KeyStatus};
use crate::store::ConfigStore;

const MODULE: &str = "KeyPool";

/// Consecutive errors after which a credential is pulled from rotation.
const MAX_ERROR_COUNT: u32 = 5;

#[derive(Debug, PartialEq, Eq)]
pub enum PoolMutation {
    Applied,
    DuplicateKey,
    NotFound,
}

impl ConfigStore {
    pub fn get_key_pool(&self, provider: &str) -> Vec<KeyItem> {
        self.get()
            .key_pools
            .get(provider)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn update_key_pool(&self, provider: &str, items: Vec<KeyItem>) {
        self.mutate(|config| {
            config.key_pools.insert(provider.to_string(), items);
        })
        .await;
    }

    /// Uniform random choice among enabled, active credentials.
    pub fn next_available_key(&self, provider: &str) -> Option<String> {
        let snapshot = self.get();
        let pool = snapshot.key_pools.get(provider)?;
        let candidates: Vec<&KeyItem> = pool.iter().filter(|item| item.is_selectable()).collect();
        let chosen = candidates.choose(&mut rand::rng())?;
        Some(chosen.key.clone())
    }

    pub async fn add_key(&self, provider: &str, key: String, name: String) -> PoolMutation {
        let key = key.trim().to_string();
        if key.is_empty() {
            return PoolMutation::NotFound;
        }
        let mut outcome = PoolMutation::Applied;
        self.mutate(|config| {
            let pool = config.key_pools.entry(provider.to_string()).or_default();
            if pool.iter().any(|item| item.key == key) {
                outcome = PoolMutation::DuplicateKey;
                return;
            }
            pool.push(KeyItem::new(provider, key, name));
        })
        .await;
        outcome
    }

    /// Batch insert from CSV or newline-separated text; duplicates and blank
    /// lines are skipped. Returns how many keys were added.
    pub async fn add_keys_batch(&self, provider: &str, blob: &str) -> usize {
        let mut added = 0;
        self.mutate(|config| {
            let pool = config.key_pools.entry(provider.to_string()).or_default();
            for candidate in blob.split(|c| c == ',' || c == '\n' || c == '\r') {
                let candidate = candidate.trim();
                if candidate.is_empty() || pool.iter().any(|item| item.key == candidate) {
                    continue;
                }
                let index = pool.len() + 1;
                pool.push(KeyItem::new(
                    provider,
                    candidate.to_string(),
                    format!("{provider}-{index}"),
                ));
                added += 1;
            }
        })
        .await;
        added
    }

    pub async fn update_key_item(&self, provider: &str, updated: KeyItem) -> PoolMutation {
        let mut outcome = PoolMutation::NotFound;
        self.mutate(|config| {
            let Some(pool) = config.key_pools.get_mut(provider) else {
                return;
            };
            if let Some(slot) = pool.iter_mut().find(|item| item.id == updated.id) {
                *slot = updated;
                outcome = PoolMutation::Applied;
            }
        })
        .await;
        outcome
    }

    pub async fn delete_key(&self, provider: &str, id: &str) -> PoolMutation {
        let mut outcome = PoolMutation::NotFound;
        self.mutate(|config| {
            let Some(pool) = config.key_pools.get_mut(provider) else {
                return;
            };
            let before = pool.len();
            pool.retain(|item| item.id != id);
            if pool.len() != before {
                outcome = PoolMutation::Applied;
            }
        })
        .await;
        outcome
    }

    pub async fn report_key_success(&self, provider: &str, key: &str) {
        self.mutate(|config| {
            let Some(item) = find_item(config, provider, key) else {
                return;
            };
            item.error_count = 0;
            item.success_count += 1;
            item.total_calls += 1;
            item.last_used = epoch_ms();
        })
        .await;
    }

    pub async fn report_key_error(&self, provider: &str, key: &str, reason: FailureReason) {
        let mut disabled = false;
        self.mutate(|config| {
            let Some(item) = find_item(config, provider, key) else {
                return;
            };
            item.error_count += 1;
            item.total_calls += 1;
            if item.error_count > MAX_ERROR_COUNT {
                item.status = KeyStatus::Disabled;
                disabled = true;
            }
        })
        .await;
        let label = iproxy_common::mask_key(key);
        self.logger().info(
            MODULE,
            format!("{provider} key {label} error recorded ({})", reason.as_str()),
        );
        if disabled {
            self.logger().error(
                MODULE,
                format!("{provider} key {label} disabled after repeated errors"),
            );
        }
    }
}

fn find_item<'a>(
    config: &'a mut crate::document::RuntimeConfig,
    provider: &str,
    key: &str,
) -> Option<&'a mut KeyItem> {
    config
        .key_pools
        .get_mut(provider)?
        .iter_mut()
        .find(|item| item.key == key)
}
