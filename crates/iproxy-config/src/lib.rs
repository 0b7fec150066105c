//! The runtime document and its single-owner store.
//!
//! One JSON file under the data directory drives the whole gateway: system
//! flags, per-provider task defaults, credential pools, prompt-optimizer
//! settings, and storage options. Everything else reads snapshots and
//! mutates through the store's methods, which persist before returning.

pub mod document;
pub mod env_overlay;
pub mod pool;
pub mod store;

pub use document::{
    ImageHostConfig, KeyItem, KeyStatus, ModesConfig, PromptOptimizerConfig, ProviderSettings,
    RuntimeConfig, S3Config, StorageConfig, SystemConfig, TaskDefaults, TaskOptimizerFlags,
};
pub use pool::PoolMutation;
pub use store::{ConfigStore, SystemPatch};
