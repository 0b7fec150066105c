//! Built-in provider adapters. Each module speaks one upstream API and maps
//! it onto the shared `ImageProvider` interface.

pub mod client;
pub mod providers;

use std::sync::Arc;

use iproxy_provider_core::ProviderRegistry;

pub use providers::doubao::DoubaoProvider;
pub use providers::gitee::GiteeProvider;
pub use providers::huggingface::HuggingFaceProvider;
pub use providers::modelscope::ModelScopeProvider;
pub use providers::pollinations::PollinationsProvider;

/// Register every built-in adapter. The order here is the credential
/// detection order: prefix-specific shapes come before the broad Gitee
/// alphanumeric shape.
pub fn register_builtin_providers(registry: &mut ProviderRegistry) {
    registry.register(Arc::new(HuggingFaceProvider::new()));
    registry.register(Arc::new(ModelScopeProvider::new()));
    registry.register(Arc::new(DoubaoProvider::new()));
    registry.register(Arc::new(GiteeProvider::new()));
    registry.register(Arc::new(PollinationsProvider::new()));
}

pub fn builtin_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    register_builtin_providers(&mut registry);
    registry
}
