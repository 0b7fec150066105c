use std::collections::HashMap;
use std::sync::Arc;

use crate::provider::ImageProvider;

/// Holds one instance per adapter in a fixed declaration order, so credential
/// detection and model lookup are reproducible.
#[derive(Default)]
pub struct ProviderRegistry {
    order: Vec<&'static str>,
    providers: HashMap<&'static str, Arc<dyn ImageProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn ImageProvider>) {
        let name = provider.name();
        if !self.order.contains(&name) {
            self.order.push(name);
        }
        self.providers.insert(name, provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ImageProvider>> {
        self.providers.get(name).cloned()
    }

    /// Adapters in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = Arc<dyn ImageProvider>> + '_ {
        self.order
            .iter()
            .filter_map(|name| self.providers.get(name).cloned())
    }

    /// First adapter whose credential-shape detector matches.
    pub fn detect_provider(&self, credential: &str) -> Option<Arc<dyn ImageProvider>> {
        self.iter().find(|provider| provider.detect_api_key(credential))
    }

    pub fn is_recognized_api_key(&self, credential: &str) -> bool {
        self.detect_provider(credential).is_some()
    }

    /// The adapter that lists `model`. Collisions resolve enabled-first,
    /// then declaration order.
    pub fn provider_by_model<F>(&self, model: &str, is_enabled: F) -> Option<Arc<dyn ImageProvider>>
    where
        F: Fn(&str) -> bool,
    {
        let matches: Vec<Arc<dyn ImageProvider>> = self
            .iter()
            .filter(|provider| provider.descriptor().supports_model(model))
            .collect();
        matches
            .iter()
            .find(|provider| is_enabled(provider.name()))
            .or_else(|| matches.first())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use crate::capabilities::{OutputFormat, ProviderCapabilities, ProviderDescriptor};
    use crate::errors::ProviderResult;
    use crate::provider::{GenerateOptions, ImageProvider};
    use crate::request::ImageRequest;
    use crate::response::GeneratedImage;

    use super::ProviderRegistry;

    struct FakeProvider {
        descriptor: ProviderDescriptor,
        prefix: &'static str,
    }

    fn fake(name: &'static str, prefix: &'static str, models: &'static [&'static str]) -> FakeProvider {
        FakeProvider {
            descriptor: ProviderDescriptor {
                name,
                capabilities: ProviderCapabilities {
                    text_to_image: true,
                    image_to_image: false,
                    multi_image_fusion: false,
                    async_task: false,
                    max_input_images: 0,
                    max_output_images: 4,
                    max_edit_output_images: 1,
                    max_blend_output_images: 1,
                    max_native_output_images: 1,
                    output_formats: &[OutputFormat::Url],
                },
                default_model: models[0],
                default_edit_model: None,
                default_size: "1024x1024",
                models,
                edit_models: &[],
            },
            prefix,
        }
    }

    #[async_trait]
    impl ImageProvider for FakeProvider {
        fn descriptor(&self) -> &ProviderDescriptor {
            &self.descriptor
        }

        fn detect_api_key(&self, credential: &str) -> bool {
            credential.starts_with(self.prefix)
        }

        async fn generate(
            &self,
            _credential: &str,
            _request: &ImageRequest,
            _opts: &GenerateOptions,
        ) -> ProviderResult<Vec<GeneratedImage>> {
            Ok(vec![GeneratedImage::from_url("http://example/x.png")])
        }
    }

    fn registry() -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(fake("Alpha", "al_", &["model-a", "shared-model"])));
        registry.register(Arc::new(fake("Beta", "bt_", &["model-b", "shared-model"])));
        registry
    }

    #[test]
    fn detection_follows_declaration_order() {
        let registry = registry();
        assert_eq!(registry.detect_provider("al_123").unwrap().name(), "Alpha");
        assert_eq!(registry.detect_provider("bt_123").unwrap().name(), "Beta");
        assert!(registry.detect_provider("zz_123").is_none());
        assert!(registry.is_recognized_api_key("al_1"));
    }

    #[test]
    fn model_lookup_prefers_enabled_providers() {
        let registry = registry();
        let chosen = registry
            .provider_by_model("shared-model", |name| name == "Beta")
            .unwrap();
        assert_eq!(chosen.name(), "Beta");

        // Nothing enabled: fall back to declaration order.
        let chosen = registry.provider_by_model("shared-model", |_| false).unwrap();
        assert_eq!(chosen.name(), "Alpha");

        assert!(registry.provider_by_model("missing", |_| true).is_none());
    }
}
