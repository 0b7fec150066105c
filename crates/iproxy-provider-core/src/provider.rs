use std::time::Duration;

use async_trait::async_trait;

use iproxy_common::TaskKind;
use iproxy_config::{ImageHostConfig, TaskDefaults};
use iproxy_logging::Logger;

use crate::capabilities::ProviderDescriptor;
use crate::errors::{ProviderFailure, ProviderResult};
use crate::request::{BlendRequest, ImageRequest};
use crate::response::GeneratedImage;

/// Per-call context the engine hands to an adapter: the task, the runtime
/// document's defaults overlay, and shared plumbing.
#[derive(Clone)]
pub struct GenerateOptions {
    pub task: TaskKind,
    pub defaults: TaskDefaults,
    pub timeout: Duration,
    pub image_host: Option<ImageHostConfig>,
    pub logger: Logger,
}

impl GenerateOptions {
    pub fn new(task: TaskKind, logger: Logger) -> Self {
        Self {
            task,
            defaults: TaskDefaults::default(),
            timeout: Duration::from_secs(60),
            image_host: None,
            logger,
        }
    }

    pub fn with_defaults(mut self, defaults: TaskDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Uniform interface over heterogeneous upstream image APIs.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    fn name(&self) -> &'static str {
        self.descriptor().name
    }

    /// Offline credential-shape match; never performs network IO.
    fn detect_api_key(&self, credential: &str) -> bool;

    /// Semantic pre-checks before any upstream call.
    fn validate_request(&self, request: &ImageRequest) -> Result<(), String> {
        let caps = &self.descriptor().capabilities;
        if request.prompt.trim().is_empty() && request.images.is_empty() {
            return Err("prompt or image input required".to_string());
        }
        if !request.images.is_empty() && !caps.image_to_image {
            return Err(format!("{} does not support image input", self.name()));
        }
        if request.images.len() as u32 > caps.max_input_images {
            return Err(format!(
                "too many input images: {} allows at most {}",
                self.name(),
                caps.max_input_images
            ));
        }
        Ok(())
    }

    async fn generate(
        &self,
        credential: &str,
        request: &ImageRequest,
        opts: &GenerateOptions,
    ) -> ProviderResult<Vec<GeneratedImage>>;

    async fn blend(
        &self,
        credential: &str,
        request: &BlendRequest,
        opts: &GenerateOptions,
    ) -> ProviderResult<Vec<GeneratedImage>> {
        if !self.descriptor().capabilities.multi_image_fusion {
            return Err(ProviderFailure::other(format!(
                "{} does not support multi-image fusion",
                self.name()
            )));
        }
        self.generate(credential, &request.clone().into_image_request(), opts)
            .await
    }

    fn supported_models(&self) -> Vec<String> {
        self.descriptor().all_models()
    }

    /// Effective model for a call: the request's model when this adapter
    /// lists it, else the task default, else the adapter default. Edits
    /// prefer the edit-model family.
    fn effective_model(&self, request: &ImageRequest, opts: &GenerateOptions) -> String {
        let descriptor = self.descriptor();
        if let Some(model) = request.model.as_deref()
            && descriptor.supports_model(model)
        {
            return model.to_string();
        }
        if let Some(model) = opts.defaults.model.as_deref()
            && descriptor.supports_model(model)
        {
            return model.to_string();
        }
        if !request.images.is_empty()
            && let Some(edit_model) = descriptor.default_edit_model
        {
            return edit_model.to_string();
        }
        descriptor.default_model.to_string()
    }

    /// Clamp the requested image count to the adapter's task cap.
    fn effective_n(&self, request: &ImageRequest, opts: &GenerateOptions) -> u32 {
        let cap = self
            .descriptor()
            .capabilities
            .max_for_task(opts.task)
            .max(1);
        request
            .n
            .or(opts.defaults.n)
            .unwrap_or(1)
            .clamp(1, cap)
    }
}
