//! Pipeline stages 3–8: provider selection, credential acquisition, prompt
//! optimization, dispatch with retries and fail-over, artifact persistence,
//! and response shaping.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use futures_util::future::join_all;
use rand::Rng;

use iproxy_common::{epoch_ms, ErrorKind, FailureReason, GatewayError, TaskKind};
use iproxy_config::TaskDefaults;
use iproxy_image::normalize_input_images;
use iproxy_protocol::openai::images::ImageItem;
use iproxy_provider_core::{
    GenerateOptions, GeneratedImage, ImageProvider, ImageRequest, ProviderFailure,
};
use iproxy_storage::ArtifactMetadata;

use crate::auth::AuthMode;
use crate::optimizer::{OptimizeFlags, PromptOptimizer};
use crate::plan::build_plan;
use crate::state::AppState;

const MODULE: &str = "Router";
const BACKEND_STEP_RETRIES: u32 = 3;

/// Internal request after input parsing (stage 4); shared by all four
/// public endpoints.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub task: TaskKind,
    pub prompt: String,
    pub images: Vec<String>,
    pub model: Option<String>,
    pub size: Option<String>,
    pub n: Option<u32>,
    pub steps: Option<u32>,
    pub seed: Option<i64>,
    pub response_format: Option<String>,
}

impl PipelineRequest {
    pub fn new(task: TaskKind, prompt: String) -> Self {
        Self {
            task,
            prompt,
            images: Vec::new(),
            model: None,
            size: None,
            n: None,
            steps: None,
            seed: None,
            response_format: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub items: Vec<ImageItem>,
    pub provider: String,
    pub model: String,
    pub created: i64,
}

enum StepError {
    PoolEmpty,
    Failed(ProviderFailure),
    Invalid(String),
}

pub struct Engine {
    state: Arc<AppState>,
    optimizer: PromptOptimizer,
    client: wreq::Client,
}

impl Engine {
    pub fn new(state: Arc<AppState>) -> Arc<Self> {
        let optimizer = PromptOptimizer::new(state.logger.clone());
        Arc::new(Self {
            state,
            optimizer,
            client: wreq::Client::new(),
        })
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn optimizer(&self) -> &PromptOptimizer {
        &self.optimizer
    }

    /// Stages 3–8. `mode` comes from `classify_caller`.
    pub async fn execute(
        &self,
        mode: AuthMode,
        mut request: PipelineRequest,
    ) -> Result<PipelineOutcome, GatewayError> {
        request.images = normalize_input_images(&self.client, request.images).await;

        match mode {
            AuthMode::Relay {
                provider,
                credential,
            } => self.execute_relay(provider, credential, request).await,
            AuthMode::Backend => self.execute_backend(request).await,
        }
    }

    async fn execute_relay(
        &self,
        provider: Arc<dyn ImageProvider>,
        credential: String,
        request: PipelineRequest,
    ) -> Result<PipelineOutcome, GatewayError> {
        match self
            .run_step(&provider, request.model.clone(), &request, Some(credential))
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(StepError::Invalid(message)) => Err(GatewayError::bad_request(message)),
            Err(StepError::PoolEmpty) => Err(GatewayError::simple(
                ErrorKind::KeyPoolExhausted,
                format!("No available API keys for provider: {}", provider.name()),
            )),
            Err(StepError::Failed(failure)) => {
                Err(GatewayError::upstream(failure.message, Some(provider.name())))
            }
        }
    }

    async fn execute_backend(
        &self,
        request: PipelineRequest,
    ) -> Result<PipelineOutcome, GatewayError> {
        let config = self.state.config.get();
        let plan = build_plan(
            &config,
            &self.state.registry,
            request.task,
            request.model.as_deref(),
        );
        if plan.is_empty() {
            return Err(GatewayError::simple(
                ErrorKind::ServiceDisabled,
                "No available providers",
            ));
        }

        let mut exhausted_pool: Option<String> = None;
        let mut last_failure: Option<(String, ProviderFailure)> = None;
        let mut invalid: Option<String> = None;

        for step in &plan {
            let Some(provider) = self.state.registry.get(&step.provider) else {
                continue;
            };
            match self
                .run_step(&provider, step.model.clone(), &request, None)
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(StepError::PoolEmpty) => {
                    self.state.logger.info(
                        MODULE,
                        format!("{} has no usable keys, trying next provider", step.provider),
                    );
                    exhausted_pool.get_or_insert_with(|| step.provider.clone());
                }
                Err(StepError::Invalid(message)) => {
                    invalid.get_or_insert(message);
                }
                Err(StepError::Failed(failure)) => {
                    self.state.logger.error(
                        MODULE,
                        format!("{} failed: {failure}", step.provider),
                    );
                    last_failure = Some((step.provider.clone(), failure));
                }
            }
        }

        if let Some((provider, failure)) = last_failure {
            return Err(GatewayError::upstream(failure.message, Some(&provider)));
        }
        if let Some(provider) = exhausted_pool {
            return Err(GatewayError::simple(
                ErrorKind::KeyPoolExhausted,
                format!("No available API keys for provider: {provider}"),
            ));
        }
        if let Some(message) = invalid {
            return Err(GatewayError::bad_request(message));
        }
        Err(GatewayError::upstream("all providers exhausted", None))
    }

    /// One plan step: optimize prompts, dispatch `n` sub-calls, rotate
    /// credentials on classified failures (backend mode only).
    async fn run_step(
        &self,
        provider: &Arc<dyn ImageProvider>,
        step_model: Option<String>,
        request: &PipelineRequest,
        relay_credential: Option<String>,
    ) -> Result<PipelineOutcome, StepError> {
        let config = self.state.config.get();
        let provider_name = provider.name();
        let defaults = config
            .task_defaults(provider_name, request.task)
            .cloned()
            .unwrap_or_default();

        let opts = GenerateOptions {
            task: request.task,
            defaults: defaults.clone(),
            timeout: Duration::from_millis(config.system.api_timeout_ms.max(1000)),
            image_host: config.storage.image_host.clone(),
            logger: self.state.logger.clone(),
        };

        let probe = ImageRequest {
            prompt: request.prompt.clone(),
            images: request.images.clone(),
            model: step_model.clone(),
            size: request.size.clone(),
            n: request.n,
            steps: request.steps,
            seed: request.seed,
            response_format: request.response_format.clone(),
        };
        provider
            .validate_request(&probe)
            .map_err(StepError::Invalid)?;

        let n = provider.effective_n(&probe, &opts) as usize;
        let model = provider.effective_model(&probe, &opts);

        // Stage 5: per-image independent optimization.
        let flags = resolve_optimizer_flags(&config.prompt_optimizer, &defaults);
        let mut prompts = Vec::with_capacity(n);
        for index in 0..n {
            let image_index = (n > 1).then_some(index);
            let optimized = if flags.translate || flags.expand {
                self.optimizer
                    .optimize(&config.prompt_optimizer, flags, &request.prompt, image_index)
                    .await
            } else {
                request.prompt.clone()
            };
            prompts.push(optimized);
        }

        // Stage 6: dispatch with at most three credential rotations.
        let uses_pool = relay_credential.is_none() && provider_name != "HuggingFace";
        let max_attempts = if relay_credential.is_some() {
            1
        } else {
            BACKEND_STEP_RETRIES
        };

        let max_native = provider
            .descriptor()
            .capabilities
            .max_native_output_images
            .max(1) as usize;
        let mut slots: Vec<Option<GeneratedImage>> = vec![None; n];
        let mut burned_credentials: HashSet<String> = HashSet::new();
        let mut last_failure: Option<ProviderFailure> = None;

        for _attempt in 0..max_attempts {
            let credential = match &relay_credential {
                Some(credential) => credential.clone(),
                None if !uses_pool => String::new(),
                None => {
                    match self.pick_credential(provider_name, &burned_credentials) {
                        Some(credential) => credential,
                        None => {
                            return match last_failure {
                                Some(failure) => Err(StepError::Failed(failure)),
                                None => Err(StepError::PoolEmpty),
                            };
                        }
                    }
                }
            };

            let failure = self
                .dispatch_round(
                    provider, &credential, &prompts, request, &step_model, &opts, max_native,
                    &mut slots, uses_pool,
                )
                .await;

            if slots.iter().all(|slot| slot.is_some()) {
                let images: Vec<GeneratedImage> = slots.into_iter().flatten().collect();
                return Ok(self
                    .finish_step(provider_name, &model, request, &prompts, images)
                    .await);
            }

            let failure = failure.unwrap_or_else(|| ProviderFailure::other("dispatch incomplete"));
            if uses_pool {
                self.state
                    .config
                    .report_key_error(provider_name, &credential, failure.reason)
                    .await;
                if failure.reason == FailureReason::AuthError {
                    burned_credentials.insert(credential.clone());
                }
            }
            let retryable = failure.reason.is_credential_related() && uses_pool;
            last_failure = Some(failure);
            if !retryable {
                break;
            }
        }

        Err(StepError::Failed(last_failure.unwrap_or_else(|| {
            ProviderFailure::other("dispatch failed")
        })))
    }

    /// Fill empty slots with one credential. `max_native == 1` sub-calls run
    /// concurrently; larger native batches run sequentially.
    #[allow(clippy::too_many_arguments)]
    async fn dispatch_round(
        &self,
        provider: &Arc<dyn ImageProvider>,
        credential: &str,
        prompts: &[String],
        request: &PipelineRequest,
        step_model: &Option<String>,
        opts: &GenerateOptions,
        max_native: usize,
        slots: &mut [Option<GeneratedImage>],
        uses_pool: bool,
    ) -> Option<ProviderFailure> {
        let n = slots.len();
        let provider_name = provider.name();
        let sub_request = |index: usize, count: usize| ImageRequest {
            prompt: prompts[index].clone(),
            images: request.images.clone(),
            model: step_model.clone(),
            size: request.size.clone(),
            n: Some(count as u32),
            steps: request.steps,
            seed: request.seed.map(|seed| seed + index as i64),
            response_format: request.response_format.clone(),
        };

        let mut failure = None;
        if max_native == 1 {
            let pending: Vec<usize> = (0..n).filter(|i| slots[*i].is_none()).collect();
            let calls = pending.iter().map(|index| {
                let req = sub_request(*index, 1);
                let opts = opts.clone();
                async move { provider.generate(credential, &req, &opts).await }
            });
            let results = join_all(calls).await;
            for (index, result) in pending.into_iter().zip(results) {
                match result {
                    Ok(mut images) if !images.is_empty() => {
                        slots[index] = Some(images.remove(0));
                        self.state
                            .logger
                            .info(MODULE, format!("图片 {}/{} 生成成功", index + 1, n));
                        if uses_pool {
                            self.state
                                .config
                                .report_key_success(provider_name, credential)
                                .await;
                        }
                    }
                    Ok(_) => {
                        failure
                            .get_or_insert_with(|| ProviderFailure::other("empty result"));
                    }
                    Err(err) => {
                        failure.get_or_insert(err);
                    }
                }
            }
        } else {
            let mut cursor = 0;
            while cursor < n {
                if slots[cursor].is_some() {
                    cursor += 1;
                    continue;
                }
                let batch = max_native.min(n - cursor);
                match provider
                    .generate(credential, &sub_request(cursor, batch), opts)
                    .await
                {
                    Ok(images) => {
                        for (offset, image) in images.into_iter().take(batch).enumerate() {
                            slots[cursor + offset] = Some(image);
                            self.state.logger.info(
                                MODULE,
                                format!("图片 {}/{} 生成成功", cursor + offset + 1, n),
                            );
                        }
                        if uses_pool {
                            self.state
                                .config
                                .report_key_success(provider_name, credential)
                                .await;
                        }
                    }
                    Err(err) => {
                        failure.get_or_insert(err);
                        break;
                    }
                }
                cursor += batch;
            }
        }
        failure
    }

    /// Stages 7–8: fire-and-forget persistence, then response shaping.
    async fn finish_step(
        &self,
        provider_name: &str,
        model: &str,
        request: &PipelineRequest,
        prompts: &[String],
        images: Vec<GeneratedImage>,
    ) -> PipelineOutcome {
        let n = images.len();
        for (index, image) in images.iter().enumerate() {
            self.spawn_save(
                provider_name,
                model,
                request,
                prompts.get(index).cloned().unwrap_or_default(),
                image.clone(),
                (n > 1).then_some(index),
            );
        }

        let items = self
            .shape_items(images, request.response_format.as_deref())
            .await;
        PipelineOutcome {
            items,
            provider: provider_name.to_string(),
            model: model.to_string(),
            created: epoch_ms() / 1000,
        }
    }

    fn spawn_save(
        &self,
        provider_name: &str,
        model: &str,
        request: &PipelineRequest,
        prompt: String,
        image: GeneratedImage,
        index: Option<usize>,
    ) {
        let state = self.state.clone();
        let client = self.client.clone();
        let provider_name = provider_name.to_string();
        let model = model.to_string();
        let task = request.task;
        let size = request.size.clone();
        let seed = request
            .seed
            .unwrap_or_else(|| rand::rng().random_range(0..1_000_000_000));

        tokio::spawn(async move {
            let payload = match &image.b64_json {
                Some(b64) => Some((b64.clone(), "png".to_string())),
                None => match &image.url {
                    Some(url) if url.starts_with("data:") => iproxy_image::parse_data_uri(url)
                        .ok()
                        .map(|uri| {
                            let ext = uri
                                .mime
                                .strip_prefix("image/")
                                .unwrap_or("png")
                                .to_string();
                            (uri.base64, ext)
                        }),
                    Some(url) => download_as_b64(&client, url).await,
                    None => None,
                },
            };
            let Some((b64, extension)) = payload else {
                state
                    .logger
                    .error("Storage", "artifact skipped: no payload available");
                return;
            };
            let metadata = ArtifactMetadata {
                prompt,
                model,
                seed,
                params: serde_json::json!({
                    "task": task.as_str(),
                    "provider": provider_name,
                    "size": size,
                }),
                timestamp: 0,
            };
            let s3 = state.config.get().storage.s3.clone();
            state
                .artifacts
                .save_image(&b64, metadata, &extension, index, s3.as_ref())
                .await;
        });
    }

    /// Response shaping: `url` requests deliver URLs (base64 becomes a data
    /// URI for transport parity); `b64_json` requests deliver base64, with a
    /// best-effort download of URL payloads falling back to the URL.
    pub async fn shape_items(
        &self,
        images: Vec<GeneratedImage>,
        response_format: Option<&str>,
    ) -> Vec<ImageItem> {
        let want_b64 = response_format == Some("b64_json");
        let mut items = Vec::with_capacity(images.len());
        for image in images {
            if want_b64 {
                if let Some(b64) = image.b64_json {
                    items.push(ImageItem::from_b64(b64));
                } else if let Some(url) = image.url {
                    match download_as_b64(&self.client, &url).await {
                        Some((b64, _)) => items.push(ImageItem::from_b64(b64)),
                        None => items.push(ImageItem::from_url(url)),
                    }
                }
            } else if let Some(url) = image.url {
                items.push(ImageItem::from_url(url));
            } else if let Some(b64) = image.b64_json {
                let mime = B64
                    .decode(b64.as_bytes())
                    .ok()
                    .and_then(|bytes| iproxy_image::ImageFormat::detect(&bytes))
                    .map(|fmt| fmt.mime())
                    .unwrap_or("image/png");
                items.push(ImageItem::from_url(iproxy_image::build_data_uri(
                    &b64, mime,
                )));
            }
        }
        items
    }

    fn pick_credential(&self, provider: &str, burned: &HashSet<String>) -> Option<String> {
        // A few draws are enough; the pool pick is uniform and burned keys
        // are rare within one request.
        for _ in 0..8 {
            let candidate = self.state.config.next_available_key(provider)?;
            if !burned.contains(&candidate) {
                return Some(candidate);
            }
        }
        None
    }
}

fn resolve_optimizer_flags(
    global: &iproxy_config::PromptOptimizerConfig,
    defaults: &TaskDefaults,
) -> OptimizeFlags {
    let task_flags = defaults.prompt_optimizer.as_ref();
    OptimizeFlags {
        translate: task_flags
            .and_then(|flags| flags.translate)
            .unwrap_or(global.enable_translate),
        expand: task_flags
            .and_then(|flags| flags.expand)
            .unwrap_or(global.enable_expand),
    }
}

async fn download_as_b64(client: &wreq::Client, url: &str) -> Option<(String, String)> {
    let response = tokio::time::timeout(Duration::from_secs(20), client.get(url).send())
        .await
        .ok()?
        .ok()?;
    if !response.status().is_success() {
        return None;
    }
    let bytes = response.bytes().await.ok()?;
    let extension = iproxy_image::ImageFormat::detect(&bytes)
        .map(|fmt| fmt.extension())
        .unwrap_or("png")
        .to_string();
    Some((B64.encode(&bytes), extension))
}
