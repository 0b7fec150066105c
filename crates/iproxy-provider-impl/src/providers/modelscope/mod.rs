//! ModelScope adapter: submit an async generation job, then poll the task
//! endpoint every five seconds until `SUCCEED` or `FAILED`.

use std::time::Duration;

use async_trait::async_trait;

use iproxy_provider_core::{
    classify_upstream_failure, resolve_size, GenerateOptions, GeneratedImage, ImageProvider,
    ImageRequest, OutputFormat, ProviderCapabilities, ProviderDescriptor, ProviderFailure,
    ProviderResult,
};

use crate::client::shared_client;
use crate::providers::util::{string_at, with_deadline};

const PROVIDER_NAME: &str = "ModelScope";
const SUBMIT_URL: &str = "https://api-inference.modelscope.cn/v1/images/generations";
const TASK_URL: &str = "https://api-inference.modelscope.cn/v1/tasks";

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_POLLS: u32 = 60;
const POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

const MODELS: &[&str] = &[
    "MusePublic/489_ckpt_FLUX_1",
    "MAILAND/majicflus_v1",
    "Qwen/Qwen-Image",
];
const EDIT_MODELS: &[&str] = &["Qwen/Qwen-Image-Edit"];

const DESCRIPTOR: ProviderDescriptor = ProviderDescriptor {
    name: PROVIDER_NAME,
    capabilities: ProviderCapabilities {
        text_to_image: true,
        image_to_image: true,
        multi_image_fusion: false,
        async_task: true,
        max_input_images: 1,
        max_output_images: 4,
        max_edit_output_images: 1,
        max_blend_output_images: 1,
        max_native_output_images: 1,
        output_formats: &[OutputFormat::Url],
    },
    default_model: "Qwen/Qwen-Image",
    default_edit_model: Some("Qwen/Qwen-Image-Edit"),
    default_size: "1024x1024",
    models: MODELS,
    edit_models: EDIT_MODELS,
};

#[derive(Debug, Default)]
pub struct ModelScopeProvider;

impl ModelScopeProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ImageProvider for ModelScopeProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &DESCRIPTOR
    }

    fn detect_api_key(&self, credential: &str) -> bool {
        credential.starts_with("ms-")
    }

    async fn generate(
        &self,
        credential: &str,
        request: &ImageRequest,
        opts: &GenerateOptions,
    ) -> ProviderResult<Vec<GeneratedImage>> {
        let model = self.effective_model(request, opts);
        let (width, height) = resolve_size(
            request.size.as_deref().or(opts.defaults.size.as_deref()),
            DESCRIPTOR.default_size,
        );

        let mut body = serde_json::json!({
            "model": model,
            "prompt": request.prompt,
            "size": format!("{width}x{height}"),
        });
        if let Some(steps) = request.steps.or(opts.defaults.steps) {
            body["steps"] = serde_json::json!(steps);
        }
        if let Some(seed) = request.seed {
            body["seed"] = serde_json::json!(seed);
        }
        if let Some(image) = request.images.first() {
            body["image_url"] = serde_json::json!(image);
        }

        let response = with_deadline(opts.timeout, async {
            shared_client()
                .post(SUBMIT_URL)
                .header("Authorization", format!("Bearer {credential}"))
                .header("X-ModelScope-Async-Mode", "true")
                .json(&body)
                .send()
                .await
                .map_err(|err| ProviderFailure::other(err.to_string()))
        })
        .await?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|err| ProviderFailure::other(err.to_string()))?;
        if !(200..300).contains(&status) {
            return Err(classify_upstream_failure(status, &text));
        }

        let value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|err| ProviderFailure::other(format!("invalid upstream json: {err}")))?;
        let task_id = string_at(&value, &[&["task_id"], &["taskId"]])
            .ok_or_else(|| ProviderFailure::other("upstream response missing task_id"))?
            .to_string();

        opts.logger
            .debug(PROVIDER_NAME, format!("task submitted, id={task_id}"));
        self.poll_task(credential, &task_id, opts).await
    }
}

impl ModelScopeProvider {
    /// submitted → polling → {SUCCEED | FAILED | timeout}
    async fn poll_task(
        &self,
        credential: &str,
        task_id: &str,
        opts: &GenerateOptions,
    ) -> ProviderResult<Vec<GeneratedImage>> {
        let url = format!("{TASK_URL}/{task_id}");
        for _ in 0..MAX_POLLS {
            tokio::time::sleep(POLL_INTERVAL).await;

            let response = with_deadline(POLL_REQUEST_TIMEOUT, async {
                shared_client()
                    .get(&url)
                    .header("Authorization", format!("Bearer {credential}"))
                    .header("X-ModelScope-Task-Type", "image_generation")
                    .send()
                    .await
                    .map_err(|err| ProviderFailure::other(err.to_string()))
            })
            .await?;
            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .map_err(|err| ProviderFailure::other(err.to_string()))?;
            if !(200..300).contains(&status) {
                return Err(classify_upstream_failure(status, &text));
            }

            let value: serde_json::Value = serde_json::from_str(&text)
                .map_err(|err| ProviderFailure::other(format!("invalid task json: {err}")))?;
            let state = string_at(&value, &[&["task_status"], &["status"]]).unwrap_or("");
            match state {
                "SUCCEED" | "SUCCESS" => {
                    let urls = value
                        .get("output_images")
                        .and_then(|images| images.as_array())
                        .map(|images| {
                            images
                                .iter()
                                .filter_map(|image| image.as_str())
                                .map(GeneratedImage::from_url)
                                .collect::<Vec<_>>()
                        })
                        .unwrap_or_default();
                    if urls.is_empty() {
                        return Err(ProviderFailure::other("task succeeded without images"));
                    }
                    return Ok(urls);
                }
                "FAILED" => {
                    let message = string_at(&value, &[&["errors", "message"], &["message"]])
                        .unwrap_or("task failed");
                    return Err(ProviderFailure::other(message.to_string()));
                }
                _ => {}
            }
        }
        Err(ProviderFailure::timeout())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_detection() {
        let provider = ModelScopeProvider::new();
        assert!(provider.detect_api_key("ms-12345678-abcd"));
        assert!(!provider.detect_api_key("hf_123"));
        assert!(!provider.detect_api_key("msomething"));
    }
}
