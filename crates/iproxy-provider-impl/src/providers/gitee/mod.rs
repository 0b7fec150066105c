//! Gitee AI adapter. Text-to-image is a synchronous JSON call returning
//! base64; edits go through multipart and may come back synchronously or as
//! an async task that is polled until a terminal state.

use std::time::Duration;

use async_trait::async_trait;

use iproxy_image::parse_data_uri;
use iproxy_provider_core::{
    classify_upstream_failure, resolve_size, GenerateOptions, GeneratedImage, ImageProvider,
    ImageRequest, OutputFormat, ProviderCapabilities, ProviderDescriptor, ProviderFailure,
    ProviderResult,
};

use crate::client::shared_client;
use crate::providers::util::{string_at, with_deadline};

const PROVIDER_NAME: &str = "Gitee";
const GENERATIONS_URL: &str = "https://ai.gitee.com/v1/images/generations";
const EDITS_URL: &str = "https://ai.gitee.com/v1/images/edits";

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_POLLS: u32 = 60;
const POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

const MODELS: &[&str] = &[
    "Kolors",
    "flux-1-schnell",
    "stable-diffusion-3.5-large",
    "Qwen-Image",
    "HiDream-I1-Full",
];
const EDIT_MODELS: &[&str] = &["Qwen-Image-Edit", "FLUX.1-Kontext-dev"];

const DESCRIPTOR: ProviderDescriptor = ProviderDescriptor {
    name: PROVIDER_NAME,
    capabilities: ProviderCapabilities {
        text_to_image: true,
        image_to_image: true,
        multi_image_fusion: false,
        async_task: true,
        max_input_images: 1,
        max_output_images: 4,
        max_edit_output_images: 2,
        max_blend_output_images: 1,
        max_native_output_images: 1,
        output_formats: &[OutputFormat::Url, OutputFormat::B64Json],
    },
    default_model: "Qwen-Image",
    default_edit_model: Some("Qwen-Image-Edit"),
    default_size: "1024x1024",
    models: MODELS,
    edit_models: EDIT_MODELS,
};

#[derive(Debug, Default)]
pub struct GiteeProvider;

impl GiteeProvider {
    pub fn new() -> Self {
        Self
    }
}

fn is_gitee_token(credential: &str) -> bool {
    (30..=60).contains(&credential.len())
        && credential.bytes().all(|byte| byte.is_ascii_alphanumeric())
}

#[async_trait]
impl ImageProvider for GiteeProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &DESCRIPTOR
    }

    fn detect_api_key(&self, credential: &str) -> bool {
        is_gitee_token(credential)
    }

    async fn generate(
        &self,
        credential: &str,
        request: &ImageRequest,
        opts: &GenerateOptions,
    ) -> ProviderResult<Vec<GeneratedImage>> {
        if request.images.is_empty() {
            self.text_to_image(credential, request, opts).await
        } else {
            self.edit(credential, request, opts).await
        }
    }
}

impl GiteeProvider {
    async fn text_to_image(
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
            "n": 1,
            "response_format": "b64_json",
        });
        if let Some(steps) = request.steps.or(opts.defaults.steps) {
            body["num_inference_steps"] = serde_json::json!(steps);
        }

        let response = with_deadline(opts.timeout, async {
            shared_client()
                .post(GENERATIONS_URL)
                .header("Authorization", format!("Bearer {credential}"))
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
        parse_image_payload(&text)
    }

    async fn edit(
        &self,
        credential: &str,
        request: &ImageRequest,
        opts: &GenerateOptions,
    ) -> ProviderResult<Vec<GeneratedImage>> {
        let model = self.effective_model(request, opts);
        let mut form = wreq::multipart::Form::new()
            .text("prompt", request.prompt.clone())
            .text("model", model);
        if let Some(size) = request.size.as_deref().or(opts.defaults.size.as_deref()) {
            let (width, height) = resolve_size(Some(size), DESCRIPTOR.default_size);
            form = form.text("size", format!("{width}x{height}"));
        }
        for (index, image) in request.images.iter().enumerate() {
            let part = image_part(image, index)?;
            form = form.part("image", part);
        }

        let response = with_deadline(opts.timeout, async {
            shared_client()
                .post(EDITS_URL)
                .header("Authorization", format!("Bearer {credential}"))
                .multipart(form)
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

        // Async jobs hand back a task status URL instead of image data.
        if let Some(status_url) = string_at(
            &value,
            &[&["urls", "get"], &["task_status_url"], &["links", "status"]],
        ) {
            return self.poll_task(credential, status_url, opts).await;
        }
        parse_image_payload(&text)
    }

    /// submitted → polling → {succeed | fail | timeout}
    async fn poll_task(
        &self,
        credential: &str,
        status_url: &str,
        opts: &GenerateOptions,
    ) -> ProviderResult<Vec<GeneratedImage>> {
        for _ in 0..MAX_POLLS {
            tokio::time::sleep(POLL_INTERVAL).await;

            let response = with_deadline(POLL_REQUEST_TIMEOUT, async {
                shared_client()
                    .get(status_url)
                    .header("Authorization", format!("Bearer {credential}"))
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

            let state = string_at(&value, &[&["status"], &["task_status"], &["state"]])
                .unwrap_or("")
                .to_lowercase();
            match state.as_str() {
                "success" | "succeeded" | "succeed" | "completed" => {
                    return parse_image_payload(&text);
                }
                "failure" | "failed" | "error" | "cancelled" => {
                    let message = string_at(&value, &[&["error"], &["message"]])
                        .unwrap_or("task failed");
                    return Err(ProviderFailure::other(message.to_string()));
                }
                _ => {
                    opts.logger
                        .debug(PROVIDER_NAME, format!("task pending, state={state}"));
                }
            }
        }
        Err(ProviderFailure::timeout())
    }
}

fn image_part(image: &str, index: usize) -> ProviderResult<wreq::multipart::Part> {
    let uri = parse_data_uri(image)
        .or_else(|_| parse_data_uri(&iproxy_image::build_data_uri(image, "image/png")))
        .map_err(|err| ProviderFailure::other(err.to_string()))?;
    let bytes = uri
        .decode()
        .map_err(|err| ProviderFailure::other(err.to_string()))?;
    let extension = uri.mime.strip_prefix("image/").unwrap_or("png").to_string();
    wreq::multipart::Part::bytes(bytes)
        .file_name(format!("input-{index}.{extension}"))
        .mime_str(&uri.mime)
        .map_err(|err| ProviderFailure::other(err.to_string()))
}

/// Accepts `{data:[{b64_json|url}]}` and `{output:[url,...]}` shapes.
fn parse_image_payload(text: &str) -> ProviderResult<Vec<GeneratedImage>> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|err| ProviderFailure::other(format!("invalid upstream json: {err}")))?;

    let mut images = Vec::new();
    if let Some(items) = value.get("data").and_then(|data| data.as_array()) {
        for item in items {
            if let Some(b64) = string_at(item, &[&["b64_json"]]) {
                images.push(GeneratedImage::from_b64(b64));
            } else if let Some(url) = string_at(item, &[&["url"]]) {
                images.push(GeneratedImage::from_url(url));
            }
        }
    } else if let Some(outputs) = value.get("output").and_then(|output| output.as_array()) {
        for output in outputs {
            if let Some(url) = output.as_str() {
                images.push(GeneratedImage::from_url(url));
            }
        }
    }

    if images.is_empty() {
        return Err(ProviderFailure::other("upstream returned no images"));
    }
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_shape_is_30_to_60_alphanumerics() {
        let provider = GiteeProvider::new();
        assert!(provider.detect_api_key(&"a".repeat(30)));
        assert!(provider.detect_api_key(&"A1b2".repeat(15)));
        assert!(!provider.detect_api_key(&"a".repeat(29)));
        assert!(!provider.detect_api_key(&"a".repeat(61)));
        assert!(!provider.detect_api_key("hf_0000000000000000000000000000000"));
        assert!(!provider.detect_api_key(&format!("{}!", "a".repeat(30))));
    }

    #[test]
    fn payload_parser_handles_both_shapes() {
        let sync = r#"{"data":[{"b64_json":"QUJD"}]}"#;
        let images = parse_image_payload(sync).unwrap();
        assert_eq!(images[0].b64_json.as_deref(), Some("QUJD"));

        let task = r#"{"status":"success","output":["https://cdn.example/done.png"]}"#;
        let images = parse_image_payload(task).unwrap();
        assert_eq!(images[0].url.as_deref(), Some("https://cdn.example/done.png"));

        assert!(parse_image_payload(r#"{"ok":true}"#).is_err());
    }
}
