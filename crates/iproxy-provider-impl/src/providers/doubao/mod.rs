//! Doubao (Volcengine Ark) adapter: synchronous JSON API returning image
//! URLs. Base64 image inputs are pre-uploaded to the image host because the
//! upstream only accepts URL inputs.

use async_trait::async_trait;

use iproxy_provider_core::{
    classify_upstream_failure, resolve_size, GenerateOptions, GeneratedImage, ImageProvider,
    ImageRequest, OutputFormat, ProviderCapabilities, ProviderDescriptor, ProviderFailure,
    ProviderResult,
};

use crate::client::shared_client;
use crate::providers::util::{ensure_url_inputs, string_at, with_deadline};

const PROVIDER_NAME: &str = "Doubao";
const GENERATIONS_URL: &str = "https://ark.cn-beijing.volces.com/api/v3/images/generations";

const MODELS: &[&str] = &[
    "doubao-seedream-4-5-251128",
    "doubao-seedream-4-0-250828",
    "doubao-seedream-3-0-t2i-250415",
];
const EDIT_MODELS: &[&str] = &[
    "doubao-seedream-4-5-251128",
    "doubao-seededit-3-0-i2i-250628",
];

const DESCRIPTOR: ProviderDescriptor = ProviderDescriptor {
    name: PROVIDER_NAME,
    capabilities: ProviderCapabilities {
        text_to_image: true,
        image_to_image: true,
        multi_image_fusion: true,
        async_task: false,
        max_input_images: 10,
        max_output_images: 4,
        max_edit_output_images: 4,
        max_blend_output_images: 4,
        max_native_output_images: 1,
        output_formats: &[OutputFormat::Url],
    },
    default_model: "doubao-seedream-4-5-251128",
    default_edit_model: Some("doubao-seedream-4-5-251128"),
    default_size: "2048x2048",
    models: MODELS,
    edit_models: EDIT_MODELS,
};

#[derive(Debug, Default)]
pub struct DoubaoProvider;

impl DoubaoProvider {
    pub fn new() -> Self {
        Self
    }
}

/// Canonical UUID form: 8-4-4-4-12 lowercase/uppercase hex groups.
fn is_uuid(credential: &str) -> bool {
    let bytes = credential.as_bytes();
    if bytes.len() != 36 {
        return false;
    }
    for (index, byte) in bytes.iter().enumerate() {
        match index {
            8 | 13 | 18 | 23 => {
                if *byte != b'-' {
                    return false;
                }
            }
            _ => {
                if !byte.is_ascii_hexdigit() {
                    return false;
                }
            }
        }
    }
    true
}

#[async_trait]
impl ImageProvider for DoubaoProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &DESCRIPTOR
    }

    fn detect_api_key(&self, credential: &str) -> bool {
        is_uuid(credential)
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
            "response_format": "url",
            "watermark": false,
        });
        if let Some(seed) = request.seed {
            body["seed"] = serde_json::json!(seed);
        }
        if !request.images.is_empty() {
            let urls = ensure_url_inputs(&request.images, opts).await?;
            body["image"] = serde_json::json!(urls);
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

        let value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|err| ProviderFailure::other(format!("invalid upstream json: {err}")))?;
        let items = value
            .get("data")
            .and_then(|data| data.as_array())
            .ok_or_else(|| ProviderFailure::other("upstream response missing data"))?;

        let mut images = Vec::new();
        for item in items {
            if let Some(url) = string_at(item, &[&["url"]]) {
                images.push(GeneratedImage::from_url(url));
            } else if let Some(b64) = string_at(item, &[&["b64_json"]]) {
                images.push(GeneratedImage::from_b64(b64));
            }
        }
        if images.is_empty() {
            return Err(ProviderFailure::other("upstream returned no images"));
        }
        Ok(images)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_shapes_are_detected() {
        let provider = DoubaoProvider::new();
        assert!(provider.detect_api_key("0a1b2c3d-4e5f-6071-8293-a4b5c6d7e8f9"));
        assert!(provider.detect_api_key("0A1B2C3D-4E5F-6071-8293-A4B5C6D7E8F9"));
        assert!(!provider.detect_api_key("0a1b2c3d4e5f60718293a4b5c6d7e8f9"));
        assert!(!provider.detect_api_key("hf_abcdef"));
        assert!(!provider.detect_api_key("0a1b2c3d-4e5f-6071-8293-a4b5c6d7e8fZ"));
    }
}
