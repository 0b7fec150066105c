//! Pollinations adapter: a single GET with query-string parameters; the
//! response body is the raw image. Edits need URL-reachable inputs, so
//! base64 payloads are pushed through the image host first.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;

use iproxy_image::ImageFormat;
use iproxy_provider_core::{
    classify_upstream_failure, resolve_size, GenerateOptions, GeneratedImage, ImageProvider,
    ImageRequest, OutputFormat, ProviderCapabilities, ProviderDescriptor, ProviderFailure,
    ProviderResult,
};

use crate::client::shared_client;
use crate::providers::util::{ensure_url_inputs, with_deadline};

const PROVIDER_NAME: &str = "Pollinations";
const BASE_URL: &str = "https://image.pollinations.ai/prompt";

const MODELS: &[&str] = &["flux", "turbo", "gptimage"];
const EDIT_MODELS: &[&str] = &["kontext", "gptimage"];

const DESCRIPTOR: ProviderDescriptor = ProviderDescriptor {
    name: PROVIDER_NAME,
    capabilities: ProviderCapabilities {
        text_to_image: true,
        image_to_image: true,
        multi_image_fusion: true,
        async_task: false,
        max_input_images: 4,
        max_output_images: 4,
        max_edit_output_images: 2,
        max_blend_output_images: 2,
        max_native_output_images: 1,
        output_formats: &[OutputFormat::B64Json],
    },
    default_model: "flux",
    default_edit_model: Some("kontext"),
    default_size: "1024x1024",
    models: MODELS,
    edit_models: EDIT_MODELS,
};

#[derive(Debug, Default)]
pub struct PollinationsProvider;

impl PollinationsProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ImageProvider for PollinationsProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &DESCRIPTOR
    }

    fn detect_api_key(&self, credential: &str) -> bool {
        credential.starts_with("pk_") || credential.starts_with("sk_")
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

        let mut url = format!(
            "{BASE_URL}/{}?width={width}&height={height}&model={model}&nologo=true&private=true",
            urlencoding::encode(&request.prompt)
        );
        if let Some(seed) = request.seed {
            url.push_str(&format!("&seed={seed}"));
        }
        if !request.images.is_empty() {
            let inputs = ensure_url_inputs(&request.images, opts).await?;
            let joined = inputs
                .iter()
                .map(|input| urlencoding::encode(input).into_owned())
                .collect::<Vec<_>>()
                .join(",");
            url.push_str(&format!("&image={joined}"));
        }

        let response = with_deadline(opts.timeout, async {
            shared_client()
                .get(&url)
                .header("Authorization", format!("Bearer {credential}"))
                .send()
                .await
                .map_err(|err| ProviderFailure::other(err.to_string()))
        })
        .await?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_upstream_failure(status, &text));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| ProviderFailure::other(err.to_string()))?;
        if ImageFormat::detect(&bytes).is_none() {
            return Err(ProviderFailure::other("upstream body is not an image"));
        }
        Ok(vec![GeneratedImage::from_b64(B64.encode(&bytes))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_detection() {
        let provider = PollinationsProvider::new();
        assert!(provider.detect_api_key("pk_token"));
        assert!(provider.detect_api_key("sk_token"));
        assert!(!provider.detect_api_key("token_pk"));
    }
}
