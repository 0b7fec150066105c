//! HuggingFace Spaces adapter speaking the Gradio two-step protocol:
//! POST the parameter array to `/gradio_api/call/<fn>` for an event id, then
//! read the `/gradio_api/call/<fn>/<event_id>` SSE stream until a
//! `complete` or `error` frame. A per-task pool of space URLs is walked in
//! order; the next space is tried when one fails.

use async_trait::async_trait;
use futures_util::StreamExt;

use iproxy_image::parse_data_uri;
use iproxy_protocol::sse::SseParser;
use iproxy_provider_core::{
    resolve_size, GenerateOptions, GeneratedImage, ImageProvider, ImageRequest, OutputFormat,
    ProviderCapabilities, ProviderDescriptor, ProviderFailure, ProviderResult,
};

use crate::client::shared_client;
use crate::providers::util::with_deadline;

const PROVIDER_NAME: &str = "HuggingFace";

/// Gradio parameter layout a space expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamStyle {
    /// `[prompt, width, height, seed]`
    PromptSize,
    /// `[prompt, seed, randomize, width, height, steps]`
    FluxText,
    /// `[image, prompt, seed, randomize, guidance, steps]`
    KontextEdit,
}

#[derive(Debug, Clone, Copy)]
struct SpaceEndpoint {
    base: &'static str,
    call: &'static str,
    style: ParamStyle,
}

const TEXT_SPACES: &[SpaceEndpoint] = &[
    SpaceEndpoint {
        base: "https://tongyi-mai-z-image-turbo.hf.space",
        call: "generate_image",
        style: ParamStyle::PromptSize,
    },
    SpaceEndpoint {
        base: "https://black-forest-labs-flux-1-schnell.hf.space",
        call: "infer",
        style: ParamStyle::FluxText,
    },
];

const EDIT_SPACES: &[SpaceEndpoint] = &[SpaceEndpoint {
    base: "https://black-forest-labs-flux-1-kontext-dev.hf.space",
    call: "infer",
    style: ParamStyle::KontextEdit,
}];

const MODELS: &[&str] = &["z-image-turbo", "FLUX.1-schnell"];
const EDIT_MODELS: &[&str] = &["FLUX.1-Kontext-dev"];

const DESCRIPTOR: ProviderDescriptor = ProviderDescriptor {
    name: PROVIDER_NAME,
    capabilities: ProviderCapabilities {
        text_to_image: true,
        image_to_image: true,
        multi_image_fusion: false,
        async_task: false,
        max_input_images: 1,
        max_output_images: 4,
        max_edit_output_images: 1,
        max_blend_output_images: 1,
        max_native_output_images: 1,
        output_formats: &[OutputFormat::Url],
    },
    default_model: "z-image-turbo",
    default_edit_model: Some("FLUX.1-Kontext-dev"),
    default_size: "1024x1024",
    models: MODELS,
    edit_models: EDIT_MODELS,
};

#[derive(Debug, Default)]
pub struct HuggingFaceProvider;

impl HuggingFaceProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ImageProvider for HuggingFaceProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &DESCRIPTOR
    }

    fn detect_api_key(&self, credential: &str) -> bool {
        credential.starts_with("hf_")
    }

    async fn generate(
        &self,
        credential: &str,
        request: &ImageRequest,
        opts: &GenerateOptions,
    ) -> ProviderResult<Vec<GeneratedImage>> {
        let spaces = if request.images.is_empty() {
            TEXT_SPACES
        } else {
            EDIT_SPACES
        };

        // trying(i) → [ok | next(i+1) | exhausted]
        let mut last_failure = ProviderFailure::other("no spaces configured");
        for space in spaces {
            match with_deadline(opts.timeout, call_space(space, credential, request, opts)).await {
                Ok(image) => return Ok(vec![image]),
                Err(failure) => {
                    opts.logger.debug(
                        PROVIDER_NAME,
                        format!("space {} failed: {failure}", space.base),
                    );
                    last_failure = failure;
                }
            }
        }
        Err(last_failure)
    }
}

/// The pool of space URLs is the real credential here; an `hf_` token, when
/// present (relay mode), is forwarded for rate-limit headroom.
fn with_auth(builder: wreq::RequestBuilder, credential: &str) -> wreq::RequestBuilder {
    if credential.is_empty() {
        builder
    } else {
        builder.header("Authorization", format!("Bearer {credential}"))
    }
}

async fn call_space(
    space: &SpaceEndpoint,
    credential: &str,
    request: &ImageRequest,
    opts: &GenerateOptions,
) -> ProviderResult<GeneratedImage> {
    let file = match request.images.first() {
        Some(image) => Some(upload_input(space, credential, image).await?),
        None => None,
    };
    let params = build_params(space.style, request, opts, file);

    let call_url = format!("{}/gradio_api/call/{}", space.base, space.call);
    let response = with_auth(shared_client().post(&call_url), credential)
        .json(&serde_json::json!({ "data": params }))
        .send()
        .await
        .map_err(|err| ProviderFailure::other(err.to_string()))?;
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        return Err(iproxy_provider_core::classify_upstream_failure(status, &text));
    }
    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|err| ProviderFailure::other(err.to_string()))?;
    let event_id = body
        .get("event_id")
        .and_then(|id| id.as_str())
        .ok_or_else(|| ProviderFailure::other("gradio call returned no event_id"))?;

    read_event_stream(space, credential, event_id).await
}

/// Upload one data-URI input to the space, returning a Gradio `FileData`
/// value referencing the server-side path.
async fn upload_input(
    space: &SpaceEndpoint,
    credential: &str,
    image: &str,
) -> ProviderResult<serde_json::Value> {
    let uri = parse_data_uri(image)
        .or_else(|_| parse_data_uri(&iproxy_image::build_data_uri(image, "image/png")))
        .map_err(|err| ProviderFailure::other(err.to_string()))?;
    let bytes = uri
        .decode()
        .map_err(|err| ProviderFailure::other(err.to_string()))?;
    let extension = uri.mime.strip_prefix("image/").unwrap_or("png").to_string();

    let part = wreq::multipart::Part::bytes(bytes)
        .file_name(format!("input.{extension}"))
        .mime_str(&uri.mime)
        .map_err(|err| ProviderFailure::other(err.to_string()))?;
    let form = wreq::multipart::Form::new().part("files", part);

    let upload_url = format!("{}/gradio_api/upload", space.base);
    let response = with_auth(shared_client().post(&upload_url), credential)
        .multipart(form)
        .send()
        .await
        .map_err(|err| ProviderFailure::other(err.to_string()))?;
    if !response.status().is_success() {
        return Err(ProviderFailure::other(format!(
            "gradio upload failed with status {}",
            response.status().as_u16()
        )));
    }
    let paths: Vec<String> = response
        .json()
        .await
        .map_err(|err| ProviderFailure::other(err.to_string()))?;
    let path = paths
        .into_iter()
        .next()
        .ok_or_else(|| ProviderFailure::other("gradio upload returned no path"))?;

    Ok(serde_json::json!({
        "path": path,
        "meta": { "_type": "gradio.FileData" },
    }))
}

fn build_params(
    style: ParamStyle,
    request: &ImageRequest,
    opts: &GenerateOptions,
    file: Option<serde_json::Value>,
) -> Vec<serde_json::Value> {
    let (width, height) = resolve_size(
        request.size.as_deref().or(opts.defaults.size.as_deref()),
        DESCRIPTOR.default_size,
    );
    let seed = request.seed.unwrap_or(0);
    let steps = request.steps.or(opts.defaults.steps);

    match style {
        ParamStyle::PromptSize => vec![
            serde_json::json!(request.prompt),
            serde_json::json!(width),
            serde_json::json!(height),
            serde_json::json!(seed),
        ],
        ParamStyle::FluxText => vec![
            serde_json::json!(request.prompt),
            serde_json::json!(seed),
            serde_json::json!(request.seed.is_none()),
            serde_json::json!(width),
            serde_json::json!(height),
            serde_json::json!(steps.unwrap_or(4)),
        ],
        ParamStyle::KontextEdit => vec![
            file.unwrap_or(serde_json::Value::Null),
            serde_json::json!(request.prompt),
            serde_json::json!(seed),
            serde_json::json!(request.seed.is_none()),
            serde_json::json!(2.5),
            serde_json::json!(steps.unwrap_or(28)),
        ],
    }
}

/// Consume the SSE result stream: `event: complete` carries the output data,
/// `event: error` is terminal.
async fn read_event_stream(
    space: &SpaceEndpoint,
    credential: &str,
    event_id: &str,
) -> ProviderResult<GeneratedImage> {
    let stream_url = format!(
        "{}/gradio_api/call/{}/{}",
        space.base, space.call, event_id
    );
    let response = with_auth(shared_client().get(&stream_url), credential)
        .send()
        .await
        .map_err(|err| ProviderFailure::other(err.to_string()))?;
    if !response.status().is_success() {
        return Err(ProviderFailure::other(format!(
            "gradio stream failed with status {}",
            response.status().as_u16()
        )));
    }

    let mut parser = SseParser::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| ProviderFailure::other(err.to_string()))?;
        for event in parser.push_bytes(&chunk) {
            match event.event.as_deref() {
                Some("complete") => {
                    let data: serde_json::Value = serde_json::from_str(&event.data)
                        .map_err(|err| ProviderFailure::other(err.to_string()))?;
                    let url = find_url(&data).ok_or_else(|| {
                        ProviderFailure::other("complete event carried no image url")
                    })?;
                    return Ok(GeneratedImage::from_url(url));
                }
                Some("error") => {
                    let message = if event.data.is_empty() || event.data == "null" {
                        "gradio task failed".to_string()
                    } else {
                        event.data.clone()
                    };
                    return Err(ProviderFailure::other(message));
                }
                _ => {}
            }
        }
    }
    for event in parser.finish() {
        if event.event.as_deref() == Some("complete")
            && let Ok(data) = serde_json::from_str::<serde_json::Value>(&event.data)
            && let Some(url) = find_url(&data)
        {
            return Ok(GeneratedImage::from_url(url));
        }
    }
    Err(ProviderFailure::other("gradio stream ended without result"))
}

/// Depth-first search for the first `"url"` string anywhere in the output.
/// Spaces disagree about nesting (`[{url}]`, `[[{image:{url}}], seed]`, …).
fn find_url(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(url)) = map.get("url") {
                return Some(url.clone());
            }
            map.values().find_map(find_url)
        }
        serde_json::Value::Array(items) => items.iter().find_map(find_url),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_detection() {
        let provider = HuggingFaceProvider::new();
        assert!(provider.detect_api_key("hf_abc123"));
        assert!(!provider.detect_api_key("ms-abc"));
    }

    #[test]
    fn url_search_handles_nested_shapes() {
        let flat = serde_json::json!([{"url": "https://space/file.png"}]);
        assert_eq!(find_url(&flat).unwrap(), "https://space/file.png");

        let nested = serde_json::json!([[{"image": {"url": "https://space/deep.png"}}], 42]);
        assert_eq!(find_url(&nested).unwrap(), "https://space/deep.png");

        assert!(find_url(&serde_json::json!([1, 2, 3])).is_none());
    }

    #[test]
    fn flux_params_follow_declared_order() {
        let request = ImageRequest {
            prompt: "a dog".to_string(),
            size: Some("16:9".to_string()),
            ..ImageRequest::default()
        };
        let opts = GenerateOptions::new(
            iproxy_common::TaskKind::Text,
            iproxy_logging::Logger::silent(iproxy_logging::LogLevel::Error),
        );
        let params = build_params(ParamStyle::FluxText, &request, &opts, None);
        assert_eq!(params.len(), 6);
        assert_eq!(params[0], serde_json::json!("a dog"));
        assert_eq!(params[3], serde_json::json!(1280));
        assert_eq!(params[4], serde_json::json!(720));
    }
}
