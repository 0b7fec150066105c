use std::time::Duration;

use iproxy_image::{upload_to_image_host, ImageHost};
use iproxy_provider_core::{GenerateOptions, ProviderFailure, ProviderResult};

/// Ensure every image input is an HTTP(S) URL, uploading data-URI / base64
/// payloads to the configured image host. Used by upstreams that cannot
/// accept inline image bytes.
pub(crate) async fn ensure_url_inputs(
    images: &[String],
    opts: &GenerateOptions,
) -> ProviderResult<Vec<String>> {
    let mut urls = Vec::with_capacity(images.len());
    for image in images {
        if image.starts_with("http://") || image.starts_with("https://") {
            urls.push(image.clone());
            continue;
        }
        let host_config = opts
            .image_host
            .as_ref()
            .filter(|host| !host.upload_url.is_empty())
            .ok_or_else(|| {
                ProviderFailure::other("image host is not configured for base64 inputs")
            })?;
        let host = ImageHost {
            upload_url: host_config.upload_url.clone(),
            auth_code: host_config.auth_code.clone(),
        };
        let url = upload_to_image_host(crate::client::shared_client(), &host, image)
            .await
            .map_err(|err| ProviderFailure::other(err.to_string()))?;
        urls.push(url);
    }
    Ok(urls)
}

/// Run a future against the per-call deadline, mapping expiry onto the
/// provider failure taxonomy.
pub(crate) async fn with_deadline<T, F>(timeout: Duration, future: F) -> ProviderResult<T>
where
    F: std::future::Future<Output = ProviderResult<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(ProviderFailure::timeout()),
    }
}

/// Pull a string out of a JSON value by trying several dotted paths.
pub(crate) fn string_at<'a>(
    value: &'a serde_json::Value,
    paths: &[&[&str]],
) -> Option<&'a str> {
    for path in paths {
        let mut cursor = value;
        let mut found = true;
        for segment in *path {
            match segment.parse::<usize>() {
                Ok(index) => match cursor.get(index) {
                    Some(next) => cursor = next,
                    None => {
                        found = false;
                        break;
                    }
                },
                Err(_) => match cursor.get(segment) {
                    Some(next) => cursor = next,
                    None => {
                        found = false;
                        break;
                    }
                },
            }
        }
        if found && let Some(text) = cursor.as_str() {
            return Some(text);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_at_walks_objects_and_arrays() {
        let value = serde_json::json!({
            "data": [{"url": "https://cdn.example/a.png"}],
            "output": {"image_url": "https://cdn.example/b.png"},
        });
        assert_eq!(
            string_at(&value, &[&["data", "0", "url"]]),
            Some("https://cdn.example/a.png")
        );
        assert_eq!(
            string_at(&value, &[&["missing"], &["output", "image_url"]]),
            Some("https://cdn.example/b.png")
        );
        assert_eq!(string_at(&value, &[&["nope"]]), None);
    }
}
