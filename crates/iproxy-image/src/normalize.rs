use std::time::Duration;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;

use crate::{build_data_uri, ImageError, ImageFormat};

const FETCH_TIMEOUT: Duration = Duration::from_secs(20);

/// Normalize caller-supplied input images into data URIs:
/// - `http(s)://` URLs are fetched and re-encoded;
/// - existing `data:` URIs pass through;
/// - anything else is treated as bare base64 and wrapped as `image/png`.
///
/// A failed fetch preserves the original string; some adapters can still use
/// the URL directly.
pub async fn normalize_input_images(client: &wreq::Client, images: Vec<String>) -> Vec<String> {
    let mut normalized = Vec::with_capacity(images.len());
    for image in images {
        normalized.push(normalize_one(client, image).await);
    }
    normalized
}

async fn normalize_one(client: &wreq::Client, image: String) -> String {
    if image.starts_with("data:") {
        return image;
    }
    if image.starts_with("http://") || image.starts_with("https://") {
        match fetch_as_data_uri(client, &image).await {
            Ok(uri) => return uri,
            Err(_) => return image,
        }
    }
    build_data_uri(&image, "image/png")
}

async fn fetch_as_data_uri(client: &wreq::Client, url: &str) -> Result<String, ImageError> {
    let response = tokio::time::timeout(FETCH_TIMEOUT, client.get(url).send())
        .await
        .map_err(|_| ImageError::Fetch("timeout".to_string()))?
        .map_err(|err| ImageError::Fetch(err.to_string()))?;
    if !response.status().is_success() {
        return Err(ImageError::Fetch(format!("status {}", response.status())));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|err| ImageError::Fetch(err.to_string()))?;
    let mime = ImageFormat::detect(&bytes)
        .map(|fmt| fmt.mime())
        .unwrap_or("image/png");
    Ok(build_data_uri(&B64.encode(&bytes), mime))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn data_uris_pass_through_and_bare_base64_is_wrapped() {
        let client = wreq::Client::new();
        let input = vec![
            "data:image/jpeg;base64,QUJD".to_string(),
            "QUJD".to_string(),
        ];
        let output = normalize_input_images(&client, input).await;
        assert_eq!(output[0], "data:image/jpeg;base64,QUJD");
        assert_eq!(output[1], "data:image/png;base64,QUJD");
    }
}
