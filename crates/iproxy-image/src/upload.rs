use std::time::Duration;

use crate::{parse_data_uri, ImageError};

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(20);

/// An HTTP image host that turns base64 payloads into public URLs, for
/// upstreams that only accept URL image inputs.
#[derive(Debug, Clone)]
pub struct ImageHost {
    pub upload_url: String,
    pub auth_code: Option<String>,
}

/// POST the payload as multipart and return the absolute URL the host
/// assigned. `payload` may be a data URI or bare base64.
pub async fn upload_to_image_host(
    client: &wreq::Client,
    host: &ImageHost,
    payload: &str,
) -> Result<String, ImageError> {
    let auth_code = host
        .auth_code
        .as_deref()
        .filter(|code| !code.is_empty())
        .ok_or(ImageError::MissingAuthCode)?;

    let (bytes, mime) = match parse_data_uri(payload) {
        Ok(uri) => {
            let mime = uri.mime.clone();
            (uri.decode()?, mime)
        }
        Err(_) => {
            let uri = parse_data_uri(&crate::build_data_uri(payload, "image/png"))?;
            (uri.decode()?, "image/png".to_string())
        }
    };

    let extension = mime.strip_prefix("image/").unwrap_or("png");
    let part = wreq::multipart::Part::bytes(bytes)
        .file_name(format!("upload.{extension}"))
        .mime_str(&mime)
        .map_err(|err| ImageError::Upload(err.to_string()))?;
    let form = wreq::multipart::Form::new()
        .text("authCode", auth_code.to_string())
        .part("image", part);

    let response = tokio::time::timeout(
        UPLOAD_TIMEOUT,
        client.post(&host.upload_url).multipart(form).send(),
    )
    .await
    .map_err(|_| ImageError::Upload("timeout".to_string()))?
    .map_err(|err| ImageError::Upload(err.to_string()))?;

    if !response.status().is_success() {
        return Err(ImageError::Upload(format!("status {}", response.status())));
    }
    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|err| ImageError::Upload(err.to_string()))?;
    extract_url(&body).ok_or_else(|| ImageError::Upload("no url in host response".to_string()))
}

fn extract_url(body: &serde_json::Value) -> Option<String> {
    for key in ["url", "data", "src"] {
        match body.get(key) {
            Some(serde_json::Value::String(url)) => return Some(url.clone()),
            Some(serde_json::Value::Object(obj)) => {
                if let Some(serde_json::Value::String(url)) = obj.get("url") {
                    return Some(url.clone());
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_auth_code_fails_fast() {
        let client = wreq::Client::new();
        let host = ImageHost {
            upload_url: "http://127.0.0.1:1/upload".to_string(),
            auth_code: None,
        };
        let err = upload_to_image_host(&client, &host, "QUJD").await.unwrap_err();
        assert!(matches!(err, ImageError::MissingAuthCode));
    }

    #[test]
    fn url_extraction_handles_flat_and_nested_shapes() {
        let flat = serde_json::json!({"url": "https://img.example/a.png"});
        assert_eq!(extract_url(&flat).unwrap(), "https://img.example/a.png");

        let nested = serde_json::json!({"data": {"url": "https://img.example/b.png"}});
        assert_eq!(extract_url(&nested).unwrap(), "https://img.example/b.png");

        assert!(extract_url(&serde_json::json!({"ok": true})).is_none());
    }
}
