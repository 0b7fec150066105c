/// One generated image as the adapter produced it: an upstream URL, a bare
/// base64 payload, or both after a local re-encode.
#[derive(Debug, Clone, Default)]
pub struct GeneratedImage {
    pub url: Option<String>,
    pub b64_json: Option<String>,
}

impl GeneratedImage {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            b64_json: None,
        }
    }

    pub fn from_b64(b64: impl Into<String>) -> Self {
        Self {
            url: None,
            b64_json: Some(b64.into()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.url.is_none() && self.b64_json.is_none()
    }
}
