/// Internal generation request every adapter receives after parsing and
/// normalization. `images` entries are data URIs unless normalization chose
/// to preserve an original URL.
#[derive(Debug, Clone, Default)]
pub struct ImageRequest {
    pub prompt: String,
    pub images: Vec<String>,
    pub model: Option<String>,
    pub size: Option<String>,
    pub n: Option<u32>,
    pub steps: Option<u32>,
    pub seed: Option<i64>,
    pub response_format: Option<String>,
}

impl ImageRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

/// Multi-image fusion request; all inputs contribute to one composition.
#[derive(Debug, Clone, Default)]
pub struct BlendRequest {
    pub prompt: String,
    pub images: Vec<String>,
    pub model: Option<String>,
    pub size: Option<String>,
    pub n: Option<u32>,
    pub response_format: Option<String>,
}

impl BlendRequest {
    pub fn into_image_request(self) -> ImageRequest {
        ImageRequest {
            prompt: self.prompt,
            images: self.images,
            model: self.model,
            size: self.size,
            n: self.n,
            steps: None,
            seed: None,
            response_format: self.response_format,
        }
    }
}
