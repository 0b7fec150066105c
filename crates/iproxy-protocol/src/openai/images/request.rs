use serde::{Deserialize, Serialize};

/// `POST /v1/images/generations` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateImageRequestBody {
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Must be at least 1; clamped to the provider cap before dispatch.
    pub n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    /// Pixel dimensions (`1024x1024`) or a ratio alias (`16:9`).
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
}

/// One or several input images; OpenAI accepts both shapes for edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageInput {
    Single(String),
    Many(Vec<String>),
}

impl ImageInput {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            ImageInput::Single(value) => vec![value],
            ImageInput::Many(values) => values,
        }
    }
}

/// `POST /v1/images/edits` JSON body. The multipart shape carries the same
/// fields as form parts and is folded into this struct by the router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateImageEditRequestBody {
    pub image: ImageInput,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_body_accepts_single_or_many_images() {
        let single: CreateImageEditRequestBody =
            serde_json::from_str(r#"{"image":"data:image/png;base64,AA==","prompt":"p"}"#).unwrap();
        assert_eq!(single.image.into_vec().len(), 1);

        let many: CreateImageEditRequestBody =
            serde_json::from_str(r#"{"image":["a","b"],"prompt":"p"}"#).unwrap();
        assert_eq!(many.image.into_vec().len(), 2);
    }
}
