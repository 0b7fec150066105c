use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A single element of a multi-part message body.
///
/// The `Image` variant is a vendor shape (`{type:"image", image:"<b64>"}`)
/// seen from some clients; [`ContentPart::normalized`] folds it into the
/// standard `ImageUrl` shape so downstream code only ever sees `ImageUrl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text {
        text: String,
    },
    ImageUrl {
        image_url: ImageUrl,
    },
    Image {
        image: String,
        #[serde(skip_serializing_if = "Option::is_none", alias = "mediaType")]
        media_type: Option<String>,
    },
}

impl ContentPart {
    /// Fold the vendor blob shape into a standard `image_url` data URI.
    pub fn normalized(self) -> ContentPart {
        match self {
            ContentPart::Image { image, media_type } => {
                let url = if image.starts_with("data:") {
                    image
                } else {
                    let mime = media_type.as_deref().unwrap_or("image/png");
                    format!("data:{mime};base64,{image}")
                };
                ContentPart::ImageUrl {
                    image_url: ImageUrl { url, detail: None },
                }
            }
            other => other,
        }
    }
}

/// Message content is either a plain string or a list of typed parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn normalized(self) -> MessageContent {
        match self {
            MessageContent::Parts(parts) => {
                MessageContent::Parts(parts.into_iter().map(ContentPart::normalized).collect())
            }
            text => text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_and_parts_both_deserialize() {
        let plain: MessageContent = serde_json::from_str(r#""a cat""#).unwrap();
        assert!(matches!(plain, MessageContent::Text(_)));

        let parts: MessageContent = serde_json::from_str(
            r#"[{"type":"text","text":"hi"},{"type":"image_url","image_url":{"url":"http://x/y.png"}}]"#,
        )
        .unwrap();
        assert!(matches!(parts, MessageContent::Parts(ref p) if p.len() == 2));
    }

    #[test]
    fn vendor_blob_folds_into_image_url() {
        let part: ContentPart =
            serde_json::from_str(r#"{"type":"image","image":"QUJD","mediaType":"image/jpeg"}"#)
                .unwrap();
        match part.normalized() {
            ContentPart::ImageUrl { image_url } => {
                assert_eq!(image_url.url, "data:image/jpeg;base64,QUJD");
            }
            other => panic!("unexpected part: {other:?}"),
        }
    }
}
