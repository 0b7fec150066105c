//! Chat-message content extraction (pipeline stage 4): find the last user
//! message, pull out its text, and collect images from both `image_url`
//! parts and Markdown image syntax embedded in text.

use iproxy_protocol::openai::chat::{ChatMessage, ContentPart, MessageContent};

#[derive(Debug, Default, Clone)]
pub struct ExtractedContent {
    pub text: String,
    pub images: Vec<String>,
}

/// Walk messages back to front and extract from the last `user` entry.
pub fn extract_user_content(messages: &[ChatMessage]) -> ExtractedContent {
    let Some(message) = messages.iter().rev().find(|m| m.role == "user") else {
        return ExtractedContent::default();
    };

    let mut extracted = ExtractedContent::default();
    match message.content.clone().normalized() {
        MessageContent::Text(text) => {
            absorb_text(&mut extracted, &text);
        }
        MessageContent::Parts(parts) => {
            let mut text_chunks = Vec::new();
            for part in parts {
                match part {
                    ContentPart::Text { text } => text_chunks.push(text),
                    ContentPart::ImageUrl { image_url } => extracted.images.push(image_url.url),
                    // normalized() already folded blobs into ImageUrl.
                    ContentPart::Image { .. } => {}
                }
            }
            absorb_text(&mut extracted, &text_chunks.join("\n"));
        }
    }
    extracted
}

/// Strip Markdown image tags out of the prompt text, keeping their targets
/// as image inputs.
fn absorb_text(extracted: &mut ExtractedContent, text: &str) {
    let (clean, images) = split_markdown_images(text);
    extracted.images.extend(images);
    if extracted.text.is_empty() {
        extracted.text = clean;
    } else {
        extracted.text.push('\n');
        extracted.text.push_str(&clean);
    }
}

fn split_markdown_images(text: &str) -> (String, Vec<String>) {
    let mut clean = String::with_capacity(text.len());
    let mut images = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("![") {
        let Some(bracket_close) = rest[start..].find("](") else {
            break;
        };
        let target_start = start + bracket_close + 2;
        let Some(target_len) = rest[target_start..].find(')') else {
            break;
        };
        let target = rest[target_start..target_start + target_len].trim();
        if target.starts_with("http://")
            || target.starts_with("https://")
            || target.starts_with("data:")
        {
            images.push(target.to_string());
            clean.push_str(&rest[..start]);
        } else {
            // Not an image reference we understand; keep the original text.
            clean.push_str(&rest[..target_start + target_len + 1]);
        }
        rest = &rest[target_start + target_len + 1..];
    }
    clean.push_str(rest);
    (clean.trim().to_string(), images)
}

#[cfg(test)]
mod tests {
    use iproxy_protocol::openai::chat::ImageUrl;

    use super::*;

    fn user_text(text: &str) -> ChatMessage {
        ChatMessage {
            role: "user".to_string(),
            content: MessageContent::Text(text.to_string()),
        }
    }

    #[test]
    fn last_user_message_wins() {
        let messages = vec![
            user_text("first"),
            ChatMessage {
                role: "assistant".to_string(),
                content: MessageContent::Text("ignored".to_string()),
            },
            user_text("second"),
        ];
        let extracted = extract_user_content(&messages);
        assert_eq!(extracted.text, "second");
        assert!(extracted.images.is_empty());
    }

    #[test]
    fn collects_images_from_parts_and_markdown() {
        let messages = vec![ChatMessage {
            role: "user".to_string(),
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: "redraw this ![ref](https://example.com/a.png) in oils".to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: "data:image/png;base64,QUJD".to_string(),
                        detail: None,
                    },
                },
            ]),
        }];
        let extracted = extract_user_content(&messages);
        assert_eq!(extracted.text, "redraw this  in oils");
        assert_eq!(extracted.images.len(), 2);
        assert_eq!(extracted.images[0], "https://example.com/a.png");
        assert_eq!(extracted.images[1], "data:image/png;base64,QUJD");
    }

    #[test]
    fn vendor_blob_parts_are_normalized_to_data_uris() {
        let messages = vec![ChatMessage {
            role: "user".to_string(),
            content: MessageContent::Parts(vec![ContentPart::Image {
                image: "QUJD".to_string(),
                media_type: Some("image/jpeg".to_string()),
            }]),
        }];
        let extracted = extract_user_content(&messages);
        assert_eq!(extracted.images, vec!["data:image/jpeg;base64,QUJD"]);
    }

    #[test]
    fn non_image_markdown_links_survive() {
        let extracted = extract_user_content(&[user_text("see ![alt](not-a-url) here")]);
        assert_eq!(extracted.text, "see ![alt](not-a-url) here");
        assert!(extracted.images.is_empty());
    }

    #[test]
    fn no_user_message_yields_empty() {
        let extracted = extract_user_content(&[]);
        assert!(extracted.text.is_empty());
        assert!(extracted.images.is_empty());
    }
}
