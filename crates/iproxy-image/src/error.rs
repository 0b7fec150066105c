#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("unrecognized image format")]
    UnknownFormat,
    #[error("invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    #[error("invalid data uri")]
    InvalidDataUri,
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("fetch failed: {0}")]
    Fetch(String),
    #[error("image host auth code is not configured")]
    MissingAuthCode,
    #[error("upload failed: {0}")]
    Upload(String),
}
