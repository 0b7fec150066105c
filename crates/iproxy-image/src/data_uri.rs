use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;

use crate::{ImageError, ImageFormat};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime: String,
    pub base64: String,
}

impl DataUri {
    pub fn decode(&self) -> Result<Vec<u8>, ImageError> {
        Ok(B64.decode(self.base64.as_bytes())?)
    }
}

pub fn build_data_uri(base64: &str, mime: &str) -> String {
    format!("data:{mime};base64,{base64}")
}

/// Parse a `data:<mime>;base64,<payload>` string. A missing MIME is inferred
/// from the decoded magic bytes when possible, defaulting to PNG.
pub fn parse_data_uri(value: &str) -> Result<DataUri, ImageError> {
    let rest = value.strip_prefix("data:").ok_or(ImageError::InvalidDataUri)?;
    let (meta, payload) = rest.split_once(',').ok_or(ImageError::InvalidDataUri)?;
    if !meta.ends_with(";base64") {
        return Err(ImageError::InvalidDataUri);
    }
    let declared = meta.trim_end_matches(";base64");
    let mime = if declared.is_empty() {
        let bytes = B64.decode(payload.as_bytes())?;
        ImageFormat::detect(&bytes)
            .map(|fmt| fmt.mime())
            .unwrap_or("image/png")
            .to_string()
    } else {
        declared.to_string()
    };
    Ok(DataUri {
        mime,
        base64: payload.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let uri = build_data_uri("QUJD", "image/png");
        let parsed = parse_data_uri(&uri).unwrap();
        assert_eq!(parsed.mime, "image/png");
        assert_eq!(parsed.base64, "QUJD");
    }

    #[test]
    fn missing_mime_is_inferred() {
        let png = [0x89u8, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];
        let b64 = B64.encode(png);
        let parsed = parse_data_uri(&format!("data:;base64,{b64}")).unwrap();
        assert_eq!(parsed.mime, "image/png");
    }

    #[test]
    fn rejects_non_base64_uris() {
        assert!(parse_data_uri("data:image/png,plain").is_err());
        assert!(parse_data_uri("http://example.com/a.png").is_err());
    }
}
