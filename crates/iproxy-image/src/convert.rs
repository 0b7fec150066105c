use std::io::Cursor;

use crate::ImageError;

/// Decode a WebP payload and re-encode it as PNG. Pixel data is preserved;
/// only the container changes.
pub fn webp_to_png(webp: &[u8]) -> Result<Vec<u8>, ImageError> {
    let decoded = image::load_from_memory_with_format(webp, image::ImageFormat::WebP)
        .map_err(|err| ImageError::Decode(err.to_string()))?;
    let mut out = Cursor::new(Vec::new());
    decoded
        .write_to(&mut out, image::ImageFormat::Png)
        .map_err(|err| ImageError::Encode(err.to_string()))?;
    Ok(out.into_inner())
}
