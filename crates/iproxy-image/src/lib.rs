//! Image byte-level utilities: format sniffing, data URIs, WebP→PNG
//! normalization, input-image normalization, and image-host upload.

mod convert;
mod data_uri;
mod error;
mod format;
mod normalize;
mod upload;

pub use convert::webp_to_png;
pub use data_uri::{build_data_uri, parse_data_uri, DataUri};
pub use error::ImageError;
pub use format::ImageFormat;
pub use normalize::normalize_input_images;
pub use upload::{upload_to_image_host, ImageHost};
