pub mod capabilities;
pub mod errors;
pub mod provider;
pub mod registry;
pub mod request;
pub mod response;
pub mod size;

pub use capabilities::{OutputFormat, ProviderCapabilities, ProviderDescriptor};
pub use errors::{classify_upstream_failure, ProviderFailure, ProviderResult};
pub use provider::{GenerateOptions, ImageProvider};
pub use registry::ProviderRegistry;
pub use request::{BlendRequest, ImageRequest};
pub use response::GeneratedImage;
pub use size::{resolve_size, SIZE_ALIASES};
