pub mod clock;
pub mod error;
pub mod mask;
pub mod task;

pub use clock::{beijing_date_string, beijing_timestamp_string, epoch_ms, BEIJING_OFFSET};
pub use error::{ErrorKind, GatewayError};
pub use mask::mask_key;
pub use task::{FailureReason, TaskKind};

/// Generate an opaque id for request tracing and key-pool items.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
