//! The request-processing core: mode gating, credential classification,
//! weighted routing, prompt optimization, dispatch with retries, and
//! response shaping.

pub mod auth;
pub mod content;
pub mod engine;
pub mod models;
pub mod optimizer;
pub mod plan;
pub mod state;

pub use auth::{classify_caller, AuthMode};
pub use engine::{Engine, PipelineOutcome, PipelineRequest};
pub use plan::{build_plan, PlanStep};
pub use state::AppState;
