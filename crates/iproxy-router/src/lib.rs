//! Public OpenAI-compatible surface: chat completions, image generations,
//! edits, blend, and the models list.

mod middleware;
mod openai;

pub use openai::public_router;
