//! AI integration.
//!
//! - **Completions**: any OpenAI-compatible `chat/completions` endpoint,
//!   called through [`AiExecutor`] with retry and per-call billing
//! - **Images**: a text-to-image endpoint that returns raw image bytes

pub mod costs;
pub mod executor;
pub mod image;
pub mod provider;
pub mod retry;

pub use costs::CostTable;
pub use executor::{AiExecutor, CallIdentity, Completion, ExecutorSettings};
pub use image::ImageGenerator;
pub use provider::*;
pub use retry::RetryPolicy;
