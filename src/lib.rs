// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod categorize;
pub mod config;
pub mod inference;
pub mod message;
pub mod metrics;
pub mod moderation;
pub mod notify;
pub mod pipeline;
pub mod priority;
pub mod signals;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::pipeline::Pipeline;
