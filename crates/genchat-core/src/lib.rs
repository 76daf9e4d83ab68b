//! genchat-core - One request shape, one response shape, many LLM backends
//!
//! This crate provides:
//! - A tagged request model with exactly one backend section per call
//! - Adapters for Google Gemini, OpenAI, DeepSeek, Mistral and Anthropic
//! - Incremental SSE / NDJSON stream decoding into normalized events
//! - Optional sequential fallback across the other registered backends
//! - A single typed error carrying the failing provider and a stable code

pub mod client;
pub mod dispatch;
pub mod error;
pub mod fallback;
pub mod providers;
pub mod registration;
pub mod request;
pub mod validate;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use client::GenChat;
pub use dispatch::Dispatcher;
pub use error::{ErrorCode, SdkError};
pub use fallback::{FALLBACK_ORDER, FallbackEngine, default_model};
pub use providers::Backend;
pub use registration::{BackendCredentials, BackendRegistration, mask_secret};
pub use request::{
    BackendKind, BackendParams, EventStream, Generation, Output, Request, RoutedRequest,
    StreamEvent, TokenUsage,
};
pub use validate::{validate_config, validate_params, validate_provider};
