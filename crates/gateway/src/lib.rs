//! Caller-facing gateway for ModelGate.
//!
//! Resolves which model serves a call, routes it through the adapter
//! registry, and falls back along a configured chain when the primary model
//! fails. Also exposes code completion and embeddings on top of the same
//! routing.

pub mod gateway;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use gateway::{COMPLETION_TEMPERATURE, LlmGateway, RoutingOptions, completion_prompt};
