//! Context assembly for ModelGate.
//!
//! The [`ContextEngine`] gathers everything a model call should see (the
//! current file, retrieved code, session history, project rules and
//! memories) and trims it to a token budget in a fixed priority order.

pub mod engine;
pub mod in_memory;
pub mod trim;

pub use engine::{ContextEngine, ContextRequest, extract_context_query};
pub use in_memory::{InMemoryMemoryStore, InMemorySearch};
pub use trim::{DropInfo, Layer, TrimReport, trim_to_budget};
