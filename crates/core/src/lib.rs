//! # TripMate Core
//!
//! Domain types, traits, and error definitions for the TripMate conversation
//! runtime. This crate has **zero framework dependencies**; it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is defined as a trait here. Implementations
//! live in their respective crates. This enables:
//! - Swapping the history backend or model provider via configuration
//! - Easy testing with scripted mock implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod history;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use history::HistoryStore;
pub use message::{ConversationId, Message, Part, Role};
pub use provider::{ModelRequest, Provider, ProviderResponse, StreamChunk, ToolChoice, Usage};
pub use tool::{Tool, ToolCall, ToolDefinition, ToolOutcome, ToolRegistry};
