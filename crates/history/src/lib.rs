//! Conversation history implementations for TripMate.

pub mod in_memory;

pub use in_memory::InMemoryHistoryStore;
