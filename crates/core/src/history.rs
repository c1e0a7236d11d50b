//! The HistoryStore trait: bounded per-conversation message logs.
//!
//! The store is the only shared mutable state in the runtime. Operations
//! never fail: an unknown conversation reads as empty.

use async_trait::async_trait;

use crate::message::{ConversationId, Message};

/// Default number of messages retained per conversation.
pub const DEFAULT_CAPACITY: usize = 50;

/// Default number of tracked conversations above which `compact()` evicts.
pub const DEFAULT_COMPACT_THRESHOLD: usize = 100;

/// The core HistoryStore trait.
///
/// Implementations: in-memory (`tripmate-history`). A durable backend can
/// replace it without touching the orchestrator.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// The backend name (e.g., "in-memory").
    fn name(&self) -> &str;

    /// The stored messages for `id`, oldest first. Empty if unknown.
    async fn get(&self, id: &ConversationId) -> Vec<Message>;

    /// Replace the stored sequence for `id`, keeping only the most recent
    /// `capacity` messages in order.
    async fn set(&self, id: &ConversationId, messages: Vec<Message>);

    /// Evict the oldest half of tracked conversations (by first insertion)
    /// once the threshold is exceeded. Returns how many were evicted.
    async fn compact(&self) -> usize;

    /// Number of tracked conversations.
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
