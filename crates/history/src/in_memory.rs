//! In-memory history store: the default, process-local backend.
//!
//! Nothing survives a restart. Eviction is by first-insertion order, not by
//! recency of use.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;
use tracing::{debug, info};
use tripmate_core::history::{DEFAULT_CAPACITY, DEFAULT_COMPACT_THRESHOLD, HistoryStore};
use tripmate_core::message::{ConversationId, Message};

#[derive(Default)]
struct State {
    conversations: HashMap<ConversationId, Vec<Message>>,
    /// Conversation ids in the order they were first stored.
    insertion_order: VecDeque<ConversationId>,
}

/// A history store that keeps every conversation in a HashMap.
pub struct InMemoryHistoryStore {
    state: RwLock<State>,
    capacity: usize,
    compact_threshold: usize,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CAPACITY, DEFAULT_COMPACT_THRESHOLD)
    }

    /// Create a store with a per-conversation message cap and a
    /// tracked-conversation threshold for compaction.
    pub fn with_limits(capacity: usize, compact_threshold: usize) -> Self {
        Self {
            state: RwLock::new(State::default()),
            capacity: capacity.max(1),
            compact_threshold,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn get(&self, id: &ConversationId) -> Vec<Message> {
        self.state
            .read()
            .await
            .conversations
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    async fn set(&self, id: &ConversationId, mut messages: Vec<Message>) {
        if messages.len() > self.capacity {
            let overflow = messages.len() - self.capacity;
            messages.drain(..overflow);
            debug!(conversation = %id, dropped = overflow, "History window slid");
        }

        let mut state = self.state.write().await;
        if state.conversations.insert(id.clone(), messages).is_none() {
            state.insertion_order.push_back(id.clone());
        }
    }

    async fn compact(&self) -> usize {
        let mut state = self.state.write().await;
        let tracked = state.conversations.len();
        if tracked <= self.compact_threshold {
            return 0;
        }

        let to_evict = tracked / 2;
        let mut evicted = 0;
        while evicted < to_evict {
            let Some(id) = state.insertion_order.pop_front() else {
                break;
            };
            if state.conversations.remove(&id).is_some() {
                evicted += 1;
            }
        }

        info!(evicted, remaining = state.conversations.len(), "Compacted conversation history");
        evicted
    }

    async fn len(&self) -> usize {
        self.state.read().await.conversations.len()
    }
}
