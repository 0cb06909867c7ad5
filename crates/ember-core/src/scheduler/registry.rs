//! Global registry of live Channel instances, keyed by ChannelId.
//!
//! Mirrors [`crate::sync::MutexRegistry`]: every `new Channel(capacity)`
//! expression in evaluated source allocates an entry here, and the `Value`
//! held by the program is just the `ChannelId`, so a channel can be
//! captured by closures and shared between tasks without the evaluator
//! needing to know about its buffering internals.

use crate::scheduler::{Channel, ChannelId};
use dashmap::DashMap;
use std::sync::Arc;

/// Registry mapping `ChannelId` to the shared `Channel` instance.
#[derive(Default)]
pub struct ChannelRegistry {
    channels: DashMap<ChannelId, Arc<Channel>>,
}

impl ChannelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { channels: DashMap::new() }
    }

    /// Allocate and register a new channel of the given capacity, returning its ID.
    pub fn create(&self, capacity: usize) -> ChannelId {
        let id = ChannelId::new();
        self.channels.insert(id, Arc::new(Channel::new(id, capacity)));
        id
    }

    /// Look up a registered channel by ID.
    pub fn get(&self, id: ChannelId) -> Option<Arc<Channel>> {
        self.channels.get(&id).map(|entry| entry.clone())
    }

    /// Remove a channel from the registry (called once its Value is collected).
    pub fn remove(&self, id: ChannelId) -> Option<Arc<Channel>> {
        self.channels.remove(&id).map(|(_, c)| c)
    }

    /// Number of live channels.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the registry holds no channels.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
