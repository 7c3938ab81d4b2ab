//! Per-session map of long-running conversations.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use crate::conversation::Conversation;

/// Conversations known to one session, keyed by id.
///
/// Point lookups go straight to the map. Inserts, removals and whole-map
/// walks also take the structural guard so a sweep never interleaves with
/// another structural change.
#[derive(Debug, Default)]
pub struct ConversationRegistry {
    entries: DashMap<String, Arc<Conversation>>,
    structure: Mutex<()>,
}

impl ConversationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lookup by id without the structural guard.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<Conversation>> {
        self.entries.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Register a conversation under its id, replacing any previous entry.
    pub fn insert(&self, conversation: Arc<Conversation>) {
        let _structure = self.structure.lock();
        self.entries
            .insert(conversation.id().to_string(), conversation);
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Conversation>> {
        let _structure = self.structure.lock();
        self.entries.remove(id).map(|(_, conversation)| conversation)
    }

    /// Copy of the current entries, never a live view.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Conversation>> {
        let _structure = self.structure.lock();
        self.entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Call `f` for every entry while holding the structural guard.
    ///
    /// `f` must not insert into or remove from this registry.
    pub fn visit(&self, mut f: impl FnMut(&Arc<Conversation>)) {
        let _structure = self.structure.lock();
        self.entries.iter().for_each(|entry| f(entry.value()));
    }

    /// Remove every ended (transient) conversation and return them.
    ///
    /// Expired but still long-running conversations stay.
    pub fn sweep_transient(&self) -> Vec<Arc<Conversation>> {
        let _structure = self.structure.lock();
        let ended: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| entry.value().is_transient())
            .map(|entry| entry.key().clone())
            .collect();

        let removed: Vec<Arc<Conversation>> = ended
            .iter()
            .filter_map(|id| self.entries.remove(id).map(|(_, conversation)| conversation))
            .collect();

        if !removed.is_empty() {
            debug!("Swept {} ended conversations", removed.len());
        }
        removed
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of registered conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
