use chrono::{DateTime, Utc};
use convctx_core::{AttributeValue, Attributes};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;
use uuid::Uuid;

use crate::attributes::MemoryAttributes;

/// One client session and its attributes.
#[derive(Debug)]
pub struct MemorySession {
    id: String,
    created_at: DateTime<Utc>,
    attributes: MemoryAttributes,
}

impl MemorySession {
    fn new() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            created_at: Utc::now(),
            attributes: MemoryAttributes::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl Attributes for MemorySession {
    fn get(&self, name: &str) -> Option<AttributeValue> {
        self.attributes.get(name)
    }

    fn set(&self, name: &str, value: AttributeValue) {
        self.attributes.set(name, value);
    }

    fn remove(&self, name: &str) -> Option<AttributeValue> {
        self.attributes.remove(name)
    }

    fn names(&self) -> Vec<String> {
        self.attributes.names()
    }
}

/// Owns every live session by id.
#[derive(Debug)]
pub struct SessionManager {
    sessions: DashMap<String, Arc<MemorySession>>,
    allow_creation: AtomicBool,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self {
            sessions: DashMap::new(),
            allow_creation: AtomicBool::new(true),
        }
    }
}

impl SessionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new session, or `None` while creation is disabled.
    #[must_use]
    pub fn try_create(&self) -> Option<Arc<MemorySession>> {
        if !self.allow_creation.load(Ordering::Acquire) {
            return None;
        }
        Some(self.create())
    }

    #[must_use]
    pub fn create(&self) -> Arc<MemorySession> {
        let session = Arc::new(MemorySession::new());
        info!("Creating new session: {}", session.id());
        self.sessions
            .insert(session.id().to_string(), Arc::clone(&session));
        session
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<MemorySession>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Drop a session; the caller tears down whatever it held.
    pub fn invalidate(&self, id: &str) -> Option<Arc<MemorySession>> {
        info!("Invalidating session: {id}");
        self.sessions.remove(id).map(|(_, session)| session)
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Set whether requests may create new sessions.
    pub fn set_allow_creation(&self, allow: bool) {
        self.allow_creation.store(allow, Ordering::Release);
    }
}
