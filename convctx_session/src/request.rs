use convctx_core::{Attributes, RequestHandle};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

use crate::attributes::MemoryAttributes;
use crate::manager::SessionManager;

/// A single inbound request.
///
/// The request knows its session only by id; a request for an invalidated
/// session sees no session until it creates a new one.
#[derive(Debug)]
pub struct MemoryRequest {
    attributes: MemoryAttributes,
    sessions: Arc<SessionManager>,
    session_id: Mutex<Option<String>>,
}

impl MemoryRequest {
    /// A request that has no session yet.
    #[must_use]
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self {
            attributes: MemoryAttributes::new(),
            sessions,
            session_id: Mutex::new(None),
        }
    }

    /// A request carrying an existing session id.
    #[must_use]
    pub fn with_session(sessions: Arc<SessionManager>, session_id: &str) -> Self {
        Self {
            attributes: MemoryAttributes::new(),
            sessions,
            session_id: Mutex::new(Some(session_id.to_string())),
        }
    }

    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }
}

impl RequestHandle for MemoryRequest {
    fn attributes(&self) -> &dyn Attributes {
        &self.attributes
    }

    fn session(&self, create: bool) -> Option<Arc<dyn Attributes>> {
        let mut session_id = self.session_id.lock();
        if let Some(session) = session_id.as_deref().and_then(|id| self.sessions.get(id)) {
            return Some(session);
        }
        if !create {
            return None;
        }
        let session = self.sessions.try_create()?;
        debug!("Request bound to new session {}", session.id());
        *session_id = Some(session.id().to_string());
        Some(session)
    }
}
