//! Per-request state of the conversation context.

use std::fmt;
use std::sync::Arc;

use convctx_core::{ContextError, IdGenerator, RequestHandle, Result};

use crate::conversation::{Conversation, ConversationGuard};
use crate::registry::ConversationRegistry;
use crate::store::ConversationStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContextState {
    #[default]
    Inactive,
    /// Bound to a request, no conversation active.
    Associated,
    /// A conversation is bound and locked.
    Active,
    /// Released by a finished request; behaves like `Inactive`.
    Dissociated,
}

/// Everything the context knows about the request it serves.
///
/// A binding lives from `associate` to `dissociate` of one request and holds
/// the conversation lock while active, so it stays on the request's thread.
#[derive(Default)]
pub struct RequestBinding {
    pub(crate) state: ContextState,
    pub(crate) request: Option<Arc<dyn RequestHandle>>,
    pub(crate) id_generator: Option<Arc<dyn IdGenerator>>,
    pub(crate) registry: Option<Arc<ConversationRegistry>>,
    pub(crate) current: Option<Arc<Conversation>>,
    pub(crate) store: Option<ConversationStore>,
    pub(crate) guard: Option<ConversationGuard>,
    /// The current conversation was started by this request.
    pub(crate) started_here: bool,
}

impl RequestBinding {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn state(&self) -> ContextState {
        self.state
    }

    /// Bound to a request, with or without an active conversation.
    #[must_use]
    pub const fn is_associated(&self) -> bool {
        matches!(self.state, ContextState::Associated | ContextState::Active)
    }

    /// A conversation is bound to the request.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self.state, ContextState::Active)
    }

    /// The request this binding serves.
    #[must_use]
    pub fn request(&self) -> Option<&Arc<dyn RequestHandle>> {
        self.request.as_ref()
    }

    /// The conversation bound by the last `activate`.
    #[must_use]
    pub fn current_conversation(&self) -> Option<&Arc<Conversation>> {
        self.current.as_ref()
    }

    /// The store of the active conversation.
    #[must_use]
    pub const fn store(&self) -> Option<&ConversationStore> {
        self.store.as_ref()
    }

    /// Whether the binding holds its conversation's lock.
    #[must_use]
    pub const fn holds_lock(&self) -> bool {
        self.guard.is_some()
    }

    pub(crate) fn registry(&self) -> Result<Arc<ConversationRegistry>> {
        if !self.is_associated() {
            return Err(ContextError::NotAssociated);
        }
        self.registry
            .clone()
            .ok_or(ContextError::MissingState("conversation registry"))
    }

    pub(crate) fn id_generator(&self) -> Result<Arc<dyn IdGenerator>> {
        if !self.is_associated() {
            return Err(ContextError::NotAssociated);
        }
        self.id_generator
            .clone()
            .ok_or(ContextError::MissingState("conversation id generator"))
    }

    pub(crate) fn bound_request(&self) -> Result<Arc<dyn RequestHandle>> {
        self.request.clone().ok_or(ContextError::NotAssociated)
    }

    /// Drop the active scope: store, lock and start marker.
    pub(crate) fn release_scope(&mut self) {
        self.store = None;
        self.guard = None;
        self.started_here = false;
    }

    pub(crate) fn clear(&mut self) {
        self.release_scope();
        self.current = None;
        self.registry = None;
        self.id_generator = None;
        self.request = None;
    }
}

impl fmt::Debug for RequestBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBinding")
            .field("state", &self.state)
            .field(
                "current",
                &self.current.as_ref().map(|conversation| conversation.id()),
            )
            .field("store", &self.store)
            .field("holds_lock", &self.guard.is_some())
            .finish_non_exhaustive()
    }
}
