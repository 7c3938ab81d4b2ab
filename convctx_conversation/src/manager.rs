//! Conversation context lifecycle.
//!
//! Each request drives the context through
//! `associate -> activate -> deactivate -> dissociate`, passing its own
//! [`RequestBinding`] to every call. The manager itself only holds settings
//! and can be shared by all requests.

use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use convctx_config::ConversationSettings;
use convctx_core::{
    AttributeValue, Attributes, ContextError, ConversationEvent, EventSink, IdGenerator,
    IdStrategy, RequestHandle, Result, TracingEventSink, downcast_attribute,
};

use crate::binding::{ContextState, RequestBinding};
use crate::conversation::{Conversation, ConversationGuard, duration_millis};
use crate::registry::ConversationRegistry;
use crate::store::{ConversationStore, NamingScheme};

/// Session attribute holding the session's id generator.
pub const ID_GENERATOR_ATTRIBUTE: &str = "convctx.conversation.idGenerator";
/// Session attribute holding the session's conversation registry.
pub const CONVERSATIONS_ATTRIBUTE: &str = "convctx.conversation.conversations";

pub struct ConversationContextManager {
    parameter_name: RwLock<String>,
    default_timeout_ms: AtomicU64,
    concurrent_access_timeout_ms: AtomicU64,
    store_prefix: String,
    id_strategy: IdStrategy,
    events: Arc<dyn EventSink>,
}

impl ConversationContextManager {
    #[must_use]
    pub fn new(settings: &ConversationSettings, events: Arc<dyn EventSink>) -> Self {
        Self {
            parameter_name: RwLock::new(settings.parameter_name.clone()),
            default_timeout_ms: AtomicU64::new(settings.default_timeout_ms),
            concurrent_access_timeout_ms: AtomicU64::new(settings.concurrent_access_timeout_ms),
            store_prefix: settings.store_prefix.clone(),
            id_strategy: settings.id_strategy,
            events,
        }
    }

    #[must_use]
    pub fn parameter_name(&self) -> String {
        self.parameter_name.read().clone()
    }

    pub fn set_parameter_name(&self, name: &str) {
        *self.parameter_name.write() = name.to_string();
    }

    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_default_timeout(&self, timeout: Duration) {
        self.default_timeout_ms
            .store(duration_millis(timeout), Ordering::Relaxed);
    }

    #[must_use]
    pub fn concurrent_access_timeout(&self) -> Duration {
        Duration::from_millis(self.concurrent_access_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_concurrent_access_timeout(&self, timeout: Duration) {
        self.concurrent_access_timeout_ms
            .store(duration_millis(timeout), Ordering::Relaxed);
    }

    /// Bind `request` to the context.
    ///
    /// Returns `Ok(false)` if the binding is already associated. The id
    /// generator and registry come from the session when it has them;
    /// otherwise fresh ones are created and written to an existing session.
    pub fn associate(
        &self,
        binding: &mut RequestBinding,
        request: Arc<dyn RequestHandle>,
    ) -> Result<bool> {
        if binding.is_associated() {
            return Ok(false);
        }

        let id_generator = match request.session_attribute(ID_GENERATOR_ATTRIBUTE, false) {
            Some(value) => Arc::clone(&*downcast_attribute::<Arc<dyn IdGenerator>>(
                ID_GENERATOR_ATTRIBUTE,
                value,
            )?),
            None => {
                let generator = self.id_strategy.generator();
                request.set_session_attribute(
                    ID_GENERATOR_ATTRIBUTE,
                    Arc::new(Arc::clone(&generator)),
                    false,
                );
                generator
            }
        };

        let registry = match request.session_attribute(CONVERSATIONS_ATTRIBUTE, false) {
            Some(value) => {
                downcast_attribute::<ConversationRegistry>(CONVERSATIONS_ATTRIBUTE, value)?
            }
            None => {
                let registry = Arc::new(ConversationRegistry::new());
                let value: AttributeValue = registry.clone();
                request.set_session_attribute(CONVERSATIONS_ATTRIBUTE, value, false);
                registry
            }
        };

        binding.request = Some(request);
        binding.id_generator = Some(id_generator);
        binding.registry = Some(registry);
        binding.current = None;
        binding.release_scope();
        binding.state = ContextState::Associated;
        debug!("Conversation context associated with request");
        Ok(true)
    }

    /// Unbind the request, publishing its generator and registry to the
    /// session if the session does not hold them yet.
    ///
    /// Returns `false` if the binding was not associated.
    pub fn dissociate(&self, binding: &mut RequestBinding) -> bool {
        if !binding.is_associated() {
            return false;
        }
        if binding.is_active() {
            warn!("Dissociating request while its conversation is still active");
        }
        self.copy_to_session(binding);
        binding.clear();
        binding.state = ContextState::Dissociated;
        debug!("Conversation context dissociated from request");
        true
    }

    /// The request's session came into existence; publish to it.
    pub fn session_created(&self, binding: &RequestBinding) {
        self.copy_to_session(binding);
    }

    fn copy_to_session(&self, binding: &RequestBinding) {
        if !binding.is_associated() {
            return;
        }
        let Some(session) = binding.request().and_then(|request| request.session(false)) else {
            return;
        };
        if let Some(generator) = &binding.id_generator {
            if session.get(ID_GENERATOR_ATTRIBUTE).is_none() {
                session.set(ID_GENERATOR_ATTRIBUTE, Arc::new(Arc::clone(generator)));
            }
        }
        if let Some(registry) = &binding.registry {
            if session.get(CONVERSATIONS_ATTRIBUTE).is_none() {
                let value: AttributeValue = registry.clone();
                session.set(CONVERSATIONS_ATTRIBUTE, value);
            }
        }
    }

    /// Bind a conversation to the request.
    ///
    /// Without `cid` (or with an empty one) a new transient conversation is
    /// started. Otherwise the registered conversation is restored and locked.
    /// If it is unknown, ended, expired or stays locked past the concurrent
    /// access timeout, a new transient conversation is bound anyway and the
    /// failure is returned. The same holds when the restored conversation's
    /// store cannot attach to the session, which reports `SessionUnavailable`.
    /// Once associated, the binding is active after every call, so
    /// [`RequestBinding::is_active`] tells whether the request can go on.
    pub fn activate(&self, binding: &mut RequestBinding, cid: Option<&str>) -> Result<()> {
        if binding.is_active() {
            return Err(ContextError::AlreadyActive);
        }
        if !binding.is_associated() {
            return Err(ContextError::NotAssociated);
        }

        let Some(cid) = cid.filter(|cid| !cid.is_empty()) else {
            self.associate_new_conversation(binding)?;
            return Ok(());
        };

        let restorable = binding
            .registry()?
            .get(cid)
            .filter(|conversation| !conversation.is_transient() && !conversation.is_expired());
        let Some(conversation) = restorable else {
            debug!("No conversation to restore for id {cid}");
            self.associate_new_conversation(binding)?;
            return Err(ContextError::ConversationNotFound(cid.to_string()));
        };

        let Some(guard) = conversation.lock(self.concurrent_access_timeout()) else {
            warn!("Conversation {cid} is locked by another request, starting a transient one");
            self.associate_new_conversation(binding)?;
            return Err(ContextError::ConversationLockTimeout(cid.to_string()));
        };

        // Ended while this request waited for the lock.
        if conversation.is_transient() {
            drop(guard);
            self.associate_new_conversation(binding)?;
            return Err(ContextError::ConversationNotFound(cid.to_string()));
        }

        if let Err(err) = self.associate_existing_conversation(binding, conversation, guard) {
            warn!("Cannot restore conversation {cid}: {err}");
            self.associate_new_conversation(binding)?;
            return Err(err);
        }
        Ok(())
    }

    fn associate_new_conversation(&self, binding: &mut RequestBinding) -> Result<()> {
        let request = binding.bound_request()?;
        let id = binding.id_generator()?.next_id();
        let conversation = Arc::new(Conversation::new(id, self.default_timeout()));

        binding.guard = conversation.lock(Duration::ZERO);
        binding.store = Some(ConversationStore::for_request(
            NamingScheme::transient(&self.store_prefix),
            request,
        ));
        debug!("Started transient conversation {}", conversation.id());
        binding.current = Some(conversation);
        binding.started_here = true;
        binding.state = ContextState::Active;
        Ok(())
    }

    fn associate_existing_conversation(
        &self,
        binding: &mut RequestBinding,
        conversation: Arc<Conversation>,
        guard: ConversationGuard,
    ) -> Result<()> {
        let request = binding.bound_request()?;
        let mut store = ConversationStore::for_request(
            NamingScheme::new(&self.store_prefix, conversation.id()),
            request,
        );
        store.attach()?;

        debug!("Restored conversation {}", conversation.id());
        binding.guard = Some(guard);
        binding.store = Some(store);
        binding.current = Some(conversation);
        binding.started_here = false;
        binding.state = ContextState::Active;
        Ok(())
    }

    /// End the request's use of its conversation.
    ///
    /// A transient conversation started by this request is destroyed. A
    /// long-running one is touched and, if it began during this request,
    /// registered with the session. The conversation lock is released exactly
    /// once on every path, then ended conversations are swept.
    pub fn deactivate(&self, binding: &mut RequestBinding) -> Result<()> {
        if !binding.is_active() {
            return Err(ContextError::NotActive);
        }
        if binding.request.is_none() {
            return Err(ContextError::NotAssociated);
        }

        // Released by the drop below or on any early return.
        let guard = binding.guard.take();
        let registry = binding.registry()?;
        let request = binding.bound_request()?;
        let conversation = binding
            .current
            .clone()
            .ok_or(ContextError::MissingState("current conversation"))?;

        if let Some(mut store) = binding.store.take() {
            if conversation.is_transient() && binding.started_here {
                self.destroy_store(conversation.id(), &mut store);
            } else {
                conversation.touch();
                if !store.is_attached() {
                    self.promote(&registry, &conversation, &mut store);
                }
            }
        }
        drop(guard);
        binding.release_scope();

        self.clean_up_conversation_map(&registry, request.as_ref());
        binding.state = ContextState::Associated;
        Ok(())
    }

    fn promote(
        &self,
        registry: &ConversationRegistry,
        conversation: &Arc<Conversation>,
        store: &mut ConversationStore,
    ) {
        store.set_cid(conversation.id());
        match store.attach() {
            Ok(()) => {
                registry.insert(Arc::clone(conversation));
                info!("Conversation {} promoted to long-running", conversation.id());
            }
            Err(err) => {
                warn!(
                    "Destroying conversation {} after its store failed to attach: {err}",
                    conversation.id()
                );
                conversation.end();
                self.destroy_store(conversation.id(), store);
            }
        }
    }

    /// Remove ended conversations from the registry and destroy their stores.
    fn clean_up_conversation_map(
        &self,
        registry: &ConversationRegistry,
        request: &dyn RequestHandle,
    ) {
        let ended = registry.sweep_transient();
        if ended.is_empty() {
            return;
        }
        let Some(session) = request.session(false) else {
            return;
        };
        for conversation in ended {
            self.destroy_session_store(&session, conversation.id());
        }
    }

    /// Advisory eviction of expired conversations.
    ///
    /// Every expired long-running conversation other than the request's own
    /// is ended. The zero-wait lock attempt only decides whether to log: a
    /// conversation held by another request is ended anyway, so callers must
    /// not rely on this for mutual exclusion. Returns how many were ended.
    pub fn invalidate(&self, binding: &RequestBinding) -> Result<usize> {
        let registry = binding.registry()?;
        let current = binding.current_conversation().map(|conversation| conversation.id());

        let mut ended = 0;
        registry.visit(|conversation| {
            if current == Some(conversation.id())
                || conversation.is_transient()
                || !conversation.is_expired()
            {
                return;
            }
            if conversation.lock(Duration::ZERO).is_none() {
                warn!(
                    "Ending expired conversation {} while another request holds it",
                    conversation.id()
                );
            }
            if conversation.end() {
                ended += 1;
            }
        });

        if ended > 0 {
            info!("Ended {ended} expired conversations");
        }
        Ok(ended)
    }

    /// Tear down every conversation of a session that is going away.
    ///
    /// Long-running conversations are ended. Stores are destroyed at once,
    /// except for the conversation of the request bound to `binding`, which
    /// is destroyed when that request deactivates. The binding's store and
    /// state are restored afterwards. Returns how many stores were destroyed.
    pub fn destroy(
        &self,
        binding: &mut RequestBinding,
        session: &Arc<dyn Attributes>,
    ) -> Result<usize> {
        let scope = ScopeRestore::enter(binding);
        self.destroy_conversations(scope.binding(), session)
    }

    fn destroy_conversations(
        &self,
        binding: &RequestBinding,
        session: &Arc<dyn Attributes>,
    ) -> Result<usize> {
        let Some(value) = session.get(CONVERSATIONS_ATTRIBUTE) else {
            return Ok(0);
        };
        let registry = downcast_attribute::<ConversationRegistry>(CONVERSATIONS_ATTRIBUTE, value)?;
        let current = binding
            .current_conversation()
            .filter(|_| binding.request.is_some())
            .map(|conversation| conversation.id().to_string());

        let mut destroyed = 0;
        for conversation in registry.snapshot() {
            if !conversation.is_transient() {
                conversation.end();
            }
            if current.as_deref() != Some(conversation.id()) {
                self.destroy_session_store(session, conversation.id());
                destroyed += 1;
            }
        }
        info!("Destroyed {destroyed} conversations of an ending session");
        Ok(destroyed)
    }

    fn destroy_session_store(&self, session: &Arc<dyn Attributes>, id: &str) {
        let mut store = ConversationStore::for_session(
            NamingScheme::new(&self.store_prefix, id),
            Arc::clone(session),
        );
        self.destroy_store(id, &mut store);
    }

    fn destroy_store(&self, id: &str, store: &mut ConversationStore) {
        let removed = store.destroy();
        debug!("Destroyed store of conversation {id} ({removed} attributes)");
        self.events.fire(id, ConversationEvent::Destroyed);
    }

    /// Issue a new id from the session's generator.
    pub fn generate_conversation_id(&self, binding: &RequestBinding) -> Result<String> {
        Ok(binding.id_generator()?.next_id())
    }

    /// Look up a registered conversation.
    pub fn conversation(
        &self,
        binding: &RequestBinding,
        id: &str,
    ) -> Result<Option<Arc<Conversation>>> {
        Ok(binding.registry()?.get(id))
    }

    /// Snapshot of the session's registered conversations.
    pub fn conversations(&self, binding: &RequestBinding) -> Result<Vec<Arc<Conversation>>> {
        Ok(binding.registry()?.snapshot())
    }

    pub fn current_conversation(&self, binding: &RequestBinding) -> Result<Arc<Conversation>> {
        if !binding.is_associated() {
            return Err(ContextError::NotAssociated);
        }
        binding
            .current_conversation()
            .cloned()
            .ok_or(ContextError::MissingState("current conversation"))
    }
}

impl Default for ConversationContextManager {
    fn default() -> Self {
        Self::new(&ConversationSettings::default(), Arc::new(TracingEventSink))
    }
}

impl std::fmt::Debug for ConversationContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationContextManager")
            .field("parameter_name", &self.parameter_name())
            .field("default_timeout", &self.default_timeout())
            .field("concurrent_access_timeout", &self.concurrent_access_timeout())
            .field("store_prefix", &self.store_prefix)
            .field("id_strategy", &self.id_strategy)
            .finish_non_exhaustive()
    }
}

/// Puts a binding into the active state for session teardown and restores
/// its store and state on drop, including when teardown unwinds.
struct ScopeRestore<'a> {
    binding: &'a mut RequestBinding,
    store: Option<ConversationStore>,
    state: ContextState,
}

impl<'a> ScopeRestore<'a> {
    fn enter(binding: &'a mut RequestBinding) -> Self {
        let store = binding.store.take();
        let state = binding.state;
        binding.state = ContextState::Active;
        Self {
            binding,
            store,
            state,
        }
    }

    fn binding(&self) -> &RequestBinding {
        self.binding
    }
}

impl Drop for ScopeRestore<'_> {
    fn drop(&mut self) {
        self.binding.store = self.store.take();
        self.binding.state = self.state;
        if self.binding.store.is_none() && self.state != ContextState::Active {
            self.binding.release_scope();
        }
    }
}
