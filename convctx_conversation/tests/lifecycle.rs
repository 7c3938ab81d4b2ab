//! Integration tests for the request lifecycle of the conversation context.
//!
//! Each test drives one or more requests through
//! associate -> activate -> deactivate -> dissociate against in-memory sessions.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use convctx_config::ConversationSettings;
use convctx_core::{
    AttributeValue, Attributes, ContextError, ConversationEvent, EventSink, RequestHandle,
};
use convctx_conversation::{
    CONVERSATIONS_ATTRIBUTE, ContextState, Conversation, ConversationContextManager,
    ConversationRegistry, ID_GENERATOR_ATTRIBUTE, RequestBinding,
};
use convctx_session::{MemoryRequest, SessionManager};

#[derive(Default)]
struct RecordingSink {
    destroyed: Mutex<Vec<String>>,
}

impl RecordingSink {
    fn destroyed(&self) -> Vec<String> {
        self.destroyed.lock().unwrap().clone()
    }
}

impl EventSink for RecordingSink {
    fn fire(&self, conversation_id: &str, event: ConversationEvent) {
        assert_eq!(event, ConversationEvent::Destroyed);
        self.destroyed
            .lock()
            .unwrap()
            .push(conversation_id.to_string());
    }
}

fn setup() -> (ConversationContextManager, Arc<RecordingSink>, Arc<SessionManager>) {
    let sink = Arc::new(RecordingSink::default());
    let manager = ConversationContextManager::new(&ConversationSettings::default(), sink.clone());
    (manager, sink, Arc::new(SessionManager::new()))
}

fn request(sessions: &Arc<SessionManager>, session_id: Option<&str>) -> Arc<MemoryRequest> {
    let sessions = Arc::clone(sessions);
    Arc::new(match session_id {
        Some(id) => MemoryRequest::with_session(sessions, id),
        None => MemoryRequest::new(sessions),
    })
}

/// Runs one request that starts a conversation, begins it and stores `value`.
/// Returns the session id and the promoted conversation.
fn promote(
    manager: &ConversationContextManager,
    sessions: &Arc<SessionManager>,
    session_id: Option<&str>,
    value: u32,
) -> (String, Arc<Conversation>) {
    let request = request(sessions, session_id);
    let mut binding = RequestBinding::new();
    assert!(manager.associate(&mut binding, request.clone()).unwrap());
    manager.activate(&mut binding, None).unwrap();

    let conversation = manager.current_conversation(&binding).unwrap();
    assert!(conversation.begin());
    binding.store().unwrap().put("cart", value);

    manager.deactivate(&mut binding).unwrap();
    assert!(manager.dissociate(&mut binding));
    (request.session_id().unwrap(), conversation)
}

#[test]
fn test_transient_conversation_is_destroyed_at_deactivate() {
    let (manager, sink, sessions) = setup();
    let request = request(&sessions, None);
    let mut binding = RequestBinding::new();

    assert!(manager.associate(&mut binding, request.clone()).unwrap());
    manager.activate(&mut binding, None).unwrap();
    assert_eq!(binding.state(), ContextState::Active);

    let conversation = manager.current_conversation(&binding).unwrap();
    assert!(conversation.is_transient());
    assert!(conversation.is_locked());
    assert!(manager.conversation(&binding, conversation.id()).unwrap().is_none());
    binding.store().unwrap().put("draft", "hello".to_string());

    manager.deactivate(&mut binding).unwrap();

    assert_eq!(binding.state(), ContextState::Associated);
    assert!(!conversation.is_locked());
    assert!(manager.conversations(&binding).unwrap().is_empty());
    assert_eq!(sink.destroyed(), vec![conversation.id().to_string()]);
    assert!(request.attributes().names().is_empty());
    assert_eq!(sessions.session_count(), 0);

    assert!(manager.dissociate(&mut binding));
    assert!(!manager.dissociate(&mut binding));
    assert_eq!(binding.state(), ContextState::Dissociated);
}

#[test]
fn test_associate_twice_is_a_no_op() {
    let (manager, _sink, sessions) = setup();
    let mut binding = RequestBinding::new();

    assert!(manager.associate(&mut binding, request(&sessions, None)).unwrap());
    assert!(!manager.associate(&mut binding, request(&sessions, None)).unwrap());
}

#[test]
fn test_state_machine_misuse() {
    let (manager, _sink, sessions) = setup();
    let mut binding = RequestBinding::new();

    assert!(matches!(
        manager.activate(&mut binding, None),
        Err(ContextError::NotAssociated)
    ));
    assert!(matches!(
        manager.deactivate(&mut binding),
        Err(ContextError::NotActive)
    ));

    manager.associate(&mut binding, request(&sessions, None)).unwrap();
    assert!(matches!(
        manager.deactivate(&mut binding),
        Err(ContextError::NotActive)
    ));

    manager.activate(&mut binding, None).unwrap();
    assert!(matches!(
        manager.activate(&mut binding, None),
        Err(ContextError::AlreadyActive)
    ));
    manager.deactivate(&mut binding).unwrap();

    assert!(manager.dissociate(&mut binding));
    assert!(matches!(
        manager.deactivate(&mut binding),
        Err(ContextError::NotActive)
    ));
}

#[test]
fn test_new_conversations_get_unseen_ids() {
    let (manager, _sink, sessions) = setup();
    let (session_id, promoted) = promote(&manager, &sessions, None, 1);

    let mut binding = RequestBinding::new();
    manager
        .associate(&mut binding, request(&sessions, Some(&session_id)))
        .unwrap();
    manager.activate(&mut binding, Some("")).unwrap();

    let fresh = manager.current_conversation(&binding).unwrap();
    assert!(fresh.is_transient());
    assert_ne!(fresh.id(), promoted.id());
    assert!(manager.conversation(&binding, fresh.id()).unwrap().is_none());
    manager.deactivate(&mut binding).unwrap();
}

#[test]
fn test_unknown_cid_recovers_with_transient_conversation() {
    let (manager, _sink, sessions) = setup();
    let mut binding = RequestBinding::new();
    manager.associate(&mut binding, request(&sessions, None)).unwrap();

    let err = manager.activate(&mut binding, Some("unknown-id")).unwrap_err();

    assert!(matches!(err, ContextError::ConversationNotFound(ref id) if id == "unknown-id"));
    assert!(err.is_recovered());
    assert!(binding.is_active());
    let conversation = manager.current_conversation(&binding).unwrap();
    assert!(conversation.is_transient());
    assert_ne!(conversation.id(), "unknown-id");

    binding.store().unwrap().put("still", "usable".to_string());
    manager.deactivate(&mut binding).unwrap();
    assert!(!conversation.is_locked());
}

#[test]
fn test_promoted_conversation_is_restored_by_next_request() {
    let (manager, sink, sessions) = setup();
    let (session_id, promoted) = promote(&manager, &sessions, None, 3);
    assert!(sink.destroyed().is_empty());
    assert!(!promoted.is_locked());

    let mut binding = RequestBinding::new();
    manager
        .associate(&mut binding, request(&sessions, Some(&session_id)))
        .unwrap();
    manager.activate(&mut binding, Some(promoted.id())).unwrap();

    let restored = manager.current_conversation(&binding).unwrap();
    assert!(Arc::ptr_eq(&restored, &promoted));
    assert!(restored.is_locked());
    let store = binding.store().unwrap();
    assert!(store.is_attached());
    assert_eq!(*store.get::<u32>("cart").unwrap().unwrap(), 3);

    store.put("cart", 4_u32);
    manager.deactivate(&mut binding).unwrap();
    manager.dissociate(&mut binding);

    assert!(!restored.is_locked());
    let session = sessions.get(&session_id).unwrap();
    let key = format!("convctx.conversation#{}#cart", promoted.id());
    let stored = session.get(&key).unwrap().downcast::<u32>().unwrap();
    assert_eq!(*stored, 4);
}

#[test]
fn test_expired_conversation_is_not_restored() {
    let (manager, _sink, sessions) = setup();
    manager.set_default_timeout(Duration::ZERO);
    let (session_id, promoted) = promote(&manager, &sessions, None, 1);
    thread::sleep(Duration::from_millis(5));

    let mut binding = RequestBinding::new();
    manager
        .associate(&mut binding, request(&sessions, Some(&session_id)))
        .unwrap();
    let result = manager.activate(&mut binding, Some(promoted.id()));

    assert!(matches!(result, Err(ContextError::ConversationNotFound(_))));
    assert_ne!(manager.current_conversation(&binding).unwrap().id(), promoted.id());
    manager.deactivate(&mut binding).unwrap();

    // Expiry alone does not remove the entry.
    assert!(manager.conversation(&binding, promoted.id()).unwrap().is_some());
}

#[test]
fn test_ended_conversation_is_swept_at_deactivate() {
    let (manager, sink, sessions) = setup();
    let (session_id, promoted) = promote(&manager, &sessions, None, 1);

    let mut binding = RequestBinding::new();
    manager
        .associate(&mut binding, request(&sessions, Some(&session_id)))
        .unwrap();
    manager.activate(&mut binding, Some(promoted.id())).unwrap();
    assert!(manager.current_conversation(&binding).unwrap().end());
    manager.deactivate(&mut binding).unwrap();

    assert!(manager.conversation(&binding, promoted.id()).unwrap().is_none());
    assert_eq!(sink.destroyed(), vec![promoted.id().to_string()]);
    assert!(sessions.get(&session_id).unwrap().names().iter().all(|name| !name.contains('#')));

    let mut next = RequestBinding::new();
    manager
        .associate(&mut next, request(&sessions, Some(&session_id)))
        .unwrap();
    assert!(matches!(
        manager.activate(&mut next, Some(promoted.id())),
        Err(ContextError::ConversationNotFound(_))
    ));
    manager.deactivate(&mut next).unwrap();
}

#[test]
fn test_store_attach_failure_destroys_instead_of_promoting() {
    let (manager, sink, sessions) = setup();
    sessions.set_allow_creation(false);
    let request = request(&sessions, None);
    let mut binding = RequestBinding::new();
    manager.associate(&mut binding, request.clone()).unwrap();
    manager.activate(&mut binding, None).unwrap();

    let conversation = manager.current_conversation(&binding).unwrap();
    conversation.begin();
    binding.store().unwrap().put("cart", 1_u32);

    manager.deactivate(&mut binding).unwrap();

    assert!(!conversation.is_locked());
    assert!(conversation.is_transient());
    assert!(manager.conversations(&binding).unwrap().is_empty());
    assert_eq!(sink.destroyed(), vec![conversation.id().to_string()]);
    assert!(request.attributes().names().is_empty());
}

#[test]
fn test_invalidate_ends_expired_conversations_except_current() {
    let (manager, _sink, sessions) = setup();
    let (session_id, current) = promote(&manager, &sessions, None, 1);
    let (_, other) = promote(&manager, &sessions, Some(&session_id), 2);
    let (_, fresh) = promote(&manager, &sessions, Some(&session_id), 3);

    let mut binding = RequestBinding::new();
    manager
        .associate(&mut binding, request(&sessions, Some(&session_id)))
        .unwrap();
    manager.activate(&mut binding, Some(current.id())).unwrap();
    current.set_timeout(Duration::ZERO);
    other.set_timeout(Duration::ZERO);
    thread::sleep(Duration::from_millis(5));

    assert_eq!(manager.invalidate(&binding).unwrap(), 1);
    assert!(!current.is_transient());
    assert!(other.is_transient());
    assert!(!fresh.is_transient());

    manager.deactivate(&mut binding).unwrap();
    thread::sleep(Duration::from_millis(5));

    let remaining: Vec<String> = manager
        .conversations(&binding)
        .unwrap()
        .iter()
        .map(|conversation| conversation.id().to_string())
        .collect();
    assert!(remaining.contains(&current.id().to_string()));
    assert!(remaining.contains(&fresh.id().to_string()));
    assert!(!remaining.contains(&other.id().to_string()));
    assert!(current.is_expired());
}

#[test]
fn test_invalidate_requires_association() {
    let (manager, _sink, _sessions) = setup();
    assert!(matches!(
        manager.invalidate(&RequestBinding::new()),
        Err(ContextError::NotAssociated)
    ));
}

#[test]
fn test_destroy_spares_the_in_flight_conversation_store() {
    let (manager, sink, sessions) = setup();
    let (session_id, current) = promote(&manager, &sessions, None, 1);
    let (_, other) = promote(&manager, &sessions, Some(&session_id), 2);

    let mut binding = RequestBinding::new();
    manager
        .associate(&mut binding, request(&sessions, Some(&session_id)))
        .unwrap();
    manager.activate(&mut binding, Some(current.id())).unwrap();

    let session: Arc<dyn Attributes> = sessions.get(&session_id).unwrap();
    assert_eq!(manager.destroy(&mut binding, &session).unwrap(), 1);

    assert!(current.is_transient());
    assert!(other.is_transient());
    assert_eq!(sink.destroyed(), vec![other.id().to_string()]);
    assert_eq!(binding.state(), ContextState::Active);
    assert_eq!(*binding.store().unwrap().get::<u32>("cart").unwrap().unwrap(), 1);

    manager.deactivate(&mut binding).unwrap();
    let destroyed = sink.destroyed();
    assert!(destroyed.contains(&current.id().to_string()));
    assert!(manager.conversations(&binding).unwrap().is_empty());
}

#[test]
fn test_destroy_outside_a_request() {
    let (manager, sink, sessions) = setup();
    let (session_id, first) = promote(&manager, &sessions, None, 1);
    let (_, second) = promote(&manager, &sessions, Some(&session_id), 2);

    let session: Arc<dyn Attributes> = sessions.invalidate(&session_id).unwrap();
    let mut binding = RequestBinding::new();
    assert_eq!(manager.destroy(&mut binding, &session).unwrap(), 2);

    assert!(first.is_transient());
    assert!(second.is_transient());
    assert_eq!(sink.destroyed().len(), 2);
    assert_eq!(binding.state(), ContextState::Inactive);
    assert!(binding.store().is_none());
    assert!(session.names().iter().all(|name| !name.contains('#')));
}

#[test]
fn test_requests_of_one_session_share_the_registry() {
    let (manager, _sink, sessions) = setup();
    let session_id = sessions.create().id().to_string();

    let mut first = RequestBinding::new();
    let mut second = RequestBinding::new();
    manager
        .associate(&mut first, request(&sessions, Some(&session_id)))
        .unwrap();
    manager
        .associate(&mut second, request(&sessions, Some(&session_id)))
        .unwrap();

    manager.activate(&mut first, None).unwrap();
    let conversation = manager.current_conversation(&first).unwrap();
    conversation.begin();
    manager.deactivate(&mut first).unwrap();

    assert!(manager.conversation(&second, conversation.id()).unwrap().is_some());
    let next = manager.generate_conversation_id(&second).unwrap();
    assert_ne!(next, conversation.id());
}

#[test]
fn test_session_attribute_of_wrong_type() {
    let (manager, _sink, sessions) = setup();
    let session = sessions.create();
    session.set(CONVERSATIONS_ATTRIBUTE, Arc::new("not a registry".to_string()));

    let mut binding = RequestBinding::new();
    let result = manager.associate(&mut binding, request(&sessions, Some(session.id())));

    assert!(matches!(
        result,
        Err(ContextError::AttributeTypeMismatch { ref name, .. }) if name == CONVERSATIONS_ATTRIBUTE
    ));
    assert!(!binding.is_associated());
}

#[test]
fn test_generate_conversation_id_requires_association() {
    let (manager, _sink, sessions) = setup();
    let mut binding = RequestBinding::new();
    assert!(matches!(
        manager.generate_conversation_id(&binding),
        Err(ContextError::NotAssociated)
    ));

    manager.associate(&mut binding, request(&sessions, None)).unwrap();
    let first = manager.generate_conversation_id(&binding).unwrap();
    let second = manager.generate_conversation_id(&binding).unwrap();
    assert_ne!(first, second);
}

#[test]
fn test_runtime_settings() {
    let manager = ConversationContextManager::default();
    assert_eq!(manager.parameter_name(), "cid");
    assert_eq!(manager.default_timeout(), Duration::from_secs(600));
    assert_eq!(manager.concurrent_access_timeout(), Duration::from_secs(1));

    manager.set_parameter_name("conversation");
    manager.set_default_timeout(Duration::from_secs(5));
    manager.set_concurrent_access_timeout(Duration::from_millis(250));

    assert_eq!(manager.parameter_name(), "conversation");
    assert_eq!(manager.default_timeout(), Duration::from_secs(5));
    assert_eq!(manager.concurrent_access_timeout(), Duration::from_millis(250));
}

#[test]
fn test_request_handle_trait_object() {
    let (manager, _sink, sessions) = setup();
    let handle: Arc<dyn RequestHandle> = request(&sessions, None);
    let mut binding = RequestBinding::new();
    manager.associate(&mut binding, handle).unwrap();
    assert!(binding.request().is_some());
}

#[test]
fn test_ended_conversation_is_not_restored_before_sweep() {
    let (manager, _sink, sessions) = setup();
    let (session_id, conversation) = promote(&manager, &sessions, None, 1);
    let cid = conversation.id().to_string();
    assert!(conversation.end());

    let mut binding = RequestBinding::new();
    manager
        .associate(&mut binding, request(&sessions, Some(&session_id)))
        .unwrap();
    assert!(manager.conversation(&binding, &cid).unwrap().is_some());

    let err = manager.activate(&mut binding, Some(&cid)).unwrap_err();

    assert!(matches!(err, ContextError::ConversationNotFound(ref id) if *id == cid));
    assert!(binding.is_active());
    let fallback = manager.current_conversation(&binding).unwrap();
    assert!(fallback.is_transient());
    assert_ne!(fallback.id(), cid);
    assert!(!conversation.is_locked());

    manager.deactivate(&mut binding).unwrap();
    assert!(manager.conversation(&binding, &cid).unwrap().is_none());
}

#[test]
fn test_restore_attach_failure_leaves_transient_conversation() {
    let (manager, _sink, sessions) = setup();
    let (session_id, conversation) = promote(&manager, &sessions, None, 1);
    let cid = conversation.id().to_string();

    let mut binding = RequestBinding::new();
    manager
        .associate(&mut binding, request(&sessions, Some(&session_id)))
        .unwrap();
    sessions.invalidate(&session_id).unwrap();
    sessions.set_allow_creation(false);

    let err = manager.activate(&mut binding, Some(&cid)).unwrap_err();

    assert!(matches!(err, ContextError::SessionUnavailable));
    assert!(!err.is_recovered());
    assert!(binding.is_active());
    assert!(manager.current_conversation(&binding).unwrap().is_transient());
    assert!(!conversation.is_locked());
    assert!(!conversation.is_transient());
    manager.deactivate(&mut binding).unwrap();
}

#[test]
fn test_session_created_mid_request_receives_generator_and_registry() {
    let (manager, _sink, sessions) = setup();
    let first = request(&sessions, None);
    let mut binding = RequestBinding::new();
    manager.associate(&mut binding, first.clone()).unwrap();
    manager.activate(&mut binding, None).unwrap();
    let first_id = manager.current_conversation(&binding).unwrap().id().to_string();

    let session = first.session(true).unwrap();
    assert!(session.get(ID_GENERATOR_ATTRIBUTE).is_none());
    assert!(session.get(CONVERSATIONS_ATTRIBUTE).is_none());

    manager.session_created(&binding);

    assert!(session.get(ID_GENERATOR_ATTRIBUTE).is_some());
    assert!(session.get(CONVERSATIONS_ATTRIBUTE).is_some());
    manager.deactivate(&mut binding).unwrap();
    manager.dissociate(&mut binding);

    let session_id = first.session_id().unwrap();
    let mut next = RequestBinding::new();
    manager
        .associate(&mut next, request(&sessions, Some(&session_id)))
        .unwrap();
    let next_id = manager.generate_conversation_id(&next).unwrap();
    assert_ne!(next_id, first_id);
    assert_eq!(next_id, "2");
}

#[test]
fn test_dissociate_keeps_registry_already_in_session() {
    let (manager, _sink, sessions) = setup();
    let first = request(&sessions, None);
    let mut binding = RequestBinding::new();
    manager.associate(&mut binding, first.clone()).unwrap();
    manager.activate(&mut binding, None).unwrap();

    let session = first.session(true).unwrap();
    let existing = Arc::new(ConversationRegistry::new());
    let value: AttributeValue = existing.clone();
    session.set(CONVERSATIONS_ATTRIBUTE, value);

    manager.deactivate(&mut binding).unwrap();
    assert!(manager.dissociate(&mut binding));

    let stored = session
        .get(CONVERSATIONS_ATTRIBUTE)
        .unwrap()
        .downcast::<ConversationRegistry>()
        .unwrap();
    assert!(Arc::ptr_eq(&stored, &existing));
    assert!(session.get(ID_GENERATOR_ATTRIBUTE).is_some());
}
