use tracing::info;

/// Lifecycle notifications emitted by the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationEvent {
    /// The conversation's store was torn down.
    Destroyed,
}

/// Receives conversation lifecycle notifications.
pub trait EventSink: Send + Sync {
    fn fire(&self, conversation_id: &str, event: ConversationEvent);
}

/// Sink that only records notifications in the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn fire(&self, conversation_id: &str, event: ConversationEvent) {
        info!("Conversation {conversation_id}: {event:?}");
    }
}
