use thiserror::Error;

pub type Result<T> = std::result::Result<T, ContextError>;

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Conversation context must be associated with a request")]
    NotAssociated,

    #[error("Conversation context is already active")]
    AlreadyActive,

    #[error("Conversation context is not active")]
    NotActive,

    #[error("No conversation found to restore for id: {0}")]
    ConversationNotFound(String),

    #[error("Timed out waiting for conversation lock: {0}")]
    ConversationLockTimeout(String),

    #[error("Attribute {name} does not hold a value of type {expected}")]
    AttributeTypeMismatch {
        name: String,
        expected: &'static str,
    },

    #[error("Session storage is not available for this request")]
    SessionUnavailable,

    #[error("Request binding is missing its {0}")]
    MissingState(&'static str),
}

impl ContextError {
    /// Whether the request was left with a fresh transient conversation.
    ///
    /// Restore failures bind a new conversation before reporting, so the
    /// caller may keep serving the request. `SessionUnavailable` from a
    /// restore is recovered the same way but is not flagged here, since the
    /// variant also reports failures that bind nothing; check the binding's
    /// state for those.
    #[must_use]
    pub const fn is_recovered(&self) -> bool {
        matches!(
            self,
            Self::ConversationNotFound(_) | Self::ConversationLockTimeout(_)
        )
    }
}
