//! Request and session attribute storage consumed by the context.

use std::any::{Any, type_name};
use std::sync::Arc;

use crate::error::{ContextError, Result};

/// A type-erased attribute value.
pub type AttributeValue = Arc<dyn Any + Send + Sync>;

/// Name/value storage for one scope, either a request or a session.
pub trait Attributes: Send + Sync {
    fn get(&self, name: &str) -> Option<AttributeValue>;

    fn set(&self, name: &str, value: AttributeValue);

    fn remove(&self, name: &str) -> Option<AttributeValue>;

    /// Snapshot of the attribute names currently stored.
    fn names(&self) -> Vec<String>;
}

/// The inbound request as seen by the conversation context.
///
/// Request attributes always exist. The session may not: `session(false)`
/// must never create one, `session(true)` creates it when the transport allows.
pub trait RequestHandle: Send + Sync {
    fn attributes(&self) -> &dyn Attributes;

    fn session(&self, create: bool) -> Option<Arc<dyn Attributes>>;

    fn session_attribute(&self, name: &str, create: bool) -> Option<AttributeValue> {
        self.session(create).and_then(|session| session.get(name))
    }

    /// Returns `false` when no session exists and `create` is not set.
    fn set_session_attribute(&self, name: &str, value: AttributeValue, create: bool) -> bool {
        self.session(create).is_some_and(|session| {
            session.set(name, value);
            true
        })
    }
}

/// Downcast an attribute to the type the caller expects.
pub fn downcast_attribute<T>(name: &str, value: AttributeValue) -> Result<Arc<T>>
where
    T: Any + Send + Sync,
{
    value
        .downcast::<T>()
        .map_err(|_| ContextError::AttributeTypeMismatch {
            name: name.to_string(),
            expected: type_name::<T>(),
        })
}
