//! Attribute storage backing one conversation.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use convctx_core::{
    AttributeValue, Attributes, ContextError, RequestHandle, Result, downcast_attribute,
};

const TRANSIENT_CID: &str = "transient";

/// Names the attributes of one conversation: `<prefix>#<cid>#<name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingScheme {
    prefix: String,
    cid: String,
}

impl NamingScheme {
    #[must_use]
    pub fn new(prefix: &str, cid: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            cid: cid.to_string(),
        }
    }

    /// Scheme for a conversation that has not been registered yet.
    #[must_use]
    pub fn transient(prefix: &str) -> Self {
        Self::new(prefix, TRANSIENT_CID)
    }

    #[must_use]
    pub fn cid(&self) -> &str {
        &self.cid
    }

    #[must_use]
    pub fn prefixed(&self, name: &str) -> String {
        format!("{}{name}", self.key_prefix())
    }

    #[must_use]
    pub fn deprefixed<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(&self.key_prefix())
    }

    fn key_prefix(&self) -> String {
        format!("{}#{}#", self.prefix, self.cid)
    }
}

/// The store a conversation's state lives in for the current request.
///
/// Detached, values sit in request attributes and vanish with the request.
/// Attached, reads and writes go to session attributes and outlive it.
pub struct ConversationStore {
    naming: NamingScheme,
    request: Option<Arc<dyn RequestHandle>>,
    session: Option<Arc<dyn Attributes>>,
}

impl ConversationStore {
    /// A detached store backed by request attributes.
    #[must_use]
    pub fn for_request(naming: NamingScheme, request: Arc<dyn RequestHandle>) -> Self {
        Self {
            naming,
            request: Some(request),
            session: None,
        }
    }

    /// A store attached directly to a session, used for teardown.
    #[must_use]
    pub fn for_session(naming: NamingScheme, session: Arc<dyn Attributes>) -> Self {
        Self {
            naming,
            request: None,
            session: Some(session),
        }
    }

    #[must_use]
    pub const fn naming(&self) -> &NamingScheme {
        &self.naming
    }

    #[must_use]
    pub const fn is_attached(&self) -> bool {
        self.session.is_some()
    }

    #[must_use]
    pub fn get_raw(&self, name: &str) -> Option<AttributeValue> {
        self.backing()?.get(&self.naming.prefixed(name))
    }

    /// Typed read; a value of another type is an error, not a miss.
    pub fn get<T>(&self, name: &str) -> Result<Option<Arc<T>>>
    where
        T: Any + Send + Sync,
    {
        self.get_raw(name)
            .map(|value| downcast_attribute::<T>(name, value))
            .transpose()
    }

    pub fn put<T>(&self, name: &str, value: T)
    where
        T: Any + Send + Sync,
    {
        self.put_value(name, Arc::new(value));
    }

    pub fn put_value(&self, name: &str, value: AttributeValue) {
        if let Some(backing) = self.backing() {
            backing.set(&self.naming.prefixed(name), value);
        }
    }

    pub fn remove(&self, name: &str) -> bool {
        self.backing()
            .and_then(|backing| backing.remove(&self.naming.prefixed(name)))
            .is_some()
    }

    /// Attribute names without the naming-scheme prefix.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.backing().map_or_else(Vec::new, |backing| {
            backing
                .names()
                .iter()
                .filter_map(|key| self.naming.deprefixed(key).map(str::to_string))
                .collect()
        })
    }

    /// Rename the store to a new conversation id, carrying detached values over.
    pub fn set_cid(&mut self, cid: &str) {
        if self.naming.cid() == cid {
            return;
        }
        let renamed = NamingScheme::new(&self.naming.prefix, cid);
        if let Some(backing) = self.backing() {
            move_prefixed(backing, &self.naming, backing, &renamed);
        }
        self.naming = renamed;
    }

    /// Move request-held values into the session, creating it if needed.
    pub fn attach(&mut self) -> Result<()> {
        if self.is_attached() {
            return Ok(());
        }
        let request = self.request.as_ref().ok_or(ContextError::SessionUnavailable)?;
        let session = request
            .session(true)
            .ok_or(ContextError::SessionUnavailable)?;

        move_prefixed(request.attributes(), &self.naming, session.as_ref(), &self.naming);
        self.session = Some(session);
        Ok(())
    }

    /// Remove every value of this conversation. Returns how many were removed.
    pub fn destroy(&mut self) -> usize {
        let mut removed = 0;
        if let Some(session) = &self.session {
            removed += remove_prefixed(session.as_ref(), &self.naming);
        }
        if let Some(request) = &self.request {
            removed += remove_prefixed(request.attributes(), &self.naming);
        }
        removed
    }

    fn backing(&self) -> Option<&dyn Attributes> {
        if let Some(session) = &self.session {
            return Some(session.as_ref());
        }
        self.request.as_ref().map(|request| request.attributes())
    }
}

impl fmt::Debug for ConversationStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversationStore")
            .field("naming", &self.naming)
            .field("attached", &self.is_attached())
            .finish_non_exhaustive()
    }
}

fn move_prefixed(
    from: &dyn Attributes,
    from_naming: &NamingScheme,
    to: &dyn Attributes,
    to_naming: &NamingScheme,
) {
    for key in from.names() {
        let Some(name) = from_naming.deprefixed(&key) else {
            continue;
        };
        if let Some(value) = from.remove(&key) {
            to.set(&to_naming.prefixed(name), value);
        }
    }
}

fn remove_prefixed(attributes: &dyn Attributes, naming: &NamingScheme) -> usize {
    let mut removed = 0;
    for key in attributes.names() {
        if naming.deprefixed(&key).is_some() && attributes.remove(&key).is_some() {
            removed += 1;
        }
    }
    removed
}
