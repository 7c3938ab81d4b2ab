use convctx_core::{AttributeValue, Attributes};
use dashmap::DashMap;
use std::fmt;

/// Concurrent name/value map.
#[derive(Default)]
pub struct MemoryAttributes {
    values: DashMap<String, AttributeValue>,
}

impl MemoryAttributes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Attributes for MemoryAttributes {
    fn get(&self, name: &str) -> Option<AttributeValue> {
        self.values.get(name).map(|entry| entry.value().clone())
    }

    fn set(&self, name: &str, value: AttributeValue) {
        self.values.insert(name.to_string(), value);
    }

    fn remove(&self, name: &str) -> Option<AttributeValue> {
        self.values.remove(name).map(|(_, value)| value)
    }

    fn names(&self) -> Vec<String> {
        self.values.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl fmt::Debug for MemoryAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAttributes")
            .field("len", &self.values.len())
            .finish()
    }
}
