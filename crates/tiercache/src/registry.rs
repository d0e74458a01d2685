//! Type registry: which shape each real key currently holds.

use crate::value::ValueType;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Auxiliary index of value shapes per real key.
///
/// A read whose shape disagrees with the recorded tag short-circuits to "no
/// value" before either store is consulted.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: RwLock<HashMap<String, ValueType>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the shape for a key, replacing any previous tag.
    pub fn record(&self, key: &str, value_type: ValueType) {
        self.types.write().insert(key.to_string(), value_type);
    }

    pub fn type_of(&self, key: &str) -> Option<ValueType> {
        self.types.read().get(key).copied()
    }

    /// Returns false only when a different shape is recorded for the key.
    pub fn permits(&self, key: &str, requested: ValueType) -> bool {
        self.type_of(key).map_or(true, |t| t == requested)
    }

    pub fn clear(&self, key: &str) {
        self.types.write().remove(key);
    }

    pub fn clear_all(&self) {
        self.types.write().clear();
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }
}
