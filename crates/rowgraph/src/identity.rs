//! Structural identity keys.

use rowgraph_core::Value;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Identity of one entity instance: its declared entity name plus the values
/// of its key columns.
///
/// Two keys are equal iff they name the same entity and carry the same key
/// values. Keys are the group-by key for roots and the dedup key inside
/// collections.
#[derive(Debug, Clone)]
pub struct IdentityKey {
    entity: Arc<str>,
    values: Vec<Value>,
}

impl IdentityKey {
    /// Create a key for `entity` from its key column values.
    pub fn new(entity: impl Into<Arc<str>>, values: Vec<Value>) -> Self {
        Self {
            entity: entity.into(),
            values,
        }
    }

    /// Entity name.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Key column values, in declaration order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// True for multi-column keys.
    pub fn is_composite(&self) -> bool {
        self.values.len() > 1
    }

    /// The key as one value: the sole column for simple keys, an array for
    /// composite keys.
    pub fn as_value(&self) -> Value {
        match self.values.as_slice() {
            [single] => single.clone(),
            many => Value::Array(many.to_vec()),
        }
    }
}

impl PartialEq for IdentityKey {
    fn eq(&self, other: &Self) -> bool {
        self.entity == other.entity
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(a, b)| a.identity_eq(b))
    }
}

impl Eq for IdentityKey {}

impl Hash for IdentityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entity.hash(state);
        self.values.len().hash(state);
        for v in &self.values {
            v.hash_identity(state);
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.entity)?;
        for (i, v) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match v {
                Value::Text(s) => write!(f, "'{}'", s)?,
                Value::Null => write!(f, "NULL")?,
                other => match other.as_i64() {
                    Some(n) => write!(f, "{}", n)?,
                    None => write!(f, "{:?}", other)?,
                },
            }
        }
        write!(f, ")")
    }
}
