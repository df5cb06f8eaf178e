use serde_json::Value;

use crate::document::Fields;

/// Atomic transform applied to one field by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Set(Value),
    /// Numeric increment; a missing field counts as zero.
    Increment(i64),
    /// Append the values not already present.
    ArrayUnion(Vec<Value>),
    /// Remove every occurrence of the values.
    ArrayRemove(Vec<Value>),
    /// Replace with the backend's commit time in milliseconds.
    ServerTimestamp,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    /// Dotted path; intermediate maps are created as needed.
    pub path: String,
    pub op: FieldOp,
}

impl FieldUpdate {
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            path: path.into(),
            op: FieldOp::Set(value.into()),
        }
    }

    pub fn increment(path: impl Into<String>, by: i64) -> Self {
        Self {
            path: path.into(),
            op: FieldOp::Increment(by),
        }
    }

    pub fn array_union<V: Into<Value>>(
        path: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self {
            path: path.into(),
            op: FieldOp::ArrayUnion(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn array_remove<V: Into<Value>>(
        path: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self {
            path: path.into(),
            op: FieldOp::ArrayRemove(values.into_iter().map(Into::into).collect()),
        }
    }

    pub fn server_timestamp(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            op: FieldOp::ServerTimestamp,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            op: FieldOp::Delete,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Create or fully replace a document.
    Set {
        collection: String,
        id: String,
        fields: Fields,
    },
    /// Apply field transforms to an existing document; fails if it does not exist.
    Update {
        collection: String,
        id: String,
        updates: Vec<FieldUpdate>,
    },
    Delete {
        collection: String,
        id: String,
    },
}

/// Writes committed together: either all apply or none do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, collection: &str, id: &str, fields: Fields) -> &mut Self {
        self.writes.push(Write::Set {
            collection: collection.into(),
            id: id.into(),
            fields,
        });
        self
    }

    pub fn update(&mut self, collection: &str, id: &str, updates: Vec<FieldUpdate>) -> &mut Self {
        self.writes.push(Write::Update {
            collection: collection.into(),
            id: id.into(),
            updates,
        });
        self
    }

    pub fn delete(&mut self, collection: &str, id: &str) -> &mut Self {
        self.writes.push(Write::Delete {
            collection: collection.into(),
            id: id.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }
}
