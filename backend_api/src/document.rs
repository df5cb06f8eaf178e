use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BackendError, Result};

/// Body of a document: a JSON object keyed by field name.
pub type Fields = Map<String, Value>;

/// Field injected on decode and stripped on encode; the id lives outside the body.
pub const ID_FIELD: &str = "id";

/// A stored document together with its location and bookkeeping times (ms since epoch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub collection: String,
    pub id: String,
    pub fields: Fields,
    pub create_time: i64,
    pub update_time: i64,
}

impl Document {
    /// Look up a dotted field path such as `unreadCount.alice`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        get_path(&self.fields, path)
    }

    /// Deserialize the body into a model, exposing the document id as `id`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let mut fields = self.fields.clone();
        fields.insert(ID_FIELD.into(), Value::String(self.id.clone()));
        Ok(serde_json::from_value(Value::Object(fields))?)
    }
}

/// Serialize a model into a document body, dropping its `id` field.
pub fn encode<T: Serialize>(value: &T) -> Result<Fields> {
    match serde_json::to_value(value)? {
        Value::Object(mut map) => {
            map.remove(ID_FIELD);
            Ok(map)
        }
        other => Err(BackendError::InvalidArgument(format!(
            "documents must be objects, got {other}"
        ))),
    }
}

pub fn get_path<'a>(fields: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = fields.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Random document id in the style of auto-generated backend ids.
pub fn new_document_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn now_millis() -> i64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
