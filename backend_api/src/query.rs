use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;

/// Predicate on a single (possibly dotted) field.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Lt(String, Value),
    Gt(String, Value),
    ArrayContains(String, Value),
    In(String, Vec<Value>),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq(field.into(), value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Lt(field.into(), value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Gt(field.into(), value.into())
    }

    pub fn array_contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::ArrayContains(field.into(), value.into())
    }

    pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::Eq(field, value) => doc.get(field) == Some(value),
            Filter::Lt(field, value) => {
                doc.get(field).and_then(|v| compare_same_kind(v, value)) == Some(Ordering::Less)
            }
            Filter::Gt(field, value) => {
                doc.get(field).and_then(|v| compare_same_kind(v, value))
                    == Some(Ordering::Greater)
            }
            Filter::ArrayContains(field, value) => doc
                .get(field)
                .and_then(Value::as_array)
                .map_or(false, |items| items.contains(value)),
            Filter::In(field, values) => doc.get(field).map_or(false, |v| values.contains(v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    fn key<'a>(&self, doc: &'a Document) -> &'a Value {
        doc.get(&self.field).unwrap_or(&Value::Null)
    }

    fn directed(&self, ord: Ordering) -> Ordering {
        match self.direction {
            Direction::Ascending => ord,
            Direction::Descending => ord.reverse(),
        }
    }

    /// Total order on documents; ties on the ordered field fall back to the id.
    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        let ord = compare_values(self.key(a), self.key(b)).then_with(|| a.id.cmp(&b.id));
        self.directed(ord)
    }

    fn is_after(&self, doc: &Document, cursor: &Cursor) -> bool {
        let ord = compare_values(self.key(doc), &cursor.value)
            .then_with(|| doc.id.as_str().cmp(cursor.id.as_str()));
        self.directed(ord) == Ordering::Greater
    }
}

/// Position of the last-seen document of a page: its ordered value and id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub value: Value,
    pub id: String,
}

impl Cursor {
    pub fn after(doc: &Document, order_field: &str) -> Self {
        Self {
            value: doc.get(order_field).cloned().unwrap_or(Value::Null),
            id: doc.id.clone(),
        }
    }
}

/// Compound query over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    pub start_after: Option<Cursor>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
            start_after: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, cursor: Cursor) -> Self {
        self.start_after = Some(cursor);
        self
    }

    /// True when the document belongs to the collection and passes every filter.
    /// Ordering, cursor and limit are not considered.
    pub fn matches(&self, doc: &Document) -> bool {
        doc.collection == self.collection && self.filters.iter().all(|f| f.matches(doc))
    }

    /// Sort, apply the cursor and truncate documents that already passed [`Query::matches`].
    pub fn arrange(&self, mut docs: Vec<Document>) -> Vec<Document> {
        match &self.order_by {
            Some(order) => {
                docs.sort_by(|a, b| order.compare(a, b));
                if let Some(cursor) = &self.start_after {
                    docs.retain(|d| order.is_after(d, cursor));
                }
            }
            None => {
                docs.sort_by(|a, b| a.id.cmp(&b.id));
                if let Some(cursor) = &self.start_after {
                    docs.retain(|d| d.id > cursor.id);
                }
            }
        }
        if let Some(limit) = self.limit {
            docs.truncate(limit);
        }
        docs
    }
}

fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Ordering used for `order_by`: values of different kinds order by kind.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => {
                let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

fn compare_same_kind(a: &Value, b: &Value) -> Option<Ordering> {
    if kind_rank(a) == kind_rank(b) {
        Some(compare_values(a, b))
    } else {
        None
    }
}
