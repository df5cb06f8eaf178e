use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::StreamExt;

use crate::document::Document;
use crate::query::Query;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// A committed write as seen by snapshot listeners.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub kind: ChangeKind,
    /// The document after the write, or the last version for removals.
    pub document: Document,
    /// The document before the write, when it existed.
    pub previous: Option<Document>,
}

/// The listener fell behind and `missed` changes were dropped; re-read to catch up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("listener lagged, {missed} changes dropped")]
pub struct Lagged {
    pub missed: u64,
}

/// Real-time listener for one query.
///
/// Changes are reported relative to the query's collection and filters: a document that
/// starts matching arrives as `Added`, one that stops matching as `Removed`. Ordering and
/// limit are not applied to the stream.
pub struct Subscription {
    query: Query,
    changes: BroadcastStream<Change>,
}

impl Subscription {
    pub fn new(query: Query, receiver: broadcast::Receiver<Change>) -> Self {
        Self {
            query,
            changes: BroadcastStream::new(receiver),
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Wait for the next relevant change. Returns `None` once the backend goes away.
    ///
    /// `Err(Lagged)` means changes were dropped before this listener saw them; state built
    /// from the stream must be reloaded from the store.
    pub async fn next(&mut self) -> Option<Result<Change, Lagged>> {
        while let Some(item) = self.changes.next().await {
            match item {
                Ok(change) => {
                    if let Some(change) = self.relative(change) {
                        return Some(Ok(change));
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    return Some(Err(Lagged { missed }))
                }
            }
        }
        None
    }

    fn relative(&self, change: Change) -> Option<Change> {
        let now = change.kind != ChangeKind::Removed && self.query.matches(&change.document);
        let before = change
            .previous
            .as_ref()
            .map_or(false, |prev| self.query.matches(prev));
        let kind = match (before, now) {
            (true, true) => ChangeKind::Modified,
            (false, true) => ChangeKind::Added,
            (true, false) => ChangeKind::Removed,
            (false, false) => return None,
        };
        let document = match kind {
            ChangeKind::Removed => change.previous.clone().unwrap_or(change.document),
            _ => change.document,
        };
        Some(Change {
            kind,
            document,
            previous: change.previous,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Filter;
    use serde_json::json;

    fn post(id: &str, hidden: bool) -> Document {
        Document {
            collection: "posts".into(),
            id: id.into(),
            fields: json!({ "hidden": hidden }).as_object().unwrap().clone(),
            create_time: 0,
            update_time: 0,
        }
    }

    #[tokio::test]
    async fn leaving_the_query_reports_removal() {
        let (tx, rx) = broadcast::channel(16);
        let query = Query::collection("posts").filter(Filter::eq("hidden", false));
        let mut sub = Subscription::new(query, rx);

        tx.send(Change {
            kind: ChangeKind::Added,
            document: post("p1", false),
            previous: None,
        })
        .unwrap();
        tx.send(Change {
            kind: ChangeKind::Added,
            document: post("p2", true),
            previous: None,
        })
        .unwrap();
        tx.send(Change {
            kind: ChangeKind::Modified,
            document: post("p1", true),
            previous: Some(post("p1", false)),
        })
        .unwrap();
        drop(tx);

        let first = sub.next().await.unwrap().unwrap();
        assert_eq!(first.kind, ChangeKind::Added);
        assert_eq!(first.document.id, "p1");
        let second = sub.next().await.unwrap().unwrap();
        assert_eq!(second.kind, ChangeKind::Removed);
        assert_eq!(second.document.id, "p1");
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn overflow_is_reported_not_skipped() {
        let (tx, rx) = broadcast::channel(4);
        let mut sub = Subscription::new(Query::collection("posts"), rx);
        for i in 0..10 {
            tx.send(Change {
                kind: ChangeKind::Added,
                document: post(&format!("p{i}"), false),
                previous: None,
            })
            .unwrap();
        }
        assert_eq!(sub.next().await.unwrap(), Err(Lagged { missed: 6 }));
        let resumed = sub.next().await.unwrap().unwrap();
        assert_eq!(resumed.document.id, "p6");
    }
}
