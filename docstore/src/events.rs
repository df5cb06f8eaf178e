use backend_api::{Change, Query, Subscription};
use tokio::sync::broadcast;

/// In-process fan-out of committed changes to snapshot listeners.
pub struct ChangeFeed {
    tx: broadcast::Sender<Change>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self, query: Query) -> Subscription {
        Subscription::new(query, self.tx.subscribe())
    }

    /// Publish changes in commit order. Having no listeners is not an error.
    pub fn publish(&self, changes: Vec<Change>) {
        for change in changes {
            let _ = self.tx.send(change);
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}
