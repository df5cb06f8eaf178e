//! Contract between the neighbourhood app and its backend collaborator: a document
//! database with atomic field transforms, batches, transactions and snapshot listeners,
//! an email/password auth provider and an object store for images.

mod change;
mod document;
mod error;
mod query;
mod write;

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub use change::{Change, ChangeKind, Lagged, Subscription};
pub use document::{encode, get_path, new_document_id, now_millis, Document, Fields, ID_FIELD};
pub use error::{BackendError, Result};
pub use query::{compare_values, Cursor, Direction, Filter, OrderBy, Query};
pub use write::{FieldOp, FieldUpdate, Write, WriteBatch};

/// Document database operations the app relies on.
///
/// Implementations provide reads, batch commits, transactions and subscriptions; the single
/// document writes are batches of one.
pub trait DocumentStore: Send + Sync {
    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    fn query(&self, query: &Query) -> Result<Vec<Document>>;

    /// Apply every write of the batch atomically.
    fn commit(&self, batch: WriteBatch) -> Result<()>;

    /// Run `body` against a consistent view; its buffered writes commit when it returns `Ok`.
    fn run_transaction(
        &self,
        body: &mut dyn FnMut(&mut dyn Transaction) -> Result<()>,
    ) -> Result<()>;

    fn subscribe(&self, query: Query) -> Subscription;

    fn set(&self, collection: &str, id: &str, fields: Fields) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.set(collection, id, fields);
        self.commit(batch)
    }

    /// Store a new document under a generated id.
    fn add(&self, collection: &str, fields: Fields) -> Result<String> {
        let id = new_document_id();
        self.set(collection, &id, fields)?;
        Ok(id)
    }

    fn update(&self, collection: &str, id: &str, updates: Vec<FieldUpdate>) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.update(collection, id, updates);
        self.commit(batch)
    }

    fn delete(&self, collection: &str, id: &str) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(collection, id);
        self.commit(batch)
    }
}

/// Read-modify-write scope handed to [`DocumentStore::run_transaction`].
/// Reads see the state at transaction start plus nothing buffered; writes apply on commit.
pub trait Transaction {
    fn get(&mut self, collection: &str, id: &str) -> Result<Option<Document>>;
    fn query(&mut self, query: &Query) -> Result<Vec<Document>>;
    fn set(&mut self, collection: &str, id: &str, fields: Fields);
    fn update(&mut self, collection: &str, id: &str, updates: Vec<FieldUpdate>);
    fn delete(&mut self, collection: &str, id: &str);
}

/// Run a transaction that produces a value.
pub fn run_transaction<T>(
    store: &dyn DocumentStore,
    mut body: impl FnMut(&mut dyn Transaction) -> Result<T>,
) -> Result<T> {
    let mut output = None;
    store.run_transaction(&mut |tx| {
        output = Some(body(tx)?);
        Ok(())
    })?;
    output.ok_or_else(|| BackendError::Internal("transaction finished without a result".into()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub uid: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub user: AuthUser,
    pub token: String,
}

/// Email/password authentication.
pub trait AuthProvider: Send + Sync {
    fn create_user(&self, email: &str, password: &str) -> Result<AuthUser>;
    fn sign_in(&self, email: &str, password: &str) -> Result<AuthSession>;
    fn verify_token(&self, token: &str) -> Result<AuthUser>;
    fn delete_user(&self, uid: &str) -> Result<()>;
}

/// Metadata of an uploaded object; `url` stays valid for the object's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredObject {
    pub id: String,
    pub url: String,
    pub content_type: String,
    pub size_bytes: u64,
}

pub trait ObjectStorage: Send + Sync {
    fn put(&self, folder: &str, data: &[u8], content_type: &str) -> Result<StoredObject>;
    fn get(&self, id: &str) -> Result<Option<(StoredObject, Bytes)>>;
    fn delete(&self, id: &str) -> Result<()>;
}

/// Handles to every backend service, cheap to clone.
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn DocumentStore>,
    pub auth: Arc<dyn AuthProvider>,
    pub storage: Arc<dyn ObjectStorage>,
}
