use std::sync::Arc;

use backend_api::{
    now_millis, BackendError, Change, ChangeKind, Document, DocumentStore, FieldUpdate, Fields,
    Query, Result, Subscription, Transaction, Write, WriteBatch,
};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use crate::db::DbPool;
use crate::events::ChangeFeed;
use crate::ops;

pub(crate) fn sql_err(err: rusqlite::Error) -> BackendError {
    BackendError::Internal(err.to_string())
}

pub(crate) fn pool_err(err: r2d2::Error) -> BackendError {
    BackendError::Unavailable(err.to_string())
}

/// Document database on SQLite. Each document is one row holding its JSON body.
pub struct SqliteStore {
    pool: DbPool,
    feed: Arc<ChangeFeed>,
}

impl SqliteStore {
    pub fn new(pool: DbPool, feed: Arc<ChangeFeed>) -> Self {
        Self { pool, feed }
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(pool_err)
    }
}

fn to_document(
    collection: &str,
    id: String,
    body: &str,
    create_time: i64,
    update_time: i64,
) -> Result<Document> {
    let fields: Fields = serde_json::from_str(body)?;
    Ok(Document {
        collection: collection.into(),
        id,
        fields,
        create_time,
        update_time,
    })
}

fn read_document(conn: &Connection, collection: &str, id: &str) -> Result<Option<Document>> {
    let row = conn
        .query_row(
            "SELECT fields, create_time, update_time FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()
        .map_err(sql_err)?;
    row.map(|(body, created, updated)| to_document(collection, id.into(), &body, created, updated))
        .transpose()
}

fn upsert(conn: &Connection, doc: &Document) -> Result<()> {
    let body = serde_json::to_string(&doc.fields)?;
    conn.execute(
        "INSERT INTO documents (collection, id, fields, create_time, update_time) VALUES (?1, ?2, ?3, ?4, ?5) \
         ON CONFLICT(collection, id) DO UPDATE SET fields = excluded.fields, update_time = excluded.update_time",
        params![doc.collection, doc.id, body, doc.create_time, doc.update_time],
    )
    .map_err(sql_err)?;
    Ok(())
}

/// Apply writes inside an open SQL transaction and describe what changed.
fn apply_writes(conn: &Connection, writes: Vec<Write>, now: i64) -> Result<Vec<Change>> {
    let mut changes = Vec::with_capacity(writes.len());
    for write in writes {
        match write {
            Write::Set {
                collection,
                id,
                fields,
            } => {
                let previous = read_document(conn, &collection, &id)?;
                let document = Document {
                    create_time: previous.as_ref().map_or(now, |p| p.create_time),
                    update_time: now,
                    collection,
                    id,
                    fields,
                };
                upsert(conn, &document)?;
                let kind = if previous.is_some() {
                    ChangeKind::Modified
                } else {
                    ChangeKind::Added
                };
                changes.push(Change {
                    kind,
                    document,
                    previous,
                });
            }
            Write::Update {
                collection,
                id,
                updates,
            } => {
                let previous = read_document(conn, &collection, &id)?
                    .ok_or_else(|| BackendError::not_found(&collection, &id))?;
                let mut fields = previous.fields.clone();
                ops::apply_updates(&mut fields, &updates, now)?;
                let document = Document {
                    collection,
                    id,
                    fields,
                    create_time: previous.create_time,
                    update_time: now,
                };
                upsert(conn, &document)?;
                changes.push(Change {
                    kind: ChangeKind::Modified,
                    document,
                    previous: Some(previous),
                });
            }
            Write::Delete { collection, id } => {
                if let Some(previous) = read_document(conn, &collection, &id)? {
                    conn.execute(
                        "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                        params![collection, id],
                    )
                    .map_err(sql_err)?;
                    changes.push(Change {
                        kind: ChangeKind::Removed,
                        document: previous.clone(),
                        previous: Some(previous),
                    });
                }
            }
        }
    }
    Ok(changes)
}

/// Rows of the query's collection, filtered and arranged in Rust.
fn run_query(conn: &Connection, query: &Query) -> Result<Vec<Document>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, fields, create_time, update_time FROM documents WHERE collection = ?1",
        )
        .map_err(sql_err)?;
    let rows = stmt
        .query_map(params![query.collection], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })
        .map_err(sql_err)?;
    let mut docs = Vec::new();
    for row in rows {
        let (id, body, created, updated) = row.map_err(sql_err)?;
        let doc = to_document(&query.collection, id, &body, created, updated)?;
        if query.matches(&doc) {
            docs.push(doc);
        }
    }
    Ok(query.arrange(docs))
}

struct SqliteTransaction<'a> {
    conn: &'a Connection,
    writes: WriteBatch,
}

impl Transaction for SqliteTransaction<'_> {
    fn get(&mut self, collection: &str, id: &str) -> Result<Option<Document>> {
        read_document(self.conn, collection, id)
    }

    fn query(&mut self, query: &Query) -> Result<Vec<Document>> {
        run_query(self.conn, query)
    }

    fn set(&mut self, collection: &str, id: &str, fields: Fields) {
        self.writes.set(collection, id, fields);
    }

    fn update(&mut self, collection: &str, id: &str, updates: Vec<FieldUpdate>) {
        self.writes.update(collection, id, updates);
    }

    fn delete(&mut self, collection: &str, id: &str) {
        self.writes.delete(collection, id);
    }
}

impl DocumentStore for SqliteStore {
    fn get(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        let conn = self.conn()?;
        read_document(&conn, collection, id)
    }

    fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let conn = self.conn()?;
        run_query(&conn, query)
    }

    fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(sql_err)?;
        let changes = apply_writes(&tx, batch.into_writes(), now_millis())?;
        tx.commit().map_err(sql_err)?;
        debug!(changes = changes.len(), "batch committed");
        self.feed.publish(changes);
        Ok(())
    }

    fn run_transaction(
        &self,
        body: &mut dyn FnMut(&mut dyn Transaction) -> Result<()>,
    ) -> Result<()> {
        let mut conn = self.conn()?;
        // concurrent read-modify-write cycles serialize on the write lock
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(sql_err)?;
        let mut scope = SqliteTransaction {
            conn: &tx,
            writes: WriteBatch::new(),
        };
        body(&mut scope)?;
        let writes = std::mem::take(&mut scope.writes);
        let changes = apply_writes(&tx, writes.into_writes(), now_millis())?;
        tx.commit().map_err(sql_err)?;
        debug!(changes = changes.len(), "transaction committed");
        self.feed.publish(changes);
        Ok(())
    }

    fn subscribe(&self, query: Query) -> Subscription {
        self.feed.subscribe(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use backend_api::{run_transaction, Direction, Filter};
    use serde_json::json;

    fn store() -> (SqliteStore, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let pool = db::open_pool(tmp.path().join("test.db")).unwrap();
        (SqliteStore::new(pool, Arc::new(ChangeFeed::default())), tmp)
    }

    fn body(v: serde_json::Value) -> Fields {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn set_get_update_delete() {
        let (store, _tmp) = store();
        store.set("posts", "p1", body(json!({"likes": 0}))).unwrap();
        store
            .update("posts", "p1", vec![FieldUpdate::increment("likes", 2)])
            .unwrap();
        let doc = store.get("posts", "p1").unwrap().unwrap();
        assert_eq!(doc.fields["likes"], json!(2));
        store.delete("posts", "p1").unwrap();
        assert!(store.get("posts", "p1").unwrap().is_none());
    }

    #[test]
    fn update_of_missing_document_fails() {
        let (store, _tmp) = store();
        let err = store
            .update("posts", "nope", vec![FieldUpdate::set("x", 1)])
            .unwrap_err();
        assert!(matches!(err, BackendError::NotFound { .. }));
    }

    #[test]
    fn failed_batch_leaves_nothing_behind() {
        let (store, _tmp) = store();
        let mut batch = WriteBatch::new();
        batch.set("chats/c1/messages", "m1", body(json!({"text": "hi"})));
        batch.update("chats", "c1", vec![FieldUpdate::increment("unreadCount.bob", 1)]);
        assert!(store.commit(batch).is_err());
        assert!(store.get("chats/c1/messages", "m1").unwrap().is_none());
    }

    #[test]
    fn query_filters_orders_and_limits() {
        let (store, _tmp) = store();
        for (id, ts, kind) in [("a", 1, "post"), ("b", 2, "announcement"), ("c", 3, "post")] {
            store
                .set("posts", id, body(json!({"createdAt": ts, "type": kind})))
                .unwrap();
        }
        let docs = store
            .query(
                &Query::collection("posts")
                    .filter(Filter::eq("type", "post"))
                    .order_by("createdAt", Direction::Descending)
                    .limit(5),
            )
            .unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["c", "a"]);
    }

    #[test]
    fn transaction_reads_then_writes() {
        let (store, _tmp) = store();
        store.set("counters", "c", body(json!({"n": 1}))).unwrap();
        let seen = run_transaction(&store, |tx| {
            let n = tx
                .get("counters", "c")?
                .and_then(|d| d.fields["n"].as_i64())
                .unwrap_or(0);
            tx.update("counters", "c", vec![FieldUpdate::set("n", n * 10)]);
            Ok(n)
        })
        .unwrap();
        assert_eq!(seen, 1);
        let doc = store.get("counters", "c").unwrap().unwrap();
        assert_eq!(doc.fields["n"], json!(10));
    }

    #[test]
    fn transaction_queries_see_committed_rows() {
        let (store, _tmp) = store();
        store.set("messages", "a", body(json!({"read": false}))).unwrap();
        store.set("messages", "b", body(json!({"read": true}))).unwrap();
        let marked = run_transaction(&store, |tx| {
            let unread = tx.query(
                &Query::collection("messages").filter(Filter::eq("read", false)),
            )?;
            for doc in &unread {
                tx.update("messages", &doc.id, vec![FieldUpdate::set("read", true)]);
            }
            Ok(unread.len())
        })
        .unwrap();
        assert_eq!(marked, 1);
        let left = store
            .query(&Query::collection("messages").filter(Filter::eq("read", false)))
            .unwrap();
        assert!(left.is_empty());
    }

    #[test]
    fn aborted_transaction_discards_writes() {
        let (store, _tmp) = store();
        let res: Result<()> = run_transaction(&store, |tx| {
            tx.set("counters", "c", body(json!({"n": 1})));
            Err(BackendError::Aborted("changed my mind".into()))
        });
        assert!(res.is_err());
        assert!(store.get("counters", "c").unwrap().is_none());
    }

    #[tokio::test]
    async fn listeners_receive_committed_changes() {
        let (store, _tmp) = store();
        let mut sub = store.subscribe(Query::collection("posts"));
        store.set("other", "x", body(json!({}))).unwrap();
        store.set("posts", "p1", body(json!({"likes": 0}))).unwrap();
        let change = sub.next().await.unwrap().unwrap();
        assert_eq!(change.kind, ChangeKind::Added);
        assert_eq!(change.document.id, "p1");
    }
}
