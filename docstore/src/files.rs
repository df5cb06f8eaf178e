use std::fs;
use std::path::{Path, PathBuf};

use backend_api::{BackendError, ObjectStorage, Result, StoredObject};
use bytes::Bytes;
use rusqlite::{params, OptionalExtension};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::db::DbPool;
use crate::store::{pool_err, sql_err};

/// Content-addressed object store: the sha256 of the bytes is the object id.
pub struct FileStorage {
    pool: DbPool,
    base: PathBuf,
    base_url: String,
}

/// Hex-encoded sha256 of `data`.
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Object ids are 64 lowercase hex characters.
pub fn is_object_id(id: &str) -> bool {
    id.len() == 64 && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Determine the on-disk path for an object id within the store.
pub fn file_path<P: AsRef<Path>>(base: P, id: &str) -> PathBuf {
    let sub = &id[..2];
    base.as_ref().join(sub).join(id)
}

fn io_err(err: std::io::Error) -> BackendError {
    BackendError::Internal(format!("io: {err}"))
}

impl FileStorage {
    pub fn new(pool: DbPool, base: impl Into<PathBuf>, base_url: &str) -> Self {
        Self {
            pool,
            base: base.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url_for(&self, id: &str) -> String {
        format!("{}/objects/{}", self.base_url, id)
    }

    fn checked_id<'a>(&self, id: &'a str) -> Result<&'a str> {
        if is_object_id(id) {
            Ok(id)
        } else {
            Err(BackendError::InvalidArgument(format!("bad object id `{id}`")))
        }
    }
}

impl ObjectStorage for FileStorage {
    fn put(&self, folder: &str, data: &[u8], content_type: &str) -> Result<StoredObject> {
        if data.is_empty() {
            return Err(BackendError::InvalidArgument("empty object".into()));
        }
        let id = content_hash(data);
        let path = file_path(&self.base, &id);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        fs::write(&path, data).map_err(io_err)?;
        let conn = self.pool.get().map_err(pool_err)?;
        conn.execute(
            "INSERT INTO objects (id, folder, content_type, size_bytes, created_at) VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT(id) DO UPDATE SET content_type = excluded.content_type",
            params![
                id,
                folder,
                content_type,
                data.len() as i64,
                OffsetDateTime::now_utc().unix_timestamp()
            ],
        )
        .map_err(sql_err)?;
        info!(id = %id, folder, size = data.len(), "object stored");
        Ok(StoredObject {
            url: self.url_for(&id),
            id,
            content_type: content_type.to_string(),
            size_bytes: data.len() as u64,
        })
    }

    fn get(&self, id: &str) -> Result<Option<(StoredObject, Bytes)>> {
        let id = self.checked_id(id)?;
        let conn = self.pool.get().map_err(pool_err)?;
        let meta: Option<(String, i64)> = conn
            .query_row(
                "SELECT content_type, size_bytes FROM objects WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(sql_err)?;
        let Some((content_type, size)) = meta else {
            return Ok(None);
        };
        let data = match fs::read(file_path(&self.base, id)) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(id, "object row without file");
                return Ok(None);
            }
            Err(e) => return Err(io_err(e)),
        };
        let object = StoredObject {
            id: id.to_string(),
            url: self.url_for(id),
            content_type,
            size_bytes: size as u64,
        };
        Ok(Some((object, Bytes::from(data))))
    }

    fn delete(&self, id: &str) -> Result<()> {
        let id = self.checked_id(id)?;
        let conn = self.pool.get().map_err(pool_err)?;
        let changed = conn
            .execute("DELETE FROM objects WHERE id = ?1", [id])
            .map_err(sql_err)?;
        if changed == 0 {
            return Err(BackendError::not_found("objects", id));
        }
        match fs::remove_file(file_path(&self.base, id)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(e)),
        }
        info!(id, "object deleted");
        Ok(())
    }
}
