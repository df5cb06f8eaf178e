//! Embedded backend for the neighbourhood app: documents, accounts and objects in one
//! SQLite file plus a content-addressed directory of uploads.

pub mod auth;
pub mod db;
pub mod events;
pub mod files;
pub mod http;
pub mod ops;
pub mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use backend_api::Backend;
use tracing::info;

pub use auth::SqliteAuth;
pub use events::ChangeFeed;
pub use files::FileStorage;
pub use http::{media_router, serve_media};
pub use store::SqliteStore;

pub const DATABASE_FILE: &str = "neighbourhood.db";
pub const OBJECTS_DIR: &str = "objects";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    /// Prefix of object URLs, e.g. `http://127.0.0.1:8787`.
    pub media_base_url: String,
    pub token_ttl: time::Duration,
}

/// Open (creating if needed) the backend rooted at `config.data_dir`.
pub fn open(config: &StoreConfig) -> Result<Backend> {
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating {}", config.data_dir.display()))?;
    let db_path = config.data_dir.join(DATABASE_FILE);
    let pool = db::open_pool(&db_path)
        .with_context(|| format!("opening database {}", db_path.display()))?;
    let objects = config.data_dir.join(OBJECTS_DIR);
    std::fs::create_dir_all(&objects)?;

    let feed = Arc::new(ChangeFeed::default());
    let store = SqliteStore::new(pool.clone(), feed);
    let auth = SqliteAuth::new(pool.clone(), config.token_ttl)?;
    let storage = FileStorage::new(pool, objects, &config.media_base_url);
    info!(data_dir = %config.data_dir.display(), "backend opened");
    Ok(Backend {
        store: Arc::new(store),
        auth: Arc::new(auth),
        storage: Arc::new(storage),
    })
}
