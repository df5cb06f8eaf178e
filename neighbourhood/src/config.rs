use std::{fs, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use serde::Deserialize;

use crate::screens::cli::Command;

/// Command line options for the neighbourhood app.
#[derive(Parser, Debug, Default)]
#[command(name = "neighbourhood", about = "Neighbourhood community board, requests and chat")]
pub struct Cli {
    /// Path to configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// Override the data directory.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
    /// Override media server bind address (host:port).
    #[arg(long, global = true)]
    pub bind: Option<String>,
    /// Override media server port.
    #[arg(long, global = true)]
    pub port: Option<u16>,
    /// Enable or disable logging (true/false).
    #[arg(long, global = true)]
    pub logging: Option<bool>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// First-run administrator account.
#[derive(Clone)]
pub struct Bootstrap {
    pub email: String,
    pub password: String,
    pub name: String,
}

impl std::fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bootstrap")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .finish()
    }
}

/// Runtime configuration resolved from file, env and CLI.
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory holding the database, uploaded objects and the saved session.
    pub data_dir: PathBuf,
    /// Address the media server binds to.
    pub media_bind: String,
    /// Prefix of stored object URLs.
    pub media_base_url: String,
    pub feed_page_size: usize,
    /// Minimum interval between typing flag writes.
    pub typing_debounce: Duration,
    /// Idle time after which the typing flag is cleared.
    pub typing_timeout: Duration,
    pub max_image_mb: u64,
    pub session_ttl_hours: i64,
    pub logging_enabled: bool,
    pub bootstrap: Option<Bootstrap>,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    bootstrap: Option<FileBootstrap>,
    #[serde(default)]
    server: FileServer,
    #[serde(default)]
    storage: FileStorage,
    #[serde(default)]
    feed: FileFeed,
    #[serde(default)]
    chat: FileChat,
    #[serde(default)]
    logging: FileLogging,
}

#[derive(Deserialize)]
struct FileBootstrap {
    email: String,
    password: String,
    #[serde(default = "default_admin_name")]
    name: String,
}

#[derive(Deserialize)]
struct FileServer {
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default)]
    media_base_url: Option<String>,
}

#[derive(Deserialize, Default)]
struct FileStorage {
    #[serde(default)]
    data_dir: Option<PathBuf>,
    #[serde(default)]
    max_image_mb: Option<u64>,
}

#[derive(Deserialize)]
struct FileFeed {
    #[serde(default = "default_page_size")]
    page_size: usize,
}

#[derive(Deserialize)]
struct FileChat {
    #[serde(default = "default_typing_debounce_ms")]
    typing_debounce_ms: u64,
    #[serde(default = "default_typing_timeout_ms")]
    typing_timeout_ms: u64,
}

#[derive(Deserialize)]
struct FileLogging {
    #[serde(default = "default_logging")]
    enabled: bool,
}

fn default_port() -> u16 {
    8787
}

fn default_logging() -> bool {
    true
}

fn default_page_size() -> usize {
    20
}

fn default_typing_debounce_ms() -> u64 {
    1000
}

fn default_typing_timeout_ms() -> u64 {
    3000
}

fn default_admin_name() -> String {
    "Administrator".into()
}

impl Default for FileServer {
    fn default() -> Self {
        Self {
            port: default_port(),
            media_base_url: None,
        }
    }
}

impl Default for FileFeed {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
        }
    }
}

impl Default for FileChat {
    fn default() -> Self {
        Self {
            typing_debounce_ms: default_typing_debounce_ms(),
            typing_timeout_ms: default_typing_timeout_ms(),
        }
    }
}

impl Default for FileLogging {
    fn default() -> Self {
        Self {
            enabled: default_logging(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Config {
    /// Layer defaults, the TOML file, `NEIGHBOURHOOD_*` variables and CLI flags, later wins.
    pub fn load(cli: &Cli) -> Result<Self> {
        // built-in defaults
        let mut port = default_port();
        let mut logging = default_logging();
        let mut bootstrap: Option<Bootstrap> = None;
        let mut data_dir: Option<PathBuf> = None;
        let mut media_base_url: Option<String> = None;
        let mut max_image_mb = 5;
        let mut page_size = default_page_size();
        let mut debounce_ms = default_typing_debounce_ms();
        let mut timeout_ms = default_typing_timeout_ms();

        // file location: --config, then NEIGHBOURHOOD_CONFIG, then config/neighbourhood.toml
        let config_path = cli
            .config
            .clone()
            .or_else(|| std::env::var("NEIGHBOURHOOD_CONFIG").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("config/neighbourhood.toml"));

        if let Ok(bytes) = fs::read(&config_path) {
            let contents = String::from_utf8_lossy(&bytes);
            let file_cfg: FileConfig = toml::from_str(&contents).context("invalid config file")?;
            if let Some(b) = file_cfg.bootstrap {
                bootstrap = Some(Bootstrap {
                    email: b.email,
                    password: b.password,
                    name: b.name,
                });
            }
            port = file_cfg.server.port;
            media_base_url = file_cfg.server.media_base_url;
            data_dir = file_cfg.storage.data_dir;
            if let Some(mb) = file_cfg.storage.max_image_mb {
                max_image_mb = mb;
            }
            page_size = file_cfg.feed.page_size;
            debounce_ms = file_cfg.chat.typing_debounce_ms;
            timeout_ms = file_cfg.chat.typing_timeout_ms;
            logging = file_cfg.logging.enabled;
        }

        // environment overrides
        if let Some(p) = env_parse::<u16>("NEIGHBOURHOOD_PORT") {
            port = p;
        }
        if let Some(l) = env_parse::<bool>("NEIGHBOURHOOD_LOGGING") {
            logging = l;
        }
        if let Ok(dir) = std::env::var("NEIGHBOURHOOD_DATA_DIR") {
            data_dir = Some(PathBuf::from(dir));
        }
        if let Ok(url) = std::env::var("NEIGHBOURHOOD_MEDIA_URL") {
            media_base_url = Some(url);
        }
        if let Some(mb) = env_parse::<u64>("NEIGHBOURHOOD_MAX_IMAGE_MB") {
            max_image_mb = mb;
        }
        if let Some(n) = env_parse::<usize>("NEIGHBOURHOOD_PAGE_SIZE") {
            page_size = n;
        }
        if let (Ok(email), Ok(password)) = (
            std::env::var("NEIGHBOURHOOD_ADMIN_EMAIL"),
            std::env::var("NEIGHBOURHOOD_ADMIN_PASSWORD"),
        ) {
            bootstrap = Some(Bootstrap {
                email,
                password,
                name: default_admin_name(),
            });
        }

        // CLI overrides
        if let Some(p) = cli.port {
            port = p;
        }
        if let Some(l) = cli.logging {
            logging = l;
        }
        if let Some(dir) = &cli.data_dir {
            data_dir = Some(dir.clone());
        }

        // ports below 1024 need root
        if !(1024..=65535).contains(&port) {
            anyhow::bail!("invalid_port");
        }
        if page_size == 0 {
            anyhow::bail!("invalid_page_size");
        }
        let image_bytes = max_image_mb
            .checked_mul(1024 * 1024)
            .and_then(|b| usize::try_from(b).ok());
        if image_bytes.is_none() {
            anyhow::bail!("invalid_image_limit");
        }

        let media_bind = if let Some(b) = &cli.bind {
            b.clone()
        } else if let Ok(b) = std::env::var("NEIGHBOURHOOD_BIND") {
            b
        } else {
            format!("127.0.0.1:{}", port)
        };
        let media_base_url = media_base_url
            .unwrap_or_else(|| format!("http://{}", media_bind))
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            data_dir: data_dir.unwrap_or_else(default_data_dir),
            media_bind,
            media_base_url,
            feed_page_size: page_size,
            typing_debounce: Duration::from_millis(debounce_ms),
            typing_timeout: Duration::from_millis(timeout_ms),
            max_image_mb,
            session_ttl_hours: 24 * 30,
            logging_enabled: logging,
            bootstrap,
        })
    }

    /// Helper to return the image limit in bytes.
    pub fn max_image_bytes(&self) -> usize {
        usize::try_from(self.max_image_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
    }

    pub fn store_config(&self) -> docstore::StoreConfig {
        docstore::StoreConfig {
            data_dir: self.data_dir.clone(),
            media_base_url: self.media_base_url.clone(),
            token_ttl: time::Duration::hours(self.session_ttl_hours),
        }
    }

    /// Defaults rooted at `data_dir`, for embedding and tests.
    pub fn for_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            media_bind: format!("127.0.0.1:{}", default_port()),
            media_base_url: format!("http://127.0.0.1:{}", default_port()),
            feed_page_size: default_page_size(),
            typing_debounce: Duration::from_millis(default_typing_debounce_ms()),
            typing_timeout: Duration::from_millis(default_typing_timeout_ms()),
            max_image_mb: 5,
            session_ttl_hours: 24 * 30,
            logging_enabled: false,
            bootstrap: None,
        }
    }
}

/// Determine the default data directory for the app.
pub fn default_data_dir() -> PathBuf {
    match ProjectDirs::from("org", "neighbourhood", "neighbourhood") {
        Some(proj) => proj.data_dir().to_path_buf(),
        None => PathBuf::from("./neighbourhood_data"),
    }
}
