use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::Profile;

pub const SESSION_FILE: &str = "session.json";

static GLOBAL: Lazy<Arc<Session>> = Lazy::new(|| Arc::new(Session::default()));

/// The signed-in profile and its token.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedIn {
    pub profile: Profile,
    pub token: String,
}

/// Process-wide holder of the current user. Repositories read it, auth writes it.
#[derive(Debug, Default)]
pub struct Session {
    current: RwLock<Option<SignedIn>>,
}

impl Session {
    /// The shared instance used by the binary.
    pub fn global() -> Arc<Session> {
        GLOBAL.clone()
    }

    pub fn set(&self, signed_in: SignedIn) {
        *self.current.write() = Some(signed_in);
    }

    pub fn clear(&self) {
        *self.current.write() = None;
    }

    pub fn current(&self) -> Option<SignedIn> {
        self.current.read().clone()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.current.read().as_ref().map(|s| s.profile.clone())
    }

    pub fn uid(&self) -> Option<String> {
        self.current.read().as_ref().map(|s| s.profile.uid.clone())
    }

    pub fn token(&self) -> Option<String> {
        self.current.read().as_ref().map(|s| s.token.clone())
    }

    /// The signed-in profile or `not_signed_in`.
    pub fn require(&self) -> Result<Profile> {
        self.profile().ok_or_else(|| anyhow::anyhow!("not_signed_in"))
    }

    /// Replace the cached profile after it changed in the backend.
    pub fn refresh_profile(&self, profile: Profile) {
        if let Some(current) = self.current.write().as_mut() {
            if current.profile.uid == profile.uid {
                current.profile = profile;
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
struct SavedSession {
    token: String,
}

fn session_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SESSION_FILE)
}

/// Persist the token so the next CLI invocation stays signed in.
pub fn save_token(data_dir: &Path, token: &str) -> Result<()> {
    std::fs::create_dir_all(data_dir)?;
    let bytes = serde_json::to_vec(&SavedSession {
        token: token.to_string(),
    })?;
    std::fs::write(session_path(data_dir), bytes).context("writing session file")?;
    Ok(())
}

pub fn load_token(data_dir: &Path) -> Option<String> {
    let bytes = std::fs::read(session_path(data_dir)).ok()?;
    match serde_json::from_slice::<SavedSession>(&bytes) {
        Ok(saved) => Some(saved.token),
        Err(e) => {
            debug!(error = %e, "ignoring unreadable session file");
            None
        }
    }
}

pub fn clear_token(data_dir: &Path) -> Result<()> {
    match std::fs::remove_file(session_path(data_dir)) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
