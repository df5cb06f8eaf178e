//! Neighbourhood community app: posts, service requests and chat between members and
//! providers, moderated by administrators. All persistence goes through a [`Backend`].

pub mod config;
pub mod media;
pub mod model;
pub mod repositories;
pub mod screens;
pub mod session;
pub mod typing;
pub mod viewmodels;

#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use anyhow::Result;
use backend_api::Backend;
use tracing::info;

use config::Config;
use repositories::{
    AdminRepository, AuthRepository, ChatRepository, CommentsRepository, LikesRepository,
    PostsRepository, ProfileRepository, RequestsRepository, SearchRepository,
};
use session::Session;
use typing::TypingTracker;

/// Everything a screen needs: backend handles, the session and configuration.
#[derive(Clone)]
pub struct App {
    pub backend: Backend,
    pub session: Arc<Session>,
    pub config: Config,
    typing: Arc<TypingTracker>,
}

impl App {
    /// Open the embedded backend under `config.data_dir` and run first-start tasks.
    pub fn open(config: Config, session: Arc<Session>) -> Result<Self> {
        let backend = docstore::open(&config.store_config())?;
        let app = Self::with_backend(backend, session, config);
        if let Some(bootstrap) = &app.config.bootstrap {
            if app.auth().bootstrap_admin(bootstrap)? {
                info!(email = %bootstrap.email, "created bootstrap administrator");
            }
        }
        Ok(app)
    }

    pub fn with_backend(backend: Backend, session: Arc<Session>, config: Config) -> Self {
        let typing = Arc::new(TypingTracker::new(config.typing_debounce));
        Self {
            backend,
            session,
            config,
            typing,
        }
    }

    pub fn typing(&self) -> Arc<TypingTracker> {
        self.typing.clone()
    }

    pub fn auth(&self) -> AuthRepository {
        AuthRepository::new(self.backend.clone(), self.session.clone())
    }

    pub fn profiles(&self) -> ProfileRepository {
        ProfileRepository::new(
            self.backend.clone(),
            self.session.clone(),
            self.config.max_image_bytes(),
        )
    }

    pub fn posts(&self) -> PostsRepository {
        PostsRepository::new(
            self.backend.clone(),
            self.session.clone(),
            self.config.feed_page_size,
            self.config.max_image_bytes(),
        )
    }

    pub fn likes(&self) -> LikesRepository {
        LikesRepository::new(self.backend.store.clone(), self.session.clone())
    }

    pub fn comments(&self) -> CommentsRepository {
        CommentsRepository::new(self.backend.store.clone(), self.session.clone())
    }

    pub fn chat(&self) -> ChatRepository {
        ChatRepository::new(self.backend.store.clone(), self.session.clone())
    }

    pub fn requests(&self) -> RequestsRepository {
        RequestsRepository::new(self.backend.store.clone(), self.session.clone(), self.chat())
    }

    pub fn search(&self) -> SearchRepository {
        SearchRepository::new(self.backend.store.clone())
    }

    pub fn admin(&self) -> AdminRepository {
        AdminRepository::new(self.backend.store.clone(), self.session.clone())
    }
}
