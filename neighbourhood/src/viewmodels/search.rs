use std::sync::Arc;

use tokio::sync::watch;

use crate::model::{Post, Profile};
use crate::repositories::SearchRepository;

use super::state::StateHolder;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchState {
    pub query: String,
    pub posts: Vec<Post>,
    pub providers: Vec<Profile>,
    pub error: Option<String>,
}

pub struct SearchViewModel {
    repo: SearchRepository,
    state: Arc<StateHolder<SearchState>>,
}

impl SearchViewModel {
    pub fn new(repo: SearchRepository) -> Self {
        Self {
            repo,
            state: Arc::new(StateHolder::default()),
        }
    }

    pub fn state(&self) -> SearchState {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.state.subscribe()
    }

    /// Search posts and providers for the same query.
    pub fn search(&self, query: &str) {
        let posts = self.repo.posts(query);
        let providers = self.repo.providers(query);
        self.state.update(|s| {
            s.query = query.to_string();
            match (posts, providers) {
                (Ok(posts), Ok(providers)) => {
                    s.posts = posts;
                    s.providers = providers;
                    s.error = None;
                }
                (Err(e), _) | (_, Err(e)) => s.error = Some(e.to_string()),
            }
        });
    }

    pub fn clear(&self) {
        self.state.update(|s| *s = SearchState::default());
    }
}
