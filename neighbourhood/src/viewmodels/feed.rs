use std::collections::HashSet;
use std::sync::Arc;

use backend_api::Cursor;
use tokio::sync::watch;
use tracing::warn;

use crate::model::Post;
use crate::repositories::{LikesRepository, NewPost, PostsRepository};
use crate::session::Session;

use super::state::StateHolder;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedState {
    pub posts: Vec<Post>,
    pub loading: bool,
    pub end_reached: bool,
    pub error: Option<String>,
    cursor: Option<Cursor>,
}

/// Drop later duplicates by id, keeping first occurrences in order.
fn dedupe(posts: &mut Vec<Post>) {
    let mut seen = HashSet::new();
    posts.retain(|p| seen.insert(p.id.clone()));
}

pub struct FeedViewModel {
    posts: PostsRepository,
    likes: LikesRepository,
    session: Arc<Session>,
    state: Arc<StateHolder<FeedState>>,
}

impl FeedViewModel {
    pub fn new(posts: PostsRepository, likes: LikesRepository, session: Arc<Session>) -> Self {
        Self {
            posts,
            likes,
            session,
            state: Arc::new(StateHolder::default()),
        }
    }

    pub fn state(&self) -> FeedState {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.state.subscribe()
    }

    /// Reload from the first page.
    pub fn refresh(&self) {
        self.state.update(|s| {
            s.loading = true;
            s.error = None;
        });
        let result = self.posts.feed_page(None);
        self.state.update(|s| {
            s.loading = false;
            match result {
                Ok(page) => {
                    s.posts = page.posts;
                    s.cursor = page.next;
                    s.end_reached = page.end;
                }
                Err(e) => s.error = Some(e.to_string()),
            }
        });
    }

    /// Append the next page unless the end was reached.
    pub fn load_more(&self) {
        let current = self.state.get();
        if current.loading || current.end_reached {
            return;
        }
        self.state.update(|s| s.loading = true);
        let result = self.posts.feed_page(current.cursor);
        self.state.update(|s| {
            s.loading = false;
            match result {
                Ok(page) => {
                    s.posts.extend(page.posts);
                    dedupe(&mut s.posts);
                    if page.next.is_some() {
                        s.cursor = page.next;
                    }
                    s.end_reached = page.end;
                }
                Err(e) => s.error = Some(e.to_string()),
            }
        });
    }

    /// Flip the like locally, then reconcile with the stored outcome or revert on failure.
    pub fn toggle_like(&self, post_id: &str) {
        let Some(uid) = self.session.uid() else {
            self.state
                .update(|s| s.error = Some("not_signed_in".into()));
            return;
        };
        let mut previous = None;
        self.state.update(|s| {
            if let Some(post) = s.posts.iter_mut().find(|p| p.id == post_id) {
                previous = Some(post.clone());
                if post.liked_by.remove(&uid) {
                    post.likes = (post.likes - 1).max(0);
                } else {
                    post.liked_by.insert(uid.clone());
                    post.likes += 1;
                }
            }
        });
        let result = self.likes.toggle(post_id);
        self.state.update(|s| {
            let slot = s.posts.iter_mut().find(|p| p.id == post_id);
            match (result, slot) {
                (Ok(outcome), Some(post)) => {
                    post.likes = outcome.likes;
                    if outcome.liked {
                        post.liked_by.insert(uid.clone());
                    } else {
                        post.liked_by.remove(&uid);
                    }
                }
                (Ok(_), None) => {}
                (Err(e), slot) => {
                    warn!(post = %post_id, error = %e, "like failed, reverting");
                    if let (Some(post), Some(prev)) = (slot, previous.take()) {
                        *post = prev;
                    }
                    s.error = Some(e.to_string());
                }
            }
        });
    }

    pub fn create_post(&self, new: NewPost) -> bool {
        match self.posts.create(new) {
            Ok(post) => {
                self.state.update(|s| {
                    s.posts.insert(0, post);
                    s.error = None;
                });
                true
            }
            Err(e) => {
                self.state.update(|s| s.error = Some(e.to_string()));
                false
            }
        }
    }

    pub fn report(&self, post_id: &str) {
        if let Err(e) = self.posts.report(post_id) {
            self.state.update(|s| s.error = Some(e.to_string()));
        }
    }

    pub fn delete(&self, post_id: &str) {
        match self.posts.delete(post_id) {
            Ok(()) => self.state.update(|s| s.posts.retain(|p| p.id != post_id)),
            Err(e) => self.state.update(|s| s.error = Some(e.to_string())),
        }
    }

    pub fn clear_error(&self) {
        self.state.update(|s| s.error = None);
    }
}
