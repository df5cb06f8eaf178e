use std::sync::Arc;

use tokio::sync::watch;

use crate::model::{Comment, Post};
use crate::repositories::{CommentsRepository, LikesRepository, PostsRepository};

use super::state::{ListenerHandle, StateHolder};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostDetailState {
    pub post: Option<Post>,
    pub comments: Vec<Comment>,
    pub loading: bool,
    pub error: Option<String>,
}

/// A single post with its comment thread.
pub struct PostDetailViewModel {
    post_id: String,
    posts: PostsRepository,
    likes: LikesRepository,
    comments: CommentsRepository,
    state: Arc<StateHolder<PostDetailState>>,
}

impl PostDetailViewModel {
    pub fn new(
        post_id: &str,
        posts: PostsRepository,
        likes: LikesRepository,
        comments: CommentsRepository,
    ) -> Self {
        Self {
            post_id: post_id.to_string(),
            posts,
            likes,
            comments,
            state: Arc::new(StateHolder::default()),
        }
    }

    pub fn state(&self) -> PostDetailState {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<PostDetailState> {
        self.state.subscribe()
    }

    pub fn load(&self) {
        self.state.update(|s| s.loading = true);
        let post = self.posts.get(&self.post_id);
        let comments = self.comments.list(&self.post_id);
        self.state.update(|s| {
            s.loading = false;
            match (post, comments) {
                (Ok(Some(post)), Ok(comments)) => {
                    s.post = Some(post);
                    s.comments = comments;
                    s.error = None;
                }
                (Ok(None), _) => s.error = Some("not_found".into()),
                (Err(e), _) | (_, Err(e)) => s.error = Some(e.to_string()),
            }
        });
    }

    pub fn add_comment(&self, text: &str) {
        match self.comments.add(&self.post_id, text) {
            Ok(Some(comment)) => self.state.update(|s| {
                if !s.comments.iter().any(|c| c.id == comment.id) {
                    s.comments.push(comment);
                }
                if let Some(post) = s.post.as_mut() {
                    post.comment_count += 1;
                }
            }),
            Ok(None) => {}
            Err(e) => self.state.update(|s| s.error = Some(e.to_string())),
        }
    }

    pub fn delete_comment(&self, comment_id: &str) {
        match self.comments.delete(&self.post_id, comment_id) {
            Ok(()) => self.state.update(|s| {
                s.comments.retain(|c| c.id != comment_id);
                if let Some(post) = s.post.as_mut() {
                    post.comment_count = (post.comment_count - 1).max(0);
                }
            }),
            Err(e) => self.state.update(|s| s.error = Some(e.to_string())),
        }
    }

    pub fn toggle_like(&self) {
        match self.likes.toggle(&self.post_id) {
            Ok(_) => match self.posts.get(&self.post_id) {
                Ok(post) => self.state.update(|s| s.post = post),
                Err(e) => self.state.update(|s| s.error = Some(e.to_string())),
            },
            Err(e) => self.state.update(|s| s.error = Some(e.to_string())),
        }
    }

    /// Keep comments current while the handle lives.
    pub fn listen(&self) -> ListenerHandle {
        let mut sub = self.comments.listen(&self.post_id);
        let comments = self.comments.clone();
        let posts = self.posts.clone();
        let state = self.state.clone();
        let post_id = self.post_id.clone();
        ListenerHandle::new(tokio::spawn(async move {
            while sub.next().await.is_some() {
                let fresh = comments.list(&post_id);
                let post = posts.get(&post_id);
                state.update(|s| {
                    match fresh {
                        Ok(list) => s.comments = list,
                        Err(e) => s.error = Some(e.to_string()),
                    }
                    if let Ok(Some(post)) = post {
                        s.post = Some(post);
                    }
                });
            }
        }))
    }
}
