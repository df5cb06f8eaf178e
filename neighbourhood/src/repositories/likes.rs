use std::sync::Arc;

use anyhow::Result;
use backend_api::{run_transaction, BackendError, DocumentStore, FieldUpdate};
use tracing::debug;

use crate::model::{Post, POSTS};
use crate::session::Session;

/// State of a post's like after a toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeOutcome {
    pub liked: bool,
    pub likes: i64,
}

#[derive(Clone)]
pub struct LikesRepository {
    store: Arc<dyn DocumentStore>,
    session: Arc<Session>,
}

impl LikesRepository {
    pub fn new(store: Arc<dyn DocumentStore>, session: Arc<Session>) -> Self {
        Self { store, session }
    }

    /// Like or unlike, decided from the stored `likedBy` inside one transaction.
    pub fn toggle(&self, post_id: &str) -> Result<LikeOutcome> {
        let uid = self.session.require()?.uid;
        let outcome = run_transaction(self.store.as_ref(), |tx| {
            let doc = tx
                .get(POSTS, post_id)?
                .ok_or_else(|| BackendError::not_found(POSTS, post_id))?;
            let post: Post = doc.decode()?;
            let outcome = if post.is_liked_by(&uid) {
                tx.update(
                    POSTS,
                    post_id,
                    vec![
                        FieldUpdate::increment("likes", -1),
                        FieldUpdate::array_remove("likedBy", [uid.as_str()]),
                    ],
                );
                LikeOutcome {
                    liked: false,
                    likes: (post.likes - 1).max(0),
                }
            } else {
                tx.update(
                    POSTS,
                    post_id,
                    vec![
                        FieldUpdate::increment("likes", 1),
                        FieldUpdate::array_union("likedBy", [uid.as_str()]),
                    ],
                );
                LikeOutcome {
                    liked: true,
                    likes: post.likes + 1,
                }
            };
            Ok(outcome)
        })?;
        debug!(post = %post_id, uid = %uid, liked = outcome.liked, "like toggled");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::NewPost;
    use crate::testing;

    #[test]
    fn toggling_twice_restores_count() {
        let env = testing::env();
        env.member("Ana");
        let post = env
            .app
            .posts()
            .create(NewPost {
                content: "hi".into(),
                ..Default::default()
            })
            .unwrap();
        let likes = env.app.likes();
        assert_eq!(
            likes.toggle(&post.id).unwrap(),
            LikeOutcome {
                liked: true,
                likes: 1
            }
        );
        assert_eq!(
            likes.toggle(&post.id).unwrap(),
            LikeOutcome {
                liked: false,
                likes: 0
            }
        );
        let stored = env.app.posts().get(&post.id).unwrap().unwrap();
        assert_eq!(stored.likes, 0);
        assert!(stored.liked_by.is_empty());
    }

    #[test]
    fn concurrent_likes_never_double_count() {
        let env = testing::env();
        env.member("Ana");
        let post = env
            .app
            .posts()
            .create(NewPost {
                content: "race".into(),
                ..Default::default()
            })
            .unwrap();
        let mut uids = Vec::new();
        for name in ["Bo", "Cy", "Di", "Ed"] {
            uids.push(env.member(name));
        }
        let handles: Vec<_> = uids
            .into_iter()
            .map(|profile| {
                let session = Arc::new(Session::default());
                session.set(crate::session::SignedIn {
                    profile,
                    token: String::new(),
                });
                let repo = LikesRepository::new(env.backend.store.clone(), session);
                let id = post.id.clone();
                std::thread::spawn(move || repo.toggle(&id).unwrap())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap().liked);
        }
        let stored = env.app.posts().get(&post.id).unwrap().unwrap();
        assert_eq!(stored.likes, 4);
        assert_eq!(stored.liked_by.len(), 4);
    }

    #[test]
    fn missing_post_fails() {
        let env = testing::env();
        env.member("Ana");
        assert!(env.app.likes().toggle("nope").is_err());
    }
}
