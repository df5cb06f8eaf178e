use std::sync::Arc;

use anyhow::Result;
use backend_api::{
    encode, new_document_id, now_millis, Direction, DocumentStore, FieldUpdate, Query,
    Subscription, WriteBatch,
};
use tracing::info;

use crate::model::{comments_collection, Comment, Post, POSTS};
use crate::session::Session;

use super::{decode_all, forbidden};

#[derive(Clone)]
pub struct CommentsRepository {
    store: Arc<dyn DocumentStore>,
    session: Arc<Session>,
}

impl CommentsRepository {
    pub fn new(store: Arc<dyn DocumentStore>, session: Arc<Session>) -> Self {
        Self { store, session }
    }

    fn query(post_id: &str) -> Query {
        Query::collection(comments_collection(post_id)).order_by("createdAt", Direction::Ascending)
    }

    /// Add a comment and bump the post's count together. Blank text is ignored.
    pub fn add(&self, post_id: &str, text: &str) -> Result<Option<Comment>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let me = self.session.require()?;
        let comment = Comment {
            id: new_document_id(),
            post_id: post_id.to_string(),
            author_id: me.uid.clone(),
            author_name: me.name.clone(),
            text: text.to_string(),
            created_at: now_millis(),
        };
        let mut batch = WriteBatch::new();
        batch
            .set(&comments_collection(post_id), &comment.id, encode(&comment)?)
            .update(POSTS, post_id, vec![FieldUpdate::increment("commentCount", 1)]);
        self.store.commit(batch)?;
        info!(post = %post_id, comment = %comment.id, "comment added");
        Ok(Some(comment))
    }

    /// Comments oldest first.
    pub fn list(&self, post_id: &str) -> Result<Vec<Comment>> {
        let docs = self.store.query(&Self::query(post_id))?;
        decode_all(&docs)
    }

    /// Remove a comment; its author, the post's author or an admin may.
    pub fn delete(&self, post_id: &str, comment_id: &str) -> Result<()> {
        let me = self.session.require()?;
        let collection = comments_collection(post_id);
        let comment: Comment = self
            .store
            .get(&collection, comment_id)?
            .ok_or_else(|| anyhow::anyhow!("not_found"))?
            .decode()?;
        let post_author = match self.store.get(POSTS, post_id)? {
            Some(doc) => Some(doc.decode::<Post>()?.author_id),
            None => None,
        };
        let allowed = comment.author_id == me.uid
            || post_author.as_deref() == Some(me.uid.as_str())
            || me.is_admin();
        if !allowed {
            return Err(forbidden());
        }
        let mut batch = WriteBatch::new();
        batch
            .delete(&collection, comment_id)
            .update(POSTS, post_id, vec![FieldUpdate::increment("commentCount", -1)]);
        self.store.commit(batch)?;
        Ok(())
    }

    pub fn listen(&self, post_id: &str) -> Subscription {
        self.store.subscribe(Self::query(post_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::NewPost;
    use crate::testing;

    fn setup() -> (testing::TestEnv, Post) {
        let env = testing::env();
        env.member("Ana");
        let post = env
            .app
            .posts()
            .create(NewPost {
                content: "street party".into(),
                ..Default::default()
            })
            .unwrap();
        (env, post)
    }

    #[test]
    fn add_updates_count_and_lists_in_order() {
        let (env, post) = setup();
        let repo = env.app.comments();
        repo.add(&post.id, "first").unwrap().unwrap();
        repo.add(&post.id, "second").unwrap().unwrap();
        assert!(repo.add(&post.id, "   ").unwrap().is_none());
        let texts: Vec<_> = repo
            .list(&post.id)
            .unwrap()
            .into_iter()
            .map(|c| c.text)
            .collect();
        assert_eq!(texts, ["first", "second"]);
        let stored = env.app.posts().get(&post.id).unwrap().unwrap();
        assert_eq!(stored.comment_count, 2);
    }

    #[test]
    fn comment_on_missing_post_writes_nothing() {
        let (env, _post) = setup();
        let repo = env.app.comments();
        assert!(repo.add("ghost", "hello?").is_err());
        assert!(repo.list("ghost").unwrap().is_empty());
    }

    #[test]
    fn delete_checks_permissions() {
        let (env, post) = setup();
        env.member("Bo");
        let repo = env.app.comments();
        let comment = repo.add(&post.id, "from bo").unwrap().unwrap();
        env.member("Cy");
        assert_eq!(
            repo.delete(&post.id, &comment.id).unwrap_err().to_string(),
            "forbidden"
        );
        env.act_as(&env.app.profiles().get(&post.author_id).unwrap().unwrap());
        repo.delete(&post.id, &comment.id).unwrap();
        let stored = env.app.posts().get(&post.id).unwrap().unwrap();
        assert_eq!(stored.comment_count, 0);
    }
}
