use std::sync::Arc;

use anyhow::Result;
use backend_api::{
    encode, now_millis, run_transaction, Backend, Cursor, Direction, DocumentStore, FieldUpdate,
    Filter, Query, WriteBatch,
};
use tracing::info;

use crate::media::{self, POST_IMAGES};
use crate::model::{comments_collection, Post, PostType, POSTS};
use crate::session::Session;

use super::{decode_all, forbidden};

pub const CREATED_AT: &str = "createdAt";

#[derive(Debug, Clone, Default)]
pub struct NewPost {
    pub content: String,
    pub kind: PostType,
    pub image: Option<Vec<u8>>,
}

/// One page of the feed, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPage {
    pub posts: Vec<Post>,
    /// Where the next page starts; `None` when this page was empty.
    pub next: Option<Cursor>,
    /// True when the page came back shorter than requested.
    pub end: bool,
}

#[derive(Clone)]
pub struct PostsRepository {
    backend: Backend,
    session: Arc<Session>,
    page_size: usize,
    max_image_bytes: usize,
}

/// Remove a post together with its comments in one batch.
pub(crate) fn delete_post_with_comments(store: &dyn DocumentStore, post_id: &str) -> Result<()> {
    let comments = store.query(&Query::collection(comments_collection(post_id)))?;
    let mut batch = WriteBatch::new();
    for comment in &comments {
        batch.delete(&comment.collection, &comment.id);
    }
    batch.delete(POSTS, post_id);
    store.commit(batch)?;
    Ok(())
}

impl PostsRepository {
    pub fn new(
        backend: Backend,
        session: Arc<Session>,
        page_size: usize,
        max_image_bytes: usize,
    ) -> Self {
        Self {
            backend,
            session,
            page_size,
            max_image_bytes,
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn create(&self, new: NewPost) -> Result<Post> {
        let me = self.session.require()?;
        let content = new.content.trim().to_string();
        if content.is_empty() && new.image.is_none() {
            anyhow::bail!("empty_post");
        }
        if new.kind == PostType::Announcement && !me.is_admin() {
            return Err(forbidden());
        }
        let image_url = match &new.image {
            Some(data) => Some(
                media::upload_image(
                    self.backend.storage.as_ref(),
                    POST_IMAGES,
                    data,
                    self.max_image_bytes,
                )?
                .url,
            ),
            None => None,
        };
        let mut post = Post {
            author_id: me.uid.clone(),
            author_name: me.name.clone(),
            content,
            image_url,
            created_at: now_millis(),
            kind: new.kind,
            neighbourhood: me.neighbourhood.clone(),
            ..Default::default()
        };
        post.id = self.backend.store.add(POSTS, encode(&post)?)?;
        info!(post = %post.id, author = %me.uid, "post created");
        Ok(post)
    }

    pub fn get(&self, id: &str) -> Result<Option<Post>> {
        match self.backend.store.get(POSTS, id)? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// Fetch the page after `cursor` (or the first page).
    pub fn feed_page(&self, cursor: Option<Cursor>) -> Result<FeedPage> {
        let mut query = Query::collection(POSTS)
            .filter(Filter::eq("hidden", false))
            .order_by(CREATED_AT, Direction::Descending)
            .limit(self.page_size);
        if let Some(cursor) = cursor {
            query = query.start_after(cursor);
        }
        let docs = self.backend.store.query(&query)?;
        let next = docs.last().map(|d| Cursor::after(d, CREATED_AT));
        Ok(FeedPage {
            end: docs.len() < self.page_size,
            posts: decode_all(&docs)?,
            next,
        })
    }

    /// Delete a post; only its author or an admin may.
    pub fn delete(&self, id: &str) -> Result<()> {
        let me = self.session.require()?;
        let post = self.get(id)?.ok_or_else(|| anyhow::anyhow!("not_found"))?;
        if post.author_id != me.uid && !me.is_admin() {
            return Err(forbidden());
        }
        delete_post_with_comments(self.backend.store.as_ref(), id)?;
        info!(post = %id, by = %me.uid, "post deleted");
        Ok(())
    }

    /// Flag a post for moderation. Returns false if this user already reported it.
    pub fn report(&self, id: &str) -> Result<bool> {
        let me = self.session.require()?;
        let newly = run_transaction(self.backend.store.as_ref(), |tx| {
            let doc = tx
                .get(POSTS, id)?
                .ok_or_else(|| backend_api::BackendError::not_found(POSTS, id))?;
            let post: Post = doc.decode()?;
            if post.reported_by.contains(&me.uid) {
                return Ok(false);
            }
            tx.update(
                POSTS,
                id,
                vec![FieldUpdate::array_union("reportedBy", [me.uid.as_str()])],
            );
            Ok(true)
        })?;
        if newly {
            info!(post = %id, by = %me.uid, "post reported");
        }
        Ok(newly)
    }
}
