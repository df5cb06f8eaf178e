use std::sync::Arc;

use anyhow::Result;
use backend_api::{Direction, DocumentStore, FieldUpdate, Filter, Query};
use tracing::info;

use crate::model::{Post, Profile, ProviderStatus, Role, POSTS, USERS};
use crate::session::Session;

use super::posts::delete_post_with_comments;
use super::{decode_all, forbidden};

/// How many of the newest posts moderation looks through.
pub const MODERATION_WINDOW: usize = 500;

/// Moderation and provider approval. Every call requires the admin role.
#[derive(Clone)]
pub struct AdminRepository {
    store: Arc<dyn DocumentStore>,
    session: Arc<Session>,
}

impl AdminRepository {
    pub fn new(store: Arc<dyn DocumentStore>, session: Arc<Session>) -> Self {
        Self { store, session }
    }

    fn require_admin(&self) -> Result<Profile> {
        let me = self.session.require()?;
        if !me.is_admin() {
            return Err(forbidden());
        }
        Ok(me)
    }

    pub fn pending_providers(&self) -> Result<Vec<Profile>> {
        self.require_admin()?;
        let docs = self.store.query(
            &Query::collection(USERS)
                .filter(Filter::eq("role", Role::ServiceProvider.as_str()))
                .filter(Filter::eq("providerStatus", "pending"))
                .order_by("createdAt", Direction::Ascending),
        )?;
        decode_all(&docs)
    }

    fn set_provider_status(&self, uid: &str, status: ProviderStatus) -> Result<()> {
        let me = self.require_admin()?;
        let profile: Profile = self
            .store
            .get(USERS, uid)?
            .ok_or_else(|| anyhow::anyhow!("not_found"))?
            .decode()?;
        if profile.role != Role::ServiceProvider {
            anyhow::bail!("not_a_provider");
        }
        self.store.update(
            USERS,
            uid,
            vec![FieldUpdate::set("providerStatus", serde_json::to_value(status)?)],
        )?;
        info!(provider = %uid, status = ?status, by = %me.uid, "provider status set");
        Ok(())
    }

    pub fn approve_provider(&self, uid: &str) -> Result<()> {
        self.set_provider_status(uid, ProviderStatus::Approved)
    }

    pub fn reject_provider(&self, uid: &str) -> Result<()> {
        self.set_provider_status(uid, ProviderStatus::Rejected)
    }

    /// Posts with at least one report, most reported first.
    pub fn reported_posts(&self) -> Result<Vec<Post>> {
        self.require_admin()?;
        let docs = self.store.query(
            &Query::collection(POSTS)
                .order_by("createdAt", Direction::Descending)
                .limit(MODERATION_WINDOW),
        )?;
        let mut posts: Vec<Post> = decode_all::<Post>(&docs)?
            .into_iter()
            .filter(|p| !p.reported_by.is_empty())
            .collect();
        posts.sort_by(|a, b| b.reported_by.len().cmp(&a.reported_by.len()));
        Ok(posts)
    }

    /// Hide or unhide a post from the feed and search.
    pub fn set_hidden(&self, post_id: &str, hidden: bool) -> Result<()> {
        let me = self.require_admin()?;
        self.store
            .update(POSTS, post_id, vec![FieldUpdate::set("hidden", hidden)])?;
        info!(post = %post_id, hidden, by = %me.uid, "post visibility changed");
        Ok(())
    }

    pub fn dismiss_reports(&self, post_id: &str) -> Result<()> {
        self.require_admin()?;
        self.store.update(
            POSTS,
            post_id,
            vec![FieldUpdate::set("reportedBy", serde_json::Value::Array(Vec::new()))],
        )?;
        Ok(())
    }

    pub fn delete_post(&self, post_id: &str) -> Result<()> {
        let me = self.require_admin()?;
        delete_post_with_comments(self.store.as_ref(), post_id)?;
        info!(post = %post_id, by = %me.uid, "post removed by admin");
        Ok(())
    }

    /// Disabled accounts cannot sign in and are hidden from provider listings.
    pub fn set_disabled(&self, uid: &str, disabled: bool) -> Result<()> {
        let me = self.require_admin()?;
        if uid == me.uid {
            anyhow::bail!("invalid_participant");
        }
        self.store
            .update(USERS, uid, vec![FieldUpdate::set("disabled", disabled)])?;
        info!(uid = %uid, disabled, by = %me.uid, "account state changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::{NewPost, SignUp};
    use crate::testing;

    #[test]
    fn non_admins_are_refused() {
        let env = testing::env();
        env.member("Ana");
        let admin = env.app.admin();
        assert_eq!(admin.pending_providers().unwrap_err().to_string(), "forbidden");
        assert_eq!(admin.reported_posts().unwrap_err().to_string(), "forbidden");
    }

    #[test]
    fn approve_pending_provider() {
        let env = testing::env();
        let pending = env
            .app
            .auth()
            .sign_up(SignUp {
                name: "Bo".into(),
                email: "bo@example.com".into(),
                password: "password1".into(),
                role: Role::ServiceProvider,
                service_type: Some("plumbing".into()),
                ..Default::default()
            })
            .unwrap();
        env.admin("Root");
        let admin = env.app.admin();
        let queue = admin.pending_providers().unwrap();
        assert_eq!(queue.len(), 1);
        assert!(env.app.profiles().providers(None).unwrap().is_empty());
        admin.approve_provider(&pending.uid).unwrap();
        assert!(admin.pending_providers().unwrap().is_empty());
        assert_eq!(env.app.profiles().providers(None).unwrap().len(), 1);
    }

    #[test]
    fn moderation_flow() {
        let env = testing::env();
        env.member("Ana");
        let post = env
            .app
            .posts()
            .create(NewPost {
                content: "buy cheap stuff".into(),
                ..Default::default()
            })
            .unwrap();
        env.member("Bo");
        env.app.posts().report(&post.id).unwrap();
        env.admin("Root");
        let admin = env.app.admin();
        assert_eq!(admin.reported_posts().unwrap().len(), 1);

        admin.set_hidden(&post.id, true).unwrap();
        let page = env.app.posts().feed_page(None).unwrap();
        assert!(page.posts.is_empty());

        admin.dismiss_reports(&post.id).unwrap();
        assert!(admin.reported_posts().unwrap().is_empty());
        admin.delete_post(&post.id).unwrap();
        assert!(env.app.posts().get(&post.id).unwrap().is_none());
    }

    #[test]
    fn disabled_accounts_cannot_sign_in() {
        let env = testing::env();
        let ana = env.member("Ana");
        env.admin("Root");
        env.app.admin().set_disabled(&ana.uid, true).unwrap();
        assert_eq!(
            env.app
                .auth()
                .sign_in("ana@example.com", "password1")
                .unwrap_err()
                .to_string(),
            "account_disabled"
        );
    }
}
