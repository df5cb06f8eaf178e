use std::sync::Arc;

use tokio::sync::watch;

use crate::model::{Post, Profile};
use crate::repositories::AdminRepository;

use super::state::StateHolder;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdminState {
    pub pending_providers: Vec<Profile>,
    pub reported_posts: Vec<Post>,
    pub loading: bool,
    pub error: Option<String>,
}

/// Moderation queues. Every action reloads both queues.
pub struct AdminViewModel {
    repo: AdminRepository,
    state: Arc<StateHolder<AdminState>>,
}

impl AdminViewModel {
    pub fn new(repo: AdminRepository) -> Self {
        Self {
            repo,
            state: Arc::new(StateHolder::default()),
        }
    }

    pub fn state(&self) -> AdminState {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<AdminState> {
        self.state.subscribe()
    }

    pub fn load(&self) {
        self.state.update(|s| s.loading = true);
        let pending = self.repo.pending_providers();
        let reported = self.repo.reported_posts();
        self.state.update(|s| {
            s.loading = false;
            match (pending, reported) {
                (Ok(pending), Ok(reported)) => {
                    s.pending_providers = pending;
                    s.reported_posts = reported;
                    s.error = None;
                }
                (Err(e), _) | (_, Err(e)) => s.error = Some(e.to_string()),
            }
        });
    }

    fn act(&self, action: impl FnOnce(&AdminRepository) -> anyhow::Result<()>) {
        match action(&self.repo) {
            Ok(()) => self.load(),
            Err(e) => self.state.update(|s| s.error = Some(e.to_string())),
        }
    }

    pub fn approve(&self, uid: &str) {
        self.act(|repo| repo.approve_provider(uid));
    }

    pub fn reject(&self, uid: &str) {
        self.act(|repo| repo.reject_provider(uid));
    }

    pub fn hide(&self, post_id: &str) {
        self.act(|repo| repo.set_hidden(post_id, true));
    }

    pub fn dismiss(&self, post_id: &str) {
        self.act(|repo| repo.dismiss_reports(post_id));
    }

    pub fn delete_post(&self, post_id: &str) {
        self.act(|repo| repo.delete_post(post_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use crate::repositories::SignUp;
    use crate::testing;

    #[test]
    fn queues_shrink_as_admin_acts() {
        let env = testing::env();
        let pending = env
            .app
            .auth()
            .sign_up(SignUp {
                name: "Bo".into(),
                email: "bo@example.com".into(),
                password: "password1".into(),
                role: Role::ServiceProvider,
                service_type: Some("tutoring".into()),
                ..Default::default()
            })
            .unwrap();
        env.admin("Root");
        let vm = AdminViewModel::new(env.app.admin());
        vm.load();
        assert_eq!(vm.state().pending_providers.len(), 1);
        vm.reject(&pending.uid);
        let state = vm.state();
        assert!(state.pending_providers.is_empty());
        assert!(state.error.is_none());
    }

    #[test]
    fn members_see_forbidden() {
        let env = testing::env();
        env.member("Ana");
        let vm = AdminViewModel::new(env.app.admin());
        vm.load();
        assert_eq!(vm.state().error.as_deref(), Some("forbidden"));
    }
}
