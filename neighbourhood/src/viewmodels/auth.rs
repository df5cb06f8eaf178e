use std::sync::Arc;

use tokio::sync::watch;

use crate::model::Profile;
use crate::repositories::{AuthRepository, SignUp};

use super::state::StateHolder;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthState {
    pub profile: Option<Profile>,
    pub loading: bool,
    pub error: Option<String>,
}

pub struct AuthViewModel {
    repo: AuthRepository,
    state: Arc<StateHolder<AuthState>>,
}

impl AuthViewModel {
    pub fn new(repo: AuthRepository) -> Self {
        Self {
            repo,
            state: Arc::new(StateHolder::default()),
        }
    }

    pub fn state(&self) -> AuthState {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state.subscribe()
    }

    fn run(&self, action: impl FnOnce(&AuthRepository) -> anyhow::Result<Option<Profile>>) -> bool {
        self.state.update(|s| {
            s.loading = true;
            s.error = None;
        });
        let result = action(&self.repo);
        let ok = result.is_ok();
        self.state.update(|s| {
            s.loading = false;
            match result {
                Ok(profile) => s.profile = profile,
                Err(e) => s.error = Some(e.to_string()),
            }
        });
        ok
    }

    pub fn sign_up(&self, form: SignUp) -> bool {
        self.run(|repo| repo.sign_up(form).map(Some))
    }

    pub fn sign_in(&self, email: &str, password: &str) -> bool {
        self.run(|repo| repo.sign_in(email, password).map(Some))
    }

    /// Resume from a saved token; a stale token leaves the user signed out.
    pub fn restore(&self, token: &str) -> bool {
        self.run(|repo| repo.restore(token)) && self.state.get().profile.is_some()
    }

    pub fn sign_out(&self) {
        self.repo.sign_out();
        self.state.update(|s| *s = AuthState::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn sign_in_failure_sets_error() {
        let env = testing::env();
        let vm = AuthViewModel::new(env.app.auth());
        assert!(!vm.sign_in("nobody@example.com", "whatever"));
        let state = vm.state();
        assert_eq!(state.error.as_deref(), Some("invalid_credentials"));
        assert!(!state.loading);
        assert!(state.profile.is_none());
    }

    #[test]
    fn sign_up_then_out() {
        let env = testing::env();
        let vm = AuthViewModel::new(env.app.auth());
        assert!(vm.sign_up(SignUp {
            name: "Ana".into(),
            email: "ana@example.com".into(),
            password: "password1".into(),
            ..Default::default()
        }));
        assert_eq!(vm.state().profile.unwrap().name, "Ana");
        vm.sign_out();
        assert_eq!(vm.state(), AuthState::default());
        assert!(env.session.current().is_none());
    }
}
