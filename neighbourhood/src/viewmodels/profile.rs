use std::sync::Arc;

use tokio::sync::watch;

use crate::model::Profile;
use crate::repositories::{ProfileRepository, ProfileUpdate};

use super::state::StateHolder;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileState {
    pub profile: Option<Profile>,
    pub providers: Vec<Profile>,
    pub saving: bool,
    pub error: Option<String>,
}

pub struct ProfileViewModel {
    repo: ProfileRepository,
    state: Arc<StateHolder<ProfileState>>,
}

impl ProfileViewModel {
    pub fn new(repo: ProfileRepository) -> Self {
        Self {
            repo,
            state: Arc::new(StateHolder::default()),
        }
    }

    pub fn state(&self) -> ProfileState {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProfileState> {
        self.state.subscribe()
    }

    pub fn load(&self, uid: &str) {
        match self.repo.get(uid) {
            Ok(Some(profile)) => self.state.update(|s| {
                s.profile = Some(profile);
                s.error = None;
            }),
            Ok(None) => self.state.update(|s| s.error = Some("not_found".into())),
            Err(e) => self.state.update(|s| s.error = Some(e.to_string())),
        }
    }

    fn save(&self, action: impl FnOnce(&ProfileRepository) -> anyhow::Result<Profile>) {
        self.state.update(|s| s.saving = true);
        let result = action(&self.repo);
        self.state.update(|s| {
            s.saving = false;
            match result {
                Ok(profile) => {
                    s.profile = Some(profile);
                    s.error = None;
                }
                Err(e) => s.error = Some(e.to_string()),
            }
        });
    }

    pub fn update(&self, changes: ProfileUpdate) {
        self.save(|repo| repo.update(changes));
    }

    pub fn upload_photo(&self, data: &[u8]) {
        self.save(|repo| repo.upload_photo(data));
    }

    pub fn load_providers(&self, service_type: Option<&str>) {
        match self.repo.providers(service_type) {
            Ok(providers) => self.state.update(|s| s.providers = providers),
            Err(e) => self.state.update(|s| s.error = Some(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn edit_and_validation_errors() {
        let env = testing::env();
        let ana = env.member("Ana");
        let vm = ProfileViewModel::new(env.app.profiles());
        vm.load(&ana.uid);
        vm.update(ProfileUpdate {
            neighbourhood: Some("Hillside".into()),
            ..Default::default()
        });
        assert_eq!(vm.state().profile.unwrap().neighbourhood, "Hillside");
        vm.update(ProfileUpdate {
            name: Some("   ".into()),
            ..Default::default()
        });
        let state = vm.state();
        assert_eq!(state.error.as_deref(), Some("missing_name"));
        assert!(!state.saving);
        vm.upload_photo(b"definitely not a picture");
        assert_eq!(vm.state().error.as_deref(), Some("not_an_image"));
    }

    #[test]
    fn lists_providers() {
        let env = testing::env();
        env.provider("Bo", "plumbing");
        let vm = ProfileViewModel::new(env.app.profiles());
        vm.load_providers(Some("plumbing"));
        assert_eq!(vm.state().providers.len(), 1);
        vm.load_providers(Some("baking"));
        assert!(vm.state().providers.is_empty());
    }
}
