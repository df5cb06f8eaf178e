use std::sync::Arc;

use backend_api::{Backend, FieldUpdate};
use tempfile::TempDir;

use crate::config::Config;
use crate::model::{Profile, Role, USERS};
use crate::repositories::SignUp;
use crate::session::{Session, SignedIn};
use crate::App;

pub(crate) struct TestEnv {
    pub app: App,
    pub backend: Backend,
    pub session: Arc<Session>,
    _tmp: TempDir,
}

pub(crate) fn env() -> TestEnv {
    let tmp = tempfile::tempdir().unwrap();
    let config = Config::for_data_dir(tmp.path());
    let backend = docstore::open(&config.store_config()).unwrap();
    let session = Arc::new(Session::default());
    let app = App::with_backend(backend.clone(), session.clone(), config);
    TestEnv {
        app,
        backend,
        session,
        _tmp: tmp,
    }
}

impl TestEnv {
    /// Register an account and leave it signed in.
    pub fn member(&self, name: &str) -> Profile {
        self.app
            .auth()
            .sign_up(SignUp {
                name: name.into(),
                email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
                password: "password1".into(),
                neighbourhood: "Riverside".into(),
                ..Default::default()
            })
            .unwrap()
    }

    /// Register an approved provider and leave it signed in.
    pub fn provider(&self, name: &str, service: &str) -> Profile {
        self.app
            .auth()
            .sign_up(SignUp {
                name: name.into(),
                email: format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
                password: "password1".into(),
                role: Role::ServiceProvider,
                service_type: Some(service.into()),
                ..Default::default()
            })
            .unwrap();
        let uid = self.session.uid().unwrap();
        self.backend
            .store
            .update(USERS, &uid, vec![FieldUpdate::set("providerStatus", "approved")])
            .unwrap();
        let profile: Profile = self
            .backend
            .store
            .get(USERS, &uid)
            .unwrap()
            .unwrap()
            .decode()
            .unwrap();
        self.act_as(&profile);
        profile
    }

    /// Register an administrator and leave it signed in.
    pub fn admin(&self, name: &str) -> Profile {
        let profile = self.member(name);
        self.backend
            .store
            .update(USERS, &profile.uid, vec![FieldUpdate::set("role", "admin")])
            .unwrap();
        let admin = Profile {
            role: Role::Admin,
            ..profile
        };
        self.act_as(&admin);
        admin
    }

    /// Switch the session to another profile.
    pub fn act_as(&self, profile: &Profile) {
        self.session.set(SignedIn {
            profile: profile.clone(),
            token: String::new(),
        });
    }
}
