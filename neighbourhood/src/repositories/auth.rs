use std::sync::Arc;

use anyhow::Result;
use backend_api::{encode, now_millis, Backend, BackendError};
use email_address::EmailAddress;
use tracing::{error, info, warn};

use crate::config::Bootstrap;
use crate::model::{Profile, ProviderStatus, Role, USERS};
use crate::session::{Session, SignedIn};

use super::backend_code;

/// Registration details for a new account.
#[derive(Debug, Clone, Default)]
pub struct SignUp {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub neighbourhood: String,
    /// Required for service providers.
    pub service_type: Option<String>,
}

#[derive(Clone)]
pub struct AuthRepository {
    backend: Backend,
    session: Arc<Session>,
}

impl AuthRepository {
    pub fn new(backend: Backend, session: Arc<Session>) -> Self {
        Self { backend, session }
    }

    /// Create the auth account and its profile, then sign in.
    ///
    /// If the profile cannot be written the auth account is deleted again.
    pub fn sign_up(&self, form: SignUp) -> Result<Profile> {
        let name = form.name.trim().to_string();
        if name.is_empty() {
            anyhow::bail!("missing_name");
        }
        let email = form.email.trim().to_lowercase();
        if !EmailAddress::is_valid(&email) {
            anyhow::bail!("invalid_email");
        }
        let (provider_status, service_type) = match form.role {
            Role::Admin => anyhow::bail!("forbidden"),
            Role::Member => (ProviderStatus::NotApplicable, None),
            Role::ServiceProvider => {
                let service = form
                    .service_type
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| anyhow::anyhow!("missing_service_type"))?;
                (ProviderStatus::Pending, Some(service.to_string()))
            }
        };

        let account = self
            .backend
            .auth
            .create_user(&email, &form.password)
            .map_err(backend_code)?;
        let profile = Profile {
            uid: account.uid.clone(),
            name,
            email: account.email.clone(),
            role: form.role,
            neighbourhood: form.neighbourhood.trim().to_string(),
            service_type,
            provider_status,
            created_at: now_millis(),
            ..Default::default()
        };
        if let Err(e) = self.write_profile(&profile) {
            self.remove_account(&account.uid, &e);
            return Err(e);
        }
        info!(uid = %profile.uid, role = profile.role.as_str(), "member signed up");
        self.sign_in(&email, &form.password)
    }

    /// Undo an auth account whose profile could not be written.
    fn remove_account(&self, uid: &str, cause: &anyhow::Error) {
        warn!(uid = %uid, error = %cause, "profile write failed, removing auth account");
        if let Err(rollback) = self.backend.auth.delete_user(uid) {
            error!(uid = %uid, error = %rollback, "auth account rollback failed");
        }
    }

    fn write_profile(&self, profile: &Profile) -> Result<()> {
        self.backend
            .store
            .set(USERS, &profile.uid, encode(profile)?)?;
        Ok(())
    }

    fn load_profile(&self, uid: &str) -> Result<Profile> {
        let doc = self
            .backend
            .store
            .get(USERS, uid)?
            .ok_or_else(|| anyhow::anyhow!("profile_missing"))?;
        let profile: Profile = doc.decode()?;
        if profile.disabled {
            anyhow::bail!("account_disabled");
        }
        Ok(profile)
    }

    pub fn sign_in(&self, email: &str, password: &str) -> Result<Profile> {
        let auth = self
            .backend
            .auth
            .sign_in(email, password)
            .map_err(backend_code)?;
        let profile = self.load_profile(&auth.user.uid)?;
        self.session.set(SignedIn {
            profile: profile.clone(),
            token: auth.token,
        });
        info!(uid = %profile.uid, "signed in");
        Ok(profile)
    }

    /// Resume a session from a saved token. Stale tokens yield `None`.
    pub fn restore(&self, token: &str) -> Result<Option<Profile>> {
        let user = match self.backend.auth.verify_token(token) {
            Ok(user) => user,
            Err(BackendError::Unauthenticated) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let profile = self.load_profile(&user.uid)?;
        self.session.set(SignedIn {
            profile: profile.clone(),
            token: token.to_string(),
        });
        Ok(Some(profile))
    }

    pub fn sign_out(&self) {
        if let Some(uid) = self.session.uid() {
            info!(uid = %uid, "signed out");
        }
        self.session.clear();
    }

    /// Create the configured administrator on first run. Returns whether it was created.
    pub fn bootstrap_admin(&self, bootstrap: &Bootstrap) -> Result<bool> {
        let account = match self
            .backend
            .auth
            .create_user(&bootstrap.email, &bootstrap.password)
        {
            Ok(account) => account,
            Err(BackendError::AlreadyExists(_)) => return Ok(false),
            Err(e) => return Err(backend_code(e)),
        };
        let profile = Profile {
            uid: account.uid.clone(),
            name: bootstrap.name.clone(),
            email: account.email,
            role: Role::Admin,
            created_at: now_millis(),
            ..Default::default()
        };
        if let Err(e) = self.write_profile(&profile) {
            self.remove_account(&account.uid, &e);
            return Err(e);
        }
        info!(uid = %profile.uid, "bootstrap admin created");
        Ok(true)
    }
}
