use std::sync::Arc;

use anyhow::Result;
use backend_api::{Backend, Direction, FieldUpdate, Filter, Query};
use tracing::info;

use crate::media::{self, PROFILE_PHOTOS};
use crate::model::{Profile, Role, USERS};
use crate::session::Session;

use super::decode_all;

/// Editable profile fields; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub bio: Option<String>,
    pub neighbourhood: Option<String>,
    pub service_type: Option<String>,
}

#[derive(Clone)]
pub struct ProfileRepository {
    backend: Backend,
    session: Arc<Session>,
    max_image_bytes: usize,
}

impl ProfileRepository {
    pub fn new(backend: Backend, session: Arc<Session>, max_image_bytes: usize) -> Self {
        Self {
            backend,
            session,
            max_image_bytes,
        }
    }

    pub fn get(&self, uid: &str) -> Result<Option<Profile>> {
        match self.backend.store.get(USERS, uid)? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    fn reload_current(&self, uid: &str) -> Result<Profile> {
        let profile = self
            .get(uid)?
            .ok_or_else(|| anyhow::anyhow!("profile_missing"))?;
        self.session.refresh_profile(profile.clone());
        Ok(profile)
    }

    /// Update the signed-in user's own profile.
    pub fn update(&self, changes: ProfileUpdate) -> Result<Profile> {
        let me = self.session.require()?;
        let mut updates = Vec::new();
        if let Some(name) = changes.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                anyhow::bail!("missing_name");
            }
            updates.push(FieldUpdate::set("name", name));
        }
        if let Some(bio) = changes.bio {
            updates.push(FieldUpdate::set("bio", bio.trim()));
        }
        if let Some(neighbourhood) = changes.neighbourhood {
            updates.push(FieldUpdate::set("neighbourhood", neighbourhood.trim()));
        }
        if let Some(service) = changes.service_type {
            if me.role != Role::ServiceProvider {
                anyhow::bail!("forbidden");
            }
            updates.push(FieldUpdate::set("serviceType", service.trim()));
        }
        if !updates.is_empty() {
            self.backend.store.update(USERS, &me.uid, updates)?;
        }
        self.reload_current(&me.uid)
    }

    pub fn upload_photo(&self, data: &[u8]) -> Result<Profile> {
        let me = self.session.require()?;
        let object = media::upload_image(
            self.backend.storage.as_ref(),
            PROFILE_PHOTOS,
            data,
            self.max_image_bytes,
        )?;
        self.backend.store.update(
            USERS,
            &me.uid,
            vec![FieldUpdate::set("photoUrl", object.url.clone())],
        )?;
        info!(uid = %me.uid, object = %object.id, "profile photo updated");
        self.reload_current(&me.uid)
    }

    /// Approved, enabled providers by name, optionally for one service type.
    pub fn providers(&self, service_type: Option<&str>) -> Result<Vec<Profile>> {
        let mut query = Query::collection(USERS)
            .filter(Filter::eq("role", Role::ServiceProvider.as_str()))
            .filter(Filter::eq("providerStatus", "approved"))
            .order_by("name", Direction::Ascending);
        if let Some(service) = service_type {
            query = query.filter(Filter::eq("serviceType", service));
        }
        let docs = self.backend.store.query(&query)?;
        let providers: Vec<Profile> = decode_all(&docs)?;
        Ok(providers.into_iter().filter(|p| !p.disabled).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 1, 2, 3];

    #[test]
    fn update_own_profile() {
        let env = testing::env();
        env.member("Ana");
        let repo = env.app.profiles();
        let updated = repo
            .update(ProfileUpdate {
                bio: Some("  gardener ".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(updated.bio, "gardener");
        assert_eq!(env.session.profile().unwrap().bio, "gardener");
        assert!(repo
            .update(ProfileUpdate {
                service_type: Some("x".into()),
                ..Default::default()
            })
            .is_err());
    }

    #[test]
    fn photo_upload_sets_url() {
        let env = testing::env();
        env.member("Ana");
        let repo = env.app.profiles();
        let profile = repo.upload_photo(PNG).unwrap();
        let url = profile.photo_url.unwrap();
        assert!(url.contains("/objects/"));
        assert_eq!(
            repo.upload_photo(b"not an image").unwrap_err().to_string(),
            "not_an_image"
        );
    }

    #[test]
    fn only_approved_providers_are_listed() {
        let env = testing::env();
        env.provider("Bo", "plumbing");
        env.provider("Al", "gardening");
        env.member("Cy");
        let repo = env.app.profiles();
        let names: Vec<_> = repo
            .providers(None)
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, ["Al", "Bo"]);
        assert_eq!(repo.providers(Some("plumbing")).unwrap().len(), 1);
    }
}
