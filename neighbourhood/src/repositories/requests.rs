use std::sync::Arc;

use anyhow::Result;
use backend_api::{
    encode, now_millis, run_transaction, BackendError, Direction, DocumentStore, FieldUpdate,
    Filter, Query, Subscription,
};
use tracing::{info, warn};

use crate::model::{Profile, RequestStatus, Role, ServiceRequest, SERVICE_REQUESTS, USERS};
use crate::session::Session;

use super::{chat_id, decode_all, ChatRepository};

#[derive(Debug, Clone, Default)]
pub struct NewRequest {
    pub provider_id: String,
    /// Defaults to the provider's service type.
    pub service_type: Option<String>,
    pub description: String,
}

/// Which side of a request a user is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Party {
    Member,
    Provider,
}

/// Validate a status change. Completed and cancelled are final; the provider drives
/// the request forward and either side may cancel.
fn check_transition(from: RequestStatus, to: RequestStatus, party: Party) -> Result<()> {
    use RequestStatus::*;
    if from.is_terminal() || from == to {
        anyhow::bail!("invalid_transition");
    }
    let provider_only = match (from, to) {
        (Pending, Accepted) | (Accepted, InProgress) | (InProgress, Completed) => true,
        (_, Cancelled) => false,
        _ => anyhow::bail!("invalid_transition"),
    };
    if provider_only && party != Party::Provider {
        anyhow::bail!("forbidden");
    }
    Ok(())
}

#[derive(Clone)]
pub struct RequestsRepository {
    store: Arc<dyn DocumentStore>,
    session: Arc<Session>,
    chat: ChatRepository,
}

impl RequestsRepository {
    pub fn new(store: Arc<dyn DocumentStore>, session: Arc<Session>, chat: ChatRepository) -> Self {
        Self {
            store,
            session,
            chat,
        }
    }

    pub fn get(&self, id: &str) -> Result<Option<ServiceRequest>> {
        match self.store.get(SERVICE_REQUESTS, id)? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// File a pending request with an approved provider.
    pub fn create(&self, new: NewRequest) -> Result<ServiceRequest> {
        let me = self.session.require()?;
        let description = new.description.trim().to_string();
        if description.is_empty() {
            anyhow::bail!("empty_description");
        }
        if new.provider_id == me.uid {
            anyhow::bail!("invalid_participant");
        }
        let provider: Profile = self
            .store
            .get(USERS, &new.provider_id)?
            .ok_or_else(|| anyhow::anyhow!("provider_unavailable"))?
            .decode()?;
        if !provider.is_approved_provider() || provider.disabled {
            anyhow::bail!("provider_unavailable");
        }
        let service_type = new
            .service_type
            .filter(|s| !s.trim().is_empty())
            .or_else(|| provider.service_type.clone())
            .unwrap_or_default();
        let now = now_millis();
        let mut request = ServiceRequest {
            id: String::new(),
            member_id: me.uid.clone(),
            member_name: me.name.clone(),
            provider_id: provider.uid.clone(),
            provider_name: provider.name.clone(),
            service_type,
            description,
            status: RequestStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        request.id = self.store.add(SERVICE_REQUESTS, encode(&request)?)?;
        info!(request = %request.id, provider = %provider.uid, "service request created");
        self.notify(&request, &me.uid, &format!("New request: {}", request.description));
        Ok(request)
    }

    fn mine_query(&self, me: &Profile) -> Query {
        let field = if me.role == Role::ServiceProvider {
            "providerId"
        } else {
            "memberId"
        };
        Query::collection(SERVICE_REQUESTS)
            .filter(Filter::eq(field, me.uid.as_str()))
            .order_by("createdAt", Direction::Descending)
    }

    /// Requests the signed-in user filed (members) or received (providers).
    pub fn mine(&self) -> Result<Vec<ServiceRequest>> {
        let me = self.session.require()?;
        let docs = self.store.query(&self.mine_query(&me))?;
        decode_all(&docs)
    }

    pub fn listen(&self) -> Result<Subscription> {
        let me = self.session.require()?;
        Ok(self.store.subscribe(self.mine_query(&me)))
    }

    pub fn update_status(&self, id: &str, to: RequestStatus) -> Result<ServiceRequest> {
        let me = self.session.require()?;
        let updated = run_transaction(self.store.as_ref(), |tx| {
            let mut request: ServiceRequest = tx
                .get(SERVICE_REQUESTS, id)?
                .ok_or_else(|| BackendError::not_found(SERVICE_REQUESTS, id))?
                .decode()?;
            let party = if request.provider_id == me.uid {
                Party::Provider
            } else if request.member_id == me.uid {
                Party::Member
            } else {
                return Err(BackendError::PermissionDenied("forbidden".into()));
            };
            check_transition(request.status, to, party)
                .map_err(|e| BackendError::Aborted(e.to_string()))?;
            let now = now_millis();
            tx.update(
                SERVICE_REQUESTS,
                id,
                vec![
                    FieldUpdate::set("status", to.as_str()),
                    FieldUpdate::set("updatedAt", now),
                ],
            );
            request.status = to;
            request.updated_at = now;
            Ok(request)
        })
        .map_err(|e| match e {
            BackendError::Aborted(code) | BackendError::PermissionDenied(code) => {
                anyhow::anyhow!(code)
            }
            BackendError::NotFound { .. } => anyhow::anyhow!("not_found"),
            other => other.into(),
        })?;
        info!(request = %id, status = to.as_str(), by = %me.uid, "request status changed");
        self.notify(
            &updated,
            &me.uid,
            &format!("Request \"{}\" is now {}", updated.service_type, to.as_str()),
        );
        Ok(updated)
    }

    /// Post a system message into the member/provider thread. Failures are logged only.
    fn notify(&self, request: &ServiceRequest, actor: &str, text: &str) {
        let other = if actor == request.member_id {
            &request.provider_id
        } else {
            &request.member_id
        };
        let result = self
            .chat
            .get_or_create_thread(other)
            .and_then(|thread| self.chat.send_system_message(&thread, actor, text));
        if let Err(e) = result {
            warn!(
                chat = %chat_id(&request.member_id, &request.provider_id),
                error = %e,
                "system message not delivered"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn transition_rules() {
        use RequestStatus::*;
        assert!(check_transition(Pending, Accepted, Party::Provider).is_ok());
        assert_eq!(
            check_transition(Pending, Accepted, Party::Member)
                .unwrap_err()
                .to_string(),
            "forbidden"
        );
        assert!(check_transition(Accepted, Cancelled, Party::Member).is_ok());
        assert!(check_transition(Pending, Completed, Party::Provider).is_err());
        for terminal in [Completed, Cancelled] {
            for to in [Pending, Accepted, InProgress, Completed, Cancelled] {
                assert!(check_transition(terminal, to, Party::Provider).is_err());
            }
        }
    }

    fn setup() -> (testing::TestEnv, Profile, Profile, ServiceRequest) {
        let env = testing::env();
        let provider = env.provider("Bo", "plumbing");
        let member = env.member("Ana");
        let request = env
            .app
            .requests()
            .create(NewRequest {
                provider_id: provider.uid.clone(),
                description: "leaky tap".into(),
                ..Default::default()
            })
            .unwrap();
        (env, member, provider, request)
    }

    #[test]
    fn create_posts_system_message() {
        let (env, member, provider, request) = setup();
        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(request.service_type, "plumbing");
        let chat = env.app.chat();
        let messages = chat.messages(&chat_id(&member.uid, &provider.uid)).unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].system);
        assert_eq!(env.app.requests().mine().unwrap().len(), 1);
        env.act_as(&provider);
        assert_eq!(env.app.requests().mine().unwrap()[0].id, request.id);
    }

    #[test]
    fn lifecycle_until_terminal() {
        let (env, member, provider, request) = setup();
        let repo = env.app.requests();
        assert_eq!(
            repo.update_status(&request.id, RequestStatus::Accepted)
                .unwrap_err()
                .to_string(),
            "forbidden"
        );
        env.act_as(&provider);
        repo.update_status(&request.id, RequestStatus::Accepted).unwrap();
        repo.update_status(&request.id, RequestStatus::InProgress).unwrap();
        let done = repo.update_status(&request.id, RequestStatus::Completed).unwrap();
        assert_eq!(done.status, RequestStatus::Completed);
        env.act_as(&member);
        assert_eq!(
            repo.update_status(&request.id, RequestStatus::Cancelled)
                .unwrap_err()
                .to_string(),
            "invalid_transition"
        );
        assert_eq!(
            repo.get(&request.id).unwrap().unwrap().status,
            RequestStatus::Completed
        );
    }

    #[test]
    fn unapproved_providers_are_refused() {
        let env = testing::env();
        env.member("NotAProvider");
        let target = env.session.uid().unwrap();
        env.member("Ana");
        let err = env
            .app
            .requests()
            .create(NewRequest {
                provider_id: target,
                description: "help".into(),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "provider_unavailable");
    }

    #[test]
    fn outsiders_cannot_change_status() {
        let (env, _member, _provider, request) = setup();
        env.member("Eve");
        assert_eq!(
            env.app
                .requests()
                .update_status(&request.id, RequestStatus::Cancelled)
                .unwrap_err()
                .to_string(),
            "forbidden"
        );
    }
}
