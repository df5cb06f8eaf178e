use std::sync::Arc;

use tokio::sync::watch;

use crate::model::{RequestStatus, ServiceRequest};
use crate::repositories::{NewRequest, RequestsRepository};

use super::state::{ListenerHandle, StateHolder};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestsState {
    pub requests: Vec<ServiceRequest>,
    pub loading: bool,
    pub error: Option<String>,
}

pub struct RequestsViewModel {
    repo: RequestsRepository,
    state: Arc<StateHolder<RequestsState>>,
}

fn apply(state: &StateHolder<RequestsState>, result: anyhow::Result<Vec<ServiceRequest>>) {
    state.update(|s| {
        s.loading = false;
        match result {
            Ok(requests) => {
                s.requests = requests;
                s.error = None;
            }
            Err(e) => s.error = Some(e.to_string()),
        }
    });
}

impl RequestsViewModel {
    pub fn new(repo: RequestsRepository) -> Self {
        Self {
            repo,
            state: Arc::new(StateHolder::default()),
        }
    }

    pub fn state(&self) -> RequestsState {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<RequestsState> {
        self.state.subscribe()
    }

    pub fn load(&self) {
        self.state.update(|s| s.loading = true);
        apply(&self.state, self.repo.mine());
    }

    pub fn create(&self, new: NewRequest) -> Option<ServiceRequest> {
        match self.repo.create(new) {
            Ok(request) => {
                self.load();
                Some(request)
            }
            Err(e) => {
                self.state.update(|s| s.error = Some(e.to_string()));
                None
            }
        }
    }

    pub fn update_status(&self, id: &str, status: RequestStatus) {
        match self.repo.update_status(id, status) {
            Ok(updated) => self.state.update(|s| {
                if let Some(slot) = s.requests.iter_mut().find(|r| r.id == updated.id) {
                    *slot = updated;
                }
                s.error = None;
            }),
            Err(e) => self.state.update(|s| s.error = Some(e.to_string())),
        }
    }

    pub fn listen(&self) -> anyhow::Result<ListenerHandle> {
        let mut sub = self.repo.listen()?;
        let repo = self.repo.clone();
        let state = self.state.clone();
        Ok(ListenerHandle::new(tokio::spawn(async move {
            while sub.next().await.is_some() {
                apply(&state, repo.mine());
            }
        })))
    }
}
