use std::sync::Arc;

use tokio::sync::watch;

use crate::model::ChatThread;
use crate::repositories::ChatRepository;
use crate::session::Session;

use super::state::{ListenerHandle, StateHolder};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatListState {
    pub threads: Vec<ChatThread>,
    pub total_unread: i64,
    pub loading: bool,
    pub error: Option<String>,
}

pub struct ChatListViewModel {
    chat: ChatRepository,
    session: Arc<Session>,
    state: Arc<StateHolder<ChatListState>>,
}

fn apply(
    state: &StateHolder<ChatListState>,
    uid: Option<String>,
    threads: anyhow::Result<Vec<ChatThread>>,
) {
    state.update(|s| {
        s.loading = false;
        match threads {
            Ok(threads) => {
                s.total_unread = uid
                    .map(|uid| threads.iter().map(|t| t.unread_for(&uid)).sum::<i64>())
                    .unwrap_or(0);
                s.threads = threads;
                s.error = None;
            }
            Err(e) => s.error = Some(e.to_string()),
        }
    });
}

impl ChatListViewModel {
    pub fn new(chat: ChatRepository, session: Arc<Session>) -> Self {
        Self {
            chat,
            session,
            state: Arc::new(StateHolder::default()),
        }
    }

    pub fn state(&self) -> ChatListState {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatListState> {
        self.state.subscribe()
    }

    pub fn load(&self) {
        self.state.update(|s| s.loading = true);
        apply(&self.state, self.session.uid(), self.chat.threads());
    }

    /// Re-read threads whenever one of them changes.
    pub fn listen(&self) -> anyhow::Result<ListenerHandle> {
        let mut sub = self.chat.listen_threads()?;
        let chat = self.chat.clone();
        let session = self.session.clone();
        let state = self.state.clone();
        Ok(ListenerHandle::new(tokio::spawn(async move {
            while sub.next().await.is_some() {
                apply(&state, session.uid(), chat.threads());
            }
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use std::time::Duration;

    #[tokio::test]
    async fn unread_totals_follow_new_messages() {
        let env = testing::env();
        let bo = env.member("Bo");
        let ana = env.member("Ana");
        let thread = env.app.chat().get_or_create_thread(&bo.uid).unwrap();

        env.act_as(&bo);
        let vm = ChatListViewModel::new(env.app.chat(), env.session.clone());
        vm.load();
        assert_eq!(vm.state().threads.len(), 1);
        assert_eq!(vm.state().total_unread, 0);
        let mut rx = vm.subscribe();
        let _handle = vm.listen().unwrap();

        // a second session writes as Ana while the list listens as Bo
        let ana_session = Arc::new(Session::default());
        ana_session.set(crate::session::SignedIn {
            profile: ana,
            token: String::new(),
        });
        let ana_chat = ChatRepository::new(env.backend.store.clone(), ana_session);
        ana_chat.send_message(&thread.id, "hello").unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                rx.changed().await.unwrap();
                if rx.borrow().total_unread == 1 {
                    break;
                }
            }
        })
        .await
        .unwrap();
    }
}
