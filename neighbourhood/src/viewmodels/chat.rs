use std::sync::Arc;
use std::time::Duration;

use backend_api::{ChangeKind, Document};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::model::{ChatMessage, ChatThread};
use crate::repositories::ChatRepository;
use crate::session::Session;
use crate::typing::TypingTracker;

use super::state::{ListenerHandle, StateHolder};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    pub thread: Option<ChatThread>,
    pub messages: Vec<ChatMessage>,
    pub input: String,
    /// Names of the other participants currently typing.
    pub typing_names: Vec<String>,
    pub sending: bool,
    pub error: Option<String>,
}

fn typing_names(thread: &ChatThread, me: Option<&str>) -> Vec<String> {
    thread
        .typing_users
        .iter()
        .filter(|uid| Some(uid.as_str()) != me)
        .map(|uid| thread.name_of(uid))
        .collect()
}

fn upsert_message(messages: &mut Vec<ChatMessage>, message: ChatMessage) {
    match messages.iter_mut().find(|m| m.id == message.id) {
        Some(existing) => *existing = message,
        None => {
            messages.push(message);
            messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        }
    }
}

/// One open conversation: messages, composer input and typing indicators.
pub struct ChatViewModel {
    chat_id: String,
    chat: ChatRepository,
    session: Arc<Session>,
    typing: Arc<TypingTracker>,
    typing_timeout: Duration,
    state: Arc<StateHolder<ChatState>>,
}

impl ChatViewModel {
    pub fn new(
        chat_id: &str,
        chat: ChatRepository,
        session: Arc<Session>,
        typing: Arc<TypingTracker>,
        typing_timeout: Duration,
    ) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            chat,
            session,
            typing,
            typing_timeout,
            state: Arc::new(StateHolder::default()),
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn state(&self) -> ChatState {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatState> {
        self.state.subscribe()
    }

    fn fail(&self, err: anyhow::Error) {
        self.state.update(|s| s.error = Some(err.to_string()));
    }

    /// Load the thread and its history, then mark it read.
    pub fn open(&self) {
        let loaded = self
            .chat
            .thread(&self.chat_id)
            .and_then(|t| t.ok_or_else(|| anyhow::anyhow!("chat_not_found")))
            .and_then(|thread| Ok((thread, self.chat.messages(&self.chat_id)?)));
        let (thread, messages) = match loaded {
            Ok(loaded) => loaded,
            Err(e) => return self.fail(e),
        };
        if let Err(e) = self.chat.mark_read(&self.chat_id) {
            warn!(chat = %self.chat_id, error = %e, "mark read failed");
        }
        let me = self.session.uid();
        self.state.update(|s| {
            s.typing_names = typing_names(&thread, me.as_deref());
            s.thread = Some(thread);
            s.messages = messages;
            s.error = None;
        });
    }

    /// Send the composer text. Blank input does nothing.
    pub fn send(&self) {
        let text = self.state.get().input;
        if text.trim().is_empty() {
            return;
        }
        self.state.update(|s| s.sending = true);
        let result = self.chat.send_message(&self.chat_id, &text);
        if let Some(uid) = self.session.uid() {
            // the send batch already removed us from typingUsers
            self.typing.stop(&uid, &self.chat_id);
        }
        self.state.update(|s| {
            s.sending = false;
            match result {
                Ok(Some(message)) => {
                    upsert_message(&mut s.messages, message);
                    s.input.clear();
                    s.error = None;
                }
                Ok(None) => {}
                Err(e) => s.error = Some(e.to_string()),
            }
        });
    }

    /// Track composer edits: flag typing at most once per debounce window and clear it
    /// after the idle timeout or when the input goes blank.
    pub fn on_input_changed(&self, text: &str) {
        self.state.update(|s| s.input = text.to_string());
        let Some(uid) = self.session.uid() else {
            return;
        };
        if text.trim().is_empty() {
            if self.typing.stop(&uid, &self.chat_id) {
                if let Err(e) = self.chat.set_typing(&self.chat_id, false) {
                    self.fail(e);
                }
            }
            return;
        }
        let keystroke = self.typing.typing(&uid, &self.chat_id);
        if keystroke.write_flag {
            if let Err(e) = self.chat.set_typing(&self.chat_id, true) {
                return self.fail(e);
            }
        }
        let chat = self.chat.clone();
        let typing = self.typing.clone();
        let chat_id = self.chat_id.clone();
        let timeout = self.typing_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if typing.is_idle_since(&uid, &chat_id, keystroke.generation)
                && typing.stop(&uid, &chat_id)
            {
                debug!(chat = %chat_id, "typing timed out");
                if let Err(e) = chat.set_typing(&chat_id, false) {
                    warn!(chat = %chat_id, error = %e, "clearing typing flag failed");
                }
            }
        });
    }

    /// Follow new messages and thread updates while the handle lives.
    pub fn listen(&self) -> anyhow::Result<ListenerHandle> {
        let mut messages = self.chat.listen_messages(&self.chat_id)?;
        let mut threads = self.chat.listen_threads()?;
        let chat = self.chat.clone();
        let session = self.session.clone();
        let state = self.state.clone();
        let chat_id = self.chat_id.clone();
        Ok(ListenerHandle::new(tokio::spawn(async move {
            loop {
                tokio::select! {
                    change = messages.next() => {
                        let change = match change {
                            Some(Ok(change)) => change,
                            Some(Err(lagged)) => {
                                warn!(chat = %chat_id, missed = lagged.missed, "message listener lagged, reloading");
                                resync_messages(&chat, &state, &chat_id);
                                continue;
                            }
                            None => break,
                        };
                        let message: ChatMessage = match change.document.decode() {
                            Ok(m) => m,
                            Err(e) => {
                                warn!(error = %e, "undecodable message");
                                continue;
                            }
                        };
                        if change.kind == ChangeKind::Removed {
                            state.update(|s| s.messages.retain(|m| m.id != message.id));
                            continue;
                        }
                        // snapshots queued before a reload are older than what it fetched
                        if change.kind == ChangeKind::Added
                            && state.get().messages.iter().any(|m| m.id == message.id)
                        {
                            continue;
                        }
                        let me = session.uid();
                        let incoming = me.as_deref().map_or(false, |me| {
                            message.sender_id != me && !message.read_by.contains(me)
                        });
                        if change.kind == ChangeKind::Added && incoming {
                            if let Err(e) = chat.mark_delivered(&chat_id, &[message.id.clone()]) {
                                warn!(error = %e, "mark delivered failed");
                            }
                            if let Err(e) = chat.mark_read(&chat_id) {
                                warn!(error = %e, "mark read failed");
                            }
                        }
                        state.update(|s| upsert_message(&mut s.messages, message));
                    }
                    change = threads.next() => {
                        match change {
                            Some(Ok(change)) if change.document.id == chat_id => {
                                apply_thread(&state, &change.document, session.uid().as_deref());
                            }
                            Some(Ok(_)) => {}
                            Some(Err(_)) => match chat.thread(&chat_id) {
                                Ok(Some(thread)) => state.update(|s| {
                                    s.typing_names = typing_names(&thread, session.uid().as_deref());
                                    s.thread = Some(thread);
                                }),
                                Ok(None) => {}
                                Err(e) => warn!(chat = %chat_id, error = %e, "thread reload failed"),
                            },
                            None => break,
                        }
                    }
                }
            }
        })))
    }
}

/// Replace the message list with the stored history after missed changes.
fn resync_messages(chat: &ChatRepository, state: &StateHolder<ChatState>, chat_id: &str) {
    if let Err(e) = chat.mark_read(chat_id) {
        warn!(chat = %chat_id, error = %e, "mark read failed");
    }
    match chat.messages(chat_id) {
        Ok(messages) => state.update(|s| s.messages = messages),
        Err(e) => state.update(|s| s.error = Some(e.to_string())),
    }
}

fn apply_thread(state: &StateHolder<ChatState>, doc: &Document, me: Option<&str>) {
    match doc.decode::<ChatThread>() {
        Ok(thread) => state.update(|s| {
            s.typing_names = typing_names(&thread, me);
            s.thread = Some(thread);
        }),
        Err(e) => warn!(error = %e, "undecodable thread"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Profile;
    use crate::session::SignedIn;
    use crate::testing;

    struct Pair {
        env: testing::TestEnv,
        ana: Profile,
        bo: Profile,
        thread: ChatThread,
    }

    fn pair() -> Pair {
        let env = testing::env();
        let bo = env.member("Bo");
        let ana = env.member("Ana");
        let thread = env.app.chat().get_or_create_thread(&bo.uid).unwrap();
        Pair {
            env,
            ana,
            bo,
            thread,
        }
    }

    fn vm(p: &Pair, debounce: Duration, timeout: Duration) -> ChatViewModel {
        ChatViewModel::new(
            &p.thread.id,
            p.env.app.chat(),
            p.env.session.clone(),
            Arc::new(TypingTracker::new(debounce)),
            timeout,
        )
    }

    /// Repository acting as `profile` through its own session.
    fn chat_as(p: &Pair, profile: &Profile) -> ChatRepository {
        let session = Arc::new(Session::default());
        session.set(SignedIn {
            profile: profile.clone(),
            token: String::new(),
        });
        ChatRepository::new(p.env.backend.store.clone(), session)
    }

    #[tokio::test]
    async fn blank_send_is_a_noop() {
        let p = pair();
        let vm = vm(&p, Duration::from_secs(1), Duration::from_secs(3));
        vm.open();
        vm.on_input_changed("   ");
        vm.send();
        assert!(vm.state().messages.is_empty());
        assert!(p.env.app.chat().messages(&p.thread.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_appends_and_clears_input() {
        let p = pair();
        let vm = vm(&p, Duration::from_secs(1), Duration::from_secs(3));
        vm.open();
        vm.on_input_changed("hello bo");
        vm.send();
        let state = vm.state();
        assert_eq!(state.messages.len(), 1);
        assert!(state.input.is_empty());
        let thread = p.env.app.chat().thread(&p.thread.id).unwrap().unwrap();
        assert_eq!(thread.unread_for(&p.bo.uid), 1);
        assert!(thread.typing_users.is_empty());
    }

    #[tokio::test]
    async fn typing_flag_is_debounced_and_times_out() {
        let p = pair();
        let vm = vm(&p, Duration::from_secs(1), Duration::from_millis(100));
        vm.open();
        let mut sub = p.env.app.chat().listen_threads().unwrap();
        vm.on_input_changed("h");
        vm.on_input_changed("he");
        vm.on_input_changed("hel");
        let thread = p.env.app.chat().thread(&p.thread.id).unwrap().unwrap();
        assert!(thread.typing_users.contains(&p.ana.uid));

        // one write for the flag, one for the timeout clear
        let first = sub.next().await.unwrap().unwrap();
        let flagged: ChatThread = first.document.decode().unwrap();
        assert!(flagged.typing_users.contains(&p.ana.uid));
        let second = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let cleared: ChatThread = second.document.decode().unwrap();
        assert!(cleared.typing_users.is_empty());
    }

    #[tokio::test]
    async fn blank_input_clears_typing() {
        let p = pair();
        let vm = vm(&p, Duration::from_secs(1), Duration::from_secs(30));
        vm.on_input_changed("x");
        vm.on_input_changed("");
        let thread = p.env.app.chat().thread(&p.thread.id).unwrap().unwrap();
        assert!(thread.typing_users.is_empty());
    }

    #[tokio::test]
    async fn listener_receives_and_reads_incoming() {
        let p = pair();
        let vm = vm(&p, Duration::from_secs(1), Duration::from_secs(3));
        vm.open();
        let mut rx = vm.subscribe();
        let _handle = vm.listen().unwrap();

        let bo_chat = chat_as(&p, &p.bo);
        bo_chat.set_typing(&p.thread.id, true).unwrap();
        bo_chat.send_message(&p.thread.id, "hi ana").unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                rx.changed().await.unwrap();
                if rx.borrow().messages.len() == 1 {
                    break;
                }
            }
        })
        .await
        .unwrap();

        // the listener marks the message read, resetting Ana's unread count
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let thread = p.env.app.chat().thread(&p.thread.id).unwrap().unwrap();
                if thread.unread_for(&p.ana.uid) == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn burst_past_the_feed_buffer_reloads_history() {
        let p = pair();
        let vm = vm(&p, Duration::from_secs(1), Duration::from_secs(3));
        vm.open();
        let mut rx = vm.subscribe();
        let _handle = vm.listen().unwrap();

        // the listener cannot run until this loop yields, so the feed overflows
        let bo_chat = chat_as(&p, &p.bo);
        for i in 0..300 {
            bo_chat.send_message(&p.thread.id, &format!("m{i}")).unwrap();
        }
        let mut stored: Vec<String> = p
            .env
            .app
            .chat()
            .messages(&p.thread.id)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(stored.len(), 300);

        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if rx.borrow_and_update().messages.len() == 300 {
                    break;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        let mut shown: Vec<String> = vm.state().messages.into_iter().map(|m| m.id).collect();
        shown.sort();
        stored.sort();
        assert_eq!(shown, stored);
        let thread = p.env.app.chat().thread(&p.thread.id).unwrap().unwrap();
        assert_eq!(thread.unread_for(&p.ana.uid), 0);
    }

    #[tokio::test]
    async fn typing_names_exclude_self() {
        let p = pair();
        let vm = vm(&p, Duration::from_secs(1), Duration::from_secs(3));
        vm.open();
        let mut rx = vm.subscribe();
        let _handle = vm.listen().unwrap();
        chat_as(&p, &p.bo).set_typing(&p.thread.id, true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                rx.changed().await.unwrap();
                if rx.borrow().typing_names == ["Bo"] {
                    break;
                }
            }
        })
        .await
        .unwrap();
    }
}
