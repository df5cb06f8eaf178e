use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Result;
use backend_api::{
    encode, new_document_id, now_millis, run_transaction, Direction, DocumentStore, FieldUpdate,
    Filter, Query, Subscription, WriteBatch,
};
use tracing::{debug, info};

use crate::model::{
    messages_collection, ChatMessage, ChatThread, LastMessage, Profile, CHATS, USERS,
};
use crate::session::Session;

use super::{decode_all, forbidden};

/// Deterministic thread id for two users; the same whichever side asks.
pub fn chat_id(a: &str, b: &str) -> String {
    if a <= b {
        format!("{a}_{b}")
    } else {
        format!("{b}_{a}")
    }
}

#[derive(Clone)]
pub struct ChatRepository {
    store: Arc<dyn DocumentStore>,
    session: Arc<Session>,
}

impl ChatRepository {
    pub fn new(store: Arc<dyn DocumentStore>, session: Arc<Session>) -> Self {
        Self { store, session }
    }

    pub fn thread(&self, chat_id: &str) -> Result<Option<ChatThread>> {
        match self.store.get(CHATS, chat_id)? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }

    /// Thread the signed-in user belongs to, or an error.
    fn my_thread(&self, me: &Profile, chat_id: &str) -> Result<ChatThread> {
        let thread = self
            .thread(chat_id)?
            .ok_or_else(|| anyhow::anyhow!("chat_not_found"))?;
        if !thread.participants.contains(&me.uid) {
            return Err(forbidden());
        }
        Ok(thread)
    }

    /// Open the thread with `other_uid`, creating it on first contact.
    pub fn get_or_create_thread(&self, other_uid: &str) -> Result<ChatThread> {
        let me = self.session.require()?;
        if other_uid == me.uid {
            anyhow::bail!("invalid_participant");
        }
        let id = chat_id(&me.uid, other_uid);
        let thread = run_transaction(self.store.as_ref(), |tx| {
            if let Some(doc) = tx.get(CHATS, &id)? {
                return Ok(doc.decode::<ChatThread>()?);
            }
            let other: Profile = tx
                .get(USERS, other_uid)?
                .ok_or_else(|| backend_api::BackendError::not_found(USERS, other_uid))?
                .decode()?;
            let mut participants = vec![me.uid.clone(), other.uid.clone()];
            participants.sort();
            let now = now_millis();
            let thread = ChatThread {
                id: id.clone(),
                unread_count: participants.iter().map(|p| (p.clone(), 0)).collect(),
                participant_names: BTreeMap::from([
                    (me.uid.clone(), me.name.clone()),
                    (other.uid.clone(), other.name.clone()),
                ]),
                participants,
                typing_users: BTreeSet::new(),
                last_message: None,
                created_at: now,
                updated_at: now,
            };
            tx.set(CHATS, &id, encode(&thread)?);
            Ok(thread)
        })?;
        debug!(chat = %thread.id, "thread ready");
        Ok(thread)
    }

    /// Write a message and the thread summary in one batch. Blank text is a no-op.
    pub fn send_message(&self, chat_id: &str, text: &str) -> Result<Option<ChatMessage>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let me = self.session.require()?;
        let thread = self.my_thread(&me, chat_id)?;
        let message = self.write_message(&thread, &me.uid, text, false)?;
        info!(chat = %chat_id, message = %message.id, "message sent");
        Ok(Some(message))
    }

    /// Post an automated notice into a thread on behalf of `sender_id`.
    pub(crate) fn send_system_message(
        &self,
        thread: &ChatThread,
        sender_id: &str,
        text: &str,
    ) -> Result<ChatMessage> {
        self.write_message(thread, sender_id, text, true)
    }

    fn write_message(
        &self,
        thread: &ChatThread,
        sender_id: &str,
        text: &str,
        system: bool,
    ) -> Result<ChatMessage> {
        let message = ChatMessage {
            id: new_document_id(),
            chat_id: thread.id.clone(),
            sender_id: sender_id.to_string(),
            text: text.to_string(),
            timestamp: now_millis(),
            read_by: BTreeSet::from([sender_id.to_string()]),
            delivered_to: BTreeSet::from([sender_id.to_string()]),
            system,
        };
        let last = LastMessage {
            text: message.text.clone(),
            sender_id: message.sender_id.clone(),
            timestamp: message.timestamp,
        };
        let mut updates = vec![
            FieldUpdate::set("lastMessage", serde_json::to_value(&last)?),
            FieldUpdate::set("updatedAt", message.timestamp),
            FieldUpdate::array_remove("typingUsers", [sender_id]),
        ];
        for other in thread.participants.iter().filter(|p| *p != sender_id) {
            updates.push(FieldUpdate::increment(format!("unreadCount.{other}"), 1));
        }
        let mut batch = WriteBatch::new();
        batch
            .set(&messages_collection(&thread.id), &message.id, encode(&message)?)
            .update(CHATS, &thread.id, updates);
        self.store.commit(batch)?;
        Ok(message)
    }

    /// Messages oldest first.
    pub fn messages(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        let me = self.session.require()?;
        self.my_thread(&me, chat_id)?;
        let docs = self.store.query(&Self::messages_query(chat_id))?;
        decode_all(&docs)
    }

    fn messages_query(chat_id: &str) -> Query {
        Query::collection(messages_collection(chat_id)).order_by("timestamp", Direction::Ascending)
    }

    /// Mark every message from others as read and reset the reader's unread count.
    ///
    /// Runs as one transaction so a message sent meanwhile keeps its unread increment.
    pub fn mark_read(&self, chat_id: &str) -> Result<usize> {
        let me = self.session.require()?;
        self.my_thread(&me, chat_id)?;
        let collection = messages_collection(chat_id);
        let count = run_transaction(self.store.as_ref(), |tx| {
            let docs = tx.query(&Query::collection(collection.as_str()))?;
            let mut count = 0;
            for doc in &docs {
                let message: ChatMessage = doc.decode()?;
                if message.sender_id != me.uid && !message.read_by.contains(&me.uid) {
                    tx.update(
                        &collection,
                        &message.id,
                        vec![FieldUpdate::array_union("readBy", [me.uid.as_str()])],
                    );
                    count += 1;
                }
            }
            tx.update(
                CHATS,
                chat_id,
                vec![FieldUpdate::set(format!("unreadCount.{}", me.uid), 0)],
            );
            Ok(count)
        })?;
        debug!(chat = %chat_id, count, "messages read");
        Ok(count)
    }

    /// Record that the signed-in user received the given messages.
    pub fn mark_delivered(&self, chat_id: &str, message_ids: &[String]) -> Result<()> {
        if message_ids.is_empty() {
            return Ok(());
        }
        let me = self.session.require()?;
        self.my_thread(&me, chat_id)?;
        let uid = me.uid;
        let collection = messages_collection(chat_id);
        let mut batch = WriteBatch::new();
        for id in message_ids {
            batch.update(
                &collection,
                id,
                vec![FieldUpdate::array_union("deliveredTo", [uid.as_str()])],
            );
        }
        self.store.commit(batch)?;
        Ok(())
    }

    /// Add or remove the signed-in user from the thread's typing set.
    pub fn set_typing(&self, chat_id: &str, typing: bool) -> Result<()> {
        let uid = self.session.require()?.uid;
        let update = if typing {
            FieldUpdate::array_union("typingUsers", [uid.as_str()])
        } else {
            FieldUpdate::array_remove("typingUsers", [uid.as_str()])
        };
        self.store.update(CHATS, chat_id, vec![update])?;
        Ok(())
    }

    fn threads_query(uid: &str) -> Query {
        Query::collection(CHATS)
            .filter(Filter::array_contains("participants", uid))
            .order_by("updatedAt", Direction::Descending)
    }

    /// The signed-in user's threads, most recently active first.
    pub fn threads(&self) -> Result<Vec<ChatThread>> {
        let uid = self.session.require()?.uid;
        let docs = self.store.query(&Self::threads_query(&uid))?;
        decode_all(&docs)
    }

    pub fn listen_threads(&self) -> Result<Subscription> {
        let uid = self.session.require()?.uid;
        Ok(self.store.subscribe(Self::threads_query(&uid)))
    }

    pub fn listen_messages(&self, chat_id: &str) -> Result<Subscription> {
        let me = self.session.require()?;
        self.my_thread(&me, chat_id)?;
        Ok(self.store.subscribe(Self::messages_query(chat_id)))
    }

    /// Sum of unread counts across the signed-in user's threads.
    pub fn total_unread(&self) -> Result<i64> {
        let uid = self.session.require()?.uid;
        Ok(self.threads()?.iter().map(|t| t.unread_for(&uid)).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn chat_id_is_commutative() {
        assert_eq!(chat_id("alice", "bob"), chat_id("bob", "alice"));
        assert_eq!(chat_id("alice", "bob"), "alice_bob");
    }

    fn pair(env: &testing::TestEnv) -> (Profile, Profile, ChatThread) {
        let bo = env.member("Bo");
        let ana = env.member("Ana");
        let thread = env.app.chat().get_or_create_thread(&bo.uid).unwrap();
        (ana, bo, thread)
    }

    #[test]
    fn get_or_create_is_stable_from_both_sides() {
        let env = testing::env();
        let (ana, bo, thread) = pair(&env);
        assert_eq!(thread.id, chat_id(&ana.uid, &bo.uid));
        assert_eq!(thread.name_of(&bo.uid), "Bo");
        env.act_as(&bo);
        let again = env.app.chat().get_or_create_thread(&ana.uid).unwrap();
        assert_eq!(again.id, thread.id);
        assert_eq!(again.created_at, thread.created_at);
        assert!(env.app.chat().get_or_create_thread(&bo.uid).is_err());
    }

    #[test]
    fn send_increments_unread_and_read_resets() {
        let env = testing::env();
        let (_ana, bo, thread) = pair(&env);
        let chat = env.app.chat();
        assert!(chat.send_message(&thread.id, "   ").unwrap().is_none());
        chat.send_message(&thread.id, "hi bo").unwrap().unwrap();
        chat.send_message(&thread.id, "you there?").unwrap().unwrap();

        let stored = chat.thread(&thread.id).unwrap().unwrap();
        assert_eq!(stored.unread_for(&bo.uid), 2);
        assert_eq!(stored.last_message.as_ref().unwrap().text, "you there?");

        env.act_as(&bo);
        assert_eq!(chat.total_unread().unwrap(), 2);
        assert_eq!(chat.mark_read(&thread.id).unwrap(), 2);
        let stored = chat.thread(&thread.id).unwrap().unwrap();
        assert_eq!(stored.unread_for(&bo.uid), 0);
        assert!(chat
            .messages(&thread.id)
            .unwrap()
            .iter()
            .all(|m| m.read_by.contains(&bo.uid)));
    }

    #[test]
    fn blank_message_writes_nothing() {
        let env = testing::env();
        let (_ana, bo, thread) = pair(&env);
        let chat = env.app.chat();
        chat.send_message(&thread.id, "\n\t ").unwrap();
        assert!(chat.messages(&thread.id).unwrap().is_empty());
        let stored = chat.thread(&thread.id).unwrap().unwrap();
        assert_eq!(stored.unread_for(&bo.uid), 0);
        assert!(stored.last_message.is_none());
    }

    #[test]
    fn typing_flag_and_send_clears_it() {
        let env = testing::env();
        let (ana, _bo, thread) = pair(&env);
        let chat = env.app.chat();
        chat.set_typing(&thread.id, true).unwrap();
        let stored = chat.thread(&thread.id).unwrap().unwrap();
        assert!(stored.typing_users.contains(&ana.uid));
        chat.send_message(&thread.id, "done typing").unwrap();
        let stored = chat.thread(&thread.id).unwrap().unwrap();
        assert!(stored.typing_users.is_empty());
    }

    #[test]
    fn outsiders_cannot_post() {
        let env = testing::env();
        let (_ana, _bo, thread) = pair(&env);
        env.member("Eve");
        assert_eq!(
            env.app
                .chat()
                .send_message(&thread.id, "hello")
                .unwrap_err()
                .to_string(),
            "forbidden"
        );
    }

    #[test]
    fn concurrent_send_and_read_keep_unread_in_step() {
        let env = testing::env();
        let (ana, bo, thread) = pair(&env);
        let as_user = |profile: &Profile| {
            let session = Arc::new(Session::default());
            session.set(crate::session::SignedIn {
                profile: profile.clone(),
                token: String::new(),
            });
            ChatRepository::new(env.backend.store.clone(), session)
        };
        let ana_chat = as_user(&ana);
        let bo_chat = as_user(&bo);
        let chat_id = thread.id.clone();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..40 {
                    bo_chat.send_message(&chat_id, &format!("m{i}")).unwrap();
                }
            });
            scope.spawn(|| {
                for _ in 0..40 {
                    ana_chat.mark_read(&chat_id).unwrap();
                }
            });
        });

        let unread_messages = ana_chat
            .messages(&chat_id)
            .unwrap()
            .iter()
            .filter(|m| !m.read_by.contains(&ana.uid))
            .count() as i64;
        let thread = ana_chat.thread(&chat_id).unwrap().unwrap();
        assert_eq!(thread.unread_for(&ana.uid), unread_messages);
    }

    #[test]
    fn outsiders_cannot_mark_delivered() {
        let env = testing::env();
        let (ana, _bo, thread) = pair(&env);
        let message = env
            .app
            .chat()
            .send_message(&thread.id, "private")
            .unwrap()
            .unwrap();
        let eve = env.member("Eve");
        let err = env
            .app
            .chat()
            .mark_delivered(&thread.id, &[message.id.clone()])
            .unwrap_err();
        assert_eq!(err.to_string(), "forbidden");
        env.act_as(&ana);
        let stored = env.app.chat().messages(&thread.id).unwrap();
        assert!(!stored[0].delivered_to.contains(&eve.uid));
    }

    #[test]
    fn delivered_marks() {
        let env = testing::env();
        let (_ana, bo, thread) = pair(&env);
        let chat = env.app.chat();
        let message = chat.send_message(&thread.id, "ping").unwrap().unwrap();
        env.act_as(&bo);
        chat.mark_delivered(&thread.id, &[message.id.clone()]).unwrap();
        let stored = chat.messages(&thread.id).unwrap();
        assert!(stored[0].delivered_to.contains(&bo.uid));
    }

    #[tokio::test]
    async fn listeners_see_new_messages() {
        let env = testing::env();
        let (_ana, _bo, thread) = pair(&env);
        let chat = env.app.chat();
        let mut sub = chat.listen_messages(&thread.id).unwrap();
        chat.send_message(&thread.id, "live").unwrap();
        let change = sub.next().await.unwrap().unwrap();
        let message: ChatMessage = change.document.decode().unwrap();
        assert_eq!(message.text, "live");
    }
}
