//! In-memory stand-in for the hosted database/auth/realtime service.
//!
//! Implements the full [`ChatBackend`] contract against process-local state,
//! which makes it both the demo backend for the binary and the test double
//! for the UI crate. A [`chatter`] task generates live traffic.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use clink_common::{
    backend::{Subscription, SubscriptionGuard},
    ChatBackend, Conversation, ConversationId, Error, Message, MessageId, MessageKey, MessageList,
    NewMessage, Session, User, UserId,
};
use rand::prelude::{Rng, SliceRandom};
use tokio::sync::{broadcast, mpsc, watch};
use uuid::Uuid;

const USER_NAMES: &[&str] = &["alice", "bob", "charlie", "dana"];

/// Password shared by every demo account.
pub const DEMO_PASSWORD: &str = "letmein";

const CONVERSATION_COUNT: i64 = 3;

struct Account {
    user: User,
    password: String,
}

#[derive(Default)]
struct Faults {
    conversations: AtomicBool,
    messages: AtomicBool,
    send: AtomicBool,
}

impl Faults {
    fn trip(flag: &AtomicBool) -> bool {
        flag.swap(false, Ordering::SeqCst)
    }
}

pub struct FakeBackend {
    accounts: Vec<Account>,
    conversations: Vec<Conversation>,
    messages: Mutex<HashMap<ConversationId, MessageList>>,
    inserts: broadcast::Sender<Message>,
    session: watch::Sender<Option<Session>>,
    subscribers: Arc<AtomicUsize>,
    faults: Faults,
}

impl FakeBackend {
    /// A backend seeded with the demo accounts and a few conversations,
    /// newest one carrying the highest id.
    pub fn seeded() -> Self {
        let accounts = USER_NAMES
            .iter()
            .map(|name| Account {
                user: User {
                    id: UserId::new(Uuid::now_v7().to_string()),
                    email: format!("{name}@example.com").into(),
                },
                password: DEMO_PASSWORD.to_owned(),
            })
            .collect();
        let now = Utc::now();
        let conversations = (1..=CONVERSATION_COUNT)
            .map(|n| Conversation {
                id: ConversationId::new(n.to_string()),
                created_at: now - Duration::hours(CONVERSATION_COUNT - n + 1),
            })
            .collect();
        let (inserts, _) = broadcast::channel(64);
        let (session, _) = watch::channel(None);
        Self {
            accounts,
            conversations,
            messages: Mutex::default(),
            inserts,
            session,
            subscribers: Arc::default(),
            faults: Faults::default(),
        }
    }

    /// The demo identities, for picking chatter senders.
    pub fn users(&self) -> Vec<User> {
        self.accounts.iter().map(|a| a.user.clone()).collect()
    }

    pub fn conversation_ids(&self) -> Vec<ConversationId> {
        self.conversations.iter().map(|c| c.id.clone()).collect()
    }

    /// Number of currently open live subscriptions.
    pub fn active_subscriptions(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }

    /// Makes the next `conversations` call fail, for exercising error paths.
    pub fn fail_next_conversations(&self) {
        self.faults.conversations.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_messages(&self) {
        self.faults.messages.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_send(&self) {
        self.faults.send.store(true, Ordering::SeqCst);
    }

    fn insert_row(&self, new: NewMessage) -> Message {
        let message = Message {
            key: MessageKey {
                inserted_at: Utc::now(),
                id: MessageId::new(Uuid::now_v7().to_string()),
            },
            conversation: new.conversation,
            sender: new.sender,
            content: new.content.into(),
        };
        self.messages
            .lock()
            .expect("message store poisoned")
            .entry(message.conversation.clone())
            .or_default()
            .insert(message.clone());
        // no receivers is fine; the row is already stored
        let _ = self.inserts.send(message.clone());
        message
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, Error> {
        let account = self
            .accounts
            .iter()
            .find(|a| a.user.email.as_ref() == email && a.password == password)
            .ok_or_else(|| Error::Auth("invalid login credentials".to_owned()))?;
        let session = Session {
            user: account.user.clone(),
        };
        self.session.send_replace(Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), Error> {
        self.session.send_replace(None);
        Ok(())
    }

    fn session_changes(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }

    async fn conversations(&self) -> Result<Vec<Conversation>, Error> {
        if Faults::trip(&self.faults.conversations) {
            return Err(Error::Query("conversation listing unavailable".to_owned()));
        }
        let mut conversations = self.conversations.clone();
        conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(conversations)
    }

    async fn messages(&self, conversation: &ConversationId) -> Result<Vec<Message>, Error> {
        if Faults::trip(&self.faults.messages) {
            return Err(Error::Query("message history unavailable".to_owned()));
        }
        let store = self.messages.lock().expect("message store poisoned");
        Ok(store
            .get(conversation)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn send_message(&self, new: NewMessage) -> Result<Message, Error> {
        if Faults::trip(&self.faults.send) {
            return Err(Error::Send("message insert rejected".to_owned()));
        }
        Ok(self.insert_row(new))
    }

    async fn subscribe(&self, conversation: &ConversationId) -> Result<Subscription, Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut feed = self.inserts.subscribe();
        let conversation = conversation.clone();
        tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(message) => {
                        if message.conversation == conversation && tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "live feed lagged, rows dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        self.subscribers.fetch_add(1, Ordering::SeqCst);
        let subscribers = Arc::clone(&self.subscribers);
        let guard = SubscriptionGuard::on_close(move || {
            subscribers.fetch_sub(1, Ordering::SeqCst);
        });
        Ok(Subscription::new(rx, guard))
    }
}

/// Generates demo traffic: random senders posting lipsum into random
/// conversations at randomized intervals. Runs until the backend is dropped
/// by everyone else or the task is aborted.
pub async fn chatter(backend: Arc<FakeBackend>) {
    let users = backend.users();
    let conversations = backend.conversation_ids();
    loop {
        let (new, millis) = generate_message(&conversations, &users);
        if let Err(err) = backend.send_message(new).await {
            tracing::warn!(%err, "chatter insert failed");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(millis)).await;
    }
}

fn generate_message(conversations: &[ConversationId], users: &[User]) -> (NewMessage, u64) {
    const MIN_MESSAGE_WORDS: usize = 1;
    const MAX_MESSAGE_WORDS: usize = 15;
    let mut rng = rand::thread_rng();
    let conversation = conversations.choose(&mut rng).expect("no conversations");
    let sender = users.choose(&mut rng).expect("no users");
    let message_len = rng.gen_range(MIN_MESSAGE_WORDS..=MAX_MESSAGE_WORDS);
    let new = NewMessage {
        conversation: conversation.clone(),
        sender: sender.id.clone(),
        content: lipsum::lipsum_words_with_rng(&mut rng, message_len),
    };
    let millis = rng.gen_range(0..5000);
    (new, millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_message(backend: &FakeBackend, conversation: &str, content: &str) -> NewMessage {
        NewMessage {
            conversation: ConversationId::new(conversation),
            sender: backend.users()[0].id.clone(),
            content: content.to_owned(),
        }
    }

    #[tokio::test]
    async fn sign_in_publishes_session() {
        let backend = FakeBackend::seeded();
        let mut changes = backend.session_changes();
        assert!(changes.borrow_and_update().is_none());

        let session = backend
            .sign_in("alice@example.com", DEMO_PASSWORD)
            .await
            .unwrap();
        assert_eq!(session.user.email.as_ref(), "alice@example.com");
        assert_eq!(changes.borrow_and_update().as_ref(), Some(&session));

        backend.sign_out().await.unwrap();
        assert!(changes.borrow_and_update().is_none());
    }

    #[tokio::test]
    async fn sign_in_rejects_bad_credentials() {
        let backend = FakeBackend::seeded();
        let err = backend
            .sign_in("alice@example.com", "wrong")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert!(backend.session_changes().borrow().is_none());
    }

    #[tokio::test]
    async fn conversations_are_newest_first() {
        let backend = FakeBackend::seeded();
        let conversations = backend.conversations().await.unwrap();
        assert_eq!(conversations.len(), CONVERSATION_COUNT as usize);
        for pair in conversations.windows(2) {
            assert!(pair[0].created_at > pair[1].created_at);
        }
        assert_eq!(conversations[0].id.as_str(), "3");
    }

    #[tokio::test]
    async fn history_is_oldest_first() {
        let backend = FakeBackend::seeded();
        for content in ["one", "two", "three"] {
            backend
                .send_message(new_message(&backend, "1", content))
                .await
                .unwrap();
        }
        let history = backend
            .messages(&ConversationId::new("1"))
            .await
            .unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_ref()).collect();
        assert_eq!(contents, ["one", "two", "three"]);
    }

    #[tokio::test]
    async fn live_feed_is_filtered_by_conversation() {
        let backend = FakeBackend::seeded();
        let mut subscription = backend
            .subscribe(&ConversationId::new("1"))
            .await
            .unwrap();
        backend
            .send_message(new_message(&backend, "2", "elsewhere"))
            .await
            .unwrap();
        backend
            .send_message(new_message(&backend, "1", "here"))
            .await
            .unwrap();

        let delivered = subscription.next().await.unwrap();
        assert_eq!(delivered.content.as_ref(), "here");
        assert_eq!(delivered.conversation.as_str(), "1");
    }

    #[tokio::test]
    async fn dropping_a_subscription_deregisters_it() {
        let backend = FakeBackend::seeded();
        let subscription = backend
            .subscribe(&ConversationId::new("1"))
            .await
            .unwrap();
        assert_eq!(backend.active_subscriptions(), 1);
        drop(subscription);
        assert_eq!(backend.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn injected_faults_trip_once() {
        let backend = FakeBackend::seeded();
        backend.fail_next_conversations();
        assert!(matches!(
            backend.conversations().await,
            Err(Error::Query(_))
        ));
        assert!(backend.conversations().await.is_ok());
    }
}
