use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::{Conversation, ConversationId, Error, Message, NewMessage, Session};

/// The hosted database/auth/realtime service, as seen by the client.
///
/// Implementations own all query, filter and ordering semantics:
/// `conversations` is `created_at` descending, `messages` is `inserted_at`
/// ascending, and access scoping is entirely the store's job.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Authenticates with email and password. A successful sign-in is also
    /// published on [`session_changes`](Self::session_changes); callers
    /// should treat that channel, not this return value, as the source of
    /// truth for "am I logged in".
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, Error>;

    /// Invalidates the current session.
    async fn sign_out(&self) -> Result<(), Error>;

    /// Session-change notifications. The receiver observes the current
    /// session at registration time and every subsequent change.
    fn session_changes(&self) -> watch::Receiver<Option<Session>>;

    /// All conversations visible to the current session, newest first.
    async fn conversations(&self) -> Result<Vec<Conversation>, Error>;

    /// Full message history of one conversation, oldest first.
    async fn messages(&self, conversation: &ConversationId) -> Result<Vec<Message>, Error>;

    /// Inserts one message row; the server assigns id and timestamp. The
    /// returned row is informational — the inserted message is rendered
    /// only once it arrives through the live subscription.
    async fn send_message(&self, new: NewMessage) -> Result<Message, Error>;

    /// Opens a live feed of message inserts filtered by conversation id.
    async fn subscribe(&self, conversation: &ConversationId) -> Result<Subscription, Error>;
}

/// A live message feed scoped to one conversation.
///
/// Dropping the subscription releases the backend-side resources, so its
/// lifetime can be tied to the view consuming it: one live subscription per
/// open chat, closed on exit or replacement.
pub struct Subscription {
    events: mpsc::UnboundedReceiver<Message>,
    _guard: SubscriptionGuard,
}

impl Subscription {
    pub fn new(events: mpsc::UnboundedReceiver<Message>, guard: SubscriptionGuard) -> Self {
        Self {
            events,
            _guard: guard,
        }
    }

    /// The next inserted row, in delivery order. `None` means the feed has
    /// closed and the caller should resubscribe.
    pub async fn next(&mut self) -> Option<Message> {
        self.events.recv().await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

/// Runs a close callback when the owning [`Subscription`] is dropped.
pub struct SubscriptionGuard(Option<Box<dyn FnOnce() + Send>>);

impl SubscriptionGuard {
    pub fn on_close(close: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(close)))
    }

    pub fn noop() -> Self {
        Self(None)
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(close) = self.0.take() {
            close();
        }
    }
}
