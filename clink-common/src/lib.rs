use std::{collections::BTreeMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};

pub mod backend;
mod error;

pub use backend::{ChatBackend, Subscription, SubscriptionGuard};
pub use error::Error;

macro_rules! id_type {
    ($(#[$attr:meta])* $name:ident) => {
        $(#[$attr])*
        #[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(id: impl Into<Arc<str>>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

id_type!(UserId);
id_type!(ConversationId);
id_type!(
    /// Server-assigned message identifier.
    MessageId
);

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct User {
    pub id: UserId,
    pub email: Arc<str>,
}

/// An authenticated identity, as issued by the auth collaborator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Session {
    pub user: User,
}

/// A conversation row. The client only ever reads these; ordering
/// (`created_at` descending) is the store's responsibility.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Conversation {
    pub id: ConversationId,
    pub created_at: DateTime<Utc>,
}

/// Sort key for messages within a conversation: insertion time, with the
/// server-assigned id as a tiebreaker.
#[derive(Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub struct MessageKey {
    pub inserted_at: DateTime<Utc>,
    pub id: MessageId,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    pub key: MessageKey,
    pub conversation: ConversationId,
    pub sender: UserId,
    pub content: Arc<str>,
}

impl Message {
    pub fn key(&self) -> MessageKey {
        self.key.clone()
    }
}

/// A message insert as submitted by the client; the server assigns the id
/// and the insertion timestamp.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NewMessage {
    pub conversation: ConversationId,
    pub sender: UserId,
    pub content: String,
}

/// Messages of one conversation, ordered by [`MessageKey`] (ascending
/// insertion time). Keyed insertion makes re-delivery of a row — e.g. one
/// seen by both the history fetch and the live subscription — idempotent.
#[derive(Clone, Debug, Default)]
pub struct MessageList {
    messages: BTreeMap<MessageKey, Message>,
}

impl MessageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, message: Message) -> Option<Message> {
        let key = message.key.clone();
        self.messages.insert(key, message)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Extend<Message> for MessageList {
    fn extend<I: IntoIterator<Item = Message>>(&mut self, iter: I) {
        for message in iter {
            self.insert(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: &str, at: DateTime<Utc>) -> Message {
        Message {
            key: MessageKey {
                inserted_at: at,
                id: MessageId::new(id),
            },
            conversation: ConversationId::new("1"),
            sender: UserId::new("alice"),
            content: format!("message {id}").into(),
        }
    }

    #[test]
    fn iteration_is_ascending_by_insertion_time() {
        let base = Utc::now();
        let mut list = MessageList::new();
        list.insert(message("c", base + chrono::Duration::seconds(2)));
        list.insert(message("a", base));
        list.insert(message("b", base + chrono::Duration::seconds(1)));

        let order: Vec<_> = list.iter().map(|m| m.key.id.as_str()).collect();
        assert_eq!(order, ["a", "b", "c"]);
    }

    #[test]
    fn keyed_insert_deduplicates_redelivery() {
        let at = Utc::now();
        let mut list = MessageList::new();
        assert!(list.insert(message("a", at)).is_none());
        assert!(list.insert(message("a", at)).is_some());
        assert_eq!(list.len(), 1);
    }
}
