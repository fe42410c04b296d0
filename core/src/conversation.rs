//! In-memory conversation arena.
//!
//! Conversations live only for the lifetime of the process and are removed
//! exclusively by explicit deletion. Histories are append-only: nothing in
//! this module edits or reorders a stored message.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::agents::contract::Message;
use crate::errors::{AiError, Result};

#[derive(Clone, Debug, Serialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub category: String,
    pub language_hint: String,
    pub messages: Vec<Message>,
    pub created_at: OffsetDateTime,
}

/// Listing shape returned by [`ConversationStore::list`].
#[derive(Clone, Debug, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub category: String,
    pub language_hint: String,
    pub message_count: usize,
    pub created_at: OffsetDateTime,
}

struct Entry {
    seq: u64,
    conversation: Conversation,
}

#[derive(Default)]
struct StoreInner {
    next_seq: u64,
    entries: HashMap<String, Entry>,
}

#[derive(Default)]
pub struct ConversationStore {
    inner: RwLock<StoreInner>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate an empty conversation and return its id.
    pub fn create(&self, title: &str, category: &str, language_hint: &str) -> String {
        let id = Uuid::new_v4().to_string();
        let conversation = Conversation {
            id: id.clone(),
            title: title.to_string(),
            category: category.to_string(),
            language_hint: language_hint.to_string(),
            messages: Vec::new(),
            created_at: OffsetDateTime::now_utc(),
        };
        let mut inner = self.write();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(id.clone(), Entry { seq, conversation });
        id
    }

    /// Append `message` to the end of the history and return the stored copy.
    ///
    /// The timestamp is clamped to the previous message's so the sequence
    /// never goes backwards in time.
    pub fn append(&self, conversation_id: &str, mut message: Message) -> Result<Message> {
        let mut inner = self.write();
        let entry = inner
            .entries
            .get_mut(conversation_id)
            .ok_or_else(|| AiError::ConversationNotFound(conversation_id.to_string()))?;
        if let Some(last) = entry.conversation.messages.last() {
            if message.created_at < last.created_at {
                message.created_at = last.created_at;
            }
        }
        entry.conversation.messages.push(message.clone());
        Ok(message)
    }

    pub fn history(&self, conversation_id: &str) -> Result<Vec<Message>> {
        self.read()
            .entries
            .get(conversation_id)
            .map(|entry| entry.conversation.messages.clone())
            .ok_or_else(|| AiError::ConversationNotFound(conversation_id.to_string()))
    }

    pub fn message_count(&self, conversation_id: &str) -> Result<usize> {
        self.read()
            .entries
            .get(conversation_id)
            .map(|entry| entry.conversation.messages.len())
            .ok_or_else(|| AiError::ConversationNotFound(conversation_id.to_string()))
    }

    pub fn get(&self, conversation_id: &str) -> Result<Conversation> {
        self.read()
            .entries
            .get(conversation_id)
            .map(|entry| entry.conversation.clone())
            .ok_or_else(|| AiError::ConversationNotFound(conversation_id.to_string()))
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.read().entries.contains_key(conversation_id)
    }

    /// Remove the conversation. Returns whether it existed.
    pub fn delete(&self, conversation_id: &str) -> bool {
        self.write().entries.remove(conversation_id).is_some()
    }

    /// Live conversations in creation order.
    pub fn list(&self) -> Vec<ConversationSummary> {
        let inner = self.read();
        let mut entries: Vec<&Entry> = inner.entries.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries
            .into_iter()
            .map(|entry| {
                let c = &entry.conversation;
                ConversationSummary {
                    id: c.id.clone(),
                    title: c.title.clone(),
                    category: c.category.clone(),
                    language_hint: c.language_hint.clone(),
                    message_count: c.messages.len(),
                    created_at: c.created_at,
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use time::Duration;

    #[test]
    fn list_preserves_creation_order() {
        let store = ConversationStore::new();
        let a = store.create("A", "general", "en");
        let b = store.create("B", "technical", "en");
        let c = store.create("C", "safety", "es");
        store.delete(&b);

        let ids: Vec<String> = store.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![a, c]);
    }

    #[test]
    fn append_clamps_timestamps_to_previous_message() {
        let store = ConversationStore::new();
        let id = store.create("T", "general", "en");
        let first = store.append(&id, Message::user("first")).unwrap();

        let mut early = Message::assistant("second");
        early.created_at = first.created_at - Duration::hours(1);
        let stored = store.append(&id, early).unwrap();

        assert_eq!(stored.created_at, first.created_at);
        let history = store.history(&id).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[test]
    fn operations_on_deleted_conversation_fail() {
        let store = ConversationStore::new();
        let id = store.create("T", "general", "en");
        assert!(store.delete(&id));
        assert!(!store.delete(&id));
        assert!(matches!(
            store.append(&id, Message::user("late")),
            Err(AiError::ConversationNotFound(_))
        ));
        assert!(store.get(&id).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn concurrent_appends_to_one_conversation_keep_every_message() {
        let store = Arc::new(ConversationStore::new());
        let id = store.create("busy", "general", "en");
        let other = store.create("quiet", "general", "en");

        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let store = Arc::clone(&store);
                let id = id.clone();
                thread::spawn(move || {
                    for n in 0..25 {
                        store
                            .append(&id, Message::user(format!("{worker}-{n}")))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let history = store.history(&id).unwrap();
        assert_eq!(history.len(), 200);
        for worker in 0..8 {
            let mine: Vec<&str> = history
                .iter()
                .map(|m| m.content.as_str())
                .filter(|c| c.starts_with(&format!("{worker}-")))
                .collect();
            let expected: Vec<String> = (0..25).map(|n| format!("{worker}-{n}")).collect();
            assert_eq!(mine, expected);
        }
        assert!(store.history(&other).unwrap().is_empty());
    }
}
