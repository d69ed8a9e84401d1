// In-memory implementation of ModerationStore.
//
// Used by tests and for running without a database. Every operation goes
// through the DashMap entry API, so each key is updated atomically.

use crate::core::moderation::{ChatId, FloodRecord, ModerationError, ModerationStore, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeSet;

/// Composite key for per-user state in a chat.
#[derive(Hash, Eq, PartialEq, Clone, Copy, Debug)]
struct ChatUserKey {
    chat_id: ChatId,
    user_id: UserId,
}

pub struct InMemoryModerationStore {
    warns: DashMap<ChatUserKey, u32>,
    floods: DashMap<ChatUserKey, FloodRecord>,
    /// BTreeSet keeps each chat's words sorted for deterministic listing.
    filters: DashMap<ChatId, BTreeSet<String>>,
}

impl InMemoryModerationStore {
    pub fn new() -> Self {
        Self {
            warns: DashMap::new(),
            floods: DashMap::new(),
            filters: DashMap::new(),
        }
    }
}

impl Default for InMemoryModerationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModerationStore for InMemoryModerationStore {
    async fn warn_get(&self, chat_id: ChatId, user_id: UserId) -> Result<u32, ModerationError> {
        let key = ChatUserKey { chat_id, user_id };
        Ok(self.warns.get(&key).map(|count| *count).unwrap_or(0))
    }

    async fn warn_incr(&self, chat_id: ChatId, user_id: UserId) -> Result<u32, ModerationError> {
        let key = ChatUserKey { chat_id, user_id };
        let mut count = self.warns.entry(key).or_insert(0);
        *count = count.saturating_add(1);
        Ok(*count)
    }

    async fn warn_reset(&self, chat_id: ChatId, user_id: UserId) -> Result<(), ModerationError> {
        self.warns.remove(&ChatUserKey { chat_id, user_id });
        Ok(())
    }

    async fn flood_get_and_update(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Result<u32, ModerationError> {
        let key = ChatUserKey { chat_id, user_id };
        let record = match self.floods.entry(key) {
            Entry::Occupied(mut entry) => {
                let next = FloodRecord::advance(Some(*entry.get()), now, window);
                entry.insert(next);
                next
            }
            Entry::Vacant(entry) => *entry.insert(FloodRecord::advance(None, now, window)),
        };
        Ok(record.consecutive_count)
    }

    async fn filter_add(&self, chat_id: ChatId, word: &str) -> Result<bool, ModerationError> {
        Ok(self
            .filters
            .entry(chat_id)
            .or_default()
            .insert(word.to_string()))
    }

    async fn filter_remove(&self, chat_id: ChatId, word: &str) -> Result<bool, ModerationError> {
        let removed = match self.filters.get_mut(&chat_id) {
            Some(mut words) => words.remove(word),
            None => false,
        };
        Ok(removed)
    }

    async fn filter_list(&self, chat_id: ChatId) -> Result<Vec<String>, ModerationError> {
        Ok(self
            .filters
            .get(&chat_id)
            .map(|words| words.iter().cloned().collect())
            .unwrap_or_default())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_warn_roundtrip() {
        let store = InMemoryModerationStore::new();

        assert_eq!(store.warn_get(1, 2).await.unwrap(), 0);
        assert_eq!(store.warn_incr(1, 2).await.unwrap(), 1);
        assert_eq!(store.warn_incr(1, 2).await.unwrap(), 2);
        store.warn_reset(1, 2).await.unwrap();
        assert_eq!(store.warn_get(1, 2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_flood_update() {
        let store = InMemoryModerationStore::new();
        let window = chrono::Duration::seconds(4);
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        assert_eq!(store.flood_get_and_update(1, 2, t0, window).await.unwrap(), 1);
        let t1 = t0 + chrono::Duration::seconds(1);
        assert_eq!(store.flood_get_and_update(1, 2, t1, window).await.unwrap(), 2);
        let t2 = t1 + chrono::Duration::seconds(5);
        assert_eq!(store.flood_get_and_update(1, 2, t2, window).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_filters_sorted_and_deduplicated() {
        let store = InMemoryModerationStore::new();

        assert!(store.filter_add(1, "zeta").await.unwrap());
        assert!(store.filter_add(1, "alpha").await.unwrap());
        assert!(!store.filter_add(1, "alpha").await.unwrap());

        assert_eq!(
            store.filter_list(1).await.unwrap(),
            vec!["alpha".to_string(), "zeta".to_string()]
        );
        assert!(store.filter_remove(1, "zeta").await.unwrap());
        assert!(!store.filter_remove(1, "zeta").await.unwrap());
        assert!(!store.filter_remove(99, "zeta").await.unwrap());
    }
}
