// Filter registry - per-chat forbidden substrings, cached over the store.
//
// The cache is invalidated on every add/remove made through this registry.
// A `list` that raced with such a write does not cache its snapshot: every
// write bumps a generation, and a read only caches if the generation it
// started under is still current. Changes made to the store by anyone else
// become visible after at most `ttl`.

use super::moderation_models::ChatId;
use super::moderation_store::{ModerationError, ModerationStore};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cached snapshot of one chat's filter list.
#[derive(Debug, Clone)]
struct CachedFilters {
    words: Arc<Vec<String>>,
    fetched_at: Instant,
}

pub struct FilterRegistry<S: ModerationStore> {
    store: Arc<S>,
    cache: DashMap<ChatId, CachedFilters>,
    /// Bumped before every invalidation.
    generation: AtomicU64,
    ttl: Duration,
}

/// Lower-case and trim a filter word. Returns `None` if nothing is left.
pub fn normalize_word(word: &str) -> Option<String> {
    let normalized = word.trim().to_lowercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

impl<S: ModerationStore> FilterRegistry<S> {
    pub fn new(store: Arc<S>, ttl: Duration) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            generation: AtomicU64::new(0),
            ttl,
        }
    }

    /// Add a word to a chat's filters. Returns false if it was already there.
    pub async fn add(&self, chat_id: ChatId, word: &str) -> Result<bool, ModerationError> {
        let word = normalize_word(word).ok_or(ModerationError::InvalidFilterWord)?;
        let added = self.store.filter_add(chat_id, &word).await?;
        self.invalidate(chat_id);

        tracing::info!(chat_id, word = %word, added, "Filter added");
        Ok(added)
    }

    /// Remove a word. Removing an unknown word is a no-op returning false.
    pub async fn remove(&self, chat_id: ChatId, word: &str) -> Result<bool, ModerationError> {
        let Some(word) = normalize_word(word) else {
            return Ok(false);
        };
        let removed = self.store.filter_remove(chat_id, &word).await?;
        self.invalidate(chat_id);

        tracing::info!(chat_id, word = %word, removed, "Filter removed");
        Ok(removed)
    }

    /// The chat's filters in deterministic (sorted) order.
    pub async fn list(&self, chat_id: ChatId) -> Result<Arc<Vec<String>>, ModerationError> {
        if let Some(cached) = self.cache.get(&chat_id) {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(Arc::clone(&cached.words));
            }
        }

        let started = self.generation.load(Ordering::SeqCst);
        let mut words = self.store.filter_list(chat_id).await?;
        words.sort();
        words.dedup();
        let words = Arc::new(words);

        self.cache_if_current(chat_id, started, &words);
        Ok(words)
    }

    /// Cache `words` unless a write happened since generation `started`.
    fn cache_if_current(&self, chat_id: ChatId, started: u64, words: &Arc<Vec<String>>) {
        // Checked under the shard lock, which `invalidate` also takes.
        let entry = self.cache.entry(chat_id);
        if self.generation.load(Ordering::SeqCst) == started {
            entry.insert(CachedFilters {
                words: Arc::clone(words),
                fetched_at: Instant::now(),
            });
        } else {
            tracing::debug!(chat_id, "Filters changed during read, not caching");
        }
    }

    /// Drop the cached list for a chat so the next read hits the store.
    pub fn invalidate(&self, chat_id: ChatId) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cache.remove(&chat_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::moderation::InMemoryModerationStore;

    fn registry(store: Arc<InMemoryModerationStore>) -> FilterRegistry<InMemoryModerationStore> {
        FilterRegistry::new(store, Duration::from_secs(60))
    }

    #[test]
    fn test_normalize_word() {
        assert_eq!(normalize_word("  SpAm "), Some("spam".to_string()));
        assert_eq!(normalize_word("   "), None);
    }

    #[tokio::test]
    async fn test_add_is_normalized_and_idempotent() {
        let store = Arc::new(InMemoryModerationStore::new());
        let filters = registry(Arc::clone(&store));

        assert!(filters.add(1, " Spam ").await.unwrap());
        assert!(!filters.add(1, "SPAM").await.unwrap());

        let words = filters.list(1).await.unwrap();
        assert_eq!(words.as_slice(), ["spam".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_word_rejected() {
        let filters = registry(Arc::new(InMemoryModerationStore::new()));
        let result = filters.add(1, "   ").await;
        assert!(matches!(result, Err(ModerationError::InvalidFilterWord)));
    }

    #[tokio::test]
    async fn test_remove_unknown_word_is_noop() {
        let filters = registry(Arc::new(InMemoryModerationStore::new()));
        assert!(!filters.remove(1, "never-added").await.unwrap());
        assert!(filters.list(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_invalidated_on_write() {
        let store = Arc::new(InMemoryModerationStore::new());
        let filters = registry(Arc::clone(&store));

        assert!(filters.list(5).await.unwrap().is_empty());
        filters.add(5, "scam").await.unwrap();
        assert_eq!(filters.list(5).await.unwrap().len(), 1);

        filters.remove(5, "scam").await.unwrap();
        assert!(filters.list(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cache_serves_stale_until_invalidated() {
        let store = Arc::new(InMemoryModerationStore::new());
        let filters = registry(Arc::clone(&store));

        assert!(filters.list(9).await.unwrap().is_empty());

        // Written behind the registry's back: not visible until invalidation.
        store.filter_add(9, "crypto").await.unwrap();
        assert!(filters.list(9).await.unwrap().is_empty());

        filters.invalidate(9);
        assert_eq!(filters.list(9).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cache_expires_after_ttl() {
        let store = Arc::new(InMemoryModerationStore::new());
        let filters = FilterRegistry::new(Arc::clone(&store), Duration::from_millis(20));

        assert!(filters.list(9).await.unwrap().is_empty());
        store.filter_add(9, "crypto").await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(filters.list(9).await.unwrap().as_slice(), ["crypto".to_string()]);
    }

    #[tokio::test]
    async fn test_read_racing_a_write_is_not_cached() {
        let store = Arc::new(InMemoryModerationStore::new());
        let filters = registry(Arc::clone(&store));

        // A write lands between the read's start and its cache insert.
        let started = filters.generation.load(Ordering::SeqCst);
        filters.add(3, "scam").await.unwrap();
        assert_ne!(filters.generation.load(Ordering::SeqCst), started);

        // A read that started before the write skips caching, so the
        // next read sees the store.
        let stale = Arc::new(Vec::new());
        filters.cache_if_current(3, started, &stale);
        assert_eq!(filters.list(3).await.unwrap().as_slice(), ["scam".to_string()]);
    }

    #[tokio::test]
    async fn test_filters_are_per_chat() {
        let store = Arc::new(InMemoryModerationStore::new());
        let filters = registry(Arc::clone(&store));

        filters.add(1, "alpha").await.unwrap();
        filters.add(2, "beta").await.unwrap();

        assert_eq!(filters.list(1).await.unwrap().as_slice(), ["alpha".to_string()]);
        assert_eq!(filters.list(2).await.unwrap().as_slice(), ["beta".to_string()]);
    }
}
