// Storage port for moderation state.
//
// The core defines WHAT it needs; `infra/moderation` provides the HOW
// (in-memory for tests, SQLite for production).

use super::moderation_models::{ChatId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ModerationError {
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Repeated store failures; the caller should pause ingestion.
    #[error("Moderation pipeline unavailable after {consecutive_failures} consecutive store failures")]
    Unavailable { consecutive_failures: u32 },

    #[error("Filter word is empty after normalisation")]
    InvalidFilterWord,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl ModerationError {
    /// Whether this error came from the state store.
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            ModerationError::StorageError(_) | ModerationError::Unavailable { .. }
        )
    }
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Durable key-value state for warns, flood runs and filters.
///
/// Every method is a self-contained operation on one (chat, user) or (chat) key.
/// `warn_incr` and `flood_get_and_update` must be atomic read-modify-writes.
#[async_trait]
pub trait ModerationStore: Send + Sync {
    /// Current warn count, 0 when no record exists.
    async fn warn_get(&self, chat_id: ChatId, user_id: UserId) -> Result<u32, ModerationError>;

    /// Increment the warn count (creating it at 1) and return the new value.
    async fn warn_incr(&self, chat_id: ChatId, user_id: UserId) -> Result<u32, ModerationError>;

    /// Remove the warn record. No-op when absent.
    async fn warn_reset(&self, chat_id: ChatId, user_id: UserId) -> Result<(), ModerationError>;

    /// Record a message at `now` and return the consecutive count after update.
    ///
    /// See `FloodRecord::advance` for the counting rule.
    async fn flood_get_and_update(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Result<u32, ModerationError>;

    /// Add an already-normalised word. Returns false if it was already present.
    async fn filter_add(&self, chat_id: ChatId, word: &str) -> Result<bool, ModerationError>;

    /// Remove a word. Returns false if it was not present.
    async fn filter_remove(&self, chat_id: ChatId, word: &str) -> Result<bool, ModerationError>;

    /// All filter words for a chat, sorted ascending.
    async fn filter_list(&self, chat_id: ChatId) -> Result<Vec<String>, ModerationError>;
}
