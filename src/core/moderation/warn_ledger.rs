// Warn ledger - per-(chat, user) warning counter.
//
// The ledger only counts. Ban escalation belongs to the pipeline, which calls
// `reset` after issuing the ban so each side effect can be retried on its own.

use super::moderation_models::{ChatId, UserId};
use super::moderation_store::{ModerationError, ModerationStore};
use std::sync::Arc;

pub struct WarnLedger<S: ModerationStore> {
    store: Arc<S>,
}

impl<S: ModerationStore> WarnLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Add one warning and return the new count.
    pub async fn warn(&self, chat_id: ChatId, user_id: UserId) -> Result<u32, ModerationError> {
        let count = self.store.warn_incr(chat_id, user_id).await?;
        tracing::debug!(chat_id, user_id, warn_count = count, "Warn recorded");
        Ok(count)
    }

    /// Clear all warnings. Idempotent.
    pub async fn reset(&self, chat_id: ChatId, user_id: UserId) -> Result<(), ModerationError> {
        self.store.warn_reset(chat_id, user_id).await
    }

    pub async fn get(&self, chat_id: ChatId, user_id: UserId) -> Result<u32, ModerationError> {
        self.store.warn_get(chat_id, user_id).await
    }
}
