// Flood detector - per-(chat, user) consecutive message counter.

use super::moderation_models::{ChatId, UserId};
use super::moderation_store::{ModerationError, ModerationStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct FloodDetector<S: ModerationStore> {
    store: Arc<S>,
    window: chrono::Duration,
}

impl<S: ModerationStore> FloodDetector<S> {
    pub fn new(store: Arc<S>, window: chrono::Duration) -> Self {
        Self { store, window }
    }

    /// Record a message and return the post-update consecutive count.
    ///
    /// The caller compares the count against its trigger threshold.
    pub async fn record_and_count(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<u32, ModerationError> {
        self.record_and_count_within(chat_id, user_id, now, self.window)
            .await
    }

    /// Same as `record_and_count` with an explicit window (per-chat overrides).
    pub async fn record_and_count_within(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Result<u32, ModerationError> {
        let count = self
            .store
            .flood_get_and_update(chat_id, user_id, now, window)
            .await?;

        tracing::debug!(chat_id, user_id, count, "Flood counter updated");
        Ok(count)
    }
}
