// Moderation pipeline - the core state machine.
//
// Per text message, in order, stopping at the first action:
// 1. Privileged sender -> nothing.
// 2. Link -> delete + warn (maybe ban).
// 3. Forbidden word -> delete + warn (maybe ban).
// 4. Otherwise count toward flood -> mute when the run reaches the trigger.
//
// NO transport dependencies here - just pure domain logic over the store port.

use super::content_classifier::ContentClassifier;
use super::filter_registry::FilterRegistry;
use super::flood_detector::FloodDetector;
use super::moderation_models::{
    Action, ChatId, Classification, Decision, InboundMessage, ModerationConfig, Reason, UserId,
};
use super::moderation_store::{ModerationError, ModerationStore};
use super::warn_ledger::WarnLedger;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

type UserKey = (ChatId, UserId);

/// Orchestrates classifier, flood detector and warn ledger.
pub struct ModerationPipeline<S: ModerationStore> {
    config: ModerationConfig,
    /// Replacement configs for individual chats.
    chat_configs: DashMap<ChatId, ModerationConfig>,
    classifier: ContentClassifier,
    filters: FilterRegistry<S>,
    flood: FloodDetector<S>,
    warns: WarnLedger<S>,
    /// One async mutex per active (chat, user); tokio's mutex is FIFO so
    /// updates for a key apply in arrival order.
    key_locks: DashMap<UserKey, Arc<Mutex<()>>>,
    /// Users banned while their warn reset failed; retried before their next warn.
    pending_resets: DashSet<UserKey>,
    consecutive_store_failures: AtomicU32,
}

impl<S: ModerationStore> ModerationPipeline<S> {
    /// Create a pipeline over the given store.
    pub fn new(store: Arc<S>, config: ModerationConfig) -> Result<Self, ModerationError> {
        config.validate().map_err(ModerationError::ConfigError)?;

        Ok(Self {
            classifier: ContentClassifier::new(),
            filters: FilterRegistry::new(
                Arc::clone(&store),
                Duration::from_secs(config.filter_cache_ttl_seconds),
            ),
            flood: FloodDetector::new(Arc::clone(&store), config.flood_window()),
            warns: WarnLedger::new(store),
            chat_configs: DashMap::new(),
            key_locks: DashMap::new(),
            pending_resets: DashSet::new(),
            consecutive_store_failures: AtomicU32::new(0),
            config,
        })
    }

    /// Effective config for a chat.
    pub fn config_for(&self, chat_id: ChatId) -> ModerationConfig {
        self.chat_configs
            .get(&chat_id)
            .map(|c| c.clone())
            .unwrap_or_else(|| self.config.clone())
    }

    /// Override the config for one chat.
    pub fn set_chat_config(
        &self,
        chat_id: ChatId,
        config: ModerationConfig,
    ) -> Result<(), ModerationError> {
        config.validate().map_err(ModerationError::ConfigError)?;
        self.chat_configs.insert(chat_id, config);
        Ok(())
    }

    pub fn clear_chat_config(&self, chat_id: ChatId) {
        self.chat_configs.remove(&chat_id);
    }

    /// False once store failures reached the configured limit; the caller
    /// should pause ingestion until an operation succeeds again.
    pub fn is_available(&self) -> bool {
        self.consecutive_store_failures.load(Ordering::SeqCst)
            < self.config.store_failures_before_unavailable
    }

    /// Decide what to do about one text message.
    ///
    /// Store failures are returned as errors; the message then counts as
    /// unprocessed and may be redelivered.
    pub async fn process(&self, message: &InboundMessage) -> Result<Decision, ModerationError> {
        if message.is_privileged_sender {
            tracing::debug!(
                chat_id = message.chat_id,
                user_id = message.user_id,
                "Privileged sender, skipping moderation"
            );
            return Ok(Decision::none(
                message.chat_id,
                message.user_id,
                Some(message.message_id),
            ));
        }

        let result = self
            .with_key_lock(message.chat_id, message.user_id, self.decide(message))
            .await;
        self.track_store_health(result)
    }

    /// Manual warn from an admin. Runs the warn-and-maybe-ban step.
    pub async fn warn_user(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        reason: Reason,
    ) -> Result<Decision, ModerationError> {
        let config = self.config_for(chat_id);
        let result = self
            .with_key_lock(chat_id, user_id, async {
                let actions = self.warn_and_maybe_ban(chat_id, user_id, &config).await?;
                Ok::<_, ModerationError>(Decision {
                    chat_id,
                    user_id,
                    message_id: None,
                    actions,
                    reason: Some(reason),
                })
            })
            .await;
        self.track_store_health(result)
    }

    /// Clear a user's warnings. Idempotent.
    pub async fn reset_warns(&self, chat_id: ChatId, user_id: UserId) -> Result<(), ModerationError> {
        let result = self
            .with_key_lock(chat_id, user_id, self.warns.reset(chat_id, user_id))
            .await;
        let result = self.track_store_health(result);
        if result.is_ok() {
            self.pending_resets.remove(&(chat_id, user_id));
            tracing::info!(chat_id, user_id, "Warnings reset");
        }
        result
    }

    pub async fn warn_count(&self, chat_id: ChatId, user_id: UserId) -> Result<u32, ModerationError> {
        let result = self.warns.get(chat_id, user_id).await;
        self.track_store_health(result)
    }

    pub async fn add_filter(&self, chat_id: ChatId, word: &str) -> Result<bool, ModerationError> {
        let result = self.filters.add(chat_id, word).await;
        self.track_store_health(result)
    }

    pub async fn remove_filter(&self, chat_id: ChatId, word: &str) -> Result<bool, ModerationError> {
        let result = self.filters.remove(chat_id, word).await;
        self.track_store_health(result)
    }

    pub async fn list_filters(&self, chat_id: ChatId) -> Result<Vec<String>, ModerationError> {
        let result = self.filters.list(chat_id).await.map(|words| words.to_vec());
        self.track_store_health(result)
    }

    async fn decide(&self, message: &InboundMessage) -> Result<Decision, ModerationError> {
        let config = self.config_for(message.chat_id);
        let chat_id = message.chat_id;
        let user_id = message.user_id;

        let classification = if self.classifier.contains_link(&message.text) {
            Classification::LinkDetected
        } else {
            let filters = self.filters.list(chat_id).await?;
            self.classifier.classify(&message.text, &filters)
        };

        tracing::debug!(chat_id, user_id, ?classification, "Message classified");

        let reason = match classification {
            Classification::LinkDetected => Reason::LinkShared,
            Classification::ForbiddenWordDetected(word) => Reason::ForbiddenWord(word),
            Classification::Clean => {
                return self.check_flood(message, &config).await;
            }
        };

        let mut actions = vec![Action::DeleteMessage];
        actions.extend(self.warn_and_maybe_ban(chat_id, user_id, &config).await?);

        Ok(Decision {
            chat_id,
            user_id,
            message_id: Some(message.message_id),
            actions,
            reason: Some(reason),
        })
    }

    async fn check_flood(
        &self,
        message: &InboundMessage,
        config: &ModerationConfig,
    ) -> Result<Decision, ModerationError> {
        let count = if self.chat_configs.contains_key(&message.chat_id) {
            self.flood
                .record_and_count_within(
                    message.chat_id,
                    message.user_id,
                    message.timestamp,
                    config.flood_window(),
                )
                .await?
        } else {
            self.flood
                .record_and_count(message.chat_id, message.user_id, message.timestamp)
                .await?
        };

        if count < config.flood_trigger_count {
            return Ok(Decision::none(
                message.chat_id,
                message.user_id,
                Some(message.message_id),
            ));
        }

        tracing::info!(
            chat_id = message.chat_id,
            user_id = message.user_id,
            count,
            "Flood detected"
        );

        Ok(Decision {
            chat_id: message.chat_id,
            user_id: message.user_id,
            message_id: Some(message.message_id),
            actions: vec![Action::Mute {
                duration: config.flood_mute_duration(),
            }],
            reason: Some(Reason::SpamDetected),
        })
    }

    /// Warn once; at the threshold, ban and reset to a clean slate.
    ///
    /// Once the increment has landed the ban is always issued. A failed reset
    /// is logged and retried before this user's next warn.
    async fn warn_and_maybe_ban(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        config: &ModerationConfig,
    ) -> Result<Vec<Action>, ModerationError> {
        let key = (chat_id, user_id);
        if self.pending_resets.contains(&key) {
            self.warns.reset(chat_id, user_id).await?;
            self.pending_resets.remove(&key);
            tracing::info!(chat_id, user_id, "Deferred warn reset applied");
        }

        let warn_count = self.warns.warn(chat_id, user_id).await?;

        if warn_count >= config.warn_ban_threshold {
            if let Err(e) = self.warns.reset(chat_id, user_id).await {
                tracing::error!(
                    chat_id,
                    user_id,
                    warn_count,
                    "Warn reset after ban failed, retrying on next warn: {}",
                    e
                );
                self.pending_resets.insert(key);
            }
            tracing::info!(chat_id, user_id, warn_count, "Warn threshold reached, banning");
            Ok(vec![Action::Ban { warn_count }])
        } else {
            tracing::info!(chat_id, user_id, warn_count, "User warned");
            Ok(vec![Action::Warn { warn_count }])
        }
    }

    /// Run `fut` while holding the (chat, user) lock.
    async fn with_key_lock<T>(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        fut: impl std::future::Future<Output = T>,
    ) -> T {
        let key = (chat_id, user_id);
        let lock = Arc::clone(
            self.key_locks
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );

        let output = {
            let _guard = lock.lock().await;
            fut.await
        };

        // Drop idle entries; anyone still waiting holds another Arc.
        drop(lock);
        self.key_locks
            .remove_if(&key, |_, lock| Arc::strong_count(lock) == 1);

        output
    }

    fn track_store_health<T>(
        &self,
        result: Result<T, ModerationError>,
    ) -> Result<T, ModerationError> {
        match result {
            Ok(value) => {
                self.consecutive_store_failures.store(0, Ordering::SeqCst);
                Ok(value)
            }
            Err(e) if e.is_store_failure() => {
                let failures = self.consecutive_store_failures.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::error!(failures, "Moderation store failure: {}", e);

                if failures >= self.config.store_failures_before_unavailable {
                    Err(ModerationError::Unavailable {
                        consecutive_failures: failures,
                    })
                } else {
                    Err(e)
                }
            }
            Err(e) => Err(e),
        }
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.key_locks.len()
    }
}

// ============================================================================
// TESTS
// ============================================================================
