// Console transport - JSON-lines events on stdin, notices on stdout.
//
// Events are sharded by (chat, user) onto a fixed set of workers, so a
// user's messages are always handled by one worker in arrival order while
// different users proceed in parallel.

use super::message_handler::{handle_event, ChatEvent, HandleOutcome};
use crate::core::moderation::{
    ChatId, EnforcementError, EnforcementResult, EnforcementSink, MessageId, ModerationError,
    ModerationPipeline, ModerationStore, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Pause before redelivering an event after a store failure.
const REDELIVERY_BACKOFF: Duration = Duration::from_secs(2);
/// Redeliveries after a plain store error before the event is dropped.
/// `Unavailable` is redelivered until the store recovers.
const MAX_STORAGE_RETRIES: u32 = 3;
const WORKER_QUEUE_SIZE: usize = 256;

/// Outbound line written to stdout.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Outbound<'a> {
    Notice {
        chat_id: ChatId,
        text: &'a str,
    },
    Delete {
        chat_id: ChatId,
        message_id: MessageId,
    },
    Restrict {
        chat_id: ChatId,
        user_id: UserId,
        until: DateTime<Utc>,
    },
    Ban {
        chat_id: ChatId,
        user_id: UserId,
        until: Option<DateTime<Utc>>,
    },
    Unban {
        chat_id: ChatId,
        user_id: UserId,
    },
}

/// Enforcement sink that emits every action as a JSON line on stdout.
#[derive(Debug, Default)]
pub struct LoggingSink;

impl LoggingSink {
    fn emit(&self, outbound: &Outbound<'_>) -> EnforcementResult {
        let line = serde_json::to_string(outbound)
            .map_err(|e| EnforcementError::Transport(e.to_string()))?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", line)
            .map_err(|e| EnforcementError::Transport(e.to_string()))
    }
}

#[async_trait]
impl EnforcementSink for LoggingSink {
    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> EnforcementResult {
        tracing::info!(chat_id, message_id, "Deleting message");
        self.emit(&Outbound::Delete {
            chat_id,
            message_id,
        })
    }

    async fn send_notice(&self, chat_id: ChatId, text: &str) -> EnforcementResult {
        self.emit(&Outbound::Notice { chat_id, text })
    }

    async fn restrict_user(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        until: DateTime<Utc>,
    ) -> EnforcementResult {
        tracing::info!(chat_id, user_id, %until, "Restricting user");
        self.emit(&Outbound::Restrict {
            chat_id,
            user_id,
            until,
        })
    }

    async fn ban_user(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        until: Option<DateTime<Utc>>,
    ) -> EnforcementResult {
        tracing::info!(chat_id, user_id, ?until, "Banning user");
        self.emit(&Outbound::Ban {
            chat_id,
            user_id,
            until,
        })
    }

    async fn unban_user(&self, chat_id: ChatId, user_id: UserId) -> EnforcementResult {
        tracing::info!(chat_id, user_id, "Unbanning user");
        self.emit(&Outbound::Unban { chat_id, user_id })
    }
}

/// Pick the worker responsible for a (chat, user) key.
pub fn shard_for(key: (ChatId, UserId), workers: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % workers.max(1) as u64) as usize
}

/// Handle one event, redelivering it after store failures.
///
/// A store error means nothing was committed for the event, so handling it
/// again cannot double count.
async fn process_with_redelivery<S, K>(
    pipeline: &ModerationPipeline<S>,
    sink: &K,
    mut event: ChatEvent,
    backoff: Duration,
) where
    S: ModerationStore,
    K: EnforcementSink + ?Sized,
{
    // Pin the timestamp so a redelivered event keeps its original time.
    event.timestamp.get_or_insert_with(Utc::now);
    let mut storage_retries = 0;

    loop {
        match handle_event(pipeline, sink, &event).await {
            Ok(HandleOutcome::Moderated { decision, .. }) => {
                tracing::debug!(
                    chat_id = decision.chat_id,
                    user_id = decision.user_id,
                    action = %decision.kind(),
                    "Message handled"
                );
                return;
            }
            Ok(_) => return,
            Err(ModerationError::Unavailable {
                consecutive_failures,
            }) => {
                tracing::warn!(
                    chat_id = event.chat_id,
                    user_id = event.user_id,
                    consecutive_failures,
                    "Moderation unavailable, pausing before redelivery"
                );
                tokio::time::sleep(backoff).await;
            }
            Err(ModerationError::StorageError(e)) if storage_retries < MAX_STORAGE_RETRIES => {
                storage_retries += 1;
                tracing::warn!(
                    chat_id = event.chat_id,
                    user_id = event.user_id,
                    attempt = storage_retries,
                    "Store error, redelivering event: {}",
                    e
                );
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                tracing::error!(
                    chat_id = event.chat_id,
                    user_id = event.user_id,
                    "Dropping event after error: {}",
                    e
                );
                return;
            }
        }
    }
}

/// Read events from stdin until EOF.
pub async fn run_console<S, K>(
    pipeline: Arc<ModerationPipeline<S>>,
    sink: Arc<K>,
    workers: usize,
) -> std::io::Result<()>
where
    S: ModerationStore + 'static,
    K: EnforcementSink + 'static,
{
    let workers = workers.max(1);
    let mut senders = Vec::with_capacity(workers);
    let mut handles = Vec::with_capacity(workers);

    for worker in 0..workers {
        let (tx, mut rx) = mpsc::channel::<ChatEvent>(WORKER_QUEUE_SIZE);
        let pipeline = Arc::clone(&pipeline);
        let sink = Arc::clone(&sink);

        handles.push(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                process_with_redelivery(
                    pipeline.as_ref(),
                    sink.as_ref(),
                    event,
                    REDELIVERY_BACKOFF,
                )
                .await;
            }
            tracing::debug!(worker, "Worker stopped");
        }));
        senders.push(tx);
    }

    tracing::info!(workers, "Console transport ready, reading events from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let event: ChatEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Skipping malformed event: {}", e);
                continue;
            }
        };

        let shard = shard_for(event.user_key(), workers);
        if senders[shard].send(event).await.is_err() {
            tracing::error!(shard, "Worker channel closed");
        }
    }

    // Close the channels and let workers drain.
    drop(senders);
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Worker task failed: {}", e);
        }
    }

    tracing::info!("Console transport finished");
    Ok(())
}
