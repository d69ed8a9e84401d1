// Routes inbound chat events to the command layer or the moderation pipeline.

use super::commands::{execute_command, Command, CommandContext};
use crate::core::moderation::{
    enforce, ChatId, Decision, EnforcementReport, EnforcementSink, InboundMessage, MessageId,
    ModerationError, ModerationPipeline, ModerationStore, UserId,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// One event as delivered by the transport.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatEvent {
    pub chat_id: ChatId,
    pub user_id: UserId,
    #[serde(default)]
    pub message_id: MessageId,
    /// `None` for non-text events (stickers, photos, joins...).
    #[serde(default)]
    pub text: Option<String>,
    /// Admin, owner or bot owner, as determined by the transport.
    #[serde(default)]
    pub is_privileged: bool,
    #[serde(default)]
    pub reply_to_user: Option<UserId>,
    #[serde(default)]
    pub new_members: Vec<UserId>,
    /// Defaults to arrival time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatEvent {
    /// Key used to keep a user's events in order.
    pub fn user_key(&self) -> (ChatId, UserId) {
        (self.chat_id, self.user_id)
    }
}

#[derive(Debug)]
pub enum HandleOutcome {
    /// Nothing to do (no text, unknown command).
    Ignored,
    Welcomed(usize),
    Command { name: &'static str },
    Moderated {
        decision: Decision,
        report: EnforcementReport,
    },
}

/// Handle one event end to end.
///
/// Only store failures are returned as errors; enforcement problems are
/// logged inside the report.
pub async fn handle_event<S, K>(
    pipeline: &ModerationPipeline<S>,
    sink: &K,
    event: &ChatEvent,
) -> Result<HandleOutcome, ModerationError>
where
    S: ModerationStore,
    K: EnforcementSink + ?Sized,
{
    if !event.new_members.is_empty() {
        for member in &event.new_members {
            let greeting = format!("Welcome, user {}!", member);
            if let Err(e) = sink.send_notice(event.chat_id, &greeting).await {
                tracing::warn!(chat_id = event.chat_id, "Failed to send welcome: {}", e);
            }
        }
        return Ok(HandleOutcome::Welcomed(event.new_members.len()));
    }

    let text = match event.text.as_deref() {
        Some(text) if !text.trim().is_empty() => text,
        _ => return Ok(HandleOutcome::Ignored),
    };
    let now = event.timestamp.unwrap_or_else(Utc::now);

    if text.trim_start().starts_with('/') {
        let Some(command) = Command::parse(text) else {
            return Ok(HandleOutcome::Ignored);
        };
        let name = command.name();
        let ctx = CommandContext {
            chat_id: event.chat_id,
            sender_id: event.user_id,
            is_privileged: event.is_privileged,
            reply_to_user: event.reply_to_user,
            now,
        };

        if let Some(reply) = execute_command(pipeline, sink, &ctx, command).await? {
            if let Err(e) = sink.send_notice(event.chat_id, &reply).await {
                tracing::warn!(chat_id = event.chat_id, command = name, "Failed to reply: {}", e);
            }
        }
        return Ok(HandleOutcome::Command { name });
    }

    let message = InboundMessage {
        chat_id: event.chat_id,
        user_id: event.user_id,
        message_id: event.message_id,
        text: text.to_string(),
        is_privileged_sender: event.is_privileged,
        timestamp: now,
    };

    let decision = pipeline.process(&message).await?;
    let report = enforce(sink, &decision).await;

    Ok(HandleOutcome::Moderated { decision, report })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::moderation::enforcement::testing::{RecordingSink, SinkCall};
    use crate::core::moderation::{ActionKind, ModerationConfig};
    use crate::infra::moderation::InMemoryModerationStore;
    use std::sync::Arc;

    fn pipeline() -> ModerationPipeline<InMemoryModerationStore> {
        ModerationPipeline::new(
            Arc::new(InMemoryModerationStore::new()),
            ModerationConfig::default(),
        )
        .unwrap()
    }

    fn text_event(text: &str) -> ChatEvent {
        ChatEvent {
            chat_id: 1,
            user_id: 7,
            message_id: 99,
            text: Some(text.to_string()),
            is_privileged: false,
            reply_to_user: None,
            new_members: Vec::new(),
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn test_non_text_event_is_ignored() {
        let pipeline = pipeline();
        let sink = RecordingSink::new();
        let event = ChatEvent {
            text: None,
            ..text_event("")
        };

        let outcome = handle_event(&pipeline, &sink, &event).await.unwrap();
        assert!(matches!(outcome, HandleOutcome::Ignored));
        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_link_scenario_end_to_end() {
        let pipeline = pipeline();
        let sink = RecordingSink::new();

        let outcome = handle_event(&pipeline, &sink, &text_event("check http://evil.example"))
            .await
            .unwrap();

        let HandleOutcome::Moderated { decision, report } = outcome else {
            panic!("expected a moderation outcome");
        };
        assert_eq!(decision.kind(), ActionKind::Warn);
        assert_eq!(decision.warn_count(), Some(1));
        assert!(report.all_succeeded());
        assert_eq!(
            sink.calls(),
            vec![
                SinkCall::Delete(1, 99),
                SinkCall::Notice(1, "User 7 - Warn 1. link shared".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_commands_are_not_moderated() {
        let pipeline = pipeline();
        let sink = RecordingSink::new();

        let outcome = handle_event(&pipeline, &sink, &text_event("/help"))
            .await
            .unwrap();

        assert!(matches!(outcome, HandleOutcome::Command { name: "help" }));
        assert_eq!(pipeline.warn_count(1, 7).await.unwrap(), 0);
        assert_eq!(sink.notices().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_enforcement_keeps_counter() {
        let pipeline = pipeline();
        let sink = RecordingSink::rejecting(ActionKind::Delete);

        let outcome = handle_event(&pipeline, &sink, &text_event("www.bad.example"))
            .await
            .unwrap();

        let HandleOutcome::Moderated { report, .. } = outcome else {
            panic!("expected a moderation outcome");
        };
        assert_eq!(report.failures(), 1);
        assert_eq!(pipeline.warn_count(1, 7).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_new_members_welcomed() {
        let pipeline = pipeline();
        let sink = RecordingSink::new();
        let event = ChatEvent {
            text: None,
            new_members: vec![10, 11],
            ..text_event("")
        };

        let outcome = handle_event(&pipeline, &sink, &event).await.unwrap();
        assert!(matches!(outcome, HandleOutcome::Welcomed(2)));
        assert_eq!(sink.notices(), vec!["Welcome, user 10!", "Welcome, user 11!"]);
    }

    #[test]
    fn test_event_deserializes_with_defaults() {
        let event: ChatEvent =
            serde_json::from_str(r#"{"chat_id": -100, "user_id": 7, "text": "hi"}"#).unwrap();
        assert_eq!(event.user_key(), (-100, 7));
        assert_eq!(event.text.as_deref(), Some("hi"));
        assert!(!event.is_privileged);
        assert!(event.timestamp.is_none());
    }
}
