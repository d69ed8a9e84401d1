// Enforcement port - how decisions leave the core.
//
// Enforcement is best-effort. A failed call is logged and reported, never
// propagated, and never rolls back counter changes that preceded it.

use super::moderation_models::{Action, ActionKind, ChatId, Decision, MessageId, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnforcementError {
    /// The platform refused, e.g. the bot lacks admin rights.
    #[error("Enforcement rejected: {0}")]
    Rejected(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

pub type EnforcementResult = Result<(), EnforcementError>;

/// Platform operations the core needs. Implemented by the chat layer.
#[async_trait]
pub trait EnforcementSink: Send + Sync {
    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> EnforcementResult;

    async fn send_notice(&self, chat_id: ChatId, text: &str) -> EnforcementResult;

    /// Stop the user from sending messages until `until`.
    async fn restrict_user(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        until: DateTime<Utc>,
    ) -> EnforcementResult;

    /// Ban the user, permanently when `until` is `None`.
    async fn ban_user(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        until: Option<DateTime<Utc>>,
    ) -> EnforcementResult;

    async fn unban_user(&self, chat_id: ChatId, user_id: UserId) -> EnforcementResult;
}

/// What happened when a decision was enforced.
#[derive(Debug, Clone, Default)]
pub struct EnforcementReport {
    pub outcomes: Vec<(ActionKind, EnforcementResult)>,
}

impl EnforcementReport {
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|(_, r)| r.is_err()).count()
    }

    #[allow(dead_code)]
    pub fn all_succeeded(&self) -> bool {
        self.failures() == 0
    }

    fn record(&mut self, kind: ActionKind, result: EnforcementResult, decision: &Decision) {
        if let Err(e) = &result {
            tracing::warn!(
                chat_id = decision.chat_id,
                user_id = decision.user_id,
                action = %kind,
                "Enforcement failed: {}",
                e
            );
        }
        self.outcomes.push((kind, result));
    }
}

/// Text of the warning notice, e.g. "User 7 - Warn 1. link shared".
pub fn warn_notice(user_id: UserId, warn_count: u32, decision: &Decision) -> String {
    match &decision.reason {
        Some(reason) => format!("User {} - Warn {}. {}", user_id, warn_count, reason),
        None => format!("User {} - Warn {}.", user_id, warn_count),
    }
}

pub fn ban_notice(user_id: UserId, warn_count: u32) -> String {
    format!(
        "User {} reached {} warnings and has been banned.",
        user_id, warn_count
    )
}

pub fn mute_notice(user_id: UserId, duration: std::time::Duration) -> String {
    let minutes = duration.as_secs() / 60;
    if minutes > 0 {
        format!("Spam detected - user {} muted for {} minutes.", user_id, minutes)
    } else {
        format!(
            "Spam detected - user {} muted for {} seconds.",
            user_id,
            duration.as_secs()
        )
    }
}

/// Carry out a decision's actions in order.
///
/// Every step is attempted even if an earlier one failed.
pub async fn enforce<K: EnforcementSink + ?Sized>(sink: &K, decision: &Decision) -> EnforcementReport {
    let mut report = EnforcementReport::default();
    let chat_id = decision.chat_id;
    let user_id = decision.user_id;

    for action in &decision.actions {
        match action {
            Action::DeleteMessage => {
                let Some(message_id) = decision.message_id else {
                    continue;
                };
                let result = sink.delete_message(chat_id, message_id).await;
                report.record(ActionKind::Delete, result, decision);
            }
            Action::Warn { warn_count } => {
                let text = warn_notice(user_id, *warn_count, decision);
                let result = sink.send_notice(chat_id, &text).await;
                report.record(ActionKind::Warn, result, decision);
            }
            Action::Mute { duration } => {
                let until = Utc::now()
                    + chrono::Duration::from_std(*duration).unwrap_or(chrono::Duration::zero());
                let result = sink.restrict_user(chat_id, user_id, until).await;
                let muted = result.is_ok();
                report.record(ActionKind::Mute, result, decision);

                if muted {
                    let notice = sink.send_notice(chat_id, &mute_notice(user_id, *duration)).await;
                    if let Err(e) = notice {
                        tracing::warn!(chat_id, user_id, "Failed to send mute notice: {}", e);
                    }
                }
            }
            Action::Ban { warn_count } => {
                let result = sink.ban_user(chat_id, user_id, None).await;
                let banned = result.is_ok();
                report.record(ActionKind::Ban, result, decision);

                if banned {
                    let notice = sink.send_notice(chat_id, &ban_notice(user_id, *warn_count)).await;
                    if let Err(e) = notice {
                        tracing::warn!(chat_id, user_id, "Failed to send ban notice: {}", e);
                    }
                }
            }
        }
    }

    if !decision.is_none() {
        tracing::info!(
            chat_id,
            user_id,
            action = %decision.kind(),
            reason = decision.reason.as_ref().map(|r| r.code()),
            warn_count = decision.warn_count(),
            failures = report.failures(),
            "Decision enforced"
        );
    }

    report
}


#[cfg(test)]
mod tests {
    use super::testing::{RecordingSink, SinkCall};
    use super::*;
    use crate::core::moderation::moderation_models::Reason;
    use std::time::Duration;

    fn link_decision(actions: Vec<Action>) -> Decision {
        Decision {
            chat_id: 1,
            user_id: 7,
            message_id: Some(42),
            actions,
            reason: Some(Reason::LinkShared),
        }
    }

    #[tokio::test]
    async fn test_delete_then_warn_notice() {
        let sink = RecordingSink::new();
        let decision = link_decision(vec![Action::DeleteMessage, Action::Warn { warn_count: 1 }]);

        let report = enforce(&sink, &decision).await;

        assert!(report.all_succeeded());
        assert_eq!(
            sink.calls(),
            vec![
                SinkCall::Delete(1, 42),
                SinkCall::Notice(1, "User 7 - Warn 1. link shared".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_delete_does_not_stop_warn() {
        let sink = RecordingSink::rejecting(ActionKind::Delete);
        let decision = link_decision(vec![Action::DeleteMessage, Action::Warn { warn_count: 2 }]);

        let report = enforce(&sink, &decision).await;

        assert_eq!(report.failures(), 1);
        assert_eq!(report.outcomes[0].0, ActionKind::Delete);
        assert!(report.outcomes[0].1.is_err());
        assert_eq!(sink.notices().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_ban_is_reported_without_notice() {
        let sink = RecordingSink::rejecting(ActionKind::Ban);
        let decision = link_decision(vec![Action::Ban { warn_count: 3 }]);

        let report = enforce(&sink, &decision).await;

        assert_eq!(report.failures(), 1);
        assert!(sink.notices().is_empty());
    }

    #[tokio::test]
    async fn test_mute_restricts_and_notifies() {
        let sink = RecordingSink::new();
        let decision = Decision {
            chat_id: 3,
            user_id: 9,
            message_id: Some(1),
            actions: vec![Action::Mute {
                duration: Duration::from_secs(300),
            }],
            reason: Some(Reason::SpamDetected),
        };

        let report = enforce(&sink, &decision).await;

        assert!(report.all_succeeded());
        assert_eq!(sink.calls()[0], SinkCall::Restrict(3, 9));
        assert_eq!(
            sink.notices(),
            vec!["Spam detected - user 9 muted for 5 minutes.".to_string()]
        );
    }

    #[tokio::test]
    async fn test_none_decision_makes_no_calls() {
        let sink = RecordingSink::new();
        let report = enforce(&sink, &Decision::none(1, 7, Some(5))).await;
        assert!(report.outcomes.is_empty());
        assert!(sink.calls().is_empty());
    }
}
