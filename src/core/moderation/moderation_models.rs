// Moderation domain models - data structures for the moderation pipeline.
//
// These are pure domain types with no transport dependencies.
// The chat layer converts decisions into platform-specific calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Chat identifier. Group chats on most platforms use negative ids.
pub type ChatId = i64;
/// User identifier.
pub type UserId = u64;
/// Message identifier within a chat.
pub type MessageId = i64;

/// A text message entering the pipeline.
///
/// Non-text events never become an `InboundMessage`; the chat layer filters
/// them out before the pipeline is involved.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub message_id: MessageId,
    pub text: String,
    /// Supplied by the caller. The core never looks privileges up itself.
    pub is_privileged_sender: bool,
    pub timestamp: DateTime<Utc>,
}

/// Result of running the content classifier over a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Clean,
    LinkDetected,
    /// Carries the filter entry that matched.
    ForbiddenWordDetected(String),
}

/// Why a decision was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    LinkShared,
    ForbiddenWord(String),
    SpamDetected,
    /// Manual `/warn` from an admin.
    AdminWarn,
}

impl Reason {
    /// Stable machine-readable code for the reason.
    pub fn code(&self) -> &'static str {
        match self {
            Reason::LinkShared => "link_shared",
            Reason::ForbiddenWord(_) => "forbidden_word",
            Reason::SpamDetected => "spam_detected",
            Reason::AdminWarn => "admin_warn",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reason::LinkShared => write!(f, "link shared"),
            Reason::ForbiddenWord(_) => write!(f, "forbidden word used"),
            Reason::SpamDetected => write!(f, "spam detected"),
            Reason::AdminWarn => write!(f, "warned by an admin"),
        }
    }
}

/// Coarse action kind, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ActionKind {
    None,
    Delete,
    Warn,
    Mute,
    Ban,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::None => write!(f, "NONE"),
            ActionKind::Delete => write!(f, "DELETE"),
            ActionKind::Warn => write!(f, "WARN"),
            ActionKind::Mute => write!(f, "MUTE"),
            ActionKind::Ban => write!(f, "BAN"),
        }
    }
}

/// A single enforcement step, carried out in order by the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    DeleteMessage,
    /// The user now holds `warn_count` warnings.
    Warn { warn_count: u32 },
    Mute { duration: Duration },
    /// Issued when the warn count reached the ban threshold.
    Ban { warn_count: u32 },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::DeleteMessage => ActionKind::Delete,
            Action::Warn { .. } => ActionKind::Warn,
            Action::Mute { .. } => ActionKind::Mute,
            Action::Ban { .. } => ActionKind::Ban,
        }
    }
}

/// The pipeline's output for one message. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub chat_id: ChatId,
    /// Target user of every action in this decision.
    pub user_id: UserId,
    /// Message the decision was taken for, if any (`/warn` has none of its own).
    pub message_id: Option<MessageId>,
    pub actions: Vec<Action>,
    pub reason: Option<Reason>,
}

impl Decision {
    /// A "do nothing" decision.
    pub fn none(chat_id: ChatId, user_id: UserId, message_id: Option<MessageId>) -> Self {
        Self {
            chat_id,
            user_id,
            message_id,
            actions: Vec::new(),
            reason: None,
        }
    }

    pub fn is_none(&self) -> bool {
        self.actions.is_empty()
    }

    /// The most severe action in this decision.
    pub fn kind(&self) -> ActionKind {
        self.actions
            .iter()
            .map(Action::kind)
            .max()
            .unwrap_or(ActionKind::None)
    }

    /// Warn count reported by a warn or ban action.
    pub fn warn_count(&self) -> Option<u32> {
        self.actions.iter().find_map(|a| match a {
            Action::Warn { warn_count } | Action::Ban { warn_count } => Some(*warn_count),
            _ => None,
        })
    }

    #[allow(dead_code)]
    pub fn mute_duration(&self) -> Option<Duration> {
        self.actions.iter().find_map(|a| match a {
            Action::Mute { duration } => Some(*duration),
            _ => None,
        })
    }

    #[allow(dead_code)]
    pub fn has(&self, kind: ActionKind) -> bool {
        self.actions.iter().any(|a| a.kind() == kind)
    }
}

/// Per-(chat, user) flood state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloodRecord {
    pub last_event: DateTime<Utc>,
    pub consecutive_count: u32,
}

impl FloodRecord {
    /// Advance a flood record by one message at `now`.
    ///
    /// A gap larger than `window` resets the run to 1, otherwise the run grows.
    /// This is a reset-on-gap counter, not a sliding window.
    pub fn advance(
        previous: Option<FloodRecord>,
        now: DateTime<Utc>,
        window: chrono::Duration,
    ) -> Self {
        let consecutive_count = match previous {
            Some(prev) if now - prev.last_event <= window => {
                prev.consecutive_count.saturating_add(1)
            }
            _ => 1,
        };
        Self {
            last_event: now,
            consecutive_count,
        }
    }
}

/// Configuration for moderation behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// Max gap between messages that still counts toward a flood run.
    pub flood_window_seconds: u64,
    /// Consecutive messages that trigger a flood mute.
    pub flood_trigger_count: u32,
    /// Warn count at which the user is banned.
    pub warn_ban_threshold: u32,
    /// How long `/kick` bans before unbanning.
    pub kick_ban_duration_seconds: u64,
    /// `/mute` duration when no valid argument is given.
    pub default_mute_minutes: u64,
    /// Mute length applied on flood.
    pub flood_mute_seconds: u64,
    /// Upper bound on how stale a cached filter list may be.
    pub filter_cache_ttl_seconds: u64,
    /// Consecutive store failures before the pipeline reports itself unavailable.
    pub store_failures_before_unavailable: u32,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            flood_window_seconds: 4,
            flood_trigger_count: 5,
            warn_ban_threshold: 3,
            kick_ban_duration_seconds: 5,
            default_mute_minutes: 10,
            flood_mute_seconds: 300,
            filter_cache_ttl_seconds: 30,
            store_failures_before_unavailable: 3,
        }
    }
}

impl ModerationConfig {
    /// Build a config from an env-style lookup, falling back to defaults.
    ///
    /// Keys are the upper-cased field names, e.g. `FLOOD_WINDOW_SECONDS`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn read<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
            default: T,
        ) -> T {
            match lookup(key) {
                Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                    tracing::warn!(key, value = %raw, "Ignoring unparseable config value");
                    default
                }),
                None => default,
            }
        }

        let d = Self::default();
        Self {
            flood_window_seconds: read(&lookup, "FLOOD_WINDOW_SECONDS", d.flood_window_seconds),
            flood_trigger_count: read(&lookup, "FLOOD_TRIGGER_COUNT", d.flood_trigger_count),
            warn_ban_threshold: read(&lookup, "WARN_BAN_THRESHOLD", d.warn_ban_threshold),
            kick_ban_duration_seconds: read(
                &lookup,
                "KICK_BAN_DURATION_SECONDS",
                d.kick_ban_duration_seconds,
            ),
            default_mute_minutes: read(&lookup, "DEFAULT_MUTE_MINUTES", d.default_mute_minutes),
            flood_mute_seconds: read(&lookup, "FLOOD_MUTE_SECONDS", d.flood_mute_seconds),
            filter_cache_ttl_seconds: read(
                &lookup,
                "FILTER_CACHE_TTL_SECONDS",
                d.filter_cache_ttl_seconds,
            ),
            store_failures_before_unavailable: read(
                &lookup,
                "STORE_FAILURES_BEFORE_UNAVAILABLE",
                d.store_failures_before_unavailable,
            ),
        }
    }

    /// Load from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reject values that would make the state machine meaningless.
    pub fn validate(&self) -> Result<(), String> {
        if self.flood_window_seconds == 0 {
            return Err("flood_window_seconds must be at least 1".to_string());
        }
        if self.flood_trigger_count == 0 {
            return Err("flood_trigger_count must be at least 1".to_string());
        }
        if self.warn_ban_threshold == 0 {
            return Err("warn_ban_threshold must be at least 1".to_string());
        }
        if self.default_mute_minutes == 0 {
            return Err("default_mute_minutes must be at least 1".to_string());
        }
        if self.store_failures_before_unavailable == 0 {
            return Err("store_failures_before_unavailable must be at least 1".to_string());
        }
        Ok(())
    }

    pub fn flood_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.flood_window_seconds as i64)
    }

    pub fn flood_mute_duration(&self) -> Duration {
        Duration::from_secs(self.flood_mute_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_flood_record_grows_within_window() {
        let window = chrono::Duration::seconds(4);
        let first = FloodRecord::advance(None, at(0), window);
        assert_eq!(first.consecutive_count, 1);

        let second = FloodRecord::advance(Some(first), at(4), window);
        assert_eq!(second.consecutive_count, 2);
        assert_eq!(second.last_event, at(4));
    }

    #[test]
    fn test_flood_record_resets_after_gap() {
        let window = chrono::Duration::seconds(4);
        let busy = FloodRecord {
            last_event: at(0),
            consecutive_count: 9,
        };
        let later = at(0) + chrono::Duration::milliseconds(4_001);
        let next = FloodRecord::advance(Some(busy), later, window);
        assert_eq!(next.consecutive_count, 1);
    }

    #[test]
    fn test_decision_kind_is_most_severe() {
        let mut decision = Decision::none(1, 7, Some(10));
        assert_eq!(decision.kind(), ActionKind::None);

        decision.actions = vec![Action::DeleteMessage, Action::Ban { warn_count: 3 }];
        assert_eq!(decision.kind(), ActionKind::Ban);
        assert_eq!(decision.warn_count(), Some(3));
        assert!(decision.has(ActionKind::Delete));
    }

    #[test]
    fn test_config_from_lookup() {
        let config = ModerationConfig::from_lookup(|key| match key {
            "FLOOD_TRIGGER_COUNT" => Some("8".to_string()),
            "WARN_BAN_THRESHOLD" => Some("not-a-number".to_string()),
            _ => None,
        });

        assert_eq!(config.flood_trigger_count, 8);
        assert_eq!(config.warn_ban_threshold, 3);
        assert_eq!(config.flood_mute_seconds, 300);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation_rejects_zero() {
        let config = ModerationConfig {
            warn_ban_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
