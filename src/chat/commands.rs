// Admin and info commands for group chats.
//
// Input errors (missing reply target, missing arguments, bad mute length)
// are answered here and never reach the moderation pipeline.

use crate::core::moderation::{
    enforce, normalize_word, ChatId, EnforcementSink, ModerationError, ModerationPipeline,
    ModerationStore, Reason, UserId,
};
use chrono::{DateTime, Utc};

const HELP_TEXT: &str = "Commands:\n\
    /ban - ban the replied-to user\n\
    /kick - kick the replied-to user\n\
    /mute <minutes> - mute the replied-to user\n\
    /warn - warn the replied-to user\n\
    /resetwarns - reset the replied-to user's warnings\n\
    /addfilter <word> - add a filter word\n\
    /rmfilter <word> - remove a filter word\n\
    /filters - list filter words\n\
    Link filter ON\n\
    Filter words ON\n\
    Anti-spam ON";

const ADMIN_ONLY_TEXT: &str = "You need to be an admin to use this command.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Ban,
    Kick,
    /// Raw minutes argument, validated at execution time.
    Mute(Option<String>),
    Warn,
    ResetWarns,
    AddFilter(String),
    RemoveFilter(String),
    Filters,
}

impl Command {
    /// Parse `/name[@bot] args...`. Unknown commands yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;

        let mut parts = rest.split_whitespace();
        let head = parts.next()?;
        let name = head.split('@').next().unwrap_or(head).to_lowercase();
        let args: Vec<&str> = parts.collect();
        let joined = args.join(" ");

        let command = match name.as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            "ban" => Command::Ban,
            "kick" => Command::Kick,
            "mute" => Command::Mute(args.first().map(|a| a.to_string())),
            "warn" => Command::Warn,
            "resetwarns" => Command::ResetWarns,
            "addfilter" => Command::AddFilter(joined),
            "rmfilter" => Command::RemoveFilter(joined),
            "filters" => Command::Filters,
            _ => return None,
        };
        Some(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Help => "help",
            Command::Ban => "ban",
            Command::Kick => "kick",
            Command::Mute(_) => "mute",
            Command::Warn => "warn",
            Command::ResetWarns => "resetwarns",
            Command::AddFilter(_) => "addfilter",
            Command::RemoveFilter(_) => "rmfilter",
            Command::Filters => "filters",
        }
    }

    pub fn requires_admin(&self) -> bool {
        !matches!(self, Command::Start | Command::Help | Command::Filters)
    }
}

/// Who sent a command and where.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub is_privileged: bool,
    /// Author of the message the command replied to.
    pub reply_to_user: Option<UserId>,
    pub now: DateTime<Utc>,
}

/// Parse a `/mute` argument as positive minutes, else use the default.
pub fn mute_minutes(arg: Option<&str>, default_minutes: u64) -> u64 {
    arg.and_then(|a| a.trim().parse::<u64>().ok())
        .filter(|m| *m > 0)
        .unwrap_or(default_minutes)
}

/// Run a command. Returns the reply to post in the chat, if any.
pub async fn execute_command<S, K>(
    pipeline: &ModerationPipeline<S>,
    sink: &K,
    ctx: &CommandContext,
    command: Command,
) -> Result<Option<String>, ModerationError>
where
    S: ModerationStore,
    K: EnforcementSink + ?Sized,
{
    if command.requires_admin() && !ctx.is_privileged {
        tracing::info!(
            chat_id = ctx.chat_id,
            user_id = ctx.sender_id,
            command = command.name(),
            "Rejected admin command from non-admin"
        );
        return Ok(Some(ADMIN_ONLY_TEXT.to_string()));
    }

    let config = pipeline.config_for(ctx.chat_id);
    let chat_id = ctx.chat_id;

    let reply = match command {
        Command::Start => "I'm a group moderation bot - send /help to see all commands.".to_string(),
        Command::Help => HELP_TEXT.to_string(),

        Command::Ban => {
            let Some(target) = ctx.reply_to_user else {
                return Ok(Some("Reply to a message to use /ban".to_string()));
            };
            match sink.ban_user(chat_id, target, None).await {
                Ok(()) => {
                    tracing::info!(chat_id, user_id = target, "User banned by admin");
                    format!("User {} has been banned.", target)
                }
                Err(e) => {
                    tracing::warn!(chat_id, user_id = target, "Ban failed: {}", e);
                    "Could not ban the user.".to_string()
                }
            }
        }

        Command::Kick => {
            let Some(target) = ctx.reply_to_user else {
                return Ok(Some("Reply to a message to use /kick".to_string()));
            };
            let until = ctx.now + chrono::Duration::seconds(config.kick_ban_duration_seconds as i64);
            let kicked = match sink.ban_user(chat_id, target, Some(until)).await {
                Ok(()) => sink.unban_user(chat_id, target).await,
                Err(e) => Err(e),
            };
            match kicked {
                Ok(()) => {
                    tracing::info!(chat_id, user_id = target, "User kicked by admin");
                    format!("User {} has been kicked.", target)
                }
                Err(e) => {
                    tracing::warn!(chat_id, user_id = target, "Kick failed: {}", e);
                    "Could not kick the user.".to_string()
                }
            }
        }

        Command::Mute(arg) => {
            let Some(target) = ctx.reply_to_user else {
                return Ok(Some("Reply to a message to use /mute <minutes>".to_string()));
            };
            let minutes = mute_minutes(arg.as_deref(), config.default_mute_minutes);
            let until = ctx.now + chrono::Duration::minutes(minutes as i64);
            match sink.restrict_user(chat_id, target, until).await {
                Ok(()) => {
                    tracing::info!(chat_id, user_id = target, minutes, "User muted by admin");
                    format!("User {} muted for {} minutes.", target, minutes)
                }
                Err(e) => {
                    tracing::warn!(chat_id, user_id = target, "Mute failed: {}", e);
                    "Could not mute the user.".to_string()
                }
            }
        }

        Command::Warn => {
            let Some(target) = ctx.reply_to_user else {
                return Ok(Some("Reply to a message to use /warn".to_string()));
            };
            let decision = pipeline.warn_user(chat_id, target, Reason::AdminWarn).await?;
            // The warn or ban notice is posted by enforcement itself.
            enforce(sink, &decision).await;
            return Ok(None);
        }

        Command::ResetWarns => {
            let Some(target) = ctx.reply_to_user else {
                return Ok(Some("Reply to a message to use /resetwarns".to_string()));
            };
            pipeline.reset_warns(chat_id, target).await?;
            format!("Warnings reset for user {}.", target)
        }

        Command::AddFilter(word) => {
            let Some(word) = normalize_word(&word) else {
                return Ok(Some("Usage: /addfilter <word>".to_string()));
            };
            pipeline.add_filter(chat_id, &word).await?;
            format!("Filter added: {}", word)
        }

        Command::RemoveFilter(word) => {
            let Some(word) = normalize_word(&word) else {
                return Ok(Some("Usage: /rmfilter <word>".to_string()));
            };
            pipeline.remove_filter(chat_id, &word).await?;
            format!("Filter removed: {}", word)
        }

        Command::Filters => {
            let words = pipeline.list_filters(chat_id).await?;
            if words.is_empty() {
                "No filters set for this chat.".to_string()
            } else {
                words.join("\n")
            }
        }
    };

    Ok(Some(reply))
}
