// Chat layer - the transport-facing adapter around the moderation core.

#[path = "commands.rs"]
pub mod commands;

#[path = "message_handler.rs"]
pub mod message_handler;

#[path = "console.rs"]
pub mod console;

pub use console::{run_console, LoggingSink};
