// Core moderation module - link/filter classification, flood and warn
// tracking, and the pipeline that turns them into decisions.

pub mod content_classifier;
pub mod enforcement;
pub mod filter_registry;
pub mod flood_detector;
pub mod moderation_models;
pub mod moderation_service;
pub mod moderation_store;
pub mod warn_ledger;

pub use enforcement::{enforce, EnforcementError, EnforcementReport, EnforcementResult, EnforcementSink};
pub use filter_registry::normalize_word;
pub use moderation_models::*;
pub use moderation_service::ModerationPipeline;
pub use moderation_store::{ModerationError, ModerationStore};
