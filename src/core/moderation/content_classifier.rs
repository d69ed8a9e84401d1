// Content classifier - stateless link and forbidden-word detection.

use super::moderation_models::Classification;
use regex::Regex;
use std::sync::LazyLock;

/// Scheme URLs, `t.me/` links, `www.` prefixes, and any token with a dot
/// followed by 2+ non-space characters.
///
/// The last branch over-matches on purpose: "e.g." style abbreviations and
/// version strings like "1.10" count as links.
const LINK_PATTERN: &str = r"(https?://\S+|t\.me/\S+|www\.\S+|\S+\.\S{2,})";

static LINK_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(LINK_PATTERN).expect("link pattern is a valid regex"));

/// Classifies message text. Pure function of (text, filter snapshot).
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentClassifier;

impl ContentClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Whether the text contains anything the link heuristic matches.
    pub fn contains_link(&self, text: &str) -> bool {
        LINK_REGEX.is_match(&text.to_lowercase())
    }

    /// First filter word contained in the text, in slice order.
    ///
    /// Filter words are expected to be normalised (lower-cased, trimmed).
    pub fn find_forbidden_word<'a>(&self, text: &str, filters: &'a [String]) -> Option<&'a str> {
        let lowered = text.to_lowercase();
        filters
            .iter()
            .filter(|word| !word.is_empty())
            .find(|word| lowered.contains(word.as_str()))
            .map(String::as_str)
    }

    /// Classify a message. Links take precedence over forbidden words.
    pub fn classify(&self, text: &str, filters: &[String]) -> Classification {
        if self.contains_link(text) {
            return Classification::LinkDetected;
        }

        match self.find_forbidden_word(text, filters) {
            Some(word) => Classification::ForbiddenWordDetected(word.to_string()),
            None => Classification::Clean,
        }
    }
}
