//! Per-message types flowing through the watch pipeline.
//!
//! None of these outlive the processing step of the message they were built
//! for: an [`InboundMessage`] is matched into a [`MatchResult`], the two are
//! paired into an [`AlertEvent`] when something matched, and all three are
//! dropped before the next message is pulled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single status received from the upstream stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Platform-specific status ID, if upstream supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Screen name of the author (without the leading `@`).
    pub author: String,
    /// Status text with embedded newlines escaped as `\n`.
    text: String,
    /// Time the message was received.
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Create a message, escaping embedded newlines so the text stays single-line.
    pub fn new(author: impl Into<String>, text: impl AsRef<str>) -> Self {
        Self {
            id: None,
            author: author.into(),
            text: sanitize_text(text.as_ref()),
            received_at: Utc::now(),
        }
    }

    /// Attach the upstream status ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sanitized status text.
    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Replace each newline with the two-character sequence `\n`.
pub fn sanitize_text(text: &str) -> String {
    if text.contains('\n') {
        text.replace('\n', "\\n")
    } else {
        text.to_string()
    }
}

/// One matched keyword and how often it occurred in the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordHit {
    pub keyword: String,
    pub count: usize,
}

impl KeywordHit {
    pub fn new(keyword: impl Into<String>, count: usize) -> Self {
        Self {
            keyword: keyword.into(),
            count,
        }
    }
}

/// Matched keywords for one message, in keyword-store order.
///
/// Every hit has a count of at least one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchResult {
    hits: Vec<KeywordHit>,
}

impl MatchResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hit. Zero counts are ignored.
    pub fn push(&mut self, keyword: impl Into<String>, count: usize) {
        if count > 0 {
            self.hits.push(KeywordHit::new(keyword, count));
        }
    }

    pub fn hits(&self) -> &[KeywordHit] {
        &self.hits
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// A message paired with its non-empty match result.
#[derive(Debug, Clone, Copy)]
pub struct AlertEvent<'a> {
    pub message: &'a InboundMessage,
    pub result: &'a MatchResult,
}

impl<'a> AlertEvent<'a> {
    /// Pair a message with its result, or `None` when nothing matched.
    pub fn new(message: &'a InboundMessage, result: &'a MatchResult) -> Option<Self> {
        if result.is_empty() {
            None
        } else {
            Some(Self { message, result })
        }
    }
}
