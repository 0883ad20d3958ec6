//! Keyword evaluation for a single message.

use crate::keywords::KeywordSet;
use crate::message::{InboundMessage, MatchResult};

/// Evaluate `message` against a keyword snapshot.
///
/// Hits come back in snapshot order regardless of where each keyword first
/// appears in the text. Keywords with zero occurrences are left out, so an
/// empty result means the message needs no further processing.
pub fn evaluate(message: &InboundMessage, keywords: &KeywordSet) -> MatchResult {
    let text = message.text();
    let mut result = MatchResult::new();
    for keyword in keywords {
        let count = keyword.count_in(text);
        if count > 0 {
            result.push(keyword.pattern(), count);
        }
    }
    result
}
