//! Human-readable alert line.

use std::fmt::Write;

use crate::message::AlertEvent;

/// Render the local log line for an alert.
///
/// `Found Tweet from @<author> : <text> : <kw1> (<n1> times) <kw2> (<n2> times) `
/// with every keyword pair followed by a single space.
pub fn human_line(event: &AlertEvent<'_>) -> String {
    let mut line = format!(
        "Found Tweet from @{} : {} : ",
        event.message.author,
        event.message.text()
    );
    for hit in event.result.hits() {
        let _ = write!(line, "{} ({} times) ", hit.keyword, hit.count);
    }
    line
}
