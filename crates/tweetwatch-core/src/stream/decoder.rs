//! Line decoder for the newline-delimited JSON status stream.
//!
//! Upstream writes one JSON object per `\r\n`-terminated line and sends bare
//! `\r\n` keep-alives when idle. Chunks from the HTTP body may split a line
//! anywhere, so partial lines are buffered until their terminator arrives.

use std::collections::VecDeque;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Result, WatchError};
use crate::message::InboundMessage;

/// Longest line accepted before the stream is treated as broken.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
struct RawStatus {
    #[serde(default)]
    id_str: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    extended_tweet: Option<RawExtendedTweet>,
    #[serde(default)]
    user: Option<RawUser>,
    #[serde(default)]
    disconnect: Option<RawDisconnect>,
    #[serde(default)]
    warning: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawExtendedTweet {
    full_text: String,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    screen_name: String,
}

#[derive(Debug, Deserialize)]
struct RawDisconnect {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    reason: Option<String>,
}

/// Incremental decoder from body chunks to inbound messages.
#[derive(Debug, Default)]
pub struct StatusDecoder {
    buffer: Vec<u8>,
}

impl StatusDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one body chunk, appending decoded items to `out`.
    ///
    /// Keep-alives and non-status notices produce nothing. A malformed line,
    /// an oversized line, or an upstream disconnect notice produces an `Err`
    /// item; callers should stop reading after it.
    pub fn feed(&mut self, chunk: &[u8], out: &mut VecDeque<Result<InboundMessage>>) {
        self.buffer.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(pos) = memchr::memchr(b'\n', &self.buffer[start..]) {
            let end = start + pos;
            let line = self.buffer[start..end].trim_ascii();
            start = end + 1;

            if line.is_empty() {
                continue;
            }
            match decode_line(line) {
                Ok(Some(message)) => out.push_back(Ok(message)),
                Ok(None) => {}
                Err(e) => {
                    out.push_back(Err(e));
                    self.buffer.clear();
                    return;
                }
            }
        }
        self.buffer.drain(..start);

        if self.buffer.len() > MAX_LINE_BYTES {
            self.buffer.clear();
            out.push_back(Err(WatchError::connection(format!(
                "protocol error: line exceeds {MAX_LINE_BYTES} bytes"
            ))));
        }
    }

    /// Bytes buffered for an incomplete line.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

/// Decode one complete JSON line.
fn decode_line(line: &[u8]) -> Result<Option<InboundMessage>> {
    let raw: RawStatus = serde_json::from_slice(line)
        .map_err(|e| WatchError::connection(format!("protocol error: {e}")))?;

    if let Some(disconnect) = raw.disconnect {
        return Err(WatchError::connection(format!(
            "upstream disconnect (code {}): {}",
            disconnect.code.unwrap_or_default(),
            disconnect.reason.as_deref().unwrap_or("no reason given")
        )));
    }

    if let Some(warning) = raw.warning {
        warn!(%warning, "Upstream stall warning");
        return Ok(None);
    }

    let text = raw.extended_tweet.map(|ext| ext.full_text).or(raw.text);
    match (text, raw.user) {
        (Some(text), Some(user)) => {
            let mut message = InboundMessage::new(user.screen_name, text);
            if let Some(id) = raw.id_str {
                message = message.with_id(id);
            }
            Ok(Some(message))
        }
        _ => {
            debug!(bytes = line.len(), "Skipping non-status notice");
            Ok(None)
        }
    }
}
