//! Stream provider trait and connection types.
//!
//! Defines the interface for upstream status streams.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::message::InboundMessage;

/// Lazily produced inbound messages. The stream ends when upstream closes
/// the connection; an `Err` item is always the last item.
pub type MessageStream = BoxStream<'static, Result<InboundMessage>>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Handle for an active subscription.
pub struct StreamConnection {
    /// Unique connection ID
    pub id: String,
    /// Provider that opened the connection
    pub provider: String,
    /// Track filter this connection is subscribed with
    pub filter: String,
    /// Connection start time
    pub connected_at: DateTime<Utc>,
    messages: MessageStream,
}

impl StreamConnection {
    pub fn new(
        provider: impl Into<String>,
        filter: impl Into<String>,
        messages: MessageStream,
    ) -> Self {
        let provider = provider.into();
        let seq = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            id: format!("{provider}-{seq}"),
            provider,
            filter: filter.into(),
            connected_at: Utc::now(),
            messages,
        }
    }

    /// Wait for the next message.
    ///
    /// `Ok(None)` means upstream ended the stream. Cancel-safe: dropping the
    /// future before it resolves loses no message.
    pub async fn next_message(&mut self) -> Result<Option<InboundMessage>> {
        self.messages.next().await.transpose()
    }
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("filter", &self.filter)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}

/// Source of upstream status streams.
#[async_trait]
pub trait StreamProvider: Send + Sync {
    /// Provider name used in logs.
    fn name(&self) -> &str;

    /// Authenticate and subscribe with `filter` as the track parameter.
    ///
    /// Rejected credentials surface as `WatchError::Auth`, a rejected filter
    /// as `WatchError::Subscribe`, and transport failures as recoverable
    /// errors.
    async fn connect(&self, filter: &str) -> Result<StreamConnection>;
}
