//! Twitter statuses/filter stream provider.
//!
//! Opens a long-lived HTTP POST against the filter endpoint with HTTP Basic
//! credentials and `track=<filter>`, then decodes the chunked body as
//! newline-delimited JSON.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Result, WatchError};
use crate::message::InboundMessage;
use crate::stream::decoder::StatusDecoder;
use crate::stream::provider::{MessageStream, StreamConnection, StreamProvider};

/// Default filter endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://stream.twitter.com/1.1/statuses/filter.json";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Username/password pair for the upstream stream.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Stream provider for the Twitter filter endpoint.
pub struct TwitterStreamProvider {
    client: reqwest::Client,
    endpoint: Url,
    credentials: Credentials,
}

impl TwitterStreamProvider {
    /// Create a provider for `endpoint` (defaults to [`DEFAULT_ENDPOINT`]).
    pub fn new(credentials: Credentials, endpoint: Option<Url>) -> Result<Self> {
        let endpoint = match endpoint {
            Some(url) => url,
            None => Url::parse(DEFAULT_ENDPOINT)
                .map_err(|e| WatchError::config(format!("invalid default endpoint: {e}")))?,
        };

        // No overall request timeout: the body is an unbounded stream and an
        // idle upstream simply means waiting.
        let client = reqwest::Client::builder()
            .user_agent(concat!("tweetwatch/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            client,
            endpoint,
            credentials,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl StreamProvider for TwitterStreamProvider {
    fn name(&self) -> &str {
        "twitter"
    }

    async fn connect(&self, filter: &str) -> Result<StreamConnection> {
        debug!(endpoint = %self.endpoint, filter = %filter, "Opening filter stream");

        let response = self
            .client
            .post(self.endpoint.clone())
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .form(&[("track", filter)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_rejection(status, body.trim()));
        }

        info!(endpoint = %self.endpoint, filter = %filter, "Subscribed to filter stream");
        Ok(StreamConnection::new(
            self.name(),
            filter,
            decode_body(response.bytes_stream()),
        ))
    }
}

/// Map a non-success status to the error taxonomy.
fn classify_rejection(status: StatusCode, body: &str) -> WatchError {
    let detail = if body.is_empty() {
        status.to_string()
    } else {
        format!("{status}: {body}")
    };

    match status.as_u16() {
        401 | 403 => WatchError::auth(detail),
        // 420 is the legacy "Enhance Your Calm" rate limit.
        420 | 429 => {
            warn!(%status, "Upstream is rate limiting connections");
            WatchError::connection(detail)
        }
        s if (500..600).contains(&s) => WatchError::connection(detail),
        s if (400..500).contains(&s) => WatchError::subscribe(detail),
        _ => WatchError::connection(detail),
    }
}

struct BodyState<S> {
    body: std::pin::Pin<Box<S>>,
    decoder: StatusDecoder,
    ready: VecDeque<Result<InboundMessage>>,
}

/// Turn a chunked HTTP body into a message stream.
///
/// The stream ends after the body ends or after the first error item.
fn decode_body<S>(body: S) -> MessageStream
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let state = BodyState {
        body: Box::pin(body),
        decoder: StatusDecoder::new(),
        ready: VecDeque::new(),
    };

    futures::stream::unfold(Some(state), |state| async move {
        let mut state = state?;
        loop {
            if let Some(item) = state.ready.pop_front() {
                let next = if item.is_ok() { Some(state) } else { None };
                return Some((item, next));
            }
            match state.body.next().await {
                Some(Ok(chunk)) => state.decoder.feed(&chunk, &mut state.ready),
                Some(Err(e)) => {
                    return Some((
                        Err(WatchError::connection(format!("stream read failed: {e}"))),
                        None,
                    ));
                }
                None => return None,
            }
        }
    })
    .boxed()
}
