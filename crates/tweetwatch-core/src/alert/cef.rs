//! CEF (Common Event Format) security-event rendering.
//!
//! Events are framed the way syslog receivers expect them:
//!
//! ```text
//! <29>Oct 17 09:05:01 CEF:0|blog.rootshell.be|tweetwatch|0.1.0|keyword-found|One or more keyword matched|5|destinationDnsDomain=twitter.com msg=... cs1=breach cs1Label=Keyword1Name cn1=2 cn1Label=Keyword1Count
//! ```

use std::fmt::Write;

use chrono::{DateTime, Local};
use tracing::warn;

use crate::message::AlertEvent;

/// Syslog priority prefix: facility daemon (3), severity notice (5).
pub const SYSLOG_PRIORITY: &str = "<29>";

/// Maximum number of `cs{i}`/`cn{i}` keyword groups in one event.
pub const MAX_KEYWORD_FIELDS: usize = 6;

const DEVICE_VENDOR: &str = "blog.rootshell.be";
const SIGNATURE_ID: &str = "keyword-found";
const EVENT_NAME: &str = "One or more keyword matched";
const DESTINATION_DOMAIN: &str = "twitter.com";
const EVENT_MESSAGE: &str = "Interesting data has been found on twitter.com.";

/// Renders alerts as single-line CEF events.
#[derive(Debug, Clone)]
pub struct CefFormatter {
    /// Device product
    product: String,
    /// Device version
    version: String,
}

impl CefFormatter {
    pub fn new(product: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            product: product.into(),
            version: version.into(),
        }
    }

    /// Format an alert stamped with the current local time.
    pub fn format(&self, event: &AlertEvent<'_>, severity: u8) -> String {
        self.format_at(event, severity, Local::now())
    }

    /// Format an alert stamped with `timestamp`.
    ///
    /// Only the first [`MAX_KEYWORD_FIELDS`] hits are encoded. Extra hits are
    /// dropped with a warning; the caller still gets a valid event.
    pub fn format_at(
        &self,
        event: &AlertEvent<'_>,
        severity: u8,
        timestamp: DateTime<Local>,
    ) -> String {
        let mut out = format!(
            "{}{} CEF:0|{}|{}|{}|{}|{}|{}|destinationDnsDomain={} msg={}",
            SYSLOG_PRIORITY,
            timestamp.format("%b %e %H:%M:%S"),
            DEVICE_VENDOR,
            self.product,
            self.version,
            SIGNATURE_ID,
            EVENT_NAME,
            severity,
            DESTINATION_DOMAIN,
            EVENT_MESSAGE,
        );

        let hits = event.result.hits();
        if hits.len() > MAX_KEYWORD_FIELDS {
            warn!(
                matched = hits.len(),
                encoded = MAX_KEYWORD_FIELDS,
                author = %event.message.author,
                "Too many matched keywords for one security event, truncating"
            );
        }

        for (i, hit) in hits.iter().take(MAX_KEYWORD_FIELDS).enumerate() {
            let n = i + 1;
            let _ = write!(
                out,
                " cs{n}={} cs{n}Label=Keyword{n}Name cn{n}={} cn{n}Label=Keyword{n}Count",
                hit.keyword, hit.count
            );
        }

        out
    }
}
