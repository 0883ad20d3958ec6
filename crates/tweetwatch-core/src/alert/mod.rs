//! Alert rendering.
//!
//! An alert is rendered twice: a human-readable line for the local log
//! channel and a CEF event for an optional remote security receiver.

pub mod cef;
pub mod format;

pub use cef::{CefFormatter, MAX_KEYWORD_FIELDS, SYSLOG_PRIORITY};
pub use format::human_line;

use crate::message::AlertEvent;

/// Renders alerts with a fixed product identity and severity.
#[derive(Debug, Clone)]
pub struct AlertFormatter {
    cef: CefFormatter,
    severity: u8,
}

impl AlertFormatter {
    pub fn new(product: impl Into<String>, version: impl Into<String>, severity: u8) -> Self {
        Self {
            cef: CefFormatter::new(product, version),
            severity,
        }
    }

    pub fn human_line(&self, event: &AlertEvent<'_>) -> String {
        human_line(event)
    }

    pub fn security_event(&self, event: &AlertEvent<'_>) -> String {
        self.cef.format(event, self.severity)
    }

    pub fn severity(&self) -> u8 {
        self.severity
    }
}
