//! Alert delivery: local log channel and remote security-event receiver.
//!
//! Local alerts go either to a diagnostic stream (foreground mode) or to the
//! system logger, opened and closed around every alert. Remote alerts are sent
//! as exactly one UDP datagram per alert, on a fresh socket, under a short
//! timeout.

use std::io::Write;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::net::UdpSocket;
use tracing::{debug, trace};

use crate::error::{Result, WatchError};

/// Fixed identifier used for the system log channel.
pub const PROGRAM_IDENT: &str = "tweetwatch";

/// Default UDP port of a syslog receiver.
pub const DEFAULT_REMOTE_PORT: u16 = 514;

/// Syslog facility for local alerts.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Facility {
    Kern,
    User,
    Mail,
    #[default]
    Daemon,
    Auth,
    Syslog,
    Lpr,
    News,
    Uucp,
    Cron,
    Authpriv,
    Ftp,
    Local0,
    Local1,
    Local2,
    Local3,
    Local4,
    Local5,
    Local6,
    Local7,
}

#[cfg(unix)]
impl Facility {
    fn as_raw(self) -> libc::c_int {
        match self {
            Self::Kern => libc::LOG_KERN,
            Self::User => libc::LOG_USER,
            Self::Mail => libc::LOG_MAIL,
            Self::Daemon => libc::LOG_DAEMON,
            Self::Auth => libc::LOG_AUTH,
            Self::Syslog => libc::LOG_SYSLOG,
            Self::Lpr => libc::LOG_LPR,
            Self::News => libc::LOG_NEWS,
            Self::Uucp => libc::LOG_UUCP,
            Self::Cron => libc::LOG_CRON,
            Self::Authpriv => libc::LOG_AUTHPRIV,
            Self::Ftp => libc::LOG_FTP,
            Self::Local0 => libc::LOG_LOCAL0,
            Self::Local1 => libc::LOG_LOCAL1,
            Self::Local2 => libc::LOG_LOCAL2,
            Self::Local3 => libc::LOG_LOCAL3,
            Self::Local4 => libc::LOG_LOCAL4,
            Self::Local5 => libc::LOG_LOCAL5,
            Self::Local6 => libc::LOG_LOCAL6,
            Self::Local7 => libc::LOG_LOCAL7,
        }
    }
}

/// Syslog priority a line is written at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SyslogLevel {
    Err,
    Warning,
    Notice,
    Info,
    Debug,
}

#[cfg(unix)]
impl SyslogLevel {
    fn as_raw(self) -> libc::c_int {
        match self {
            Self::Err => libc::LOG_ERR,
            Self::Warning => libc::LOG_WARNING,
            Self::Notice => libc::LOG_NOTICE,
            Self::Info => libc::LOG_INFO,
            Self::Debug => libc::LOG_DEBUG,
        }
    }
}

/// Shared writer for foreground-mode alert lines.
pub type DiagnosticWriter = Arc<Mutex<dyn Write + Send>>;

/// Where local alert lines go.
#[derive(Clone)]
pub enum LocalChannel {
    /// Foreground/debug mode: one line per alert on a diagnostic stream.
    Diagnostic(DiagnosticWriter),
    /// Detached mode: system logger at informational priority.
    Syslog(Facility),
}

impl LocalChannel {
    /// Diagnostic channel writing to stderr.
    pub fn stderr() -> Self {
        Self::Diagnostic(Arc::new(Mutex::new(std::io::stderr())))
    }
}

impl std::fmt::Debug for LocalChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Diagnostic(_) => write!(f, "Diagnostic"),
            Self::Syslog(facility) => write!(f, "Syslog({facility})"),
        }
    }
}

/// Remote security-event receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteReceiver {
    /// Receiver host name or address.
    pub host: String,
    /// Receiver UDP port.
    #[serde(default = "default_remote_port")]
    pub port: u16,
    /// Upper bound for resolving and sending one datagram, in milliseconds.
    #[serde(default = "default_send_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_remote_port() -> u16 {
    DEFAULT_REMOTE_PORT
}

fn default_send_timeout_ms() -> u64 {
    1000
}

impl RemoteReceiver {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout_ms: default_send_timeout_ms(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// What to do when a remote alert cannot be delivered.
///
/// `Fatal` couples monitor availability to receiver availability: the first
/// failed datagram stops the monitor. `Log` records the failure and keeps
/// watching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryPolicy {
    #[default]
    Fatal,
    Log,
}

/// Delivers rendered alerts.
#[derive(Debug, Clone)]
pub struct AlertSink {
    local: LocalChannel,
    remote: Option<RemoteReceiver>,
    delivery_policy: DeliveryPolicy,
}

impl AlertSink {
    pub fn new(local: LocalChannel) -> Self {
        Self {
            local,
            remote: None,
            delivery_policy: DeliveryPolicy::default(),
        }
    }

    pub fn with_remote(mut self, remote: RemoteReceiver) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_delivery_policy(mut self, policy: DeliveryPolicy) -> Self {
        self.delivery_policy = policy;
        self
    }

    pub fn remote(&self) -> Option<&RemoteReceiver> {
        self.remote.as_ref()
    }

    pub fn delivery_policy(&self) -> DeliveryPolicy {
        self.delivery_policy
    }

    /// Write one alert line to the local channel.
    pub fn emit_local(&self, line: &str) -> Result<()> {
        match &self.local {
            LocalChannel::Diagnostic(writer) => {
                let mut writer = writer.lock();
                writeln!(writer, "{line}")?;
                writer.flush()?;
                Ok(())
            }
            LocalChannel::Syslog(facility) => {
                write_syslog(*facility, SyslogLevel::Info, line)?;
                debug!(%facility, ident = PROGRAM_IDENT, "Alert written to syslog");
                Ok(())
            }
        }
    }

    /// Send one security event to the configured receiver.
    ///
    /// Does nothing when no receiver is configured.
    pub async fn emit_remote(&self, event: &str) -> Result<()> {
        match &self.remote {
            Some(remote) => send_datagram(remote, event).await,
            None => Ok(()),
        }
    }
}

/// Send `payload` as a single datagram to `receiver`.
pub async fn send_datagram(receiver: &RemoteReceiver, payload: &str) -> Result<()> {
    let send = async {
        let target = tokio::net::lookup_host((receiver.host.as_str(), receiver.port))
            .await
            .map_err(|e| WatchError::delivery(format!("cannot resolve {}: {}", receiver.host, e)))?
            .next()
            .ok_or_else(|| {
                WatchError::delivery(format!("no address found for {}", receiver.host))
            })?;

        let bind: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind)
            .await
            .map_err(|e| WatchError::delivery(format!("cannot create socket: {e}")))?;

        let sent = socket
            .send_to(payload.as_bytes(), target)
            .await
            .map_err(|e| WatchError::delivery(format!("send to {target} failed: {e}")))?;
        if sent != payload.len() {
            return Err(WatchError::delivery(format!(
                "short send to {target}: {sent} of {} bytes",
                payload.len()
            )));
        }

        trace!(%target, bytes = sent, "Security event sent");
        Ok(())
    };

    tokio::time::timeout(receiver.timeout(), send)
        .await
        .map_err(|_| {
            WatchError::delivery(format!(
                "sending to {}:{} timed out after {:?}",
                receiver.host,
                receiver.port,
                receiver.timeout()
            ))
        })?
}

/// Write one line to the system logger under [`PROGRAM_IDENT`].
///
/// Emits no tracing events, so it can back a log writer.
#[cfg(unix)]
pub fn write_syslog(facility: Facility, level: SyslogLevel, line: &str) -> Result<()> {
    use std::ffi::{CStr, CString};

    const IDENT: &CStr = c"tweetwatch";
    const FORMAT: &CStr = c"%s";

    let message = CString::new(line.replace('\0', ""))
        .map_err(|e| WatchError::other(format!("invalid syslog message: {e}")))?;

    // SAFETY: `IDENT` is 'static so openlog may keep the pointer; the message
    // goes through a "%s" format so it is never interpreted as a format string.
    unsafe {
        libc::openlog(IDENT.as_ptr(), libc::LOG_PID, facility.as_raw());
        libc::syslog(level.as_raw(), FORMAT.as_ptr(), message.as_ptr());
        libc::closelog();
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn write_syslog(_facility: Facility, _level: SyslogLevel, _line: &str) -> Result<()> {
    Err(WatchError::other(
        "system logger is not available on this platform, run in foreground mode",
    ))
}
