//! End-to-end monitor runs against a scripted upstream.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use tweetwatch_core::stream::MessageStream;
use tweetwatch_core::{
    AlertFormatter, AlertSink, DeliveryPolicy, InboundMessage, KeywordStore, LifecycleControl,
    LifecycleController, LocalChannel, MonitorConfig, ReconnectPolicy, RemoteReceiver, Result,
    RetryPolicy, RunStats, StreamConnection, StreamProvider, WatchError,
};

type Feed = mpsc::UnboundedSender<Result<InboundMessage>>;

enum Outcome {
    Stream(MessageStream),
    Fail(WatchError),
}

/// Upstream that hands out pre-scripted connections in order. Once the
/// script runs out, connecting hangs forever.
#[derive(Default)]
struct ScriptedProvider {
    outcomes: Mutex<VecDeque<Outcome>>,
    filters: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Script a connection fed through the returned sender.
    fn push_feed(&self) -> Feed {
        let (tx, rx) = mpsc::unbounded();
        self.outcomes.lock().push_back(Outcome::Stream(rx.boxed()));
        tx
    }

    fn push_failure(&self, err: WatchError) {
        self.outcomes.lock().push_back(Outcome::Fail(err));
    }

    fn filters(&self) -> Vec<String> {
        self.filters.lock().clone()
    }
}

#[async_trait]
impl StreamProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(&self, filter: &str) -> Result<StreamConnection> {
        self.filters.lock().push(filter.to_string());
        let outcome = self.outcomes.lock().pop_front();
        match outcome {
            Some(Outcome::Stream(messages)) => Ok(StreamConnection::new("scripted", filter, messages)),
            Some(Outcome::Fail(err)) => Err(err),
            None => std::future::pending().await,
        }
    }
}

struct Harness {
    _dir: TempDir,
    keywords: PathBuf,
    output: Arc<Mutex<Vec<u8>>>,
    provider: Arc<ScriptedProvider>,
}

impl Harness {
    fn new(keywords: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keywords.txt");
        std::fs::write(&path, keywords).unwrap();
        Self {
            _dir: dir,
            keywords: path,
            output: Arc::new(Mutex::new(Vec::new())),
            provider: ScriptedProvider::new(),
        }
    }

    fn keywords_path(&self) -> &Path {
        &self.keywords
    }

    fn sink(&self) -> AlertSink {
        AlertSink::new(LocalChannel::Diagnostic(self.output.clone()))
    }

    fn start(&self, sink: AlertSink, config: MonitorConfig) -> (LifecycleControl, JoinHandle<Result<RunStats>>) {
        self.start_with_control(sink, config, LifecycleControl::new())
    }

    fn start_with_control(
        &self,
        sink: AlertSink,
        config: MonitorConfig,
        control: LifecycleControl,
    ) -> (LifecycleControl, JoinHandle<Result<RunStats>>) {
        let store = Arc::new(KeywordStore::open(&self.keywords).unwrap());
        let controller = LifecycleController::new(
            store,
            self.provider.clone(),
            AlertFormatter::new("tweetwatch", "0.1.0", 5),
            sink,
            config,
        )
        .with_control(control);
        let control = controller.control();
        (control, tokio::spawn(controller.run()))
    }

    fn lines(&self) -> Vec<String> {
        String::from_utf8(self.output.lock().clone())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    async fn wait_for_lines(&self, count: usize) -> Vec<String> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let lines = self.lines();
                if lines.len() >= count {
                    return lines;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("timed out waiting for alert lines")
    }
}

/// Local channel that asks the monitor to stop as soon as an alert line is
/// written, i.e. while that alert is still being dispatched.
struct TerminateOnWrite {
    control: LifecycleControl,
    lines: Arc<Mutex<Vec<u8>>>,
}

impl Write for TerminateOnWrite {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.control.request_terminate();
        self.lines.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn tweet(author: &str, text: &str) -> Result<InboundMessage> {
    Ok(InboundMessage::new(author, text))
}

fn fast_backoff(max_retries: Option<u32>) -> MonitorConfig {
    MonitorConfig {
        reconnect: ReconnectPolicy::Backoff(RetryPolicy {
            max_retries,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
            use_jitter: false,
        }),
        resubscribe_on_reload: true,
    }
}

fn fail_fast() -> MonitorConfig {
    MonitorConfig {
        reconnect: ReconnectPolicy::FailFast,
        resubscribe_on_reload: true,
    }
}

async fn finish(handle: JoinHandle<Result<RunStats>>) -> Result<RunStats> {
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("monitor did not stop")
        .unwrap()
}

#[tokio::test]
async fn test_alert_line_for_matching_message_only() {
    let harness = Harness::new("security\nbreach\n");
    let feed = harness.provider.push_feed();
    let (control, handle) = harness.start(harness.sink(), MonitorConfig::default());

    feed.unbounded_send(tweet("alice", "nothing to see here")).unwrap();
    feed.unbounded_send(tweet("bob", "Major security security breach reported"))
        .unwrap();

    let lines = harness.wait_for_lines(1).await;
    control.request_terminate();
    let stats = finish(handle).await.unwrap();

    assert_eq!(
        lines,
        vec![
            "Found Tweet from @bob : Major security security breach reported : security (2 times) breach (1 times) "
        ]
    );
    assert_eq!(stats.messages_seen, 2);
    assert_eq!(stats.messages_matched, 1);
    assert_eq!(stats.alerts, 1);
    assert_eq!(stats.datagrams_sent, 0);
    assert_eq!(harness.provider.filters(), vec!["security,breach"]);
}

#[tokio::test]
async fn test_terminate_while_idle() {
    let harness = Harness::new("breach\n");
    let _feed = harness.provider.push_feed();
    let (control, handle) = harness.start(harness.sink(), MonitorConfig::default());

    tokio::time::sleep(Duration::from_millis(20)).await;
    control.request_terminate();

    let stats = finish(handle).await.unwrap();
    assert_eq!(stats.messages_seen, 0);
    assert!(harness.lines().is_empty());
}

#[tokio::test]
async fn test_terminate_while_connecting() {
    let harness = Harness::new("breach\n");
    let (control, handle) = harness.start(harness.sink(), MonitorConfig::default());

    tokio::time::sleep(Duration::from_millis(20)).await;
    control.request_terminate();

    finish(handle).await.unwrap();
    assert_eq!(harness.provider.filters(), vec!["breach"]);
}

#[tokio::test]
async fn test_reload_resubscribes_with_new_filter() {
    let harness = Harness::new("alpha\n");
    let first = harness.provider.push_feed();
    let second = harness.provider.push_feed();
    let (control, handle) = harness.start(harness.sink(), MonitorConfig::default());

    first.unbounded_send(tweet("a", "alpha beta")).unwrap();
    harness.wait_for_lines(1).await;

    std::fs::write(harness.keywords_path(), "beta\n").unwrap();
    control.request_reload();
    second.unbounded_send(tweet("b", "alpha beta")).unwrap();

    let lines = harness.wait_for_lines(2).await;
    control.request_terminate();
    let stats = finish(handle).await.unwrap();

    assert_eq!(lines[0], "Found Tweet from @a : alpha beta : alpha (1 times) ");
    assert_eq!(lines[1], "Found Tweet from @b : alpha beta : beta (1 times) ");
    assert_eq!(harness.provider.filters(), vec!["alpha", "beta"]);
    assert_eq!(stats.reloads, 1);
    assert_eq!(stats.reconnects, 1);
}

#[tokio::test]
async fn test_reload_without_resubscribe_keeps_connection() {
    let harness = Harness::new("alpha\n");
    let feed = harness.provider.push_feed();
    let config = MonitorConfig {
        resubscribe_on_reload: false,
        ..MonitorConfig::default()
    };
    let (control, handle) = harness.start(harness.sink(), config);

    feed.unbounded_send(tweet("a", "alpha beta")).unwrap();
    harness.wait_for_lines(1).await;

    std::fs::write(harness.keywords_path(), "beta\nalpha\n").unwrap();
    control.request_reload();
    feed.unbounded_send(tweet("a", "alpha beta")).unwrap();

    let lines = harness.wait_for_lines(2).await;
    control.request_terminate();
    let stats = finish(handle).await.unwrap();

    assert_eq!(lines[1], "Found Tweet from @a : alpha beta : beta (1 times) alpha (1 times) ");
    assert_eq!(harness.provider.filters(), vec!["alpha"]);
    assert_eq!(stats.reloads, 1);
    assert_eq!(stats.reconnects, 0);
}

#[tokio::test]
async fn test_failed_reload_keeps_previous_list() {
    let harness = Harness::new("alpha\n");
    let feed = harness.provider.push_feed();
    let (control, handle) = harness.start(harness.sink(), MonitorConfig::default());

    feed.unbounded_send(tweet("a", "alpha")).unwrap();
    harness.wait_for_lines(1).await;

    // 61 bytes once joined
    std::fs::write(harness.keywords_path(), format!("{}\n", "x".repeat(61))).unwrap();
    control.request_reload();
    feed.unbounded_send(tweet("a", "alpha again")).unwrap();

    let lines = harness.wait_for_lines(2).await;
    control.request_terminate();
    let stats = finish(handle).await.unwrap();

    assert_eq!(lines[1], "Found Tweet from @a : alpha again : alpha (1 times) ");
    assert_eq!(harness.provider.filters(), vec!["alpha"]);
    assert_eq!(stats.reloads, 0);
    assert_eq!(stats.failed_reloads, 1);
}

#[tokio::test]
async fn test_rejected_resubscribe_restores_previous_list() {
    let harness = Harness::new("alpha\n");
    let feed = harness.provider.push_feed();
    harness.provider.push_failure(WatchError::subscribe("406 Not Acceptable"));
    let (control, handle) = harness.start(harness.sink(), MonitorConfig::default());

    feed.unbounded_send(tweet("a", "alpha")).unwrap();
    harness.wait_for_lines(1).await;

    std::fs::write(harness.keywords_path(), "beta\n").unwrap();
    control.request_reload();
    // still served by the original connection
    feed.unbounded_send(tweet("b", "alpha beta")).unwrap();

    let lines = harness.wait_for_lines(2).await;
    assert!(!handle.is_finished());
    control.request_terminate();
    let stats = finish(handle).await.unwrap();

    assert_eq!(lines[1], "Found Tweet from @b : alpha beta : alpha (1 times) ");
    assert_eq!(harness.provider.filters(), vec!["alpha", "beta"]);
    assert_eq!(stats.messages_seen, 2);
    assert_eq!(stats.reloads, 1);
    assert_eq!(stats.reverted_reloads, 1);
    assert_eq!(stats.reconnects, 0);
}

#[tokio::test]
async fn test_failed_resubscribe_retries_on_next_reload() {
    let harness = Harness::new("alpha\n");
    let first = harness.provider.push_feed();
    harness.provider.push_failure(WatchError::auth("401 Unauthorized"));
    let second = harness.provider.push_feed();
    let (control, handle) = harness.start(harness.sink(), MonitorConfig::default());

    std::fs::write(harness.keywords_path(), "beta\n").unwrap();
    control.request_reload();
    first.unbounded_send(tweet("a", "alpha beta")).unwrap();
    harness.wait_for_lines(1).await;

    control.request_reload();
    second.unbounded_send(tweet("b", "alpha beta")).unwrap();

    let lines = harness.wait_for_lines(2).await;
    control.request_terminate();
    let stats = finish(handle).await.unwrap();

    assert_eq!(lines[0], "Found Tweet from @a : alpha beta : alpha (1 times) ");
    assert_eq!(lines[1], "Found Tweet from @b : alpha beta : beta (1 times) ");
    assert_eq!(harness.provider.filters(), vec!["alpha", "beta", "beta"]);
    assert_eq!(stats.reverted_reloads, 1);
    assert_eq!(stats.reconnects, 1);
}

#[tokio::test]
async fn test_startup_auth_rejection_is_fatal() {
    let harness = Harness::new("breach\n");
    harness.provider.push_failure(WatchError::auth("401 Unauthorized"));
    let (_control, handle) = harness.start(harness.sink(), fast_backoff(None));

    let err = finish(handle).await.unwrap_err();
    assert!(matches!(err, WatchError::Auth(_)));
    assert_eq!(harness.provider.filters().len(), 1);
}

#[tokio::test]
async fn test_fail_fast_stops_on_end_of_stream() {
    let harness = Harness::new("breach\n");
    let feed = harness.provider.push_feed();
    let (_control, handle) = harness.start(harness.sink(), fail_fast());

    feed.unbounded_send(tweet("a", "breach")).unwrap();
    drop(feed);

    let err = finish(handle).await.unwrap_err();
    assert!(matches!(err, WatchError::Connection(_)));
    assert_eq!(harness.lines().len(), 1);
    assert_eq!(harness.provider.filters().len(), 1);
}

#[tokio::test]
async fn test_reconnects_after_connection_loss() {
    let harness = Harness::new("breach\n");
    let first = harness.provider.push_feed();
    harness.provider.push_failure(WatchError::connection("503 Service Unavailable"));
    let second = harness.provider.push_feed();
    let (control, handle) = harness.start(harness.sink(), fast_backoff(None));

    first.unbounded_send(tweet("a", "breach one")).unwrap();
    first
        .unbounded_send(Err(WatchError::connection("reset by peer")))
        .unwrap();
    second.unbounded_send(tweet("b", "breach two")).unwrap();

    let lines = harness.wait_for_lines(2).await;
    control.request_terminate();
    let stats = finish(handle).await.unwrap();

    assert!(lines[1].starts_with("Found Tweet from @b"));
    assert_eq!(harness.provider.filters(), vec!["breach", "breach", "breach"]);
    assert_eq!(stats.reconnects, 1);
}

#[tokio::test]
async fn test_rejection_during_reconnect_is_fatal() {
    let harness = Harness::new("breach\n");
    let feed = harness.provider.push_feed();
    harness.provider.push_failure(WatchError::subscribe("406 Not Acceptable"));
    let (_control, handle) = harness.start(harness.sink(), fast_backoff(None));

    drop(feed);

    let err = finish(handle).await.unwrap_err();
    assert!(matches!(err, WatchError::Subscribe(_)));
}

#[tokio::test]
async fn test_bounded_reconnects_give_up() {
    let harness = Harness::new("breach\n");
    let feed = harness.provider.push_feed();
    harness.provider.push_failure(WatchError::connection("refused"));
    harness.provider.push_failure(WatchError::connection("refused"));
    let (_control, handle) = harness.start(harness.sink(), fast_backoff(Some(2)));

    drop(feed);

    let err = finish(handle).await.unwrap_err();
    assert!(matches!(err, WatchError::Connection(_)));
    assert_eq!(harness.provider.filters().len(), 3);
}

#[tokio::test]
async fn test_datagram_sent_for_each_alert() {
    let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = receiver.local_addr().unwrap().port();

    let harness = Harness::new("security\nbreach\n");
    let feed = harness.provider.push_feed();
    let sink = harness
        .sink()
        .with_remote(RemoteReceiver::new("127.0.0.1", port));
    let (control, handle) = harness.start(sink, MonitorConfig::default());

    feed.unbounded_send(tweet("a", "quiet day")).unwrap();
    feed.unbounded_send(tweet("b", "breach breach")).unwrap();

    let mut buf = [0u8; 2048];
    let (len, _) = tokio::time::timeout(Duration::from_secs(5), receiver.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    control.request_terminate();
    let stats = finish(handle).await.unwrap();

    let datagram = std::str::from_utf8(&buf[..len]).unwrap();
    assert!(datagram.starts_with("<29>"));
    assert!(datagram.contains("CEF:0|blog.rootshell.be|tweetwatch|0.1.0|keyword-found|"));
    assert!(datagram.ends_with(" cs1=breach cs1Label=Keyword1Name cn1=2 cn1Label=Keyword1Count"));
    assert_eq!(stats.datagrams_sent, 1);
}

#[tokio::test]
async fn test_delivery_failure_is_fatal_by_default() {
    let harness = Harness::new("breach\n");
    let feed = harness.provider.push_feed();
    let mut remote = RemoteReceiver::new("host.invalid", 514);
    remote.timeout_ms = 200;
    let sink = harness.sink().with_remote(remote);
    let (_control, handle) = harness.start(sink, MonitorConfig::default());

    feed.unbounded_send(tweet("a", "breach")).unwrap();

    let err = finish(handle).await.unwrap_err();
    assert!(matches!(err, WatchError::Delivery(_)));
    // the local line goes out before the remote send
    assert_eq!(harness.lines().len(), 1);
}

#[tokio::test]
async fn test_delivery_failure_logged_with_log_policy() {
    let harness = Harness::new("breach\n");
    let feed = harness.provider.push_feed();
    let mut remote = RemoteReceiver::new("host.invalid", 514);
    remote.timeout_ms = 200;
    let sink = harness
        .sink()
        .with_remote(remote)
        .with_delivery_policy(DeliveryPolicy::Log);
    let (control, handle) = harness.start(sink, MonitorConfig::default());

    feed.unbounded_send(tweet("a", "breach one")).unwrap();
    feed.unbounded_send(tweet("a", "breach two")).unwrap();

    harness.wait_for_lines(2).await;
    control.request_terminate();
    let stats = finish(handle).await.unwrap();

    assert_eq!(stats.alerts, 2);
    assert_eq!(stats.delivery_failures, 2);
    assert_eq!(stats.datagrams_sent, 0);
}

#[tokio::test]
async fn test_terminate_does_not_abort_alert_in_flight() {
    let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = receiver.local_addr().unwrap().port();

    let harness = Harness::new("breach\n");
    let feed = harness.provider.push_feed();
    let control = LifecycleControl::new();
    let local = TerminateOnWrite {
        control: control.clone(),
        lines: harness.output.clone(),
    };
    let sink = AlertSink::new(LocalChannel::Diagnostic(Arc::new(Mutex::new(local))))
        .with_remote(RemoteReceiver::new("127.0.0.1", port));
    let (_control, handle) = harness.start_with_control(sink, MonitorConfig::default(), control);

    feed.unbounded_send(tweet("a", "breach one")).unwrap();
    feed.unbounded_send(tweet("b", "breach two")).unwrap();

    let stats = finish(handle).await.unwrap();

    let mut buf = [0u8; 2048];
    let (len, _) = tokio::time::timeout(Duration::from_secs(5), receiver.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let datagram = std::str::from_utf8(&buf[..len]).unwrap();
    assert!(datagram.ends_with(" cs1=breach cs1Label=Keyword1Name cn1=1 cn1Label=Keyword1Count"));
    assert_eq!(stats.datagrams_sent, 1);
    assert_eq!(stats.messages_seen, 1);
    assert_eq!(harness.lines().len(), 1);
}
