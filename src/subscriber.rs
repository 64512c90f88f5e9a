//! Receiving notifications: single polls, poll loops and background polling.

use crate::client::ApiClient;
use crate::constants::{default_poll_interval, DEFAULT_POLL_TASK_NAME};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::models::{Config, Credentials, RawMessage, Role};
use parking_lot::Mutex;
use reqwest::StatusCode;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

/// Receives messages for one subscriber identity.
///
/// Cloning is cheap; clones share the HTTP client and the background poll
/// loop slot.
#[derive(Clone)]
pub struct Subscriber {
    inner: Arc<Inner>,
}

struct Inner {
    api: ApiClient,
    poll_task: Mutex<Option<CancellationToken>>,
}

/// Settings for [`Subscriber::poll_async`].
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Target time between the starts of two polls.
    pub interval: Duration,
    /// Name recorded on the loop's tracing span and handle.
    pub name: String,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
            name: DEFAULT_POLL_TASK_NAME.to_string(),
        }
    }
}

impl Subscriber {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Result<Self> {
        Self::with_config(Credentials::new(client_id, client_secret), Config::default())
    }

    pub fn with_config(credentials: Credentials, config: Config) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Inner {
                api: ApiClient::new(Role::Subscriber, credentials, config)?,
                poll_task: Mutex::new(None),
            }),
        })
    }

    pub fn credentials(&self) -> &Credentials {
        self.inner.api.credentials()
    }

    pub(crate) fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    /// Fetch pending messages, in the order the API returns them.
    pub async fn poll(&self) -> Result<Vec<Message>> {
        let reply = self.inner.api.get_notifications().await?;

        match reply.status {
            StatusCode::OK => {
                let raw: Vec<RawMessage> = serde_json::from_str(&reply.body)
                    .map_err(|e| Error::Parse(format!("poll response: {e}")))?;
                raw.into_iter()
                    .map(|m| Message::from_raw(m, self.clone()))
                    .collect()
            }
            StatusCode::NOT_FOUND => Err(self.inner.api.invalid_credentials()),
            status => Err(Error::FailedToReceiveMessage { status }),
        }
    }

    /// Poll every `interval` on the current task, handing each message to
    /// `handler` in order.
    ///
    /// The time spent polling and handling counts against the interval. Only
    /// returns when a poll or a handler fails.
    pub async fn poll_blocking<F, Fut, E>(&self, handler: F, interval: Duration) -> Result<()>
    where
        F: FnMut(Message) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        self.poll_until(handler, interval, CancellationToken::new())
            .await
    }

    /// Like [`poll_blocking`](Self::poll_blocking), but returns `Ok(())` once
    /// `token` is cancelled.
    ///
    /// Cancellation is seen between cycles and while sleeping; a request or
    /// handler call already running is allowed to finish.
    pub async fn poll_until<F, Fut, E>(
        &self,
        handler: F,
        interval: Duration,
        token: CancellationToken,
    ) -> Result<()>
    where
        F: FnMut(Message) -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        run_cycles(|| self.poll(), handler, interval, token).await
    }

    /// Run the poll loop on a background task and return its handle.
    ///
    /// A loop already started from this subscriber (or a clone of it) is
    /// cancelled first. Dropping the handle does not stop the loop. Fails
    /// with [`Error::Task`] when called outside a tokio runtime.
    pub fn poll_async<F, Fut, E>(&self, handler: F, options: PollOptions) -> Result<PollHandle>
    where
        F: FnMut(Message) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
    {
        let runtime = Handle::try_current()
            .map_err(|e| Error::Task(format!("cannot start '{}': {e}", options.name)))?;

        let token = CancellationToken::new();
        if let Some(previous) = self.inner.poll_task.lock().replace(token.clone()) {
            if !previous.is_cancelled() {
                warn!(task = %options.name, "replacing running poll loop");
                previous.cancel();
            }
        }

        let subscriber = self.clone();
        let loop_token = token.clone();
        let span = info_span!("notifi_poll", task = %options.name);
        let interval = options.interval;
        let interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);

        let task = runtime.spawn(
            async move {
                // Cancelled however the loop ends, panics included.
                let _ended = loop_token.clone().drop_guard();
                info!(interval_ms, "poll loop started");
                let result = subscriber.poll_until(handler, interval, loop_token).await;
                match &result {
                    Ok(()) => info!("poll loop stopped"),
                    Err(err) => warn!(error = %err, "poll loop ended"),
                }
                result
            }
            .instrument(span),
        );

        Ok(PollHandle {
            name: options.name,
            token,
            task,
        })
    }

    /// Cancel the background loop started by [`poll_async`](Self::poll_async), if any.
    pub fn stop_polling(&self) {
        if let Some(token) = self.inner.poll_task.lock().take() {
            token.cancel();
        }
    }

    /// Whether a background loop is running and has not been asked to stop.
    pub fn is_polling(&self) -> bool {
        self.inner
            .poll_task
            .lock()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("credentials", self.credentials())
            .field("polling", &self.is_polling())
            .finish()
    }
}

/// Handle to a background poll loop.
pub struct PollHandle {
    name: String,
    token: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl PollHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the loop to stop after its current cycle.
    pub fn stop(&self) {
        self.token.cancel();
    }

    /// Whether the loop was asked to stop or has ended on its own.
    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Wait for the loop to end and return how it ended.
    pub async fn join(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(Error::Task(e.to_string())),
        }
    }
}

impl fmt::Debug for PollHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollHandle")
            .field("name", &self.name)
            .field("stopped", &self.is_stopped())
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// The poll loop shared by every polling entry point.
///
/// Each cycle polls once, hands every item to `handler` in order, then
/// sleeps for what is left of `interval`.
async fn run_cycles<T, P, PFut, F, Fut, E>(
    mut poll: P,
    mut handler: F,
    interval: Duration,
    token: CancellationToken,
) -> Result<()>
where
    P: FnMut() -> PFut,
    PFut: Future<Output = Result<Vec<T>>>,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = std::result::Result<(), E>>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    while !token.is_cancelled() {
        let start = Instant::now();

        for item in poll().await? {
            handler(item).await.map_err(handler_error)?;
        }

        let delay = remaining_interval(interval, start.elapsed());
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    Ok(())
}

/// Sleep left in a cycle after `elapsed` of work.
fn remaining_interval(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

// Client errors raised inside a handler keep their kind.
fn handler_error<E>(err: E) -> Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match err.into().downcast::<Error>() {
        Ok(err) => *err,
        Err(other) => Error::Handler(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SHORT: Duration = Duration::from_millis(10);

    fn subscriber_for(server: &MockServer) -> Subscriber {
        let config = Config {
            api_base: server.uri(),
            url_base: "https://notify.example.test".into(),
            ..Config::default()
        };
        Subscriber::with_config(Credentials::new("sub-id", "sub-secret"), config).unwrap()
    }

    async fn mount_messages(server: &MockServer, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/notification"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn mount_status(server: &MockServer, status: u16) {
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status))
            .mount(server)
            .await;
    }

    #[test]
    fn work_time_counts_against_interval() {
        let interval = Duration::from_secs(10);
        assert_eq!(
            remaining_interval(interval, Duration::from_secs(2)),
            Duration::from_secs(8)
        );
        assert_eq!(remaining_interval(interval, Duration::from_secs(12)), Duration::ZERO);
        assert_eq!(remaining_interval(interval, Duration::ZERO), interval);
    }

    // Start times of the first three cycles when each cycle does `work`.
    async fn cycle_starts(interval: Duration, work: Duration) -> Vec<Instant> {
        let starts: Arc<Mutex<Vec<Instant>>> = Arc::default();
        let token = CancellationToken::new();

        run_cycles(
            || {
                let starts = starts.clone();
                let token = token.clone();
                async move {
                    let mut starts = starts.lock();
                    starts.push(Instant::now());
                    if starts.len() == 3 {
                        token.cancel();
                    }
                    Ok(vec![1u32])
                }
            },
            |_item| async move {
                tokio::time::sleep(work).await;
                Ok::<_, Error>(())
            },
            interval,
            token.clone(),
        )
        .await
        .unwrap();

        let starts = starts.lock().clone();
        starts
    }

    fn gaps(starts: &[Instant]) -> Vec<Duration> {
        starts.windows(2).map(|w| w[1] - w[0]).collect()
    }

    fn assert_about(actual: Duration, expected: Duration) {
        assert!(
            actual >= expected && actual < expected + Duration::from_millis(10),
            "expected about {expected:?}, got {actual:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn next_cycle_starts_one_interval_after_the_last() {
        let starts = cycle_starts(Duration::from_secs(10), Duration::from_secs(2)).await;
        assert_eq!(starts.len(), 3);
        // 2s of handling plus an 8s sleep, not a full 10s sleep on top.
        for gap in gaps(&starts) {
            assert_about(gap, Duration::from_secs(10));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_cycle_polls_again_without_sleeping() {
        let starts = cycle_starts(Duration::from_secs(10), Duration::from_secs(12)).await;
        for gap in gaps(&starts) {
            assert_about(gap, Duration::from_secs(12));
        }
    }

    #[test]
    fn poll_async_needs_a_runtime() {
        let subscriber = Subscriber::new("sub-id", "sub-secret").unwrap();
        let err = subscriber
            .poll_async(|_m| async { Ok::<_, Error>(()) }, PollOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Task(ref text) if text.contains("Notifi Poll Thread")));
        assert!(!subscriber.is_polling());
    }

    #[test]
    fn poll_options_defaults() {
        let options = PollOptions::default();
        assert_eq!(options.interval, Duration::from_secs(10));
        assert_eq!(options.name, "Notifi Poll Thread");
    }

    #[tokio::test]
    async fn poll_returns_messages_in_server_order() {
        let server = MockServer::start().await;
        mount_messages(
            &server,
            json!([
                { "id": 2, "body": "second", "created": "2024-01-01T00:00:01" },
                { "id": 1, "body": "hello", "created": "2024-01-01T00:00:00" },
                { "id": 2, "body": "second", "created": "2024-01-01T00:00:01" }
            ]),
        )
        .await;

        let messages = subscriber_for(&server).poll().await.unwrap();
        let ids: Vec<i64> = messages.iter().map(Message::id).collect();
        assert_eq!(ids, vec![2, 1, 2]);
        assert!(messages.iter().all(|m| !m.is_confirmed()));
    }

    #[tokio::test]
    async fn poll_single_message() {
        let server = MockServer::start().await;
        mount_messages(
            &server,
            json!([{ "id": 1, "body": "hello", "created": "2024-01-01T00:00:00" }]),
        )
        .await;

        let messages = subscriber_for(&server).poll().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id(), 1);
        assert_eq!(messages[0].body(), "hello");
        assert!(!messages[0].is_confirmed());
    }

    #[tokio::test]
    async fn poll_not_found_means_invalid_credentials() {
        let server = MockServer::start().await;
        mount_status(&server, 404).await;

        let err = subscriber_for(&server).poll().await.unwrap_err();
        match err {
            Error::InvalidCredentials { role, manage_url } => {
                assert_eq!(role, Role::Subscriber);
                assert_eq!(manage_url, "https://notify.example.test/notifi/subscribers/device");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn poll_other_status_is_receive_failure() {
        let server = MockServer::start().await;
        mount_status(&server, 503).await;

        let err = subscriber_for(&server).poll().await.unwrap_err();
        assert!(matches!(
            err,
            Error::FailedToReceiveMessage { status } if status == StatusCode::SERVICE_UNAVAILABLE
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn poll_malformed_body_is_parse_error() {
        let server = MockServer::start().await;
        mount_messages(&server, json!([{ "id": 1, "body": "no timestamp" }])).await;

        let err = subscriber_for(&server).poll().await.unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[tokio::test]
    async fn poll_until_stops_on_cancel() {
        let server = MockServer::start().await;
        mount_messages(
            &server,
            json!([{ "id": 1, "body": "hello", "created": "2024-01-01T00:00:00" }]),
        )
        .await;

        let subscriber = subscriber_for(&server);
        let token = CancellationToken::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let handler_token = token.clone();
        let handler_seen = seen.clone();
        subscriber
            .poll_until(
                move |message| {
                    let token = handler_token.clone();
                    let seen = handler_seen.clone();
                    async move {
                        assert_eq!(message.id(), 1);
                        if seen.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                            token.cancel();
                        }
                        Ok::<_, Error>(())
                    }
                },
                SHORT,
                token,
            )
            .await
            .unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 3);
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 3);
    }

    #[tokio::test]
    async fn poll_blocking_returns_poll_failure() {
        let server = MockServer::start().await;
        mount_status(&server, 500).await;

        let err = subscriber_for(&server)
            .poll_blocking(|_message| async { Ok::<_, Error>(()) }, SHORT)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FailedToReceiveMessage { .. }));
    }

    #[tokio::test]
    async fn handler_failure_ends_loop() {
        let server = MockServer::start().await;
        mount_messages(
            &server,
            json!([{ "id": 1, "body": "hello", "created": "2024-01-01T00:00:00" }]),
        )
        .await;

        let err = subscriber_for(&server)
            .poll_blocking(|_message| async { Err::<(), _>("handler gave up") }, SHORT)
            .await
            .unwrap_err();
        match err {
            Error::Handler(inner) => assert_eq!(inner.to_string(), "handler gave up"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn handler_client_errors_keep_their_kind() {
        let server = MockServer::start().await;
        mount_messages(
            &server,
            json!([{ "id": 8, "body": "hello", "created": "2024-01-01T00:00:00" }]),
        )
        .await;

        let err = subscriber_for(&server)
            .poll_blocking(
                |message| async move {
                    Err::<(), _>(Error::FailedToConfirmMessage {
                        id: message.id(),
                        status: StatusCode::CONFLICT,
                    })
                },
                SHORT,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::FailedToConfirmMessage { id: 8, .. }));
    }

    #[tokio::test]
    async fn poll_async_runs_until_stopped() {
        let server = MockServer::start().await;
        mount_messages(&server, json!([])).await;

        let subscriber = subscriber_for(&server);
        let handle = subscriber.poll_async(
            |_message| async { Ok::<_, Error>(()) },
            PollOptions {
                interval: SHORT,
                name: "test poller".into(),
            },
        )
        .unwrap();
        assert_eq!(handle.name(), "test poller");
        assert!(subscriber.is_polling());

        tokio::time::sleep(Duration::from_millis(50)).await;
        subscriber.stop_polling();
        assert!(!subscriber.is_polling());
        assert!(handle.is_stopped());

        handle.join().await.unwrap();
        assert!(!server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_poll_async_cancels_first() {
        let server = MockServer::start().await;
        mount_messages(&server, json!([])).await;

        let subscriber = subscriber_for(&server);
        let options = PollOptions {
            interval: SHORT,
            ..PollOptions::default()
        };
        let first = subscriber
            .poll_async(|_m| async { Ok::<_, Error>(()) }, options.clone())
            .unwrap();
        let second = subscriber
            .poll_async(|_m| async { Ok::<_, Error>(()) }, options)
            .unwrap();

        assert!(first.is_stopped());
        assert!(!second.is_stopped());
        first.join().await.unwrap();

        second.stop();
        second.join().await.unwrap();
    }

    #[tokio::test]
    async fn failed_background_loop_reports_error() {
        let server = MockServer::start().await;
        mount_status(&server, 404).await;

        let subscriber = subscriber_for(&server);
        let handle = subscriber
            .poll_async(|_m| async { Ok::<_, Error>(()) }, PollOptions::default())
            .unwrap();

        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials { .. }));
        assert!(!subscriber.is_polling());
    }

    #[tokio::test]
    async fn panicking_handler_leaves_subscriber_idle() {
        let server = MockServer::start().await;
        mount_messages(
            &server,
            json!([{ "id": 1, "body": "hello", "created": "2024-01-01T00:00:00" }]),
        )
        .await;

        let subscriber = subscriber_for(&server);
        let handle = subscriber
            .poll_async(
                |message: Message| async move {
                    if message.id() == 1 {
                        panic!("handler boom");
                    }
                    Ok::<_, Error>(())
                },
                PollOptions {
                    interval: SHORT,
                    ..PollOptions::default()
                },
            )
            .unwrap();
        let token = handle.cancellation_token();

        let err = handle.join().await.unwrap_err();
        assert!(matches!(err, Error::Task(ref text) if text.contains("handler boom")));
        assert!(token.is_cancelled());
        assert!(!subscriber.is_polling());
    }
}
