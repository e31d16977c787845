use super::types::*;
use crate::auth::api_client::AuthApi;
use crate::auth::error::{AuthError, AuthResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug)]
enum Link {
    Idle,
    Connecting(ConnectionHandle),
    Open(ConnectionHandle),
}

impl Link {
    fn id(&self) -> Option<ConnectionId> {
        match self {
            Link::Idle => None,
            Link::Connecting(handle) | Link::Open(handle) => Some(handle.id),
        }
    }

    fn take(&mut self) -> Option<ConnectionHandle> {
        match std::mem::replace(self, Link::Idle) {
            Link::Idle => None,
            Link::Connecting(handle) | Link::Open(handle) => Some(handle),
        }
    }
}

/// Owns the live connection of one login attempt and hides which connector
/// is behind it.
///
/// Every connection gets a fresh [`ConnectionId`]; events tagged with any
/// other id are dropped in [`TransportAdapter::accept`]. An unexpected close
/// schedules a reconnect timer that reports back through the inbox as
/// [`Inbound::ReconnectDue`].
pub struct TransportAdapter {
    connector: Arc<dyn Connector>,
    api: Arc<dyn AuthApi>,
    inbox: mpsc::UnboundedSender<Inbound>,
    link: Link,
    next_id: u64,
    session_id: Option<String>,
    finished: bool,
    reconnect_timer: Option<JoinHandle<()>>,
    pending_reconnect: Option<ConnectionId>,
    attempts_since_open: u32,
    max_reconnect_attempts: u32,
    reconnect_delay: Duration,
    token: CancellationToken,
}

impl TransportAdapter {
    pub fn new(
        connector: Arc<dyn Connector>,
        api: Arc<dyn AuthApi>,
        inbox: mpsc::UnboundedSender<Inbound>,
        reconnect_delay: Duration,
        max_reconnect_attempts: u32,
    ) -> Self {
        Self {
            connector,
            api,
            inbox,
            link: Link::Idle,
            next_id: 0,
            session_id: None,
            finished: false,
            reconnect_timer: None,
            pending_reconnect: None,
            attempts_since_open: 0,
            max_reconnect_attempts,
            reconnect_delay,
            token: CancellationToken::new(),
        }
    }

    pub fn kind(&self) -> TransportKind {
        self.connector.kind()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn bind_session(&mut self, session_id: &str) {
        self.session_id = Some(session_id.to_string());
    }

    pub fn current_connection(&self) -> Option<ConnectionId> {
        self.link.id()
    }

    pub fn reconnect_pending(&self) -> bool {
        self.pending_reconnect.is_some()
    }

    /// Prepares for a new login attempt. Drops whatever the previous attempt
    /// left behind and re-arms reconnects under `token`.
    pub fn reset_for_attempt(&mut self, token: CancellationToken) {
        self.close(CloseReason::Cancel);
        self.token = token;
        self.finished = false;
        self.attempts_since_open = 0;
        self.session_id = None;
    }

    /// Opens a connection unless one is already connecting or open.
    pub fn connect(&mut self, session_id: Option<&str>) -> ConnectionId {
        if let Some(id) = self.link.id() {
            debug!(connection = %id, "connect ignored, connection already active");
            return id;
        }
        if let Some(id) = session_id {
            self.session_id = Some(id.to_string());
        }
        self.finished = false;
        self.open_link()
    }

    fn open_link(&mut self) -> ConnectionId {
        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        info!(
            connection = %id,
            transport = %self.connector.kind(),
            session_id = ?self.session_id,
            "opening connection"
        );
        let sink = EventSink::new(id, self.inbox.clone());
        let handle = self.connector.open(self.session_id.as_deref(), sink);
        self.link = Link::Connecting(handle);
        id
    }

    /// Filters an event from a connector. Returns `None` for events of
    /// superseded connections.
    pub fn accept(&mut self, tagged: TaggedEvent) -> Option<TransportEvent> {
        if self.link.id() != Some(tagged.connection) {
            debug!(
                connection = %tagged.connection,
                current = ?self.link.id(),
                event = ?tagged.event,
                "dropping event from stale connection"
            );
            return None;
        }

        match tagged.event {
            TransportEvent::Opened => {
                if let Link::Connecting(handle) = std::mem::replace(&mut self.link, Link::Idle) {
                    self.link = Link::Open(handle);
                }
                self.attempts_since_open = 0;
                Some(TransportEvent::Opened)
            }
            TransportEvent::Meta { session_id } => {
                self.session_id = Some(session_id.clone());
                Some(TransportEvent::Meta { session_id })
            }
            TransportEvent::Closed => {
                if let Some(handle) = self.link.take() {
                    handle.shutdown(true);
                }
                Some(self.after_unexpected_close(tagged.connection))
            }
            other => Some(other),
        }
    }

    fn after_unexpected_close(&mut self, closed: ConnectionId) -> TransportEvent {
        if self.finished || self.token.is_cancelled() {
            return TransportEvent::Closed;
        }
        if self.attempts_since_open >= self.max_reconnect_attempts {
            warn!(connection = %closed, "connection closed, no reconnect attempts left");
            return TransportEvent::Closed;
        }

        self.attempts_since_open += 1;
        let delay = self.reconnect_delay;
        let token = self.token.clone();
        let inbox = self.inbox.clone();

        info!(connection = %closed, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        self.pending_reconnect = Some(closed);
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if !token.is_cancelled() {
                        let _ = inbox.send(Inbound::ReconnectDue { after: closed });
                    }
                }
            }
        }));

        TransportEvent::Reconnecting { delay }
    }

    /// Called when a reconnect timer fires. Returns the new connection, or
    /// `None` if the timer was superseded or the adapter has been torn down.
    pub fn reconnect_due(&mut self, after: ConnectionId) -> Option<ConnectionId> {
        if self.pending_reconnect != Some(after) {
            debug!(connection = %after, "ignoring stale reconnect timer");
            return None;
        }
        self.pending_reconnect = None;
        self.reconnect_timer = None;

        if self.finished || self.token.is_cancelled() || self.link.id().is_some() {
            return None;
        }
        Some(self.open_link())
    }

    /// Writes one line of user input. Fails unless a connection is open.
    pub async fn send(&self, text: &str) -> AuthResult<()> {
        let Link::Open(handle) = &self.link else {
            return Err(AuthError::Transport("not connected".to_string()));
        };

        match &handle.input {
            Some(input) => {
                let mut frame = text.to_string();
                if !frame.ends_with('\r') {
                    frame.push('\r');
                }
                input
                    .send(frame)
                    .map_err(|_| AuthError::Transport("connection writer has stopped".to_string()))
            }
            None => {
                let session_id = self
                    .session_id
                    .as_deref()
                    .ok_or_else(|| AuthError::Transport("no session bound".to_string()))?;
                self.api.send_input(session_id, text).await
            }
        }
    }

    /// Closes the active connection and disables reconnects. Safe to call
    /// any number of times.
    pub fn close(&mut self, reason: CloseReason) {
        self.finished = true;
        self.pending_reconnect = None;
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(handle) = self.link.take() {
            debug!(connection = %handle.id, ?reason, "closing connection");
            handle.shutdown(reason == CloseReason::Graceful);
        }
    }
}

impl Drop for TransportAdapter {
    fn drop(&mut self) {
        self.close(CloseReason::Cancel);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::auth::types::{ServerLogEntry, StartSessionResponse};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Connector that records what it was asked to open and hands the
    /// sinks back to the test.
    #[derive(Default)]
    pub(crate) struct FakeConnector {
        pub kind: Option<TransportKind>,
        pub duplex: bool,
        pub opened: Mutex<Vec<(ConnectionId, Option<String>, EventSink)>>,
        pub inputs: Mutex<Vec<mpsc::UnboundedReceiver<String>>>,
    }

    impl FakeConnector {
        pub(crate) fn pty() -> Self {
            Self {
                kind: Some(TransportKind::PtySocket),
                duplex: true,
                ..Self::default()
            }
        }

        pub(crate) fn event_stream() -> Self {
            Self {
                kind: Some(TransportKind::EventStream),
                duplex: false,
                ..Self::default()
            }
        }

        pub(crate) fn open_count(&self) -> usize {
            self.opened.lock().unwrap().len()
        }

        pub(crate) fn sink(&self, index: usize) -> EventSink {
            self.opened.lock().unwrap()[index].2.clone()
        }

        pub(crate) fn session_for(&self, index: usize) -> Option<String> {
            self.opened.lock().unwrap()[index].1.clone()
        }

        pub(crate) fn written(&self, index: usize) -> Vec<String> {
            let mut inputs = self.inputs.lock().unwrap();
            let mut out = Vec::new();
            while let Ok(line) = inputs[index].try_recv() {
                out.push(line);
            }
            out
        }
    }

    impl Connector for FakeConnector {
        fn kind(&self) -> TransportKind {
            self.kind.unwrap_or(TransportKind::PtySocket)
        }

        fn open(&self, session_id: Option<&str>, sink: EventSink) -> ConnectionHandle {
            let id = sink.connection();
            self.opened
                .lock()
                .unwrap()
                .push((id, session_id.map(str::to_string), sink));
            let input = if self.duplex {
                let (tx, rx) = mpsc::unbounded_channel();
                self.inputs.lock().unwrap().push(rx);
                Some(tx)
            } else {
                None
            };
            ConnectionHandle {
                id,
                input,
                task: None,
            }
        }
    }

    /// In-memory backend with scripted failures and call counters
    #[derive(Default)]
    pub(crate) struct FakeApi {
        pub fail_start: bool,
        pub fail_cancel: bool,
        pub fail_input: bool,
        pub session_id: String,
        pub history: Vec<ServerLogEntry>,
        pub calls: Mutex<Vec<String>>,
    }

    impl FakeApi {
        pub(crate) fn new(session_id: &str) -> Self {
            Self {
                session_id: session_id.to_string(),
                ..Self::default()
            }
        }

        pub(crate) fn count(&self, call: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.split(':').next() == Some(call))
                .count()
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    #[async_trait]
    impl AuthApi for FakeApi {
        async fn start_session(&self) -> AuthResult<StartSessionResponse> {
            self.record("start".to_string());
            if self.fail_start {
                return Err(AuthError::SessionStart("backend unavailable".to_string()));
            }
            Ok(StartSessionResponse {
                session_id: self.session_id.clone(),
            })
        }

        async fn cancel_session(&self, session_id: &str) -> AuthResult<()> {
            self.record(format!("cancel:{}", session_id));
            if self.fail_cancel {
                return Err(AuthError::Cancel("session not found".to_string()));
            }
            Ok(())
        }

        async fn send_input(&self, session_id: &str, value: &str) -> AuthResult<()> {
            self.record(format!("input:{}:{}", session_id, value));
            if self.fail_input {
                return Err(AuthError::Transport("input rejected".to_string()));
            }
            Ok(())
        }

        async fn get_session_log(&self, session_id: &str) -> AuthResult<Vec<ServerLogEntry>> {
            self.record(format!("logs:{}", session_id));
            Ok(self.history.clone())
        }

        async fn logout(&self) -> AuthResult<()> {
            self.record("logout".to_string());
            Ok(())
        }

        async fn reload_system(&self) -> AuthResult<()> {
            self.record("reload".to_string());
            Ok(())
        }
    }

    fn adapter(
        connector: Arc<FakeConnector>,
        api: Arc<FakeApi>,
    ) -> (TransportAdapter, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            TransportAdapter::new(connector, api, tx, Duration::from_secs(1), 1),
            rx,
        )
    }

    fn tagged(id: u64, event: TransportEvent) -> TaggedEvent {
        TaggedEvent {
            connection: ConnectionId(id),
            event,
        }
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let connector = Arc::new(FakeConnector::pty());
        let (mut adapter, _rx) = adapter(connector.clone(), Arc::new(FakeApi::new("s1")));

        let first = adapter.connect(Some("s1"));
        let second = adapter.connect(Some("s1"));
        assert_eq!(first, second);
        assert_eq!(connector.open_count(), 1);
        assert_eq!(connector.session_for(0).as_deref(), Some("s1"));

        adapter.accept(tagged(1, TransportEvent::Opened));
        assert_eq!(adapter.connect(Some("s1")), first);
        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test]
    async fn test_send_requires_open_connection() {
        let connector = Arc::new(FakeConnector::pty());
        let (mut adapter, _rx) = adapter(connector.clone(), Arc::new(FakeApi::new("s1")));

        assert!(matches!(adapter.send("1").await, Err(AuthError::Transport(_))));

        adapter.connect(Some("s1"));
        assert!(matches!(adapter.send("1").await, Err(AuthError::Transport(_))));

        adapter.accept(tagged(1, TransportEvent::Opened));
        tokio_test::assert_ok!(adapter.send("1").await);
        tokio_test::assert_ok!(adapter.send("code\r").await);
        assert_eq!(connector.written(0), vec!["1\r", "code\r"]);
    }

    #[tokio::test]
    async fn test_event_stream_input_goes_through_api() {
        let connector = Arc::new(FakeConnector::event_stream());
        let api = Arc::new(FakeApi::new("s1"));
        let (mut adapter, _rx) = adapter(connector, api.clone());

        adapter.connect(Some("s1"));
        adapter.accept(tagged(1, TransportEvent::Opened));
        tokio_test::assert_ok!(adapter.send("2").await);
        assert_eq!(api.calls(), vec!["input:s1:2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_close_schedules_one_reconnect() {
        let connector = Arc::new(FakeConnector::pty());
        let (mut adapter, mut rx) = adapter(connector.clone(), Arc::new(FakeApi::new("s1")));

        adapter.connect(Some("s1"));
        adapter.accept(tagged(1, TransportEvent::Opened));
        assert_eq!(
            adapter.accept(tagged(1, TransportEvent::Closed)),
            Some(TransportEvent::Reconnecting {
                delay: Duration::from_secs(1)
            })
        );
        assert!(adapter.reconnect_pending());

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        let due = rx.recv().await.unwrap();
        assert_eq!(due, Inbound::ReconnectDue { after: ConnectionId(1) });

        assert_eq!(adapter.reconnect_due(ConnectionId(1)), Some(ConnectionId(2)));
        assert_eq!(connector.open_count(), 2);
        assert_eq!(connector.session_for(1).as_deref(), Some("s1"));

        // a second firing of the same timer changes nothing
        assert_eq!(adapter.reconnect_due(ConnectionId(1)), None);

        // the reconnect never opens: budget is spent
        assert_eq!(
            adapter.accept(tagged(2, TransportEvent::Closed)),
            Some(TransportEvent::Closed)
        );
        assert!(!adapter.reconnect_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_connection_resets_reconnect_budget() {
        let connector = Arc::new(FakeConnector::pty());
        let (mut adapter, _rx) = adapter(connector.clone(), Arc::new(FakeApi::new("s1")));

        adapter.connect(Some("s1"));
        adapter.accept(tagged(1, TransportEvent::Opened));
        adapter.accept(tagged(1, TransportEvent::Closed));
        adapter.reconnect_due(ConnectionId(1));
        adapter.accept(tagged(2, TransportEvent::Opened));

        assert!(matches!(
            adapter.accept(tagged(2, TransportEvent::Closed)),
            Some(TransportEvent::Reconnecting { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_before_timer_prevents_reconnect() {
        let connector = Arc::new(FakeConnector::pty());
        let (mut adapter, mut rx) = adapter(connector.clone(), Arc::new(FakeApi::new("s1")));
        let token = CancellationToken::new();
        adapter.reset_for_attempt(token.clone());

        adapter.connect(Some("s1"));
        adapter.accept(tagged(1, TransportEvent::Opened));
        adapter.accept(tagged(1, TransportEvent::Closed));

        token.cancel();
        adapter.close(CloseReason::Cancel);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(adapter.reconnect_due(ConnectionId(1)), None);
        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_connection_events_are_dropped() {
        let connector = Arc::new(FakeConnector::pty());
        let (mut adapter, _rx) = adapter(connector.clone(), Arc::new(FakeApi::new("s1")));

        adapter.connect(Some("s1"));
        adapter.accept(tagged(1, TransportEvent::Opened));
        adapter.accept(tagged(1, TransportEvent::Closed));
        adapter.reconnect_due(ConnectionId(1));

        assert_eq!(adapter.accept(tagged(1, TransportEvent::Output("late".into()))), None);
        assert_eq!(adapter.accept(tagged(1, TransportEvent::Closed)), None);
        assert_eq!(
            adapter.accept(tagged(2, TransportEvent::Output("fresh".into()))),
            Some(TransportEvent::Output("fresh".into()))
        );
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let connector = Arc::new(FakeConnector::pty());
        let (mut adapter, _rx) = adapter(connector.clone(), Arc::new(FakeApi::new("s1")));

        adapter.connect(Some("s1"));
        adapter.accept(tagged(1, TransportEvent::Opened));
        adapter.close(CloseReason::Graceful);
        adapter.close(CloseReason::Graceful);
        adapter.close(CloseReason::Cancel);

        assert_eq!(adapter.current_connection(), None);
        assert_eq!(adapter.accept(tagged(1, TransportEvent::Closed)), None);
        assert!(!adapter.reconnect_pending());
    }
}
