use super::api_client::AuthApi;
use super::classifier::OutputClassifier;
use super::error::{AuthError, AuthResult};
use super::lines::{strip_ansi, LineAssembler};
use super::log_buffer::LogBuffer;
use super::opener::UrlOpener;
use super::transport::{
    CloseReason, ConnectionId, Connector, Inbound, TransportAdapter, TransportEvent, TransportKind,
};
use super::types::*;
use crate::config::BridgeConfig;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const CONNECTION_LOST: &str = "connection lost";
const LOGIN_FAILED: &str = "login did not complete";

/// Menu options gathered from consecutive matching lines
#[derive(Debug, Default)]
struct MenuTracker {
    options: Vec<MenuOption>,
    stale: bool,
}

impl MenuTracker {
    /// Returns true when the visible options changed.
    fn observe(&mut self, line: &str, option: Option<MenuOption>) -> bool {
        match option {
            Some(option) => {
                if self.stale {
                    self.options.clear();
                    self.stale = false;
                }
                match self.options.iter_mut().find(|o| o.value == option.value) {
                    Some(existing) => existing.label = option.label,
                    None => self.options.push(option),
                }
                true
            }
            None => {
                if !line.trim().is_empty() && !self.options.is_empty() {
                    self.stale = true;
                }
                false
            }
        }
    }

    fn clear(&mut self) -> bool {
        self.stale = false;
        let had_options = !self.options.is_empty();
        self.options.clear();
        had_options
    }
}

/// Drives one login dialog: owns the session, the logs and the transport.
///
/// The controller is single-owner. Connectors and timers post into its
/// inbox; the owning task pulls with [`SessionController::next_inbound`] and
/// feeds each item back through [`SessionController::handle`], so every
/// state change happens on that one task in receipt order.
pub struct SessionController {
    config: BridgeConfig,
    api: Arc<dyn AuthApi>,
    classifier: OutputClassifier,
    opener: Arc<dyn UrlOpener>,
    adapter: TransportAdapter,
    logs: LogBuffer,
    assembler: LineAssembler,
    status: SessionStatus,
    session_id: Option<String>,
    menu: MenuTracker,
    login_url: Option<String>,
    opened_urls: HashSet<String>,
    error: Option<String>,
    notice: Option<String>,
    success_signaled: Option<ConnectionId>,
    settle_timer: Option<JoinHandle<()>>,
    history_fetched: Option<String>,
    reloaded: bool,
    root: CancellationToken,
    attempt: CancellationToken,
    inbox: mpsc::UnboundedSender<Inbound>,
    inbox_rx: mpsc::UnboundedReceiver<Inbound>,
    events: broadcast::Sender<DialogEvent>,
}

impl SessionController {
    pub fn new(
        config: BridgeConfig,
        api: Arc<dyn AuthApi>,
        connector: Arc<dyn Connector>,
        opener: Arc<dyn UrlOpener>,
    ) -> Self {
        let (inbox, inbox_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(256);
        let root = CancellationToken::new();
        let attempt = root.child_token();

        let mut adapter = TransportAdapter::new(
            connector,
            api.clone(),
            inbox.clone(),
            config.reconnect_delay(),
            config.max_reconnect_attempts,
        );
        adapter.reset_for_attempt(attempt.clone());

        Self {
            classifier: OutputClassifier::from_config(&config),
            logs: LogBuffer::new(config.live_log_budget, config.line_log_cap),
            config,
            api,
            opener,
            adapter,
            assembler: LineAssembler::new(),
            status: SessionStatus::Idle,
            session_id: None,
            menu: MenuTracker::default(),
            login_url: None,
            opened_urls: HashSet::new(),
            error: None,
            notice: None,
            success_signaled: None,
            settle_timer: None,
            history_fetched: None,
            reloaded: false,
            root,
            attempt,
            inbox,
            inbox_rx,
            events,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn transport(&self) -> TransportKind {
        self.adapter.kind()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DialogEvent> {
        self.events.subscribe()
    }

    /// Snapshot of everything the dialog renders
    pub fn state(&self) -> DialogState {
        DialogState {
            status: self.status,
            session_id: self.session_id.clone(),
            live_log: self.logs.live().to_string(),
            lines: self.logs.lines().to_vec(),
            server_logs: self.logs.history().to_vec(),
            menu_options: self.menu.options.clone(),
            login_url: self.login_url.clone(),
            error: self.error.clone(),
            notice: self.notice.clone(),
        }
    }

    /// Begins a login attempt. Allowed from `Idle` and terminal states.
    pub async fn start(&mut self) -> AuthResult<()> {
        if self.status != SessionStatus::Idle && !self.status.is_terminal() {
            return Err(AuthError::InvalidState {
                action: "start",
                status: self.status,
            });
        }

        self.reset_attempt();
        self.set_status(SessionStatus::Starting);

        let started = match self.api.start_session().await {
            Ok(started) => started,
            Err(err) => {
                warn!(error = %err, "failed to start login session");
                self.error = Some(err.to_string());
                self.set_status(SessionStatus::Error);
                return Err(err);
            }
        };

        info!(session_id = %started.session_id, transport = %self.adapter.kind(), "login session started");
        self.bind_session(started.session_id.clone());
        self.adapter.connect(Some(&started.session_id));
        self.set_status(SessionStatus::Streaming);
        Ok(())
    }

    pub async fn retry(&mut self) -> AuthResult<()> {
        info!(previous = %self.status, "retrying login");
        self.start().await
    }

    /// Abandons the current attempt and returns to `Idle`. The backend is
    /// told best-effort; a refusal only leaves a notice.
    pub async fn cancel(&mut self) -> AuthResult<()> {
        self.attempt.cancel();
        self.abort_settle_timer();
        self.adapter.close(CloseReason::Cancel);

        let was_live = matches!(self.status, SessionStatus::Starting | SessionStatus::Streaming);
        if let Some(session_id) = self.session_id.clone().filter(|_| was_live) {
            if let Err(err) = self.api.cancel_session(&session_id).await {
                warn!(%session_id, error = %err, "cancel was not acknowledged");
                self.set_notice(err.to_string());
            }
        }

        if self.menu.clear() {
            self.emit(DialogEvent::MenuOptions(Vec::new()));
        }
        self.login_url = None;
        self.set_status(SessionStatus::Idle);
        Ok(())
    }

    /// Answers the current prompt.
    pub async fn send_input(&mut self, value: &str) -> AuthResult<()> {
        if self.status != SessionStatus::Streaming {
            return Err(AuthError::InvalidState {
                action: "send input",
                status: self.status,
            });
        }

        if let Err(err) = self.adapter.send(value).await {
            warn!(session_id = ?self.session_id, error = %err, "failed to send input");
            self.set_notice(err.to_string());
            return Err(err);
        }

        debug!(session_id = ?self.session_id, "input sent");
        self.logs.append_input(value.trim_end_matches(['\r', '\n']));
        if self.menu.clear() {
            self.emit(DialogEvent::MenuOptions(Vec::new()));
        }
        Ok(())
    }

    /// Replaces the server transcript with a fresh copy.
    pub async fn fetch_history(&mut self) -> AuthResult<usize> {
        let Some(session_id) = self.session_id.clone() else {
            return Err(AuthError::InvalidState {
                action: "fetch history",
                status: self.status,
            });
        };

        let entries = self.api.get_session_log(&session_id).await?;
        let count = entries.len();
        self.logs.replace_history(entries);
        self.history_fetched = Some(session_id);
        self.emit(DialogEvent::HistoryLoaded(count));
        Ok(count)
    }

    /// Empties the on-screen log. The server transcript and any half-received
    /// line are kept.
    pub fn clear_live_log(&mut self) {
        self.logs.clear_live();
        debug!(session_id = ?self.session_id, "live log cleared");
    }

    /// Tears the dialog down and reports how it ended.
    pub async fn close(mut self) -> DialogOutcome {
        self.root.cancel();
        self.abort_settle_timer();

        let outcome = match self.status {
            SessionStatus::Success => DialogOutcome::Success,
            SessionStatus::Error => {
                DialogOutcome::Failed(self.error.clone().unwrap_or_else(|| LOGIN_FAILED.to_string()))
            }
            SessionStatus::Idle => DialogOutcome::Cancelled,
            SessionStatus::Starting | SessionStatus::Streaming => {
                self.adapter.close(CloseReason::Cancel);
                if let Some(session_id) = self.session_id.clone() {
                    if let Err(err) = self.api.cancel_session(&session_id).await {
                        warn!(%session_id, error = %err, "cancel on close was not acknowledged");
                    }
                }
                DialogOutcome::Cancelled
            }
        };

        self.adapter.close(CloseReason::Graceful);
        info!(?outcome, "login dialog closed");
        outcome
    }

    /// Waits for the next item from connectors or timers.
    pub async fn next_inbound(&mut self) -> Option<Inbound> {
        self.inbox_rx.recv().await
    }

    pub async fn handle(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Transport(tagged) => {
                let connection = tagged.connection;
                if let Some(event) = self.adapter.accept(tagged) {
                    self.on_transport_event(connection, event).await;
                }
            }
            Inbound::ReconnectDue { after } => {
                if self.status != SessionStatus::Streaming {
                    return;
                }
                if let Some(id) = self.adapter.reconnect_due(after) {
                    info!(connection = %id, session_id = ?self.session_id, "reconnecting");
                }
            }
            Inbound::SuccessSettled { connection } => {
                if self.status == SessionStatus::Streaming
                    && self.success_signaled == Some(connection)
                {
                    self.settle_timer = None;
                    self.complete(true).await;
                }
            }
        }
    }

    async fn on_transport_event(&mut self, connection: ConnectionId, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                debug!(%connection, "connection open");
            }
            TransportEvent::Output(chunk) => self.on_output(connection, &chunk),
            TransportEvent::Line(line) => {
                self.logs.append(&line);
                self.logs.append("\n");
                self.emit(DialogEvent::Output(line.clone()));
                self.on_line(strip_ansi(&line));
            }
            TransportEvent::Meta { session_id } => {
                if self.session_id.as_deref() != Some(session_id.as_str()) {
                    info!(%connection, %session_id, "session bound by metadata frame");
                }
                self.logs.replace_history(Vec::new());
                self.history_fetched = None;
                self.bind_session(session_id);
            }
            TransportEvent::Completed { success } => {
                if self.adapter.kind() != TransportKind::EventStream {
                    debug!(%connection, "ignoring completion event on raw stream");
                    return;
                }
                if matches!(self.status, SessionStatus::Starting | SessionStatus::Streaming) {
                    self.complete(success).await;
                }
            }
            TransportEvent::Error(message) => {
                if matches!(self.status, SessionStatus::Starting | SessionStatus::Streaming) {
                    warn!(%connection, %message, "login session reported an error");
                    self.abort_settle_timer();
                    self.adapter.close(CloseReason::Graceful);
                    self.error = Some(message);
                    self.set_status(SessionStatus::Error);
                    self.fetch_history_once().await;
                }
            }
            TransportEvent::Reconnecting { delay } => {
                self.flush_pending_line();
                if self.status == SessionStatus::Streaming && self.success_signaled.is_some() {
                    // the CLI exits right after printing the marker
                    self.complete(true).await;
                    return;
                }
                self.emit(DialogEvent::Reconnecting {
                    delay_ms: delay.as_millis() as u64,
                });
            }
            TransportEvent::Closed => {
                self.flush_pending_line();
                if self.status == SessionStatus::Streaming {
                    if self.success_signaled.is_some() {
                        self.complete(true).await;
                    } else {
                        warn!(%connection, session_id = ?self.session_id, "login connection lost");
                        self.error = Some(CONNECTION_LOST.to_string());
                        self.set_status(SessionStatus::Error);
                    }
                }
                self.fetch_history_once().await;
            }
        }
    }

    fn on_output(&mut self, connection: ConnectionId, chunk: &str) {
        self.logs.append(chunk);
        self.emit(DialogEvent::Output(chunk.to_string()));

        let lines = self.assembler.push(chunk);
        let mut saw_marker = false;
        for line in lines {
            saw_marker |= self.classifier.is_success_marker(&line);
            self.on_line(line);
        }
        saw_marker |= self.classifier.is_success_marker(&self.assembler.pending());

        if saw_marker {
            self.signal_success(connection);
        }
    }

    fn on_line(&mut self, line: String) {
        let option = self.classifier.detect_option(&line);
        if self.menu.observe(&line, option) {
            self.emit(DialogEvent::MenuOptions(self.menu.options.clone()));
        }

        if let Some(url) = self.classifier.detect_login_url(&line) {
            self.on_login_url(url);
        }

        if !line.trim().is_empty() {
            self.logs.append_line(line);
        }
    }

    fn on_login_url(&mut self, url: String) {
        if self.login_url.as_deref() != Some(url.as_str()) {
            info!(%url, "login url detected");
            self.login_url = Some(url.clone());
            self.emit(DialogEvent::LoginUrl(url.clone()));
        }

        if self.config.auto_open_login_url && self.opened_urls.insert(url.clone()) {
            if let Err(err) = self.opener.open(&url) {
                warn!(%url, error = %err, "could not open login url");
                self.set_notice(err.to_string());
            }
        }
    }

    /// Arms the settle timer the first time a marker shows up on a connection.
    fn signal_success(&mut self, connection: ConnectionId) {
        if self.adapter.kind() != TransportKind::PtySocket
            || self.status != SessionStatus::Streaming
            || self.success_signaled == Some(connection)
        {
            return;
        }

        info!(%connection, "success marker seen, waiting for output to settle");
        self.success_signaled = Some(connection);
        self.abort_settle_timer();

        let delay = self.config.settle_delay();
        let token = self.attempt.clone();
        let inbox = self.inbox.clone();
        self.settle_timer = Some(tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if !token.is_cancelled() {
                        let _ = inbox.send(Inbound::SuccessSettled { connection });
                    }
                }
            }
        }));
    }

    async fn complete(&mut self, success: bool) {
        self.abort_settle_timer();
        self.adapter.close(CloseReason::Graceful);

        if success {
            self.error = None;
            self.set_status(SessionStatus::Success);
            if !self.reloaded {
                self.reloaded = true;
                if let Err(err) = self.api.reload_system().await {
                    warn!(error = %err, "failed to reload system state after login");
                    self.set_notice(err.to_string());
                }
            }
        } else {
            self.error = Some(LOGIN_FAILED.to_string());
            self.set_status(SessionStatus::Error);
        }

        self.fetch_history_once().await;
    }

    async fn fetch_history_once(&mut self) {
        let Some(session_id) = self.session_id.clone() else {
            return;
        };
        if self.history_fetched.as_deref() == Some(session_id.as_str()) {
            return;
        }
        if let Err(err) = self.fetch_history().await {
            warn!(%session_id, error = %err, "failed to fetch session history");
            self.history_fetched = Some(session_id);
        }
    }

    fn flush_pending_line(&mut self) {
        if let Some(line) = self.assembler.finish() {
            self.on_line(line);
        }
    }

    fn reset_attempt(&mut self) {
        self.attempt.cancel();
        self.attempt = self.root.child_token();
        self.abort_settle_timer();
        self.adapter.reset_for_attempt(self.attempt.clone());

        self.logs.clear();
        self.assembler.reset();
        self.menu.clear();
        self.login_url = None;
        self.session_id = None;
        self.error = None;
        self.notice = None;
        self.success_signaled = None;
        self.history_fetched = None;
        self.reloaded = false;
    }

    fn bind_session(&mut self, session_id: String) {
        self.adapter.bind_session(&session_id);
        self.session_id = Some(session_id.clone());
        self.emit(DialogEvent::SessionBound(session_id));
    }

    fn abort_settle_timer(&mut self) {
        if let Some(timer) = self.settle_timer.take() {
            timer.abort();
        }
    }

    fn set_status(&mut self, status: SessionStatus) {
        if self.status != status {
            debug!(from = %self.status, to = %status, "status changed");
            self.status = status;
            self.emit(DialogEvent::StatusChanged(status));
        }
    }

    fn set_notice(&mut self, notice: String) {
        self.notice = Some(notice.clone());
        self.emit(DialogEvent::Notice(notice));
    }

    fn emit(&self, event: DialogEvent) {
        // no subscribers is fine
        let _ = self.events.send(event);
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.root.cancel();
        self.abort_settle_timer();
    }
}
