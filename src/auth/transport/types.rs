use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Which push channel carries the login session
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Server-sent events with structured JSON envelopes
    EventStream,
    /// Raw PTY bytes over a WebSocket
    PtySocket,
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "event-stream" | "eventstream" | "sse" => Ok(TransportKind::EventStream),
            "pty-socket" | "pty" | "websocket" | "ws" => Ok(TransportKind::PtySocket),
            other => Err(format!("unknown transport '{}'", other)),
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::EventStream => f.write_str("event-stream"),
            TransportKind::PtySocket => f.write_str("pty-socket"),
        }
    }
}

/// Identifies one physical connection; a reconnect gets a fresh id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Normalized event surface shared by both connectors
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    /// Raw text chunk; may end mid-line
    Output(String),
    /// One complete line of output
    Line(String),
    Completed { success: bool },
    Error(String),
    Meta { session_id: String },
    Closed,
    /// Produced by the adapter when it has scheduled a reconnect
    Reconnecting { delay: Duration },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaggedEvent {
    pub connection: ConnectionId,
    pub event: TransportEvent,
}

/// Everything the controller's inbox can receive
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Transport(TaggedEvent),
    ReconnectDue { after: ConnectionId },
    SuccessSettled { connection: ConnectionId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Graceful,
    Cancel,
}

/// Where a connector delivers the events of one connection
#[derive(Debug, Clone)]
pub struct EventSink {
    connection: ConnectionId,
    tx: mpsc::UnboundedSender<Inbound>,
}

impl EventSink {
    pub fn new(connection: ConnectionId, tx: mpsc::UnboundedSender<Inbound>) -> Self {
        Self { connection, tx }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    /// Returns false once the receiving side is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx
            .send(Inbound::Transport(TaggedEvent {
                connection: self.connection,
                event,
            }))
            .is_ok()
    }
}

/// Live connection owned by the adapter
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    /// Present for duplex channels; writes go through the socket
    pub input: Option<mpsc::UnboundedSender<String>>,
    pub task: Option<JoinHandle<()>>,
}

impl ConnectionHandle {
    /// Graceful shutdown drops the input side so the writer can send a close
    /// frame; otherwise the I/O task is aborted.
    pub fn shutdown(mut self, graceful: bool) {
        let had_writer = self.input.take().is_some();
        if let Some(task) = self.task.take() {
            if !(graceful && had_writer) {
                task.abort();
            }
        }
    }
}

/// Opens one connection per call; the adapter decides when to call it
pub trait Connector: Send + Sync {
    fn kind(&self) -> TransportKind;

    fn open(&self, session_id: Option<&str>, sink: EventSink) -> ConnectionHandle;
}
