use super::types::*;
use crate::auth::error::AuthError;
use eventsource_client as es;
use eventsource_client::Client as _;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Envelope carried in each SSE `data` field
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
enum Envelope {
    Output { line: String },
    Completed { success: bool },
    Error { message: String },
}

pub fn parse_envelope(data: &str) -> Result<TransportEvent, AuthError> {
    let envelope: Envelope = serde_json::from_str(data)
        .map_err(|e| AuthError::Protocol(format!("malformed event payload: {}", e)))?;
    Ok(match envelope {
        Envelope::Output { line } => TransportEvent::Line(line),
        Envelope::Completed { success } => TransportEvent::Completed { success },
        Envelope::Error { message } => TransportEvent::Error(message),
    })
}

/// What the connector pulls off the wire
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    /// The server accepted the subscription; no data needed yet
    Connected,
    Data(String),
}

/// Forwards envelopes from a stream of SSE items until it ends or errors.
/// Malformed payloads are dropped. Always finishes with `Closed`.
pub async fn pump_envelopes<S>(mut items: S, sink: &EventSink)
where
    S: Stream<Item = Result<StreamItem, String>> + Unpin,
{
    let mut opened = false;
    while let Some(item) = items.next().await {
        let item = match item {
            Ok(item) => item,
            Err(e) => {
                debug!(connection = %sink.connection(), error = %e, "event stream ended with error");
                break;
            }
        };

        if !opened {
            opened = true;
            if !sink.emit(TransportEvent::Opened) {
                return;
            }
        }

        let data = match item {
            StreamItem::Connected => continue,
            StreamItem::Data(data) => data,
        };
        if data.trim().is_empty() {
            continue;
        }

        match parse_envelope(&data) {
            Ok(event) => {
                if !sink.emit(event) {
                    return;
                }
            }
            Err(err) => {
                warn!(connection = %sink.connection(), %err, "dropping event");
            }
        }
    }
    sink.emit(TransportEvent::Closed);
}

/// Structured-event connector backed by `eventsource-client`
pub struct EventStreamConnector {
    base_url: String,
}

impl EventStreamConnector {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn stream_url(&self, session_id: &str) -> String {
        format!("{}/api/auth/claude/sessions/{}/events", self.base_url, session_id)
    }
}

impl Connector for EventStreamConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::EventStream
    }

    fn open(&self, session_id: Option<&str>, sink: EventSink) -> ConnectionHandle {
        let id = sink.connection();
        let Some(session_id) = session_id else {
            warn!(connection = %id, "event stream needs a session id");
            sink.emit(TransportEvent::Error("no session to subscribe to".to_string()));
            return ConnectionHandle {
                id,
                input: None,
                task: None,
            };
        };

        let url = self.stream_url(session_id);
        let task = tokio::spawn(async move {
            let client = match es::ClientBuilder::for_url(&url).and_then(|builder| {
                builder.header("Accept", "text/event-stream").map(|b| {
                    b.reconnect(es::ReconnectOptions::reconnect(false).build())
                        .build()
                })
            }) {
                Ok(client) => client,
                Err(e) => {
                    warn!(connection = %id, %url, error = ?e, "failed to build event stream client");
                    sink.emit(TransportEvent::Closed);
                    return;
                }
            };

            info!(connection = %id, %url, "subscribing to login events");
            let items = client.stream().filter_map(|item| async move {
                match item {
                    Ok(es::SSE::Connected(_)) => Some(Ok(StreamItem::Connected)),
                    Ok(es::SSE::Event(event)) => Some(Ok(StreamItem::Data(event.data))),
                    Ok(es::SSE::Comment(_)) => None,
                    Err(e) => Some(Err(format!("{:?}", e))),
                }
            });
            pump_envelopes(Box::pin(items), &sink).await;
        });

        ConnectionHandle {
            id,
            input: None,
            task: Some(task),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn drain(rx: &mut mpsc::UnboundedReceiver<Inbound>) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(inbound) = rx.try_recv() {
            if let Inbound::Transport(tagged) = inbound {
                assert_eq!(tagged.connection, ConnectionId(7));
                events.push(tagged.event);
            }
        }
        events
    }

    #[test]
    fn test_parse_envelopes() {
        assert_eq!(
            parse_envelope(r#"{"type":"OUTPUT","line":"[1] Browser login"}"#).unwrap(),
            TransportEvent::Line("[1] Browser login".to_string())
        );
        assert_eq!(
            parse_envelope(r#"{"type":"COMPLETED","success":true}"#).unwrap(),
            TransportEvent::Completed { success: true }
        );
        assert_eq!(
            parse_envelope(r#"{"type":"ERROR","message":"claude exited"}"#).unwrap(),
            TransportEvent::Error("claude exited".to_string())
        );
    }

    #[test]
    fn test_malformed_envelopes_are_protocol_errors() {
        for bad in [
            "not json",
            r#"{"type":"OUTPUT"}"#,
            r#"{"type":"PROGRESS","value":3}"#,
            r#"{"line":"missing type"}"#,
        ] {
            assert!(matches!(parse_envelope(bad), Err(AuthError::Protocol(_))), "{}", bad);
        }
    }

    #[tokio::test]
    async fn test_pump_drops_malformed_and_keeps_going() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(ConnectionId(7), tx);
        let payloads = stream::iter(vec![
            Ok(StreamItem::Connected),
            Ok(StreamItem::Data(r#"{"type":"OUTPUT","line":"hello"}"#.to_string())),
            Ok(StreamItem::Data("{broken".to_string())),
            Ok(StreamItem::Data(String::new())),
            Ok(StreamItem::Data(r#"{"type":"COMPLETED","success":true}"#.to_string())),
        ]);

        pump_envelopes(payloads, &sink).await;

        assert_eq!(
            drain(&mut rx),
            vec![
                TransportEvent::Opened,
                TransportEvent::Line("hello".to_string()),
                TransportEvent::Completed { success: true },
                TransportEvent::Closed,
            ]
        );
    }

    #[tokio::test]
    async fn test_pump_opens_on_connect_before_any_data() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(ConnectionId(7), tx);
        let items = stream::iter(vec![Ok(StreamItem::Connected)]).chain(stream::pending());
        let pump = tokio::spawn(async move { pump_envelopes(Box::pin(items), &sink).await });

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap();
        assert!(matches!(
            first,
            Some(Inbound::Transport(TaggedEvent { event: TransportEvent::Opened, .. }))
        ));
        pump.abort();
    }

    async fn recv_until_closed(rx: &mut mpsc::UnboundedReceiver<Inbound>) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        while let Ok(Some(inbound)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            if let Inbound::Transport(tagged) = inbound {
                let closed = tagged.event == TransportEvent::Closed;
                events.push(tagged.event);
                if closed {
                    break;
                }
            }
        }
        events
    }

    #[tokio::test]
    async fn test_quiet_stream_reports_opened() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/claude/sessions/s1/events"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(": keepalive\n\n", "text/event-stream"))
            .mount(&mock_server)
            .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = EventStreamConnector::new(&mock_server.uri());
        let _handle = connector.open(Some("s1"), EventSink::new(ConnectionId(7), tx));

        assert_eq!(
            recv_until_closed(&mut rx).await,
            vec![TransportEvent::Opened, TransportEvent::Closed]
        );
    }

    #[tokio::test]
    async fn test_live_stream_forwards_envelopes() {
        let mock_server = MockServer::start().await;
        let body = concat!(
            ": keepalive\n\n",
            "data: {\"type\":\"OUTPUT\",\"line\":\"[1] Browser login\"}\n\n",
            "data: {\"type\":\"COMPLETED\",\"success\":true}\n\n",
        );
        Mock::given(method("GET"))
            .and(path("/api/auth/claude/sessions/s1/events"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&mock_server)
            .await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = EventStreamConnector::new(&mock_server.uri());
        let _handle = connector.open(Some("s1"), EventSink::new(ConnectionId(7), tx));

        assert_eq!(
            recv_until_closed(&mut rx).await,
            vec![
                TransportEvent::Opened,
                TransportEvent::Line("[1] Browser login".to_string()),
                TransportEvent::Completed { success: true },
                TransportEvent::Closed,
            ]
        );
    }

    #[tokio::test]
    async fn test_pump_reports_close_without_open_on_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(ConnectionId(7), tx);
        let payloads = stream::iter(vec![Err("connection refused".to_string())]);

        pump_envelopes(payloads, &sink).await;

        assert_eq!(drain(&mut rx), vec![TransportEvent::Closed]);
    }

    #[tokio::test]
    async fn test_open_without_session_reports_error() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = EventStreamConnector::new("http://127.0.0.1:3001/");
        let handle = connector.open(None, EventSink::new(ConnectionId(7), tx));

        assert!(handle.task.is_none());
        assert!(matches!(drain(&mut rx).as_slice(), [TransportEvent::Error(_)]));
        assert_eq!(
            connector.stream_url("s1"),
            "http://127.0.0.1:3001/api/auth/claude/sessions/s1/events"
        );
    }
}
