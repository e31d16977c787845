use super::decoder::Utf8StreamDecoder;
use super::types::*;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetaPayload {
    session_id: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum TextFrame {
    /// Metadata frame; carries the session id when the payload had one
    Meta(Option<String>),
    Output(String),
}

pub fn parse_text_frame(text: &str, meta_prefix: &str) -> TextFrame {
    match text.strip_prefix(meta_prefix) {
        Some(payload) => match serde_json::from_str::<MetaPayload>(payload) {
            Ok(meta) => TextFrame::Meta(meta.session_id.filter(|id| !id.is_empty())),
            Err(e) => {
                warn!(error = %e, "failed to parse PTY metadata frame");
                TextFrame::Meta(None)
            }
        },
        None => TextFrame::Output(text.to_string()),
    }
}

/// Raw PTY-over-WebSocket connector
pub struct PtySocketConnector {
    socket_url: String,
    meta_prefix: String,
}

impl PtySocketConnector {
    /// `socket_url` is the bridge endpoint without a session query
    pub fn new(socket_url: &str, meta_prefix: &str) -> Self {
        Self {
            socket_url: socket_url.to_string(),
            meta_prefix: meta_prefix.to_string(),
        }
    }

    fn url_for(&self, session_id: Option<&str>) -> String {
        match session_id {
            Some(id) => match url::Url::parse(&self.socket_url) {
                Ok(mut url) => {
                    url.query_pairs_mut().append_pair("session_id", id);
                    url.to_string()
                }
                Err(_) => self.socket_url.clone(),
            },
            None => self.socket_url.clone(),
        }
    }
}

impl Connector for PtySocketConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::PtySocket
    }

    fn open(&self, session_id: Option<&str>, sink: EventSink) -> ConnectionHandle {
        let id = sink.connection();
        let url = self.url_for(session_id);
        let meta_prefix = self.meta_prefix.clone();
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(async move {
            run_socket(url, meta_prefix, sink, input_rx).await;
        });

        ConnectionHandle {
            id,
            input: Some(input_tx),
            task: Some(task),
        }
    }
}

async fn run_socket(
    url: String,
    meta_prefix: String,
    sink: EventSink,
    mut input_rx: mpsc::UnboundedReceiver<String>,
) {
    let connection = sink.connection();
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            warn!(%connection, %url, error = %e, "failed to connect PTY socket");
            sink.emit(TransportEvent::Closed);
            return;
        }
    };

    info!(%connection, %url, "PTY socket connected");
    sink.emit(TransportEvent::Opened);

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let mut decoder = Utf8StreamDecoder::new();
    let mut meta_bound = false;

    loop {
        tokio::select! {
            frame = ws_rx.next() => {
                match frame {
                    Some(Ok(Message::Binary(bytes))) => {
                        let text = decoder.decode(&bytes);
                        debug!(%connection, bytes = bytes.len(), "received binary frame");
                        if !text.is_empty() && !sink.emit(TransportEvent::Output(text)) {
                            return;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        match parse_text_frame(&text, &meta_prefix) {
                            TextFrame::Meta(Some(session_id)) if !meta_bound => {
                                meta_bound = true;
                                sink.emit(TransportEvent::Meta { session_id });
                            }
                            TextFrame::Meta(_) => {
                                debug!(%connection, "ignoring metadata frame");
                            }
                            TextFrame::Output(text) => {
                                if !sink.emit(TransportEvent::Output(text)) {
                                    return;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(%connection, ?frame, "PTY socket closed by server");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(%connection, error = %e, "PTY socket error");
                        break;
                    }
                    None => break,
                }
            }
            input = input_rx.recv() => {
                match input {
                    Some(text) => {
                        if let Err(e) = ws_tx.send(Message::Text(text)).await {
                            warn!(%connection, error = %e, "failed to write to PTY socket");
                            break;
                        }
                    }
                    None => {
                        debug!(%connection, "input closed, closing PTY socket");
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }

    let residue = decoder.finish();
    if !residue.is_empty() {
        sink.emit(TransportEvent::Output(residue));
    }
    sink.emit(TransportEvent::Closed);
}
