//! Default [`Transport`] over `tokio-tungstenite`.
//!
//! Each `open` spawns one connection task that owns the WebSocket. Outbound
//! frames reach it through an unbounded queue; inbound text frames, the open
//! and the close are reported through the sink of that `open`.

use std::{fmt::Display, sync::Arc, time::Duration};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::{sync::mpsc, time::timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::{Transport, TransportSink};
use crate::{
    config::SocketConfig,
    error::{PhxError, PhxResult},
    types::SocketState,
};

/// Close code reported when the connection ended without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code reported when the close frame carried no status.
const NO_STATUS: u16 = 1005;

struct Connection {
    outbound: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
    state: Arc<Mutex<SocketState>>,
}

/// WebSocket transport backed by `tokio-tungstenite`.
pub struct WebSocketTransport {
    connect_timeout: Duration,
    max_message_size: usize,
    current: Mutex<Option<Connection>>,
}

impl WebSocketTransport {
    /// Create a transport using the timeouts and limits of `config`.
    pub fn new(config: &SocketConfig) -> Self {
        Self::with_options(config.connect_timeout, config.max_message_size)
    }

    /// Create a transport with an explicit connect timeout and inbound frame
    /// size limit.
    pub fn with_options(connect_timeout: Duration, max_message_size: usize) -> Self {
        Self {
            connect_timeout,
            max_message_size,
            current: Mutex::new(None),
        }
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, url: &Url, sink: TransportSink) {
        let state = Arc::new(Mutex::new(SocketState::Connecting));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let previous = self.current.lock().replace(Connection {
            outbound,
            cancel: cancel.clone(),
            state: Arc::clone(&state),
        });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            *state.lock() = SocketState::Closed;
            sink.errored("no tokio runtime to drive the WebSocket");
            return;
        };

        let _ = runtime.spawn(run_connection(
            websocket_url(url),
            sink,
            outbound_rx,
            cancel,
            state,
            self.connect_timeout,
            self.max_message_size,
        ));
    }

    fn close(&self) {
        if let Some(connection) = self.current.lock().take() {
            {
                let mut state = connection.state.lock();
                if *state != SocketState::Closed {
                    *state = SocketState::Closing;
                }
            }
            connection.cancel.cancel();
        }
    }

    fn send(&self, text: String) -> PhxResult<()> {
        let current = self.current.lock();
        let Some(connection) = current.as_ref() else {
            return Err(PhxError::NotConnected);
        };
        if !connection.state.lock().is_open() {
            return Err(PhxError::NotConnected);
        }
        connection
            .outbound
            .send(Message::text(text))
            .map_err(|_| PhxError::NotConnected)
    }

    fn state(&self) -> SocketState {
        self.current
            .lock()
            .as_ref()
            .map(|connection| *connection.state.lock())
            .unwrap_or(SocketState::Closed)
    }
}

/// Map `http`/`https` endpoints to `ws`/`wss`.
fn websocket_url(url: &Url) -> Url {
    let mut url = url.clone();
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        _ => return url,
    };
    // Both schemes are special, so the switch cannot fail.
    let _ = url.set_scheme(scheme);
    url
}

/// How a connection task ended without failing.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    /// Closed by [`Transport::close`]; nothing is reported.
    Local,
    /// Closed by the peer.
    Remote { code: u16, reason: String, clean: bool },
}

async fn run_connection(
    url: Url,
    sink: TransportSink,
    outbound: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
    state: Arc<Mutex<SocketState>>,
    connect_timeout: Duration,
    max_message_size: usize,
) {
    debug!(url = %url, "Opening WebSocket");
    let connected = tokio::select! {
        () = cancel.cancelled() => {
            *state.lock() = SocketState::Closed;
            return;
        }
        result = connect_websocket(&url, connect_timeout) => result,
    };

    let ws = match connected {
        Ok(ws) => ws,
        Err(err) => {
            *state.lock() = SocketState::Closed;
            warn!(url = %url, error = %err, "WebSocket connect failed");
            sink.errored(err.to_string());
            return;
        }
    };

    *state.lock() = SocketState::Open;
    info!(url = %url, "WebSocket connected");
    sink.opened();

    let (ws_write, ws_read) = ws.split();
    let result = connection_task(ws_read, ws_write, outbound, &cancel, &sink, max_message_size).await;
    *state.lock() = SocketState::Closed;

    match result {
        Ok(Outcome::Local) => debug!(url = %url, "WebSocket closed locally"),
        Ok(Outcome::Remote {
            code,
            reason,
            clean,
        }) => {
            info!(url = %url, code, reason = %reason, "WebSocket closed by peer");
            sink.closed(code, reason, clean);
        }
        Err(err) => {
            warn!(url = %url, error = %err, "WebSocket failed");
            sink.errored(err.to_string());
        }
    }
}

async fn connect_websocket(
    url: &Url,
    connect_timeout: Duration,
) -> PhxResult<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
> {
    let (ws, _response) = timeout(connect_timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| PhxError::websocket(format!("connect timed out after {connect_timeout:?}")))?
        .map_err(|e| PhxError::websocket(e.to_string()))?;
    Ok(ws)
}

async fn connection_task<R, W, E>(
    mut ws_read: R,
    mut ws_write: W,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    cancel: &CancellationToken,
    sink: &TransportSink,
    max_message_size: usize,
) -> PhxResult<Outcome>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    W: Sink<Message> + Unpin,
    W::Error: Display,
    E: Display,
{
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let _ = ws_write.send(Message::Close(None)).await;
                let _ = ws_write.close().await;
                return Ok(Outcome::Local);
            }
            message = outbound.recv() => {
                let Some(message) = message else {
                    let _ = ws_write.close().await;
                    return Ok(Outcome::Local);
                };
                if let Err(err) = ws_write.send(message).await {
                    return Err(PhxError::websocket(format!("Failed to send frame: {err}")));
                }
            }
            frame = ws_read.next() => {
                if sink.is_closed() {
                    debug!("Socket dropped, closing WebSocket");
                    let _ = ws_write.send(Message::Close(None)).await;
                    let _ = ws_write.close().await;
                    return Ok(Outcome::Local);
                }
                match frame {
                    Some(Ok(message)) => {
                        let size = match &message {
                            Message::Text(text) => text.len(),
                            Message::Binary(data) => data.len(),
                            _ => 0,
                        };
                        if size > max_message_size {
                            warn!(size, max = max_message_size, "Dropping oversized WebSocket message");
                            continue;
                        }

                        match message {
                            Message::Text(text) => sink.received(text.as_str()),
                            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                                Ok(text) => sink.received(text),
                                Err(_) => debug!(size, "Dropping non-UTF-8 binary frame"),
                            },
                            Message::Close(frame) => {
                                let (code, reason) = frame
                                    .map(|frame| (u16::from(frame.code), frame.reason.to_string()))
                                    .unwrap_or((NO_STATUS, String::new()));
                                return Ok(Outcome::Remote {
                                    code,
                                    reason,
                                    clean: true,
                                });
                            }
                            Message::Ping(data) => {
                                let _ = ws_write.send(Message::Pong(data)).await;
                            }
                            Message::Pong(_) | Message::Frame(_) => {}
                        }
                    }
                    Some(Err(err)) => {
                        return Err(PhxError::websocket(err.to_string()));
                    }
                    None => {
                        return Ok(Outcome::Remote {
                            code: ABNORMAL_CLOSURE,
                            reason: "connection dropped".to_string(),
                            clean: false,
                        });
                    }
                }
            }
        }
    }
}
