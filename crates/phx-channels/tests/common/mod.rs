#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use parking_lot::Mutex;
use phx_channels::{
    CallbackMode, PhxError, PhxResult, Socket, SocketConfig, SocketState, Transport, TransportSink,
};
use serde_json::{Value, json};
use url::Url;

/// Transport double: records opens and sent frames, and exposes the sink of
/// the latest `open` so tests can inject transport events.
#[derive(Default)]
pub struct MockTransport {
    sent: Mutex<Vec<String>>,
    opens: Mutex<Vec<Url>>,
    sink: Mutex<Option<TransportSink>>,
    closes: Mutex<usize>,
    state: Mutex<SocketState>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn frames(&self) -> Vec<Value> {
        self.sent
            .lock()
            .iter()
            .map(|text| serde_json::from_str(text).expect("sent frame is json"))
            .collect()
    }

    pub fn frames_with_event(&self, event: &str) -> Vec<Value> {
        self.frames()
            .into_iter()
            .filter(|frame| frame["event"] == event)
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.opens.lock().len()
    }

    pub fn last_url(&self) -> Option<Url> {
        self.opens.lock().last().cloned()
    }

    pub fn close_count(&self) -> usize {
        *self.closes.lock()
    }

    pub fn sink(&self) -> TransportSink {
        self.sink.lock().clone().expect("transport was opened")
    }
}

impl Transport for MockTransport {
    fn open(&self, url: &Url, sink: TransportSink) {
        self.opens.lock().push(url.clone());
        *self.sink.lock() = Some(sink);
        *self.state.lock() = SocketState::Open;
    }

    fn close(&self) {
        *self.closes.lock() += 1;
        *self.state.lock() = SocketState::Closed;
    }

    fn send(&self, text: String) -> PhxResult<()> {
        if !self.state.lock().is_open() {
            return Err(PhxError::NotConnected);
        }
        self.sent.lock().push(text);
        Ok(())
    }

    fn state(&self) -> SocketState {
        *self.state.lock()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Inline callbacks, heartbeat off, 5s reconnect.
pub fn test_config() -> SocketConfig {
    SocketConfig::new("ws://localhost:4000/socket/websocket")
        .heartbeat_interval(Duration::ZERO)
        .reconnect_interval(Duration::from_secs(5))
        .callback_mode(CallbackMode::Inline)
}

pub fn mock_socket(config: SocketConfig) -> (Socket, Arc<MockTransport>) {
    init_tracing();
    let transport = MockTransport::new();
    let socket = Socket::with_transport(config, Arc::clone(&transport) as Arc<dyn Transport>)
        .expect("valid config");
    (socket, transport)
}

/// Connect and deliver the open notification.
pub async fn open(socket: &Socket, transport: &MockTransport) {
    socket.connect().expect("connect");
    transport.sink().opened();
    settle().await;
    assert!(socket.is_connected());
}

/// Let spawned tasks run until they park.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

pub fn reply_frame(topic: &str, reference: u64, status: &str, response: Value) -> String {
    json!({
        "topic": topic,
        "event": "phx_reply",
        "payload": {"status": status, "response": response},
        "ref": reference,
    })
    .to_string()
}
