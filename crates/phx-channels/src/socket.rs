//! Connection supervisor.
//!
//! A [`Socket`] owns one transport at a time, hands out message refs, keeps
//! the connection alive with heartbeats, reconnects at a fixed interval after
//! the transport closes, and routes every inbound frame to the channels
//! registered for its topic.
//!
//! # Tasks
//!
//! ```text
//!  transport ──(epoch, event)──▶ dispatcher ──▶ channels ──▶ bindings
//!                                   │
//!               heartbeat ◀─────────┤ on open
//!               reconnect ◀─────────┘ on close
//! ```
//!
//! The dispatcher is the single point where frames are decoded and routed,
//! so channel events for one connection fire in wire order. Heartbeat and
//! reconnect each run as their own task and stop when their
//! [`CancellationToken`] is cancelled.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::{sync::mpsc, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    callback::{
        CallbackList, MessageCallback, OpenCallback, ReasonCallback, deliver,
    },
    channel::{Channel, ChannelInner},
    config::SocketConfig,
    error::{PhxError, PhxResult},
    protocol::{Envelope, PHX_ERROR},
    transport::{EventReceiver, EventSender, Transport, TransportEvent, TransportSink},
    types::{ChannelId, ConnectionEpoch, Ref, SocketState, Topic},
};

/// Transport currently owned by the socket, with the state the socket
/// derives from its notifications.
struct Link {
    /// Transport supplied by the application; reused on every connect.
    injected: Option<Arc<dyn Transport>>,
    /// Transport of the current connection.
    transport: Option<Arc<dyn Transport>>,
    epoch: ConnectionEpoch,
    state: SocketState,
    /// Params of the last connect, reused by reconnect.
    params: BTreeMap<String, String>,
}

pub(crate) struct SocketInner {
    config: Arc<SocketConfig>,
    refs: AtomicU64,
    channels: scc::HashMap<ChannelId, Weak<ChannelInner>>,
    next_channel_id: AtomicU64,
    link: Mutex<Link>,
    reconnect_enabled: AtomicBool,
    heartbeat: Mutex<Option<CancellationToken>>,
    reconnect: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
    events_tx: EventSender,
    events_rx: Mutex<Option<EventReceiver>>,
    open_callbacks: CallbackList<OpenCallback>,
    close_callbacks: CallbackList<ReasonCallback>,
    error_callbacks: CallbackList<ReasonCallback>,
    message_callbacks: CallbackList<MessageCallback>,
}

impl Drop for SocketInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(token) = self.heartbeat.get_mut().take() {
            token.cancel();
        }
        if let Some(token) = self.reconnect.get_mut().take() {
            token.cancel();
        }
        if let Some(transport) = self.link.get_mut().transport.take() {
            transport.close();
        }
    }
}

/// Handle to one logical connection.
///
/// Cheap to clone; all clones drive the same connection. The socket
/// outlives reconnects: refs keep increasing and registered channels stay
/// registered.
#[derive(Clone)]
pub struct Socket {
    inner: Arc<SocketInner>,
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("url", &self.inner.config.url)
            .field("state", &self.socket_state())
            .finish_non_exhaustive()
    }
}

impl Socket {
    /// Create a socket that opens the default WebSocket transport on connect.
    pub fn new(config: SocketConfig) -> PhxResult<Self> {
        Self::build(config, None)
    }

    /// Create a socket that drives `transport` instead of the default one.
    ///
    /// The same transport instance is re-opened on every reconnect.
    pub fn with_transport(config: SocketConfig, transport: Arc<dyn Transport>) -> PhxResult<Self> {
        Self::build(config, Some(transport))
    }

    fn build(config: SocketConfig, injected: Option<Arc<dyn Transport>>) -> PhxResult<Self> {
        config.validate().map_err(PhxError::config)?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let reconnect_enabled = AtomicBool::new(config.reconnect_on_error);
        let inner = SocketInner {
            config: Arc::new(config),
            refs: AtomicU64::new(0),
            channels: scc::HashMap::new(),
            next_channel_id: AtomicU64::new(0),
            link: Mutex::new(Link {
                injected,
                transport: None,
                epoch: ConnectionEpoch::default(),
                state: SocketState::Closed,
                params: BTreeMap::new(),
            }),
            reconnect_enabled,
            heartbeat: Mutex::new(None),
            reconnect: Mutex::new(None),
            shutdown: CancellationToken::new(),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            open_callbacks: CallbackList::new(),
            close_callbacks: CallbackList::new(),
            error_callbacks: CallbackList::new(),
            message_callbacks: CallbackList::new(),
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Socket configuration.
    pub fn config(&self) -> &SocketConfig {
        &self.inner.config
    }

    // ========================
    // Connection lifecycle
    // ========================

    /// Connect without URL params.
    pub fn connect(&self) -> PhxResult<()> {
        self.connect_with(BTreeMap::new())
    }

    /// Connect, appending `params` to the endpoint URL as query pairs.
    ///
    /// Returns as soon as the transport has been asked to open; the outcome
    /// is reported through [`on_open`](Self::on_open),
    /// [`on_error`](Self::on_error) and [`on_close`](Self::on_close).
    /// Calling it while already connecting or open does nothing. Must be
    /// called from within a tokio runtime.
    pub fn connect_with(&self, params: BTreeMap<String, String>) -> PhxResult<()> {
        let state = self.socket_state();
        if matches!(state, SocketState::Connecting | SocketState::Open) {
            debug!(state = %state, "connect() ignored, socket already active");
            return Ok(());
        }
        self.cancel_reconnect();
        self.establish(params)
    }

    /// Stop heartbeats and reconnects and close the transport.
    ///
    /// No close callbacks fire and channels are not notified.
    pub fn disconnect(&self) {
        info!(url = %self.inner.config.url, "Disconnecting socket");
        self.cancel_heartbeat();
        self.cancel_reconnect();
        self.teardown();
    }

    /// Tear down the current transport and connect again with the params of
    /// the last connect.
    pub fn reconnect(&self) -> PhxResult<()> {
        self.teardown();
        let params = self.inner.link.lock().params.clone();
        self.connect_with(params)
    }

    /// Enable or disable reconnecting after the transport closes.
    pub fn set_reconnect_enabled(&self, enabled: bool) {
        self.inner.reconnect_enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.cancel_reconnect();
        }
    }

    /// Whether a transport close starts the reconnect loop.
    pub fn reconnect_enabled(&self) -> bool {
        self.inner.reconnect_enabled.load(Ordering::SeqCst)
    }

    /// Returns true when the socket is open.
    pub fn is_connected(&self) -> bool {
        self.socket_state().is_open()
    }

    /// Connection state as derived from transport notifications.
    pub fn socket_state(&self) -> SocketState {
        self.inner.link.lock().state
    }

    fn establish(&self, params: BTreeMap<String, String>) -> PhxResult<()> {
        let url = self.inner.config.endpoint_url(&params)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| PhxError::config("connect must be called from within a tokio runtime"))?;

        if let Some(rx) = self.inner.events_rx.lock().take() {
            let _ = runtime.spawn(run_dispatcher(
                Arc::downgrade(&self.inner),
                rx,
                self.inner.shutdown.clone(),
            ));
        }

        let (transport, sink) = {
            let mut link = self.inner.link.lock();
            let transport = match link.transport.clone() {
                Some(transport) => transport,
                None => {
                    let transport = link
                        .injected
                        .clone()
                        .or_else(|| default_transport(&self.inner.config))
                        .ok_or_else(|| PhxError::config("no transport available"))?;
                    link.transport = Some(Arc::clone(&transport));
                    transport
                }
            };
            link.epoch.0 += 1;
            link.state = SocketState::Connecting;
            link.params = params;
            let sink = TransportSink::new(link.epoch, self.inner.events_tx.clone());
            (transport, sink)
        };

        info!(url = %url, epoch = sink.epoch().0, "Connecting socket");
        transport.open(&url, sink);
        Ok(())
    }

    /// Close and release the current transport. Later notifications from it
    /// are ignored.
    fn teardown(&self) {
        let transport = {
            let mut link = self.inner.link.lock();
            link.epoch.0 += 1;
            link.state = SocketState::Closed;
            link.transport.take()
        };
        if let Some(transport) = transport {
            transport.close();
        }
    }

    // ========================
    // Refs and sending
    // ========================

    /// Next message ref. Strictly increasing from zero for the lifetime of
    /// this socket; concurrent callers never observe the same value.
    pub fn make_ref(&self) -> Ref {
        Ref(self.inner.refs.fetch_add(1, Ordering::Relaxed))
    }

    /// Encode and send a frame. Fire-and-forget: failures are logged.
    pub fn push(&self, envelope: &Envelope) {
        let text = match envelope.encode() {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, topic = %envelope.topic, event = %envelope.event, "Failed to encode frame");
                return;
            }
        };

        let transport = self.inner.link.lock().transport.clone();
        let Some(transport) = transport else {
            warn!(topic = %envelope.topic, event = %envelope.event, "Dropping frame, socket has no transport");
            return;
        };

        if let Err(err) = transport.send(text) {
            warn!(error = %err, topic = %envelope.topic, event = %envelope.event, "Failed to send frame");
        }
    }

    // ========================
    // Inbound routing
    // ========================

    /// Decode a raw frame and route it to every channel on its topic, then to
    /// the message callbacks. Undecodable frames are dropped.
    pub fn dispatch(&self, raw: &str) {
        let envelope = match Envelope::decode(raw) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "Dropping undecodable frame");
                return;
            }
        };

        if envelope.is_reply() && envelope.reference.is_none() {
            debug!(topic = %envelope.topic, "Reply without ref matches no push");
        }

        for channel in self.channels_for(&envelope.topic) {
            channel.trigger_event(&envelope.event, &envelope.payload, envelope.reference);
        }

        let callbacks = self.inner.message_callbacks.snapshot();
        if callbacks.is_empty() {
            return;
        }
        let envelope = Arc::new(envelope);
        for callback in callbacks {
            let envelope = Arc::clone(&envelope);
            deliver(self.inner.config.callback_mode, move || callback(&envelope));
        }
    }

    fn handle_event(&self, epoch: ConnectionEpoch, event: TransportEvent) {
        let current = self.inner.link.lock().epoch;
        if epoch != current {
            debug!(epoch = epoch.0, current = current.0, "Ignoring event from replaced transport");
            return;
        }

        match event {
            TransportEvent::Opened => self.on_conn_open(),
            TransportEvent::Closed {
                code,
                reason,
                clean,
            } => {
                info!(code, reason = %reason, clean, "Socket closed");
                self.on_conn_close(&reason);
            }
            TransportEvent::Errored(message) => {
                warn!(error = %message, "Socket error");
                self.on_conn_error(&message);
            }
            TransportEvent::Message(text) => self.dispatch(&text),
        }
    }

    fn on_conn_open(&self) {
        info!(url = %self.inner.config.url, "Socket open");
        self.inner.link.lock().state = SocketState::Open;
        self.cancel_reconnect();

        if !self.inner.config.heartbeat_interval.is_zero() {
            self.start_heartbeat();
        }

        for callback in self.inner.open_callbacks.snapshot() {
            deliver(self.inner.config.callback_mode, move || callback());
        }

        for channel in self.channels() {
            channel.rejoin();
        }
    }

    fn on_conn_close(&self, reason: &str) {
        self.inner.link.lock().state = SocketState::Closed;

        let channels = self.channels();
        let error = Value::String(reason.to_string());
        for channel in &channels {
            channel.trigger_event(PHX_ERROR, &error, None);
        }

        let reconnect = self.reconnect_enabled();
        if reconnect {
            self.start_reconnect();
        }

        self.cancel_heartbeat();

        for channel in &channels {
            channel.handle_socket_close(!reconnect);
        }

        for callback in self.inner.close_callbacks.snapshot() {
            let reason = reason.to_string();
            deliver(self.inner.config.callback_mode, move || callback(reason.as_str()));
        }
    }

    fn on_conn_error(&self, message: &str) {
        self.cancel_heartbeat();

        for channel in self.channels() {
            channel.handle_socket_error();
        }

        for callback in self.inner.error_callbacks.snapshot() {
            let message = message.to_string();
            deliver(self.inner.config.callback_mode, move || callback(message.as_str()));
        }

        self.on_conn_close(message);
    }

    // ========================
    // Timers
    // ========================

    fn start_heartbeat(&self) {
        let token = CancellationToken::new();
        if let Some(previous) = self.inner.heartbeat.lock().replace(token.clone()) {
            previous.cancel();
        }
        let interval = self.inner.config.heartbeat_interval;
        debug!(interval_ms = interval.as_millis(), "Starting heartbeat");
        let _ = tokio::spawn(run_heartbeat(Arc::downgrade(&self.inner), interval, token));
    }

    fn cancel_heartbeat(&self) {
        if let Some(token) = self.inner.heartbeat.lock().take() {
            token.cancel();
        }
    }

    fn start_reconnect(&self) {
        let token = CancellationToken::new();
        if let Some(previous) = self.inner.reconnect.lock().replace(token.clone()) {
            previous.cancel();
        }
        let interval = self.inner.config.reconnect_interval;
        debug!(interval_ms = interval.as_millis(), "Scheduling reconnect");
        let _ = tokio::spawn(run_reconnect(Arc::downgrade(&self.inner), interval, token));
    }

    fn cancel_reconnect(&self) {
        if let Some(token) = self.inner.reconnect.lock().take() {
            token.cancel();
        }
    }

    // ========================
    // Callbacks
    // ========================

    /// Register a callback for when the socket opens.
    pub fn on_open<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.open_callbacks.push(Arc::new(callback));
    }

    /// Register a callback for when the socket closes. Receives the reason.
    pub fn on_close<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.close_callbacks.push(Arc::new(callback));
    }

    /// Register a callback for transport errors. Receives the error text.
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.inner.error_callbacks.push(Arc::new(callback));
    }

    /// Register a callback for every decoded inbound frame.
    pub fn on_message<F>(&self, callback: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.inner.message_callbacks.push(Arc::new(callback));
    }

    // ========================
    // Channel registry
    // ========================

    /// Create a channel for `topic` on this socket.
    pub fn channel(&self, topic: impl Into<Topic>, params: Value) -> Channel {
        Channel::new(self, topic, params)
    }

    /// Register `channel` so that it receives frames for its topic.
    ///
    /// Channels register themselves when created; this is only needed after
    /// a terminal close or [`remove_channel`](Self::remove_channel).
    pub fn add_channel(&self, channel: &Channel) {
        let _ = self
            .inner
            .channels
            .insert_sync(channel.id(), channel.weak_inner());
    }

    /// Stop routing frames to `channel`.
    pub fn remove_channel(&self, channel: &Channel) {
        self.unregister(channel.id());
    }

    /// Number of live registered channels.
    pub fn channel_count(&self) -> usize {
        self.channels().len()
    }

    pub(crate) fn next_channel_id(&self) -> ChannelId {
        ChannelId(self.inner.next_channel_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn unregister(&self, id: ChannelId) {
        let _ = self.inner.channels.remove_sync(&id);
    }

    /// Snapshot of live channels in registration order.
    fn channels(&self) -> Vec<Channel> {
        let mut live = Vec::new();
        self.inner.channels.retain_sync(|id, weak| match weak.upgrade() {
            Some(inner) => {
                live.push((*id, inner));
                true
            }
            None => false,
        });
        live.sort_by_key(|(id, _)| *id);
        live.into_iter()
            .map(|(_, inner)| Channel::from_inner(inner))
            .collect()
    }

    fn channels_for(&self, topic: &Topic) -> Vec<Channel> {
        self.channels()
            .into_iter()
            .filter(|channel| channel.topic() == topic)
            .collect()
    }
}

#[cfg(feature = "websocket")]
fn default_transport(config: &SocketConfig) -> Option<Arc<dyn Transport>> {
    Some(Arc::new(crate::transport::websocket::WebSocketTransport::new(
        config,
    )))
}

#[cfg(not(feature = "websocket"))]
fn default_transport(_config: &SocketConfig) -> Option<Arc<dyn Transport>> {
    None
}

async fn run_dispatcher(
    socket: Weak<SocketInner>,
    mut events: EventReceiver,
    shutdown: CancellationToken,
) {
    loop {
        let (epoch, event) = tokio::select! {
            () = shutdown.cancelled() => break,
            next = events.recv() => match next {
                Some(next) => next,
                None => break,
            },
        };
        let Some(inner) = socket.upgrade() else {
            break;
        };
        Socket { inner }.handle_event(epoch, event);
    }
    debug!("Socket dispatcher stopped");
}

async fn run_heartbeat(socket: Weak<SocketInner>, interval: Duration, token: CancellationToken) {
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            () = sleep(interval) => {}
        }
        if token.is_cancelled() {
            break;
        }
        let Some(inner) = socket.upgrade() else {
            break;
        };
        let socket = Socket { inner };
        let reference = socket.make_ref();
        debug!(reference = %reference, "Sending heartbeat");
        socket.push(&Envelope::heartbeat(reference));
    }
}

async fn run_reconnect(socket: Weak<SocketInner>, interval: Duration, token: CancellationToken) {
    loop {
        tokio::select! {
            () = token.cancelled() => break,
            () = sleep(interval) => {}
        }
        if token.is_cancelled() {
            break;
        }
        let Some(inner) = socket.upgrade() else {
            break;
        };
        let socket = Socket { inner };
        info!(url = %socket.inner.config.url, "Attempting reconnect");
        socket.teardown();
        let params = socket.inner.link.lock().params.clone();
        if let Err(err) = socket.establish(params) {
            warn!(error = %err, "Reconnect attempt failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use serde_json::json;

    use super::*;
    use crate::{callback::CallbackMode, transport::testing::RecordingTransport};

    fn test_socket(transport: &Arc<RecordingTransport>) -> Socket {
        let config = SocketConfig::new("ws://host/socket")
            .heartbeat_interval(Duration::ZERO)
            .callback_mode(CallbackMode::Inline);
        Socket::with_transport(config, Arc::clone(transport) as Arc<dyn Transport>)
            .expect("valid config")
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = Socket::new(SocketConfig::default());
        assert!(matches!(result, Err(PhxError::Config { .. })));
    }

    #[test]
    fn test_make_ref_starts_at_zero() {
        let transport = Arc::new(RecordingTransport::default());
        let socket = test_socket(&transport);
        assert_eq!(socket.make_ref(), Ref(0));
        assert_eq!(socket.make_ref(), Ref(1));
        assert_eq!(socket.make_ref(), Ref(2));
    }

    #[test]
    fn test_make_ref_unique_across_threads() {
        let transport = Arc::new(RecordingTransport::default());
        let socket = test_socket(&transport);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let socket = socket.clone();
                std::thread::spawn(move || (0..500).map(|_| socket.make_ref().get()).collect::<Vec<_>>())
            })
            .collect();

        let mut all = Vec::new();
        for handle in handles {
            let refs = handle.join().unwrap();
            assert!(refs.windows(2).all(|w| w[0] < w[1]));
            all.extend(refs);
        }
        let unique: HashSet<u64> = all.iter().copied().collect();
        assert_eq!(unique.len(), 4000);
        assert_eq!(all.iter().copied().max(), Some(3999));
    }

    #[test]
    fn test_connect_outside_runtime_is_an_error() {
        let transport = Arc::new(RecordingTransport::default());
        let socket = test_socket(&transport);
        assert!(matches!(socket.connect(), Err(PhxError::Config { .. })));
        assert!(transport.opens.lock().is_empty());
    }

    #[tokio::test]
    async fn test_connect_opens_transport_with_params() {
        let transport = Arc::new(RecordingTransport::default());
        let socket = test_socket(&transport);

        let mut params = BTreeMap::new();
        params.insert("token".to_string(), "abc".to_string());
        socket.connect_with(params).unwrap();

        assert_eq!(socket.socket_state(), SocketState::Connecting);
        assert_eq!(
            transport.opens.lock().as_slice(),
            ["ws://host/socket?token=abc".to_string()]
        );

        // Already connecting: no second open.
        socket.connect().unwrap();
        assert_eq!(transport.opens.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_open_event_marks_connected_and_runs_callbacks() {
        let transport = Arc::new(RecordingTransport::default());
        let socket = test_socket(&transport);
        let opened = Arc::new(AtomicUsize::new(0));
        let o = Arc::clone(&opened);
        socket.on_open(move || {
            o.fetch_add(1, Ordering::SeqCst);
        });

        socket.connect().unwrap();
        transport.sink().opened();
        settle().await;

        assert!(socket.is_connected());
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_events_from_replaced_transport_are_ignored() {
        let transport = Arc::new(RecordingTransport::default());
        let socket = test_socket(&transport);
        socket.connect().unwrap();
        let stale = transport.sink();

        socket.reconnect().unwrap();
        stale.opened();
        settle().await;
        assert_eq!(socket.socket_state(), SocketState::Connecting);

        transport.sink().opened();
        settle().await;
        assert!(socket.is_connected());
    }

    #[tokio::test]
    async fn test_push_sends_encoded_frame() {
        let transport = Arc::new(RecordingTransport::default());
        let socket = test_socket(&transport);
        socket.connect().unwrap();

        socket.push(&Envelope::new("room:1", "shout", json!({"a": 1}), Some(Ref(9))));

        assert_eq!(
            transport.frames(),
            vec![json!({"topic": "room:1", "event": "shout", "payload": {"a": 1}, "ref": 9})]
        );
    }

    #[test]
    fn test_push_without_transport_is_dropped() {
        let transport = Arc::new(RecordingTransport::default());
        let socket = test_socket(&transport);
        socket.push(&Envelope::heartbeat(Ref(0)));
        assert!(transport.sent.lock().is_empty());
    }

    #[test]
    fn test_dispatch_invokes_message_callbacks() {
        let transport = Arc::new(RecordingTransport::default());
        let socket = test_socket(&transport);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        socket.on_message(move |envelope| s.lock().push(envelope.event.clone()));

        socket.dispatch(r#"{"topic":"nobody:here","event":"hello","payload":{},"ref":null}"#);
        socket.dispatch("garbage");

        assert_eq!(seen.lock().as_slice(), ["hello".to_string()]);
    }

    #[tokio::test]
    async fn test_disconnect_closes_transport_without_callbacks() {
        let transport = Arc::new(RecordingTransport::default());
        let socket = test_socket(&transport);
        let closed = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&closed);
        socket.on_close(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        socket.connect().unwrap();
        transport.sink().opened();
        settle().await;

        socket.disconnect();
        transport.sink().closed(1000, "bye", true);
        settle().await;

        assert_eq!(transport.state(), SocketState::Closed);
        assert_eq!(socket.socket_state(), SocketState::Closed);
        assert_eq!(closed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_error_runs_error_then_close_callbacks() {
        let transport = Arc::new(RecordingTransport::default());
        let socket = test_socket(&transport);
        socket.set_reconnect_enabled(false);
        let order = Arc::new(Mutex::new(Vec::new()));
        let o = Arc::clone(&order);
        socket.on_error(move |message| o.lock().push(format!("error:{message}")));
        let o = Arc::clone(&order);
        socket.on_close(move |reason| o.lock().push(format!("close:{reason}")));

        socket.connect().unwrap();
        transport.sink().errored("refused");
        settle().await;

        assert_eq!(
            order.lock().as_slice(),
            ["error:refused".to_string(), "close:refused".to_string()]
        );
    }
}
