//! Transport abstraction the socket drives.
//!
//! A transport is a duplex text-message channel. The socket calls
//! [`Transport::open`], [`Transport::close`] and [`Transport::send`] and
//! receives the transport's notifications through the [`TransportSink`] it
//! handed to `open`. All notifications of one socket funnel into a single
//! queue that one dispatcher task drains in arrival order.
//!
//! Implementations must not block: `open` starts the connection in the
//! background and reports the outcome through the sink.

use tokio::sync::mpsc;
use url::Url;

use crate::{
    error::PhxResult,
    types::{ConnectionEpoch, SocketState},
};

#[cfg(feature = "websocket")]
pub mod websocket;

/// Notification emitted by a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is open.
    Opened,
    /// The connection closed.
    Closed {
        /// Close code reported by the peer, or 1006 if none.
        code: u16,
        /// Close reason text.
        reason: String,
        /// Whether the closing handshake completed.
        clean: bool,
    },
    /// The connection failed.
    Errored(String),
    /// A text frame arrived.
    Message(String),
}

pub(crate) type EventSender = mpsc::UnboundedSender<(ConnectionEpoch, TransportEvent)>;
pub(crate) type EventReceiver = mpsc::UnboundedReceiver<(ConnectionEpoch, TransportEvent)>;

/// Notification sink handed to [`Transport::open`].
///
/// Every event is tagged with the epoch of the `open` call that produced the
/// sink; the socket discards events from epochs it has moved past.
#[derive(Clone, Debug)]
pub struct TransportSink {
    epoch: ConnectionEpoch,
    tx: EventSender,
}

impl TransportSink {
    pub(crate) fn new(epoch: ConnectionEpoch, tx: EventSender) -> Self {
        Self { epoch, tx }
    }

    /// Epoch this sink reports for.
    pub fn epoch(&self) -> ConnectionEpoch {
        self.epoch
    }

    /// Report that the connection opened.
    pub fn opened(&self) {
        self.emit(TransportEvent::Opened);
    }

    /// Report that the connection closed.
    pub fn closed(&self, code: u16, reason: impl Into<String>, clean: bool) {
        self.emit(TransportEvent::Closed {
            code,
            reason: reason.into(),
            clean,
        });
    }

    /// Report a connection failure.
    pub fn errored(&self, message: impl Into<String>) {
        self.emit(TransportEvent::Errored(message.into()));
    }

    /// Deliver an inbound text frame.
    pub fn received(&self, text: impl Into<String>) {
        self.emit(TransportEvent::Message(text.into()));
    }

    /// Returns true once the owning socket has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn emit(&self, event: TransportEvent) {
        // The socket is gone; nobody is listening.
        let _ = self.tx.send((self.epoch, event));
    }
}

/// A duplex text transport.
///
/// The socket may call `open` again on the same instance after `close`
/// (reconnect); each `open` receives a fresh sink.
pub trait Transport: Send + Sync + 'static {
    /// Start connecting to `url`. Outcome is reported through `sink`.
    fn open(&self, url: &Url, sink: TransportSink);

    /// Close the connection. Further events from the current sink are ignored
    /// by the socket.
    fn close(&self);

    /// Queue a text frame for sending.
    fn send(&self, text: String) -> PhxResult<()>;

    /// Transport-reported connection state.
    fn state(&self) -> SocketState;
}
