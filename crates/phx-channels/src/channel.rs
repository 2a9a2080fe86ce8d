//! Topic-scoped channel state machine.
//!
//! ```text
//!            join()            reply ok
//!  Closed ───────────▶ Joining ─────────▶ Joined
//!    ▲                   │  ▲               │
//!    │        reply error│  │ socket open   │ socket error
//!    │                   ▼  │ (rejoin)      ▼
//!    └──── leave() ──── Errored ◀───────────┘
//! ```
//!
//! A channel keeps its bindings across reconnects. After the socket reopens,
//! every channel that was joined once and is not already joining or joined
//! sends its join again.

use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    callback::{EventCallback, deliver},
    error::{PhxError, PhxResult},
    protocol::{PHX_CLOSE, PHX_ERROR, PHX_JOIN, PHX_LEAVE, PHX_REPLY, reply_event_name},
    push::Push,
    socket::Socket,
    types::{ChannelId, ChannelState, Ref, Topic},
};

#[derive(Clone)]
struct Binding {
    event: String,
    callback: EventCallback,
    /// Protocol bookkeeping; always runs on the dispatching task.
    internal: bool,
}

pub(crate) struct ChannelInner {
    id: ChannelId,
    topic: Topic,
    socket: Socket,
    params: Mutex<Value>,
    state: Mutex<ChannelState>,
    joined_once: AtomicBool,
    bindings: Mutex<Vec<Binding>>,
    join_push: Push,
}

impl Drop for ChannelInner {
    fn drop(&mut self) {
        self.socket.unregister(self.id);
    }
}

/// A subscription to one topic on a [`Socket`].
///
/// Cheap to clone. The socket only holds a weak reference to the channel,
/// so dropping every handle removes it from the socket.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<ChannelInner>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.inner.id)
            .field("topic", &self.inner.topic)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Weak counterpart of [`Channel`], see [`Channel::downgrade`].
#[derive(Clone, Debug)]
pub struct WeakChannel {
    inner: Weak<ChannelInner>,
}

impl WeakChannel {
    /// The channel, if any strong handle is still alive.
    pub fn upgrade(&self) -> Option<Channel> {
        self.inner.upgrade().map(Channel::from_inner)
    }
}

impl Channel {
    /// Create a channel for `topic` and register it with `socket`.
    ///
    /// `params` is sent as the join payload.
    pub fn new(socket: &Socket, topic: impl Into<Topic>, params: Value) -> Self {
        let topic = topic.into();
        let id = socket.next_channel_id();

        let inner = Arc::new_cyclic(|weak: &Weak<ChannelInner>| ChannelInner {
            id,
            topic,
            socket: socket.clone(),
            params: Mutex::new(params.clone()),
            state: Mutex::new(ChannelState::Closed),
            joined_once: AtomicBool::new(false),
            bindings: Mutex::new(Vec::new()),
            join_push: Push::new(weak.clone(), PHX_JOIN, params),
        });
        let channel = Self { inner };

        // Replies are re-emitted under the per-ref event the push listens on.
        let weak = channel.weak_inner();
        channel.bind_internal(PHX_REPLY, move |payload, reference| {
            let (Some(inner), Some(reference)) = (weak.upgrade(), reference) else {
                return;
            };
            Self::from_inner(inner).trigger_event(&reply_event_name(reference), payload, Some(reference));
        });

        let weak = channel.weak_inner();
        channel.inner.join_push.hook_internal("ok", move |_| {
            if let Some(inner) = weak.upgrade() {
                let mut state = inner.state.lock();
                if *state == ChannelState::Joining {
                    *state = ChannelState::Joined;
                    info!(topic = %inner.topic, "Joined channel");
                }
            }
        });

        let weak = channel.weak_inner();
        channel.inner.join_push.hook_internal("error", move |response| {
            if let Some(inner) = weak.upgrade() {
                let mut state = inner.state.lock();
                if *state == ChannelState::Joining {
                    *state = ChannelState::Errored;
                    warn!(topic = %inner.topic, response = %response, "Join rejected");
                }
            }
        });

        socket.add_channel(&channel);
        channel
    }

    pub(crate) fn from_inner(inner: Arc<ChannelInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn weak_inner(&self) -> Weak<ChannelInner> {
        Arc::downgrade(&self.inner)
    }

    /// A handle that does not keep the channel (or its socket) alive.
    ///
    /// Capture this instead of a [`Channel`] in socket callbacks; the socket
    /// owns its callbacks and a channel owns its socket.
    pub fn downgrade(&self) -> WeakChannel {
        WeakChannel {
            inner: self.weak_inner(),
        }
    }

    /// Registry id, unique per socket.
    pub fn id(&self) -> ChannelId {
        self.inner.id
    }

    /// Topic this channel is bound to.
    pub fn topic(&self) -> &Topic {
        &self.inner.topic
    }

    /// Socket this channel belongs to.
    pub fn socket(&self) -> &Socket {
        &self.inner.socket
    }

    /// Current state.
    pub fn state(&self) -> ChannelState {
        *self.inner.state.lock()
    }

    /// Whether [`join`](Self::join) has been called.
    pub fn joined_once(&self) -> bool {
        self.inner.joined_once.load(Ordering::SeqCst)
    }

    /// Join payload.
    pub fn params(&self) -> Value {
        self.inner.params.lock().clone()
    }

    /// Replace the join payload. Takes effect on the next join or rejoin.
    pub fn set_params(&self, params: Value) {
        *self.inner.params.lock() = params;
    }

    /// The join push, for registering reply hooks.
    pub fn join_push(&self) -> &Push {
        &self.inner.join_push
    }

    /// Send the join request.
    ///
    /// May be called once per channel; rejoins after reconnects happen
    /// automatically. The join frame is sent right away and dropped if the
    /// socket is not open, leaving the channel in `Joining`, so call this from
    /// [`Socket::on_open`].
    ///
    /// # Errors
    ///
    /// Returns [`PhxError::AlreadyJoined`] if the channel was joined before.
    pub fn join(&self) -> PhxResult<Push> {
        {
            // Ordered with the check-and-set in `rejoin`.
            let mut state = self.inner.state.lock();
            if self.inner.joined_once.swap(true, Ordering::SeqCst) {
                warn!(topic = %self.inner.topic, "join() called more than once");
                return Err(PhxError::AlreadyJoined {
                    topic: self.inner.topic.to_string(),
                });
            }
            *state = ChannelState::Joining;
        }
        self.send_join();
        Ok(self.inner.join_push.clone())
    }

    /// Re-send the join if the channel was joined before and is not joining
    /// or joined right now.
    pub(crate) fn rejoin(&self) {
        {
            let mut state = self.inner.state.lock();
            if !self.joined_once() || state.is_joining_or_joined() {
                return;
            }
            *state = ChannelState::Joining;
        }
        debug!(topic = %self.inner.topic, "Rejoining channel");
        self.send_join();
    }

    fn send_join(&self) {
        self.inner.join_push.set_payload(self.params());
        self.inner.join_push.send();
    }

    /// Leave the topic.
    ///
    /// The channel is `Closed` immediately. When the server acknowledges,
    /// `phx_close` is triggered locally with payload `"leave"`.
    pub fn leave(&self) -> Push {
        *self.inner.state.lock() = ChannelState::Closed;
        info!(topic = %self.inner.topic, "Leaving channel");

        let push = Push::new(
            self.weak_inner(),
            PHX_LEAVE,
            Value::Object(serde_json::Map::new()),
        );
        let weak = self.weak_inner();
        push.hook_internal("ok", move |_| {
            if let Some(inner) = weak.upgrade() {
                Self::from_inner(inner).trigger_event(PHX_CLOSE, &Value::String("leave".to_string()), None);
            }
        });
        push.send();
        push
    }

    /// Send `event` with `payload` to the topic.
    pub fn push_event(&self, event: impl Into<String>, payload: Value) -> Push {
        let push = Push::new(self.weak_inner(), event, payload);
        push.send();
        push
    }

    // ========================
    // Bindings
    // ========================

    /// Bind `callback` to `event`. Several callbacks may share an event; they
    /// fire in registration order.
    pub fn on_event<F>(&self, event: impl Into<String>, callback: F)
    where
        F: Fn(&Value, Option<Ref>) + Send + Sync + 'static,
    {
        self.bind(event.into(), Arc::new(callback), false);
    }

    /// Remove every binding for `event`.
    pub fn off_event(&self, event: &str) {
        self.inner.bindings.lock().retain(|binding| binding.event != event);
    }

    /// Bind to `phx_close`.
    pub fn on_close<F>(&self, callback: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on_event(PHX_CLOSE, move |payload, _| callback(payload));
    }

    /// Bind to `phx_error`.
    pub fn on_error<F>(&self, callback: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.on_event(PHX_ERROR, move |payload, _| callback(payload));
    }

    pub(crate) fn bind_internal<F>(&self, event: impl Into<String>, callback: F)
    where
        F: Fn(&Value, Option<Ref>) + Send + Sync + 'static,
    {
        self.bind(event.into(), Arc::new(callback), true);
    }

    fn bind(&self, event: String, callback: EventCallback, internal: bool) {
        self.inner.bindings.lock().push(Binding {
            event,
            callback,
            internal,
        });
    }

    /// Invoke every binding registered for `event`.
    pub fn trigger_event(&self, event: &str, payload: &Value, reference: Option<Ref>) {
        let matching: Vec<Binding> = self
            .inner
            .bindings
            .lock()
            .iter()
            .filter(|binding| binding.event == event)
            .cloned()
            .collect();

        let mode = self.inner.socket.config().callback_mode;
        for binding in matching {
            if binding.internal {
                (binding.callback)(payload, reference);
            } else {
                let callback = binding.callback;
                let payload = payload.clone();
                deliver(mode, move || callback(&payload, reference));
            }
        }
    }

    // ========================
    // Socket notifications
    // ========================

    pub(crate) fn handle_socket_error(&self) {
        *self.inner.state.lock() = ChannelState::Errored;
    }

    /// Socket closed. A terminal close (no reconnect coming) also removes the
    /// channel from the socket.
    pub(crate) fn handle_socket_close(&self, terminal: bool) {
        *self.inner.state.lock() = ChannelState::Closed;
        if terminal {
            debug!(topic = %self.inner.topic, "Removing channel after terminal close");
            self.inner.socket.unregister(self.inner.id);
        }
    }
}
