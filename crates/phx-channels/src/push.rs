//! Outbound message with reply and timeout correlation.
//!
//! Each [`Push::send`] is one attempt: it takes a fresh ref, listens on the
//! channel for `chan_reply_<ref>` and, if a timeout is configured, arms a
//! timer. The attempt settles exactly once, either by its reply or by its
//! timer; whichever claims the pending attempt first wins and the other side
//! finds nothing to do.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    callback::{CallbackMode, ReceiveCallback, TimeoutCallback, deliver},
    channel::{Channel, ChannelInner},
    error::{PhxError, PhxResult},
    protocol::{Envelope, Reply, reply_event_name},
    types::Ref,
};

#[derive(Clone)]
struct StatusHook {
    status: String,
    callback: ReceiveCallback,
    internal: bool,
}

#[derive(Clone)]
struct TimeoutHook {
    after: Duration,
    callback: TimeoutCallback,
}

/// The attempt currently waiting for a reply.
struct Pending {
    reference: Ref,
    ref_event: String,
    timer: Option<CancellationToken>,
}

struct PushInner {
    channel: Weak<ChannelInner>,
    event: String,
    payload: Mutex<Value>,
    hooks: Mutex<Vec<StatusHook>>,
    timeout: Mutex<Option<TimeoutHook>>,
    response: Mutex<Option<Reply>>,
    pending: Mutex<Option<Pending>>,
    ref_event: Mutex<Option<String>>,
    sent: AtomicBool,
}

/// A message sent on a channel.
///
/// Cheap to clone. Register reply hooks with [`on_receive`](Self::on_receive)
/// and a timeout with [`after`](Self::after):
///
/// ```no_run
/// # use std::time::Duration;
/// # fn demo(channel: &phx_channels::Channel) -> phx_channels::PhxResult<()> {
/// channel
///     .push_event("new_msg", serde_json::json!({"body": "hi"}))
///     .on_receive("ok", |response| println!("sent: {response}"))
///     .on_receive("error", |response| eprintln!("rejected: {response}"))
///     .after(Duration::from_secs(5), || eprintln!("no reply"))?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Push {
    inner: Arc<PushInner>,
}

impl std::fmt::Debug for Push {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Push")
            .field("event", &self.inner.event)
            .field("ref_event", &*self.inner.ref_event.lock())
            .field("sent", &self.is_sent())
            .finish_non_exhaustive()
    }
}

impl Push {
    pub(crate) fn new(channel: Weak<ChannelInner>, event: impl Into<String>, payload: Value) -> Self {
        Self {
            inner: Arc::new(PushInner {
                channel,
                event: event.into(),
                payload: Mutex::new(payload),
                hooks: Mutex::new(Vec::new()),
                timeout: Mutex::new(None),
                response: Mutex::new(None),
                pending: Mutex::new(None),
                ref_event: Mutex::new(None),
                sent: AtomicBool::new(false),
            }),
        }
    }

    /// Event name.
    pub fn event(&self) -> &str {
        &self.inner.event
    }

    /// Payload sent by the next attempt.
    pub fn payload(&self) -> Value {
        self.inner.payload.lock().clone()
    }

    /// Replace the payload sent by the next attempt.
    pub fn set_payload(&self, payload: Value) {
        *self.inner.payload.lock() = payload;
    }

    /// Reply event of the latest attempt, e.g. `chan_reply_7`.
    pub fn ref_event(&self) -> Option<String> {
        self.inner.ref_event.lock().clone()
    }

    /// Reply recorded for the latest attempt. A timeout is recorded as
    /// status `timeout` with an empty response.
    pub fn last_response(&self) -> Option<Reply> {
        self.inner.response.lock().clone()
    }

    /// Whether the latest attempt has been handed to the socket.
    pub fn is_sent(&self) -> bool {
        self.inner.sent.load(Ordering::SeqCst)
    }

    fn channel(&self) -> Option<Channel> {
        self.inner.channel.upgrade().map(Channel::from_inner)
    }

    fn callback_mode(&self) -> CallbackMode {
        self.channel()
            .map(|channel| channel.socket().config().callback_mode)
            .unwrap_or_default()
    }

    /// Start a new attempt: new ref, new reply binding, new timer.
    ///
    /// A previous attempt that is still waiting is abandoned; its reply and
    /// timer are ignored.
    pub fn send(&self) {
        let Some(channel) = self.channel() else {
            warn!(event = %self.inner.event, "Push dropped, channel no longer exists");
            return;
        };

        self.abandon_pending(&channel);

        let socket = channel.socket().clone();
        let reference = socket.make_ref();
        let ref_event = reply_event_name(reference);

        self.inner.sent.store(false, Ordering::SeqCst);
        *self.inner.response.lock() = None;
        *self.inner.ref_event.lock() = Some(ref_event.clone());
        *self.inner.pending.lock() = Some(Pending {
            reference,
            ref_event: ref_event.clone(),
            timer: None,
        });

        let push = self.clone();
        channel.bind_internal(ref_event, move |payload, _| push.handle_reply(reference, payload));
        self.start_timeout(reference);

        let envelope = Envelope::new(
            channel.topic().clone(),
            self.inner.event.clone(),
            self.payload(),
            Some(reference),
        );
        debug!(topic = %envelope.topic, event = %envelope.event, reference = %reference, "Sending push");
        self.inner.sent.store(true, Ordering::SeqCst);
        socket.push(&envelope);
    }

    /// Register `callback` for replies with `status`.
    ///
    /// The callback receives the reply's `response`. If a reply with that
    /// status has already arrived, the callback fires immediately.
    pub fn on_receive<F>(&self, status: impl Into<String>, callback: F) -> &Self
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.add_hook(status.into(), Arc::new(callback), false);
        self
    }

    pub(crate) fn hook_internal<F>(&self, status: impl Into<String>, callback: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.add_hook(status.into(), Arc::new(callback), true);
    }

    fn add_hook(&self, status: String, callback: ReceiveCallback, internal: bool) {
        let hook = StatusHook {
            status,
            callback,
            internal,
        };
        // Lock order: response, then hooks.
        let late = {
            let response = self.inner.response.lock();
            self.inner.hooks.lock().push(hook.clone());
            response
                .as_ref()
                .filter(|reply| reply.status == hook.status)
                .map(|reply| reply.response.clone())
        };
        if let Some(response) = late {
            (hook.callback)(&response);
        }
    }

    /// Set the timeout for replies. Only one timeout may be set per push.
    ///
    /// If the push is already waiting for a reply, the timer starts now.
    pub fn after<F>(&self, timeout: Duration, callback: F) -> PhxResult<&Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        {
            let mut slot = self.inner.timeout.lock();
            if slot.is_some() {
                warn!(event = %self.inner.event, "after() called more than once");
                return Err(PhxError::TimeoutAlreadySet {
                    event: self.inner.event.clone(),
                });
            }
            *slot = Some(TimeoutHook {
                after: timeout,
                callback: Arc::new(callback),
            });
        }

        let waiting = self
            .inner
            .pending
            .lock()
            .as_ref()
            .filter(|pending| pending.timer.is_none())
            .map(|pending| pending.reference);
        if let Some(reference) = waiting {
            self.start_timeout(reference);
        }
        Ok(self)
    }

    /// Dispatch a `{status, response}` payload to the hooks registered for
    /// its status. Payloads without a string status match nothing.
    pub fn match_receive(&self, payload: &Value) {
        let Some(reply) = Reply::from_payload(payload) else {
            debug!(event = %self.inner.event, "Reply payload has no status");
            return;
        };
        let hooks = self.hooks_for(&reply.status);
        self.run_hooks(hooks, &reply.response);
    }

    fn hooks_for(&self, status: &str) -> Vec<StatusHook> {
        self.inner
            .hooks
            .lock()
            .iter()
            .filter(|hook| hook.status == status)
            .cloned()
            .collect()
    }

    fn run_hooks(&self, hooks: Vec<StatusHook>, response: &Value) {
        if hooks.is_empty() {
            return;
        }
        let mode = self.callback_mode();
        for hook in hooks {
            if hook.internal {
                (hook.callback)(response);
            } else {
                let callback = hook.callback;
                let response = response.clone();
                deliver(mode, move || callback(&response));
            }
        }
    }

    /// Record `reply` and run the hooks registered for its status.
    fn settle(&self, reply: Reply) {
        let hooks = {
            let mut response = self.inner.response.lock();
            *response = Some(reply.clone());
            self.hooks_for(&reply.status)
        };
        self.run_hooks(hooks, &reply.response);
    }

    /// Claim the pending attempt if it is still the one for `reference`.
    fn claim(&self, reference: Ref) -> Option<Pending> {
        let mut pending = self.inner.pending.lock();
        match pending.as_ref() {
            Some(current) if current.reference == reference => pending.take(),
            _ => None,
        }
    }

    fn release(&self, pending: Pending) {
        if let Some(timer) = pending.timer {
            timer.cancel();
        }
        if let Some(channel) = self.channel() {
            channel.off_event(&pending.ref_event);
        }
    }

    fn abandon_pending(&self, channel: &Channel) {
        let pending = self.inner.pending.lock().take();
        if let Some(pending) = pending {
            debug!(event = %self.inner.event, reference = %pending.reference, "Abandoning previous attempt");
            if let Some(timer) = pending.timer {
                timer.cancel();
            }
            channel.off_event(&pending.ref_event);
        }
    }

    fn handle_reply(&self, reference: Ref, payload: &Value) {
        let Some(pending) = self.claim(reference) else {
            debug!(event = %self.inner.event, reference = %reference, "Ignoring reply for settled push");
            return;
        };
        self.release(pending);

        match Reply::from_payload(payload) {
            Some(reply) => self.settle(reply),
            None => warn!(event = %self.inner.event, reference = %reference, "Reply payload has no status"),
        }
    }

    fn handle_timeout(&self, reference: Ref, callback: TimeoutCallback) {
        let Some(pending) = self.claim(reference) else {
            return;
        };
        self.release(pending);
        debug!(event = %self.inner.event, reference = %reference, "Push timed out");

        deliver(self.callback_mode(), move || callback());
        self.settle(Reply::timeout());
    }

    fn start_timeout(&self, reference: Ref) {
        let Some(hook) = self.inner.timeout.lock().clone() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(event = %self.inner.event, "No tokio runtime, push timeout not armed");
            return;
        };

        let token = CancellationToken::new();
        {
            let mut pending = self.inner.pending.lock();
            match pending.as_mut() {
                Some(current) if current.reference == reference && current.timer.is_none() => {
                    current.timer = Some(token.clone());
                }
                _ => return,
            }
        }

        let push = self.clone();
        let _ = runtime.spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = sleep(hook.after) => push.handle_timeout(reference, hook.callback),
            }
        });
    }
}
