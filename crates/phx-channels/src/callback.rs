//! Callback types and the policy used to run them.
//!
//! Callbacks are plain function values stored by the object that owns the
//! event. Lists are copied before they are invoked, so a callback may
//! register or remove callbacks on the same object without deadlocking.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

use crate::{protocol::Envelope, types::Ref};

/// Channel event binding: receives the payload and the frame ref.
pub type EventCallback = Arc<dyn Fn(&Value, Option<Ref>) + Send + Sync>;
/// Push status hook: receives the reply's `response`.
pub type ReceiveCallback = Arc<dyn Fn(&Value) + Send + Sync>;
/// Push timeout hook.
pub type TimeoutCallback = Arc<dyn Fn() + Send + Sync>;
/// Socket opened.
pub type OpenCallback = Arc<dyn Fn() + Send + Sync>;
/// Socket closed or errored, with the reason text.
pub type ReasonCallback = Arc<dyn Fn(&str) + Send + Sync>;
/// Every decoded inbound frame.
pub type MessageCallback = Arc<dyn Fn(&Envelope) + Send + Sync>;

/// How application callbacks are executed.
///
/// Protocol bookkeeping (reply fan-out, join state updates, rejoin) always
/// runs on the dispatch task. Only callbacks registered by the application
/// follow this mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CallbackMode {
    /// Each callback runs in its own task; slow callbacks never hold up frame
    /// dispatch. Dispatch order is preserved, completion order is not.
    #[default]
    Spawn,
    /// Callbacks run on the dispatching task, in dispatch order.
    Inline,
}

/// Run `f` according to `mode`.
///
/// Outside a tokio runtime spawned delivery degrades to inline.
pub(crate) fn deliver<F>(mode: CallbackMode, f: F)
where
    F: FnOnce() + Send + 'static,
{
    match mode {
        CallbackMode::Inline => f(),
        CallbackMode::Spawn => match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let _ = handle.spawn(async move { f() });
            }
            Err(_) => f(),
        },
    }
}

/// Append-only list of callbacks, snapshotted before invocation.
pub(crate) struct CallbackList<T> {
    callbacks: Mutex<Vec<T>>,
}

impl<T: Clone> CallbackList<T> {
    pub(crate) fn new() -> Self {
        Self {
            callbacks: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn push(&self, callback: T) {
        self.callbacks.lock().push(callback);
    }

    pub(crate) fn snapshot(&self) -> Vec<T> {
        self.callbacks.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_inline_runs_immediately() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        deliver(CallbackMode::Inline, move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_spawn_without_runtime_falls_back_to_inline() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        deliver(CallbackMode::Spawn, move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spawn_runs_on_runtime() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        deliver(CallbackMode::Spawn, move || {
            let _ = tx.send(std::thread::current().id());
        });
        assert!(rx.await.is_ok());
    }

    #[test]
    fn test_callback_list_snapshot_is_detached() {
        let list: CallbackList<OpenCallback> = CallbackList::new();
        list.push(Arc::new(|| {}));
        let snapshot = list.snapshot();
        list.push(Arc::new(|| {}));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(list.snapshot().len(), 2);
    }
}
