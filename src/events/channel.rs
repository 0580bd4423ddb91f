//! EventChannel: per-scope named-listener registry with chained dispatch.
//!
//! Dispatch semantics:
//!   - Listeners run in registration order against a snapshot taken when
//!     `trigger` starts. A listener added during dispatch waits for the next
//!     trigger.
//!   - Liveness is rechecked before each call: a listener removed before its
//!     turn is skipped even though it is in the snapshot.
//!   - A listener may reply with a future. Later listeners run only after it
//!     settles; replies before the first pending one run eagerly inside
//!     `trigger`.
//!
//! The registry lock is never held while a listener runs, so listeners may
//! call `on`/`off`/`trigger` re-entrantly.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;

use crate::error::Result;
use crate::value::Value;

/// Registration handle, unique within one channel.
pub type ListenerId = u64;

/// Listener callback type.
pub type Listener = Arc<dyn Fn(&[Value]) -> Result<Reply> + Send + Sync>;

/// An owned one-shot closure that removes exactly one registration.
pub type Unsubscribe = Box<dyn FnOnce() + Send + Sync>;

/// Wrap a closure as a [`Listener`].
pub fn listener(callback: impl Fn(&[Value]) -> Result<Reply> + Send + Sync + 'static) -> Listener {
    Arc::new(callback)
}

/// What a listener hands back: a value now, or one later.
pub enum Reply {
    Ready(Value),
    Pending(BoxFuture<'static, Result<Value>>),
}

impl Reply {
    pub fn ready(value: impl Into<Value>) -> Self {
        Self::Ready(value.into())
    }

    pub fn pending(future: impl Future<Output = Result<Value>> + Send + 'static) -> Self {
        Self::Pending(future.boxed())
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Self::Ready(value)
    }
}

struct Registration {
    id: ListenerId,
    /// Identity of the callback as the caller sees it, used by `off`.
    key: usize,
    callback: Listener,
}

fn listener_key(listener: &Listener) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}

#[derive(Default)]
struct ChannelInner {
    listeners: Mutex<HashMap<String, Vec<Registration>>>,
    next_id: AtomicU64,
}

impl ChannelInner {
    fn snapshot(&self, name: &str) -> VecDeque<(ListenerId, Listener)> {
        self.listeners
            .lock()
            .get(name)
            .map(|regs| regs.iter().map(|r| (r.id, Arc::clone(&r.callback))).collect())
            .unwrap_or_default()
    }

    fn is_live(&self, name: &str, id: ListenerId) -> bool {
        self.listeners
            .lock()
            .get(name)
            .is_some_and(|regs| regs.iter().any(|r| r.id == id))
    }

    fn remove_id(&self, name: &str, id: ListenerId) {
        let mut listeners = self.listeners.lock();
        if let Some(regs) = listeners.get_mut(name) {
            regs.retain(|r| r.id != id);
            if regs.is_empty() {
                listeners.remove(name);
            }
        }
    }

    /// Remove the first registration of `key` under `name`.
    fn remove_key(&self, name: &str, key: usize) {
        let mut listeners = self.listeners.lock();
        if let Some(regs) = listeners.get_mut(name) {
            if let Some(pos) = regs.iter().position(|r| r.key == key) {
                regs.remove(pos);
            }
            if regs.is_empty() {
                listeners.remove(name);
            }
        }
    }
}

/// Named-listener registry for one scope. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct EventChannel(Arc<ChannelInner>);

impl EventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Register `callback` for `name`. The returned closure removes exactly
    /// this registration, even if the same callback was registered again.
    pub fn on(&self, name: &str, callback: Listener) -> Unsubscribe {
        let key = listener_key(&callback);
        self.on_keyed(name, key, callback)
    }

    pub(crate) fn on_keyed(&self, name: &str, key: usize, callback: Listener) -> Unsubscribe {
        let id = self.0.next_id.fetch_add(1, Ordering::Relaxed);
        self.0
            .listeners
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(Registration { id, key, callback });

        let inner = Arc::downgrade(&self.0);
        let name = name.to_string();
        Box::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.remove_id(&name, id);
            }
        })
    }

    /// Remove registrations.
    ///
    /// - `off(None, None)` clears every listener of the scope.
    /// - `off(Some(name), None)` clears every listener for `name`.
    /// - `off(Some(name), Some(cb))` removes one registration of `cb`.
    /// - `off(None, Some(cb))` removes one registration of `cb` per name.
    pub fn off(&self, name: Option<&str>, callback: Option<&Listener>) {
        self.off_keyed(name, callback.map(listener_key));
    }

    pub(crate) fn off_keyed(&self, name: Option<&str>, key: Option<usize>) {
        match (name, key) {
            (None, None) => self.0.listeners.lock().clear(),
            (Some(name), None) => {
                self.0.listeners.lock().remove(name);
            }
            (Some(name), Some(key)) => self.0.remove_key(name, key),
            (None, Some(key)) => {
                let names: Vec<String> = self.0.listeners.lock().keys().cloned().collect();
                for name in names {
                    self.0.remove_key(&name, key);
                }
            }
        }
    }

    /// Number of listeners registered for `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        self.0.listeners.lock().get(name).map_or(0, Vec::len)
    }

    /// Dispatch `name` with `args`. See the module docs for ordering.
    pub fn trigger(&self, name: &str, args: Vec<Value>) -> Dispatch {
        let mut queue = self.0.snapshot(name);
        let mut results = Vec::with_capacity(queue.len());

        while let Some((id, callback)) = queue.pop_front() {
            if !self.0.is_live(name, id) {
                tracing::trace!(event = name, listener = id, "skipping listener removed mid-dispatch");
                continue;
            }
            match callback(&args) {
                Err(e) => return Dispatch::settled(Err(e)),
                Ok(Reply::Ready(value)) => results.push(value),
                Ok(Reply::Pending(first)) => {
                    let inner = Arc::clone(&self.0);
                    let name = name.to_string();
                    return Dispatch::pending(
                        async move {
                            results.push(first.await?);
                            while let Some((id, callback)) = queue.pop_front() {
                                if !inner.is_live(&name, id) {
                                    continue;
                                }
                                match callback(&args)? {
                                    Reply::Ready(value) => results.push(value),
                                    Reply::Pending(future) => results.push(future.await?),
                                }
                            }
                            Ok(results)
                        }
                        .boxed(),
                    );
                }
            }
        }
        Dispatch::settled(Ok(results))
    }
}

// ============================================================================
// Dispatch
// ============================================================================

enum DispatchState {
    Settled(Option<Result<Vec<Value>>>),
    Pending(BoxFuture<'static, Result<Vec<Value>>>),
}

/// Completion of one `trigger`: every listener's result, in order, or the
/// first error.
#[must_use = "listeners after a pending reply only run when the dispatch is polled"]
pub struct Dispatch {
    state: DispatchState,
}

impl Dispatch {
    fn settled(result: Result<Vec<Value>>) -> Self {
        Self {
            state: DispatchState::Settled(Some(result)),
        }
    }

    fn pending(future: BoxFuture<'static, Result<Vec<Value>>>) -> Self {
        Self {
            state: DispatchState::Pending(future),
        }
    }

    /// Whether every listener already ran inside `trigger`.
    pub fn is_settled(&self) -> bool {
        matches!(self.state, DispatchState::Settled(_))
    }

    /// Take the result of a dispatch that settled eagerly.
    pub fn take_settled(&mut self) -> Option<Result<Vec<Value>>> {
        match &mut self.state {
            DispatchState::Settled(result) => result.take(),
            DispatchState::Pending(_) => None,
        }
    }
}

impl Future for Dispatch {
    type Output = Result<Vec<Value>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            DispatchState::Settled(result) => Poll::Ready(result.take().unwrap_or_else(|| Ok(Vec::new()))),
            DispatchState::Pending(future) => future.as_mut().poll(cx),
        }
    }
}
