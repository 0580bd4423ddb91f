//! Scope side table: one [`EventChannel`] per object, array or function.
//!
//! Channels are keyed by the scope's allocation identity and hold only a weak
//! reference to the scope, so registering listeners never changes the shape
//! of the caller's value. Entries whose scope is gone are pruned whenever a
//! new scope is registered.

use std::collections::HashMap;
use std::sync::LazyLock;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::value::{Value, WeakValue};

use super::channel::{listener, Dispatch, EventChannel, Reply, Unsubscribe};

struct ScopeEntry {
    scope: WeakValue,
    channel: EventChannel,
}

static SCOPES: LazyLock<Mutex<HashMap<usize, ScopeEntry>>> = LazyLock::new(Default::default);

fn scope_id(scope: &Value) -> Result<usize> {
    scope.identity().ok_or_else(|| {
        Error::invalid_argument(format!(
            "event scope must be an object, array or function, got {}",
            scope.kind()
        ))
    })
}

/// The channel of `scope`, created on first use.
pub fn channel_for(scope: &Value) -> Result<EventChannel> {
    let id = scope_id(scope)?;
    let mut scopes = SCOPES.lock();
    if let Some(entry) = scopes.get(&id) {
        if entry.scope.is_alive() {
            return Ok(entry.channel.clone());
        }
    }
    let before = scopes.len();
    scopes.retain(|_, entry| entry.scope.is_alive());
    if scopes.len() != before {
        tracing::trace!(pruned = before - scopes.len(), "dropped channels of collected scopes");
    }
    let Some(weak) = scope.downgrade() else {
        return Err(Error::invalid_argument("event scope has no identity"));
    };
    let channel = EventChannel::new();
    scopes.insert(
        id,
        ScopeEntry {
            scope: weak,
            channel: channel.clone(),
        },
    );
    Ok(channel)
}

fn existing_channel(scope: &Value) -> Result<Option<EventChannel>> {
    let id = scope_id(scope)?;
    Ok(SCOPES
        .lock()
        .get(&id)
        .filter(|entry| entry.scope.is_alive())
        .map(|entry| entry.channel.clone()))
}

/// Register a function value as a listener for `name` on `scope`.
///
/// Fails with `InvalidArgument` when `scope` has no identity or `callback`
/// is not a function.
pub fn on(scope: &Value, name: &str, callback: &Value) -> Result<Unsubscribe> {
    let Value::Function(function) = callback else {
        return Err(Error::invalid_argument(format!(
            "listener for \"{name}\" must be a function, got {}",
            callback.kind()
        )));
    };
    let channel = channel_for(scope)?;
    let key = callback.identity().unwrap_or_default();
    let function = function.clone();
    Ok(channel.on_keyed(
        name,
        key,
        listener(move |args| function.call(args).map(Reply::Ready)),
    ))
}

/// Remove listeners of `scope`; see [`EventChannel::off`] for the variants.
pub fn off(scope: &Value, name: Option<&str>, callback: Option<&Value>) -> Result<()> {
    if let Some(channel) = existing_channel(scope)? {
        channel.off_keyed(name, callback.and_then(Value::identity));
    }
    Ok(())
}

/// Dispatch `name` on `scope`. A scope without listeners settles to `[]`.
pub fn trigger(scope: &Value, name: &str, args: Vec<Value>) -> Result<Dispatch> {
    let channel = match existing_channel(scope)? {
        Some(channel) => channel,
        None => EventChannel::new(),
    };
    Ok(channel.trigger(name, args))
}
