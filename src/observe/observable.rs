//! Observable: explicit change-tracking wrapper over an object or array.
//!
//! # Side table
//!
//! Wrapper state lives in a process-wide table keyed by the container's
//! allocation identity and holding only a weak reference to the container.
//! Wrapping the same container twice returns the same state, and the state
//! lives as long as the container does, whether or not any `Observable`
//! handle survives.
//!
//! # Propagation
//!
//! Every nested object/array reachable through a data property or element is
//! wrapped as well and records a parent link (`key` or "element of"). A change
//! is triggered on the container that mutated first, then re-emitted on each
//! parent with the path prefixed by the child's *current* key or index. A
//! propagation path that would revisit a container stops there, so cyclic
//! graphs emit finitely. A link whose child no longer occupies its slot is
//! dropped instead of emitting.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, LazyLock, Weak};

use futures_util::FutureExt;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::events::{channel_for, listener, Dispatch, EventChannel, Listener, Reply, Unsubscribe};
use crate::keypath;
use crate::value::{parse_index, strict_equals, ArrayRef, PropertyStore, Value, WeakValue};

use super::change::ChangeSet;

/// Event name used for change notifications.
pub const CHANGE_EVENT: &str = "change";

// ============================================================================
// Internal state
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum LinkSlot {
    /// Held under a named own data property.
    Key(String),
    /// Held as an array element; the index is resolved at emission time.
    Element,
}

#[derive(Clone)]
struct ParentLink {
    parent: Weak<ObserverState>,
    slot: LinkSlot,
}

/// Properties the wrapper has accounted for; anything else found by
/// `reobserve` was written behind its back.
#[derive(Default)]
struct Known {
    keys: HashSet<String>,
    len: usize,
}

struct ObserverState {
    id: usize,
    target: WeakValue,
    channel: EventChannel,
    parents: Mutex<Vec<ParentLink>>,
    known: Mutex<Known>,
    /// Emissions whose listener chain is still waiting on a future. Each
    /// emit polls these once more and drops the ones that finished; a reply
    /// that never resolves stays here until `settled()` is awaited.
    pending: Mutex<Vec<Dispatch>>,
    /// First failure among parked dispatches that finished while parking,
    /// held for the next `settled()`.
    failure: Mutex<Option<Error>>,
}

impl ObserverState {
    fn link_parent(&self, parent: &Arc<ObserverState>, slot: LinkSlot) {
        let mut parents = self.parents.lock();
        let exists = parents
            .iter()
            .any(|l| l.slot == slot && l.parent.as_ptr() == Arc::as_ptr(parent));
        if !exists {
            parents.push(ParentLink {
                parent: Arc::downgrade(parent),
                slot,
            });
        }
    }

    /// Path segment under which the child `child_id` currently sits, if it
    /// still occupies `slot`.
    fn path_of(&self, child_id: usize, slot: &LinkSlot) -> Option<String> {
        let target = self.target.upgrade()?;
        match slot {
            LinkSlot::Key(key) => {
                (data_identity(&target, key) == Some(child_id)).then(|| key.clone())
            }
            LinkSlot::Element => target
                .as_array()?
                .position_of_identity(child_id)
                .map(|index| index.to_string()),
        }
    }

    fn emit(self: &Arc<Self>, change: ChangeSet, trail: &mut Vec<usize>) {
        trail.push(self.id);

        let mut dispatch = self.channel.trigger(CHANGE_EVENT, vec![change.to_value()]);
        match dispatch.take_settled() {
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                tracing::warn!(property = %change.property, error = %e, "change listener failed");
            }
            None => self.park(dispatch),
        }

        let links = self.parents.lock().clone();
        let mut stale = Vec::new();
        for link in links {
            let Some(parent) = link.parent.upgrade() else {
                stale.push(link);
                continue;
            };
            if trail.contains(&parent.id) {
                tracing::trace!(property = %change.property, "propagation reached a cycle");
                continue;
            }
            match parent.path_of(self.id, &link.slot) {
                Some(prefix) => parent.emit(change.prefixed(&prefix), trail),
                None => stale.push(link),
            }
        }
        if !stale.is_empty() {
            tracing::trace!(dropped = stale.len(), "pruning stale parent links");
            self.parents.lock().retain(|l| {
                !stale
                    .iter()
                    .any(|s| s.slot == l.slot && s.parent.ptr_eq(&l.parent))
            });
        }

        trail.pop();
    }
}

impl ObserverState {
    /// Queue an unfinished dispatch behind the ones already parked, first
    /// giving those a chance to finish. The queue is taken out while polling
    /// since a listener may write to this container again.
    fn park(&self, dispatch: Dispatch) {
        let mut parked = std::mem::take(&mut *self.pending.lock());
        parked.retain_mut(|earlier| match earlier.now_or_never() {
            None => true,
            Some(Ok(_)) => false,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "change listener failed");
                self.failure.lock().get_or_insert(e);
                false
            }
        });
        parked.push(dispatch);
        let mut pending = self.pending.lock();
        parked.append(&mut pending);
        *pending = parked;
    }

    fn parent_states(&self) -> Vec<Arc<ObserverState>> {
        self.parents
            .lock()
            .iter()
            .filter_map(|link| link.parent.upgrade())
            .collect()
    }

    /// Whether `root` is this wrapper or reachable through its parent links.
    fn descends_from(&self, root: usize) -> bool {
        if self.id == root {
            return true;
        }
        let mut seen = HashSet::from([self.id]);
        let mut stack = self.parent_states();
        while let Some(state) = stack.pop() {
            if state.id == root {
                return true;
            }
            if seen.insert(state.id) {
                stack.extend(state.parent_states());
            }
        }
        false
    }

    /// This wrapper followed by every live wrapper linked below it.
    fn subtree(self: &Arc<Self>) -> Vec<Arc<ObserverState>> {
        let others: Vec<Arc<ObserverState>> = OBSERVED
            .lock()
            .values()
            .filter(|entry| entry.target.is_alive() && entry.state.id != self.id)
            .map(|entry| Arc::clone(&entry.state))
            .collect();
        std::iter::once(Arc::clone(self))
            .chain(others.into_iter().filter(|state| state.descends_from(self.id)))
            .collect()
    }
}

/// Identity of the container held by property `key` of `target`; accessors
/// are read through their getter.
fn data_identity(target: &Value, key: &str) -> Option<usize> {
    let property = match target {
        Value::Object(o) => o.property(key),
        Value::Array(a) => a.property(key),
        _ => None,
    }?;
    match property.value() {
        Some(value) => value.identity(),
        None => property.read().ok()?.identity(),
    }
}

struct Entry {
    target: WeakValue,
    state: Arc<ObserverState>,
}

static OBSERVED: LazyLock<Mutex<HashMap<usize, Entry>>> = LazyLock::new(Default::default);

// ============================================================================
// observe
// ============================================================================

/// Wrap `data` for change tracking.
///
/// Nested objects and arrays are wrapped too. Wrapping a container that is
/// already wrapped returns the existing wrapper; no listeners or links are
/// added twice. Fails with `InvalidArgument` for anything but an object or
/// array.
pub fn observe(data: &Value) -> Result<Observable> {
    let id = match (data, data.identity()) {
        (Value::Object(_) | Value::Array(_), Some(id)) => id,
        (other, _) => {
            return Err(Error::invalid_argument(format!(
                "observe() expects an object or array, got {}",
                other.kind()
            )));
        }
    };

    let (state, fresh) = {
        let mut observed = OBSERVED.lock();
        match observed.get(&id) {
            Some(entry) if entry.target.is_alive() => (Arc::clone(&entry.state), false),
            _ => {
                observed.retain(|_, entry| entry.target.is_alive());
                let target = data
                    .downgrade()
                    .ok_or_else(|| Error::invalid_argument("observed value has no identity"))?;
                let state = Arc::new(ObserverState {
                    id,
                    target: target.clone(),
                    channel: channel_for(data)?,
                    parents: Mutex::new(Vec::new()),
                    known: Mutex::new(Known::default()),
                    pending: Mutex::new(Vec::new()),
                    failure: Mutex::new(None),
                });
                observed.insert(
                    id,
                    Entry {
                        target,
                        state: Arc::clone(&state),
                    },
                );
                (state, true)
            }
        }
    };

    let observable = Observable {
        target: data.clone(),
        state,
    };
    if fresh {
        tracing::debug!(kind = data.kind(), "observing container");
        observable.adopt_existing()?;
    }
    Ok(observable)
}

/// Re-scan `data` for properties written behind its wrapper's back, wrapping
/// it first if needed. See [`Observable::reobserve`].
pub fn reobserve(data: &Value) -> Result<usize> {
    observe(data)?.reobserve()
}

// ============================================================================
// Observable
// ============================================================================

/// Handle to an observed container. Cloning shares the same wrapper.
#[derive(Clone)]
pub struct Observable {
    target: Value,
    state: Arc<ObserverState>,
}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("target", &self.target)
            .finish()
    }
}

impl Observable {
    /// The backing container.
    pub fn value(&self) -> &Value {
        &self.target
    }

    /// Whether both handles wrap the same container.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    pub fn is_array(&self) -> bool {
        self.target.as_array().is_some()
    }

    /// Own member read (elements, `length` and getters included).
    pub fn get(&self, key: &str) -> Result<Value> {
        self.target.get(key)
    }

    pub fn get_path(&self, path: &str) -> Result<Value> {
        Ok(keypath::get_path(&self.target, path)?.unwrap_or_default())
    }

    /// Wrapper of the container stored at `key`, if it holds one.
    pub fn child(&self, key: &str) -> Result<Option<Observable>> {
        let member = self.target.get(key)?;
        if member.is_container() {
            observe(&member).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Assign `key` and emit `{property: key, oldValue, value}`.
    ///
    /// Assigning a value `===` to the current one is a no-op, as is a write
    /// the container rejects (read-only property, sealed or frozen target).
    /// Returns whether an event was emitted.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<bool> {
        let value = value.into();
        let old = self.target.get(key)?;
        if strict_equals(&old, &value) {
            return Ok(false);
        }
        self.sub_observe(&value, self.slot_for(key))?;
        if !self.target.set(key, value.clone())? {
            tracing::trace!(key, "write rejected by target");
            return Ok(false);
        }
        self.note_write(key);
        self.emit(ChangeSet::replaced(key, old, value));
        Ok(true)
    }

    /// Assign through a dotted path. The event is emitted by the container
    /// owning the last segment and reaches this wrapper with the full path.
    /// A path whose parent does not exist is a no-op.
    pub fn set_path(&self, path: &str, value: impl Into<Value>) -> Result<bool> {
        let Some((container, key)) = keypath::resolve_parent(&self.target, path)? else {
            return Ok(false);
        };
        observe(&container)?.set(&key, value)
    }

    // -----------------------------------------------------------------------
    // Array operations
    // -----------------------------------------------------------------------

    fn array(&self, op: &str) -> Result<&ArrayRef> {
        self.target.as_array().ok_or_else(|| {
            Error::invalid_argument(format!(
                "{op}() requires an observed array, got {}",
                self.target.kind()
            ))
        })
    }

    /// Append `items`; emits `{property: <old length>, added: items, removed: []}`.
    /// Returns the new length.
    pub fn push(&self, items: Vec<Value>) -> Result<usize> {
        let array = self.array("push")?;
        for item in &items {
            self.sub_observe(item, LinkSlot::Element)?;
        }
        let start = array.len();
        let len = array.push(items.clone())?;
        self.sync_len();
        if !items.is_empty() {
            self.emit(ChangeSet::spliced(start.to_string(), items, Vec::new()));
        }
        Ok(len)
    }

    /// Insert `item` at the front; emits `{property: 0, added: [item], removed: []}`.
    pub fn unshift(&self, item: impl Into<Value>) -> Result<usize> {
        let array = self.array("unshift")?;
        let item = item.into();
        self.sub_observe(&item, LinkSlot::Element)?;
        let len = array.unshift(item.clone())?;
        self.sync_len();
        self.emit(ChangeSet::spliced("0", vec![item], Vec::new()));
        Ok(len)
    }

    /// Remove the last element; emits `{property: <new length>, added: [], removed: [item]}`.
    /// An empty array returns `Undefined` and emits nothing.
    pub fn pop(&self) -> Result<Value> {
        let array = self.array("pop")?;
        let Some(item) = array.pop()? else {
            return Ok(Value::Undefined);
        };
        self.sync_len();
        self.emit(ChangeSet::spliced(
            array.len().to_string(),
            Vec::new(),
            vec![item.clone()],
        ));
        Ok(item)
    }

    /// Remove the first element; emits `{property: 0, added: [], removed: [item]}`.
    /// An empty array returns `Undefined` and emits nothing.
    pub fn shift(&self) -> Result<Value> {
        let array = self.array("shift")?;
        let Some(item) = array.shift()? else {
            return Ok(Value::Undefined);
        };
        self.sync_len();
        self.emit(ChangeSet::spliced("0", Vec::new(), vec![item.clone()]));
        Ok(item)
    }

    /// Remove `delete_count` elements at `start` and insert `items` there;
    /// emits `{property: <normalized start>, added: items, removed}` unless
    /// nothing changed. Returns the removed elements.
    pub fn splice(
        &self,
        start: isize,
        delete_count: Option<usize>,
        items: Vec<Value>,
    ) -> Result<Vec<Value>> {
        let array = self.array("splice")?;
        for item in &items {
            self.sub_observe(item, LinkSlot::Element)?;
        }
        let (at, removed) = array.splice(start, delete_count, items.clone())?;
        self.sync_len();
        if !(removed.is_empty() && items.is_empty()) {
            self.emit(ChangeSet::spliced(at.to_string(), items, removed.clone()));
        }
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Re-scan
    // -----------------------------------------------------------------------

    /// Pick up properties written to the raw container without going through
    /// this wrapper: each one is wrapped if it is a container and reported as
    /// `{property, oldValue: undefined, value}`. Returns how many were found.
    pub fn reobserve(&self) -> Result<usize> {
        let discovered: Vec<String> = {
            let known = self.state.known.lock();
            match &self.target {
                Value::Object(object) => object
                    .keys()
                    .into_iter()
                    .filter(|key| !known.keys.contains(key))
                    .collect(),
                Value::Array(array) => (known.len..array.len())
                    .map(|index| index.to_string())
                    .chain(
                        array
                            .named_keys()
                            .into_iter()
                            .filter(|key| !known.keys.contains(key)),
                    )
                    .collect(),
                _ => Vec::new(),
            }
        };

        for key in &discovered {
            let value = self.target.get(key)?;
            self.sub_observe(&value, self.slot_for(key))?;
            self.note_write(key);
            self.emit(ChangeSet::replaced(key.as_str(), Value::Undefined, value));
        }
        self.sync_len();
        if !discovered.is_empty() {
            tracing::debug!(discovered = discovered.len(), "reobserve found new properties");
        }
        Ok(discovered.len())
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub fn on(&self, name: &str, listener: Listener) -> Unsubscribe {
        self.state.channel.on(name, listener)
    }

    pub fn off(&self, name: Option<&str>, listener: Option<&Listener>) {
        self.state.channel.off(name, listener);
    }

    pub fn trigger(&self, name: &str, args: Vec<Value>) -> Dispatch {
        self.state.channel.trigger(name, args)
    }

    /// Typed subscription to change events.
    pub fn on_change(&self, callback: impl Fn(&ChangeSet) + Send + Sync + 'static) -> Unsubscribe {
        self.on(
            CHANGE_EVENT,
            listener(move |args| {
                if let Some(change) = args.first().and_then(ChangeSet::from_value) {
                    callback(&change);
                }
                Ok(Reply::Ready(Value::Undefined))
            }),
        )
    }

    /// Drive change dispatches that were waiting on asynchronous listener
    /// replies, on this wrapper and on every wrapper nested below it.
    ///
    /// Every parked dispatch runs to completion even when an earlier one
    /// fails; the first failure is returned once none are left.
    pub async fn settled(&self) -> Result<()> {
        let mut first_error = None;
        loop {
            let subtree = self.state.subtree();
            for state in &subtree {
                if let Some(e) = state.failure.lock().take() {
                    first_error.get_or_insert(e);
                }
            }
            let batch: Vec<Dispatch> = subtree
                .iter()
                .flat_map(|state| std::mem::take(&mut *state.pending.lock()))
                .collect();
            if batch.is_empty() {
                break;
            }
            for dispatch in batch {
                if let Err(e) = dispatch.await {
                    tracing::warn!(error = %e, "change listener failed while settling");
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn emit(&self, change: ChangeSet) {
        self.state.emit(change, &mut Vec::new());
    }

    fn slot_for(&self, key: &str) -> LinkSlot {
        if self.is_array() && parse_index(key).is_some() {
            LinkSlot::Element
        } else {
            LinkSlot::Key(key.to_string())
        }
    }

    /// Wrap `value` if it is a container and link it under `slot`.
    fn sub_observe(&self, value: &Value, slot: LinkSlot) -> Result<()> {
        if !value.is_container() {
            return Ok(());
        }
        let child = observe(value)?;
        if !Arc::ptr_eq(&child.state, &self.state) {
            child.state.link_parent(&self.state, slot);
        }
        Ok(())
    }

    /// Wrap everything already present in enumerable properties and
    /// elements. Accessors are read through their getter.
    fn adopt_existing(&self) -> Result<()> {
        let (items, properties) = match &self.target {
            Value::Object(object) => (Vec::new(), object.properties()),
            Value::Array(array) => (array.items(), array.properties()),
            _ => return Ok(()),
        };
        for item in &items {
            self.sub_observe(item, LinkSlot::Element)?;
        }
        let mut keys = Vec::new();
        for (key, property) in properties {
            if !property.enumerable {
                continue;
            }
            let member = match property.value() {
                Some(member) => member.clone(),
                None => property.read()?,
            };
            self.sub_observe(&member, LinkSlot::Key(key.clone()))?;
            keys.push(key);
        }
        let mut known = self.state.known.lock();
        known.keys.extend(keys);
        known.len = items.len();
        Ok(())
    }

    fn note_write(&self, key: &str) {
        let mut known = self.state.known.lock();
        match &self.target {
            Value::Array(array) => {
                known.len = array.len();
                if parse_index(key).is_none() && key != "length" {
                    known.keys.insert(key.to_string());
                }
            }
            _ => {
                known.keys.insert(key.to_string());
            }
        }
    }

    fn sync_len(&self) {
        if let Value::Array(array) = &self.target {
            self.state.known.lock().len = array.len();
        }
    }
}
