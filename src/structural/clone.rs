use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::value::{ArrayRef, ObjectRef, Property, PropertyStore, Slot, Value};

/// Per-property hook: `(clone container, key, cloned value) -> installed value`.
pub type CloneHook = Arc<dyn Fn(&Value, &str, Value) -> Value + Send + Sync>;

/// Options for [`deep_clone_with`].
#[derive(Clone, Default)]
pub struct CloneOptions {
    /// Called for every cloned data property (array elements included); its
    /// return value is installed instead of the raw clone.
    pub hook: Option<CloneHook>,
    /// Re-apply a sealed/frozen level on the clone once it is filled.
    pub preserve_integrity: bool,
}

impl fmt::Debug for CloneOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloneOptions")
            .field("hook", &self.hook.is_some())
            .field("preserve_integrity", &self.preserve_integrity)
            .finish()
    }
}

/// Source identity -> clone, scoped to one call. Back-references resolve to
/// the in-progress clone, which is what terminates cycles.
type CloneCache = HashMap<usize, Value>;

/// Deep copy of `value`.
///
/// Scalars and functions are returned as-is, dates get a new value with the
/// same timestamp, and containers are rebuilt with the same prototype,
/// property descriptors and shared-substructure layout.
pub fn deep_clone(value: &Value) -> Value {
    deep_clone_with(value, &CloneOptions::default())
}

pub fn deep_clone_with(value: &Value, options: &CloneOptions) -> Value {
    let mut cache = CloneCache::new();
    clone_value(value, options, &mut cache)
}

fn clone_value(value: &Value, options: &CloneOptions, cache: &mut CloneCache) -> Value {
    match value {
        Value::Object(source) => clone_object(source, options, cache),
        Value::Array(source) => clone_array(source, options, cache),
        Value::Date(ms) => Value::Date(*ms),
        other => other.clone(),
    }
}

fn clone_object(source: &ObjectRef, options: &CloneOptions, cache: &mut CloneCache) -> Value {
    if let Some(done) = cache.get(&source.id()) {
        return done.clone();
    }
    let target = ObjectRef::with_proto(source.proto());
    let container = Value::Object(target.clone());
    cache.insert(source.id(), container.clone());

    for (key, property) in source.properties() {
        let property = clone_property(&container, &key, property, options, cache);
        target.define_unchecked(key, property);
    }
    if options.preserve_integrity {
        target.set_integrity(source.integrity());
    }
    container
}

fn clone_array(source: &ArrayRef, options: &CloneOptions, cache: &mut CloneCache) -> Value {
    if let Some(done) = cache.get(&source.id()) {
        return done.clone();
    }
    let target = ArrayRef::with_proto(source.proto());
    let container = Value::Array(target.clone());
    cache.insert(source.id(), container.clone());

    // `length` is implied by the pushed elements.
    for (index, item) in source.items().iter().enumerate() {
        let mut cloned = clone_value(item, options, cache);
        if let Some(hook) = &options.hook {
            cloned = hook(&container, &index.to_string(), cloned);
        }
        target.push_unchecked(cloned);
    }
    for (key, property) in source.properties() {
        let property = clone_property(&container, &key, property, options, cache);
        target.define_unchecked(key, property);
    }
    if options.preserve_integrity {
        target.set_integrity(source.integrity());
    }
    container
}

fn clone_property(
    container: &Value,
    key: &str,
    property: Property,
    options: &CloneOptions,
    cache: &mut CloneCache,
) -> Property {
    let Property {
        slot,
        enumerable,
        configurable,
    } = property;
    let slot = match slot {
        Slot::Data { value, writable } => {
            let mut cloned = clone_value(&value, options, cache);
            if let Some(hook) = &options.hook {
                cloned = hook(container, key, cloned);
            }
            Slot::Data {
                value: cloned,
                writable,
            }
        }
        // Accessors are carried by reference and never invoked.
        accessor @ Slot::Accessor { .. } => accessor,
    };
    Property {
        slot,
        enumerable,
        configurable,
    }
}
