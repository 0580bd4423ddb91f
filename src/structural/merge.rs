use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::{ArrayRef, Property, PropertyStore, Slot, Value};

use super::clone::deep_clone;

// ============================================================================
// Options
// ============================================================================

/// Merge policy. Deserializes from camelCase JSON with every field optional,
/// so a partial config layers over the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MergeOptions {
    /// Recursively merge when both sides hold an object at the same key.
    pub merge_objects: bool,
    /// Union arrays (by `===`) instead of overwriting index by index.
    pub join_arrays: bool,
    /// Only merge keys the left side already has, with the same accessor shape.
    pub strict_merge: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            merge_objects: true,
            join_arrays: false,
            strict_merge: false,
        }
    }
}

impl MergeOptions {
    /// Parse a (possibly partial) JSON config, e.g. `{"joinArrays": true}`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

// ============================================================================
// Merger
// ============================================================================

/// A merge function bound to a fixed [`MergeOptions`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Merger {
    options: MergeOptions,
}

/// Merge `items` left to right with the default options.
pub fn merge(items: &[Value]) -> Result<Value> {
    Merger::default().merge(items)
}

/// A merger bound to `options`; the default [`merge`] is unaffected.
pub fn config(options: MergeOptions) -> Merger {
    Merger::new(options)
}

impl Merger {
    pub fn new(options: MergeOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> MergeOptions {
        self.options
    }

    /// Clone the first item and merge every following item into it. Inputs
    /// are never modified. An empty slice yields `Undefined`.
    pub fn merge(&self, items: &[Value]) -> Result<Value> {
        let Some((first, rest)) = items.split_first() else {
            return Ok(Value::Undefined);
        };
        rest.iter()
            .try_fold(deep_clone(first), |result, item| self.merge_pair(result, item))
    }

    /// Merge `right` into `left`, which is owned by this merge and mutated
    /// in place.
    fn merge_pair(&self, left: Value, right: &Value) -> Result<Value> {
        match (&left, right) {
            (Value::Object(l), Value::Object(r)) => {
                self.merge_properties(l, r)?;
                Ok(left)
            }
            (Value::Array(l), Value::Array(r)) => {
                self.merge_arrays(l, r)?;
                Ok(left)
            }
            (l, r) if l.is_container() || r.is_container() => Err(Error::IncompatibleTypes {
                left: l.kind(),
                right: r.kind(),
            }),
            _ => Ok(deep_clone(right)),
        }
    }

    fn merge_properties(&self, target: &impl PropertyStore, source: &impl PropertyStore) -> Result<()> {
        for (key, incoming) in source.properties() {
            let existing = target.property(&key);
            if self.options.strict_merge {
                let compatible = existing
                    .as_ref()
                    .is_some_and(|e| e.accessor_shape() == incoming.accessor_shape());
                if !compatible {
                    tracing::trace!(key = %key, "strict merge skipped key");
                    continue;
                }
            }
            let property = match incoming.slot {
                accessor @ Slot::Accessor { .. } => Property {
                    slot: accessor,
                    ..incoming
                },
                Slot::Data { value, writable } => {
                    let current = existing.as_ref().and_then(|p| p.value().cloned());
                    Property {
                        slot: Slot::Data {
                            value: self.merge_slot(current, &value)?,
                            writable,
                        },
                        enumerable: incoming.enumerable,
                        configurable: incoming.configurable,
                    }
                }
            };
            target.define_unchecked(key, property);
        }
        Ok(())
    }

    fn merge_arrays(&self, left: &ArrayRef, right: &ArrayRef) -> Result<()> {
        // `length` follows from the elements and is never copied.
        if self.options.join_arrays {
            for item in right.items() {
                if left.index_of(&item).is_none() {
                    left.push_unchecked(deep_clone(&item));
                }
            }
        } else {
            for (index, item) in right.items().iter().enumerate() {
                let current = (index < left.len()).then(|| left.get_index(index));
                let merged = self.merge_slot(current, item)?;
                left.set_index_unchecked(index, merged);
            }
        }
        self.merge_properties(left, right)
    }

    /// Value to install at a slot currently holding `current`.
    ///
    /// When the policy merges into the current container, an incoming
    /// container of the other kind is an `IncompatibleTypes` error; scalars
    /// simply overwrite.
    fn merge_slot(&self, current: Option<Value>, incoming: &Value) -> Result<Value> {
        let incoming = deep_clone(incoming);
        if !incoming.is_container() {
            return Ok(incoming);
        }
        match current {
            Some(current @ Value::Object(_)) if self.options.merge_objects => {
                self.merge_pair(current, &incoming)
            }
            Some(current @ Value::Array(_)) if self.options.join_arrays => {
                self.merge_pair(current, &incoming)
            }
            _ => Ok(incoming),
        }
    }
}
