//! Dynamic values: the data every structural operation and observable works on.
//!
//! Scalars are stored inline. Objects, arrays and functions are shared handles
//! (`Arc`) whose identity is the allocation, so two handles to the same
//! container compare equal under [`strict_equals`] and cycles are expressible.
//!
//! No container lock is held while another container is visited or while user
//! code (getters, setters, hooks) runs. Every reader snapshots under the lock
//! and releases before recursing.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::proto::Proto;

// ============================================================================
// Function
// ============================================================================

/// Native callable stored inside a [`Value::Function`].
pub type NativeFn = dyn Fn(&[Value]) -> Result<Value> + Send + Sync;

pub(crate) struct FunctionInner {
    name: String,
    call: Box<NativeFn>,
}

/// A callable value. Cloning shares the same function; identity is preserved.
#[derive(Clone)]
pub struct Function(Arc<FunctionInner>);

impl Function {
    pub fn new(
        name: impl Into<String>,
        call: impl Fn(&[Value]) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(FunctionInner {
            name: name.into(),
            call: Box::new(call),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.0.call)(args)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({})", self.0.name)
    }
}

// ============================================================================
// Property descriptors
// ============================================================================

/// Storage of one own property.
#[derive(Debug, Clone)]
pub enum Slot {
    Data { value: Value, writable: bool },
    Accessor {
        get: Option<Function>,
        set: Option<Function>,
    },
}

/// An own property together with its descriptor flags.
#[derive(Debug, Clone)]
pub struct Property {
    pub slot: Slot,
    pub enumerable: bool,
    pub configurable: bool,
}

impl Property {
    /// Writable, enumerable, configurable data property.
    pub fn data(value: impl Into<Value>) -> Self {
        Self {
            slot: Slot::Data {
                value: value.into(),
                writable: true,
            },
            enumerable: true,
            configurable: true,
        }
    }

    /// Data property that does not show up in key enumeration.
    pub fn hidden(value: impl Into<Value>) -> Self {
        Self {
            enumerable: false,
            ..Self::data(value)
        }
    }

    pub fn accessor(get: Option<Function>, set: Option<Function>) -> Self {
        Self {
            slot: Slot::Accessor { get, set },
            enumerable: true,
            configurable: true,
        }
    }

    pub fn is_accessor(&self) -> bool {
        matches!(self.slot, Slot::Accessor { .. })
    }

    /// The stored value of a data property; `None` for accessors.
    pub fn value(&self) -> Option<&Value> {
        match &self.slot {
            Slot::Data { value, .. } => Some(value),
            Slot::Accessor { .. } => None,
        }
    }

    /// `(has getter, has setter)`; data properties report `(false, false)`.
    pub fn accessor_shape(&self) -> (bool, bool) {
        match &self.slot {
            Slot::Data { .. } => (false, false),
            Slot::Accessor { get, set } => (get.is_some(), set.is_some()),
        }
    }

    pub(crate) fn read(&self) -> Result<Value> {
        match &self.slot {
            Slot::Data { value, .. } => Ok(value.clone()),
            Slot::Accessor { get: Some(get), .. } => get.call(&[]),
            Slot::Accessor { get: None, .. } => Ok(Value::Undefined),
        }
    }
}

/// Lock level of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Integrity {
    #[default]
    Open,
    /// No properties may be added or removed.
    Sealed,
    /// Sealed, and data properties are read-only.
    Frozen,
}

/// Outcome of an ordinary property write before user code runs.
enum WritePlan {
    Done(bool),
    CallSetter(Function, Value),
}

fn plan_write(
    props: &mut IndexMap<String, Property>,
    integrity: Integrity,
    key: &str,
    value: Value,
) -> WritePlan {
    match props.get_mut(key) {
        Some(Property {
            slot: Slot::Data {
                value: current,
                writable,
            },
            ..
        }) => {
            if !*writable || integrity == Integrity::Frozen {
                return WritePlan::Done(false);
            }
            *current = value;
            WritePlan::Done(true)
        }
        Some(Property {
            slot: Slot::Accessor { set: Some(set), .. },
            ..
        }) => WritePlan::CallSetter(set.clone(), value),
        Some(_) => WritePlan::Done(false),
        None => {
            if integrity != Integrity::Open {
                return WritePlan::Done(false);
            }
            props.insert(key.to_string(), Property::data(value));
            WritePlan::Done(true)
        }
    }
}

fn run_write(plan: WritePlan) -> Result<bool> {
    match plan {
        WritePlan::Done(applied) => Ok(applied),
        WritePlan::CallSetter(set, value) => {
            set.call(&[value])?;
            Ok(true)
        }
    }
}

/// Whether `define` may install `key` given the current descriptor state.
fn may_define(props: &IndexMap<String, Property>, integrity: Integrity, key: &str) -> bool {
    match (props.get(key), integrity) {
        (None, Integrity::Open) => true,
        (None, _) => false,
        (Some(_), Integrity::Frozen) => false,
        (Some(existing), _) => existing.configurable,
    }
}

/// Largest array index; numeric keys above it are ordinary named properties.
pub const MAX_INDEX: usize = u32::MAX as usize - 1;

/// Elements are stored densely, so growth stops well short of [`MAX_INDEX`].
pub const MAX_DENSE_LEN: usize = 1 << 24;

/// Parse a canonical array index (`"0"`, `"17"`; not `"01"`, `"-1"` or
/// anything past [`MAX_INDEX`]).
pub(crate) fn parse_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok().filter(|&index| index <= MAX_INDEX)
}

fn check_dense_len(len: usize) -> Result<()> {
    if len > MAX_DENSE_LEN {
        return Err(Error::invalid_argument(format!(
            "array cannot grow to {len} elements (limit {MAX_DENSE_LEN})"
        )));
    }
    Ok(())
}

/// Shared property-table access for objects and the named part of arrays.
pub(crate) trait PropertyStore {
    fn property(&self, key: &str) -> Option<Property>;
    fn properties(&self) -> Vec<(String, Property)>;
    /// Install a property ignoring integrity; used on freshly built containers.
    fn define_unchecked(&self, key: String, property: Property);
}

// ============================================================================
// ObjectRef
// ============================================================================

pub(crate) struct ObjectData {
    proto: Option<Proto>,
    props: IndexMap<String, Property>,
    integrity: Integrity,
}

/// Shared handle to a keyed container with insertion-ordered own properties.
#[derive(Clone)]
pub struct ObjectRef(Arc<Mutex<ObjectData>>);

impl ObjectRef {
    pub fn new() -> Self {
        Self::with_proto(None)
    }

    pub fn with_proto(proto: Option<Proto>) -> Self {
        Self(Arc::new(Mutex::new(ObjectData {
            proto,
            props: IndexMap::new(),
            integrity: Integrity::Open,
        })))
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn proto(&self) -> Option<Proto> {
        self.0.lock().proto.clone()
    }

    pub fn set_proto(&self, proto: Option<Proto>) {
        self.0.lock().proto = proto;
    }

    pub fn integrity(&self) -> Integrity {
        self.0.lock().integrity
    }

    pub fn seal(&self) {
        let mut data = self.0.lock();
        if data.integrity == Integrity::Open {
            data.integrity = Integrity::Sealed;
        }
    }

    pub fn freeze(&self) {
        self.0.lock().integrity = Integrity::Frozen;
    }

    pub(crate) fn set_integrity(&self, integrity: Integrity) {
        self.0.lock().integrity = integrity;
    }

    pub fn len(&self) -> usize {
        self.0.lock().props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enumerable own keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.0
            .lock()
            .props
            .iter()
            .filter(|(_, p)| p.enumerable)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// All own keys, enumerable or not.
    pub fn own_keys(&self) -> Vec<String> {
        self.0.lock().props.keys().cloned().collect()
    }

    pub fn has(&self, key: &str) -> bool {
        self.0.lock().props.contains_key(key)
    }

    pub fn property(&self, key: &str) -> Option<Property> {
        self.0.lock().props.get(key).cloned()
    }

    /// Read `key`, invoking a getter when the property is an accessor.
    /// Missing keys read as `Undefined`.
    pub fn get(&self, key: &str) -> Result<Value> {
        match self.property(key) {
            Some(property) => property.read(),
            None => Ok(Value::Undefined),
        }
    }

    /// Ordinary assignment. Returns `false` when the write was rejected by a
    /// read-only property, a missing setter, or the integrity level.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<bool> {
        let plan = {
            let mut data = self.0.lock();
            let integrity = data.integrity;
            plan_write(&mut data.props, integrity, key, value.into())
        };
        run_write(plan)
    }

    /// Builder-style insert of a data property.
    pub fn with(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.define_unchecked(key.into(), Property::data(value));
        self
    }

    /// Install a property descriptor, honoring integrity and configurability.
    pub fn define(&self, key: impl Into<String>, property: Property) -> bool {
        let key = key.into();
        let mut data = self.0.lock();
        if !may_define(&data.props, data.integrity, &key) {
            return false;
        }
        data.props.insert(key, property);
        true
    }

    pub fn remove(&self, key: &str) -> bool {
        let mut data = self.0.lock();
        if data.integrity != Integrity::Open {
            return false;
        }
        match data.props.get(key) {
            Some(p) if p.configurable => data.props.shift_remove(key).is_some(),
            _ => false,
        }
    }

    pub(crate) fn downgrade(&self) -> Weak<Mutex<ObjectData>> {
        Arc::downgrade(&self.0)
    }
}

impl Default for ObjectRef {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyStore for ObjectRef {
    fn property(&self, key: &str) -> Option<Property> {
        ObjectRef::property(self, key)
    }

    fn properties(&self) -> Vec<(String, Property)> {
        self.0
            .lock()
            .props
            .iter()
            .map(|(k, p)| (k.clone(), p.clone()))
            .collect()
    }

    fn define_unchecked(&self, key: String, property: Property) {
        self.0.lock().props.insert(key, property);
    }
}

// ============================================================================
// ArrayRef
// ============================================================================

pub(crate) struct ArrayData {
    proto: Option<Proto>,
    items: Vec<Value>,
    props: IndexMap<String, Property>,
    integrity: Integrity,
}

impl ArrayData {
    fn check_resize(&self, op: &str) -> Result<()> {
        if self.integrity == Integrity::Open {
            Ok(())
        } else {
            Err(Error::invalid_argument(format!(
                "{op}() cannot change the length of a {:?} array",
                self.integrity
            )))
        }
    }
}

/// Shared handle to an ordered element sequence. Named (non-index) own
/// properties live beside the elements.
#[derive(Clone)]
pub struct ArrayRef(Arc<Mutex<ArrayData>>);

impl ArrayRef {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }

    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Arc::new(Mutex::new(ArrayData {
            proto: None,
            items,
            props: IndexMap::new(),
            integrity: Integrity::Open,
        })))
    }

    pub fn with_proto(proto: Option<Proto>) -> Self {
        let array = Self::new();
        array.set_proto(proto);
        array
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub fn proto(&self) -> Option<Proto> {
        self.0.lock().proto.clone()
    }

    pub fn set_proto(&self, proto: Option<Proto>) {
        self.0.lock().proto = proto;
    }

    pub fn integrity(&self) -> Integrity {
        self.0.lock().integrity
    }

    pub fn seal(&self) {
        let mut data = self.0.lock();
        if data.integrity == Integrity::Open {
            data.integrity = Integrity::Sealed;
        }
    }

    pub fn freeze(&self) {
        self.0.lock().integrity = Integrity::Frozen;
    }

    pub(crate) fn set_integrity(&self, integrity: Integrity) {
        self.0.lock().integrity = integrity;
    }

    pub fn len(&self) -> usize {
        self.0.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the elements.
    pub fn items(&self) -> Vec<Value> {
        self.0.lock().items.clone()
    }

    /// Element at `index`, or `Undefined` past the end.
    pub fn get_index(&self, index: usize) -> Value {
        self.0.lock().items.get(index).cloned().unwrap_or_default()
    }

    /// Assign element `index`, padding with `Undefined` holes when it lies
    /// past the end. Growing requires an open array and fails with
    /// `InvalidArgument` past [`MAX_DENSE_LEN`].
    pub fn set_index(&self, index: usize, value: impl Into<Value>) -> Result<bool> {
        let mut data = self.0.lock();
        if data.integrity == Integrity::Frozen {
            return Ok(false);
        }
        if index >= data.items.len() {
            if data.integrity != Integrity::Open {
                return Ok(false);
            }
            check_dense_len(index.saturating_add(1))?;
            data.items.resize(index + 1, Value::Undefined);
        }
        data.items[index] = value.into();
        Ok(true)
    }

    pub(crate) fn set_index_unchecked(&self, index: usize, value: Value) {
        let mut data = self.0.lock();
        if index >= data.items.len() {
            data.items.resize(index + 1, Value::Undefined);
        }
        data.items[index] = value;
    }

    pub(crate) fn push_unchecked(&self, value: Value) {
        self.0.lock().items.push(value);
    }

    /// Truncate or pad to `len`. Returns `false` when integrity forbids it;
    /// padding past [`MAX_DENSE_LEN`] fails with `InvalidArgument`.
    pub fn set_len(&self, len: usize) -> Result<bool> {
        let mut data = self.0.lock();
        if data.integrity != Integrity::Open {
            return Ok(data.items.len() == len);
        }
        if len > data.items.len() {
            check_dense_len(len)?;
        }
        data.items.resize(len, Value::Undefined);
        Ok(true)
    }

    /// First index holding a value `===` to `needle`.
    pub fn index_of(&self, needle: &Value) -> Option<usize> {
        self.0
            .lock()
            .items
            .iter()
            .position(|item| strict_equals(item, needle))
    }

    pub(crate) fn position_of_identity(&self, id: usize) -> Option<usize> {
        self.0
            .lock()
            .items
            .iter()
            .position(|item| item.identity() == Some(id))
    }

    pub fn push(&self, items: Vec<Value>) -> Result<usize> {
        let mut data = self.0.lock();
        data.check_resize("push")?;
        data.items.extend(items);
        Ok(data.items.len())
    }

    pub fn unshift(&self, item: Value) -> Result<usize> {
        let mut data = self.0.lock();
        data.check_resize("unshift")?;
        data.items.insert(0, item);
        Ok(data.items.len())
    }

    pub fn pop(&self) -> Result<Option<Value>> {
        let mut data = self.0.lock();
        if data.items.is_empty() {
            return Ok(None);
        }
        data.check_resize("pop")?;
        Ok(data.items.pop())
    }

    pub fn shift(&self) -> Result<Option<Value>> {
        let mut data = self.0.lock();
        if data.items.is_empty() {
            return Ok(None);
        }
        data.check_resize("shift")?;
        Ok(Some(data.items.remove(0)))
    }

    /// Remove `delete_count` elements at `start` and insert `items` there.
    ///
    /// A negative `start` counts back from the end; the result is clamped to
    /// `0..=len`. `None` deletes everything after `start`. Returns the
    /// normalized start and the removed elements.
    pub fn splice(
        &self,
        start: isize,
        delete_count: Option<usize>,
        items: Vec<Value>,
    ) -> Result<(usize, Vec<Value>)> {
        let mut data = self.0.lock();
        let len = data.items.len();
        let start = if start < 0 {
            len.saturating_sub(start.unsigned_abs())
        } else {
            start.unsigned_abs().min(len)
        };
        let count = delete_count.unwrap_or(len - start).min(len - start);
        if data.integrity == Integrity::Frozen && (count > 0 || !items.is_empty()) {
            return Err(Error::invalid_argument(
                "splice() cannot modify a Frozen array",
            ));
        }
        if count != items.len() {
            data.check_resize("splice")?;
        }
        let removed: Vec<Value> = data.items.splice(start..start + count, items).collect();
        Ok((start, removed))
    }

    /// Named (non-index) own properties.
    pub fn property(&self, key: &str) -> Option<Property> {
        self.0.lock().props.get(key).cloned()
    }

    pub fn define(&self, key: impl Into<String>, property: Property) -> bool {
        let key = key.into();
        if parse_index(&key).is_some() || key == "length" {
            return match property.slot {
                Slot::Data { value, .. } => match parse_index(&key) {
                    Some(index) => matches!(self.set_index(index, value), Ok(true)),
                    None => false,
                },
                Slot::Accessor { .. } => false,
            };
        }
        let mut data = self.0.lock();
        if !may_define(&data.props, data.integrity, &key) {
            return false;
        }
        data.props.insert(key, property);
        true
    }

    pub(crate) fn named_keys(&self) -> Vec<String> {
        self.0
            .lock()
            .props
            .iter()
            .filter(|(_, p)| p.enumerable)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Read an element (numeric key), `length`, or a named property.
    pub fn get(&self, key: &str) -> Result<Value> {
        if let Some(index) = parse_index(key) {
            return Ok(self.get_index(index));
        }
        if key == "length" {
            return Ok(Value::Number(self.len() as f64));
        }
        match self.property(key) {
            Some(property) => property.read(),
            None => Ok(Value::Undefined),
        }
    }

    /// Ordinary assignment to an element, `length`, or a named property.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<bool> {
        let value = value.into();
        if let Some(index) = parse_index(key) {
            return self.set_index(index, value);
        }
        if key == "length" {
            return match value.as_f64() {
                Some(n) if n >= 0.0 && n.fract() == 0.0 && n <= f64::from(u32::MAX) => {
                    self.set_len(n as usize)
                }
                _ => Err(Error::invalid_argument(format!(
                    "invalid array length: {}",
                    value.to_json()
                ))),
            };
        }
        let plan = {
            let mut data = self.0.lock();
            let integrity = data.integrity;
            plan_write(&mut data.props, integrity, key, value)
        };
        run_write(plan)
    }

    pub(crate) fn downgrade(&self) -> Weak<Mutex<ArrayData>> {
        Arc::downgrade(&self.0)
    }
}

impl Default for ArrayRef {
    fn default() -> Self {
        Self::new()
    }
}

impl PropertyStore for ArrayRef {
    fn property(&self, key: &str) -> Option<Property> {
        ArrayRef::property(self, key)
    }

    fn properties(&self) -> Vec<(String, Property)> {
        self.0
            .lock()
            .props
            .iter()
            .map(|(k, p)| (k.clone(), p.clone()))
            .collect()
    }

    fn define_unchecked(&self, key: String, property: Property) {
        self.0.lock().props.insert(key, property);
    }
}

// ============================================================================
// Value
// ============================================================================

/// A dynamic value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    Function(Function),
    Object(ObjectRef),
    Array(ArrayRef),
}

impl Value {
    /// A fresh, empty object.
    pub fn object() -> Self {
        Self::Object(ObjectRef::new())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Self::Array(ArrayRef::from_vec(items))
    }

    /// Fine-grained kind name used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Date(_) => "date",
            Self::Function(_) => "function",
            Self::Object(_) => "object",
            Self::Array(_) => "array",
        }
    }

    /// Allocation identity of objects, arrays and functions.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Self::Object(o) => Some(o.id()),
            Self::Array(a) => Some(a.id()),
            Self::Function(f) => Some(f.id()),
            _ => None,
        }
    }

    /// Objects and arrays.
    pub fn is_container(&self) -> bool {
        matches!(self, Self::Object(_) | Self::Array(_))
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Member read. Non-containers have no members and read as `Undefined`.
    pub fn get(&self, key: &str) -> Result<Value> {
        match self {
            Self::Object(o) => o.get(key),
            Self::Array(a) => a.get(key),
            _ => Ok(Self::Undefined),
        }
    }

    /// Member write. Writing to a non-container is rejected with `false`.
    pub fn set(&self, key: &str, value: impl Into<Value>) -> Result<bool> {
        match self {
            Self::Object(o) => o.set(key, value),
            Self::Array(a) => a.set(key, value),
            _ => Ok(false),
        }
    }

    pub fn has_own(&self, key: &str) -> bool {
        match self {
            Self::Object(o) => o.has(key),
            Self::Array(a) => match parse_index(key) {
                Some(index) => index < a.len(),
                None => key == "length" || a.property(key).is_some(),
            },
            _ => false,
        }
    }

    /// Convert to JSON, following `JSON.stringify` conventions: undefined and
    /// functions are dropped from objects and become `null` in arrays, dates
    /// become their timestamp, and a container met again on its own path
    /// becomes `null`.
    pub fn to_json(&self) -> serde_json::Value {
        let mut path = HashSet::new();
        self.to_json_inner(&mut path)
            .unwrap_or(serde_json::Value::Null)
    }

    fn to_json_inner(&self, path: &mut HashSet<usize>) -> Option<serde_json::Value> {
        use serde_json::Value as Json;
        match self {
            Self::Undefined | Self::Function(_) => None,
            Self::Null => Some(Json::Null),
            Self::Bool(b) => Some(Json::Bool(*b)),
            Self::Number(n) => Some(number_to_json(*n)),
            Self::String(s) => Some(Json::String(s.clone())),
            Self::Date(ms) => Some(Json::from(*ms)),
            Self::Object(o) => {
                if !path.insert(o.id()) {
                    return Some(Json::Null);
                }
                let mut map = serde_json::Map::new();
                for key in o.keys() {
                    let member = o.get(&key).unwrap_or_default();
                    if let Some(json) = member.to_json_inner(path) {
                        map.insert(key, json);
                    }
                }
                path.remove(&o.id());
                Some(Json::Object(map))
            }
            Self::Array(a) => {
                if !path.insert(a.id()) {
                    return Some(Json::Null);
                }
                let items = a
                    .items()
                    .iter()
                    .map(|item| item.to_json_inner(path).unwrap_or(Json::Null))
                    .collect();
                path.remove(&a.id());
                Some(Json::Array(items))
            }
        }
    }

    pub(crate) fn downgrade(&self) -> Option<WeakValue> {
        match self {
            Self::Object(o) => Some(WeakValue::Object(o.downgrade())),
            Self::Array(a) => Some(WeakValue::Array(a.downgrade())),
            Self::Function(f) => Some(WeakValue::Function(Arc::downgrade(&f.0))),
            _ => None,
        }
    }
}

fn number_to_json(n: f64) -> serde_json::Value {
    const MAX_SAFE: f64 = 9_007_199_254_740_991.0;
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        return serde_json::Value::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Date(ms) => write!(f, "Date({ms})"),
            Self::Function(func) => write!(f, "{func:?}"),
            Self::Object(_) | Self::Array(_) => write!(f, "{}", self.to_json()),
        }
    }
}

/// The `===` relation: scalars by value (NaN is never equal to itself),
/// functions and containers by identity.
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Date(x), Value::Date(y)) => x == y,
        (Value::Function(x), Value::Function(y)) => x.ptr_eq(y),
        (Value::Object(x), Value::Object(y)) => x.ptr_eq(y),
        (Value::Array(x), Value::Array(y)) => x.ptr_eq(y),
        _ => false,
    }
}

/// The `typeof` category of a value.
pub fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Undefined => "undefined",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Function(_) => "function",
        Value::Null | Value::Date(_) | Value::Object(_) | Value::Array(_) => "object",
    }
}

// ============================================================================
// Weak handles
// ============================================================================

/// Non-owning reference to a container or function, used by side tables.
#[derive(Clone)]
pub(crate) enum WeakValue {
    Object(Weak<Mutex<ObjectData>>),
    Array(Weak<Mutex<ArrayData>>),
    Function(Weak<FunctionInner>),
}

impl WeakValue {
    pub(crate) fn upgrade(&self) -> Option<Value> {
        match self {
            Self::Object(w) => w.upgrade().map(|a| Value::Object(ObjectRef(a))),
            Self::Array(w) => w.upgrade().map(|a| Value::Array(ArrayRef(a))),
            Self::Function(w) => w.upgrade().map(|a| Value::Function(Function(a))),
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        match self {
            Self::Object(w) => w.strong_count() > 0,
            Self::Array(w) => w.strong_count() > 0,
            Self::Function(w) => w.strong_count() > 0,
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::array(items)
    }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self {
        Self::Object(o)
    }
}

impl From<ArrayRef> for Value {
    fn from(a: ArrayRef) -> Self {
        Self::Array(a)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Self::Function(f)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => Self::String(s),
            Json::Array(items) => Self::array(items.into_iter().map(Self::from).collect()),
            Json::Object(map) => {
                let object = ObjectRef::new();
                for (key, member) in map {
                    object.define_unchecked(key, Property::data(Self::from(member)));
                }
                Self::Object(object)
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
