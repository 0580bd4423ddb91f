//! Prototypes: class identity for containers without constructors.
//!
//! A [`Proto`] is shared by every instance of a "class". Cloning a container
//! shares its prototype handle instead of running a constructor, which is how
//! [`reconstruct`] and the structural clone preserve class identity.

use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::mixin::Capability;
use crate::value::{ArrayRef, ObjectRef, Value};

/// `valueOf` strategy: maps an instance to the primitive it boxes.
pub type ValueOf = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

#[derive(Clone)]
pub(crate) struct ProtoInner {
    pub(crate) name: String,
    pub(crate) parent: Option<Proto>,
    pub(crate) value_of: Option<ValueOf>,
    pub(crate) capabilities: Vec<Capability>,
}

/// Shared, immutable prototype. Identity is the allocation.
#[derive(Clone)]
pub struct Proto(pub(crate) Arc<ProtoInner>);

impl Proto {
    pub fn new(name: impl Into<String>) -> Self {
        Self(Arc::new(ProtoInner {
            name: name.into(),
            parent: None,
            value_of: None,
            capabilities: Vec::new(),
        }))
    }

    /// Derive a child prototype whose chain continues at `self`.
    pub fn extend(&self, name: impl Into<String>) -> Self {
        self.derive(name.into(), Vec::new())
    }

    pub(crate) fn derive(&self, name: String, capabilities: Vec<Capability>) -> Self {
        Self(Arc::new(ProtoInner {
            name,
            parent: Some(self.clone()),
            value_of: None,
            capabilities,
        }))
    }

    /// Copy of this prototype (new identity) that boxes a primitive.
    pub fn with_value_of(&self, value_of: impl Fn(&Value) -> Value + Send + Sync + 'static) -> Self {
        let mut inner = (*self.0).clone();
        inner.value_of = Some(Arc::new(value_of));
        Self(Arc::new(inner))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn parent(&self) -> Option<&Proto> {
        self.0.parent.as_ref()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// `self` followed by each ancestor.
    pub fn chain(&self) -> impl Iterator<Item = &Proto> {
        std::iter::successors(Some(self), |&p| p.parent())
    }

    /// Whether `other` appears on this prototype's chain.
    pub fn is_a(&self, other: &Proto) -> bool {
        self.chain().any(|p| p.ptr_eq(other))
    }

    /// Nearest `valueOf` strategy on the chain, applied to `this`.
    pub fn value_of(&self, this: &Value) -> Option<Value> {
        self.chain()
            .find_map(|p| p.0.value_of.as_ref())
            .map(|f| f(this))
    }

    pub(crate) fn boxes_primitive(&self) -> bool {
        self.chain().any(|p| p.0.value_of.is_some())
    }
}

impl fmt::Debug for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.chain().map(Proto::name).collect();
        write!(f, "Proto({})", names.join(" -> "))
    }
}

pub fn get_prototype(value: &Value) -> Option<Proto> {
    match value {
        Value::Object(o) => o.proto(),
        Value::Array(a) => a.proto(),
        _ => None,
    }
}

pub fn set_prototype(value: &Value, proto: Option<Proto>) -> Result<()> {
    match value {
        Value::Object(o) => o.set_proto(proto),
        Value::Array(a) => a.set_proto(proto),
        other => {
            return Err(Error::invalid_argument(format!(
                "cannot set the prototype of a {}",
                other.kind()
            )));
        }
    }
    Ok(())
}

/// An empty container of the same kind and prototype as `value`, built
/// without any constructor. Non-containers are returned unchanged.
pub fn reconstruct(value: &Value) -> Value {
    match value {
        Value::Object(o) => Value::Object(ObjectRef::with_proto(o.proto())),
        Value::Array(a) => Value::Array(ArrayRef::with_proto(a.proto())),
        other => other.clone(),
    }
}
