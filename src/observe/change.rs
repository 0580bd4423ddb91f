//! ChangeSet: the payload of one observed mutation.

use crate::value::{ObjectRef, Value};

/// What happened at [`ChangeSet::property`]. A change carries exactly one
/// of the two shapes.
#[derive(Debug, Clone)]
pub enum Change {
    /// A slot was assigned.
    Replaced { old_value: Value, value: Value },
    /// Elements were inserted and/or removed at an array position.
    Spliced { added: Vec<Value>, removed: Vec<Value> },
}

/// One mutation, located by a dotted path such as `"a.2.b"`.
#[derive(Debug, Clone)]
pub struct ChangeSet {
    pub property: String,
    pub change: Change,
}

impl ChangeSet {
    pub fn replaced(property: impl Into<String>, old_value: Value, value: Value) -> Self {
        Self {
            property: property.into(),
            change: Change::Replaced { old_value, value },
        }
    }

    pub fn spliced(property: impl Into<String>, added: Vec<Value>, removed: Vec<Value>) -> Self {
        Self {
            property: property.into(),
            change: Change::Spliced { added, removed },
        }
    }

    /// The same change seen from a container one level up.
    pub fn prefixed(&self, prefix: &str) -> Self {
        Self {
            property: format!("{prefix}.{}", self.property),
            change: self.change.clone(),
        }
    }

    pub fn old_value(&self) -> Option<&Value> {
        match &self.change {
            Change::Replaced { old_value, .. } => Some(old_value),
            Change::Spliced { .. } => None,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.change {
            Change::Replaced { value, .. } => Some(value),
            Change::Spliced { .. } => None,
        }
    }

    pub fn added(&self) -> Option<&[Value]> {
        match &self.change {
            Change::Spliced { added, .. } => Some(added),
            Change::Replaced { .. } => None,
        }
    }

    pub fn removed(&self) -> Option<&[Value]> {
        match &self.change {
            Change::Spliced { removed, .. } => Some(removed),
            Change::Replaced { .. } => None,
        }
    }

    /// Event argument form: `{property, oldValue, value}` or
    /// `{property, added, removed}`.
    pub fn to_value(&self) -> Value {
        let object = ObjectRef::new().with("property", self.property.as_str());
        let object = match &self.change {
            Change::Replaced { old_value, value } => object
                .with("oldValue", old_value.clone())
                .with("value", value.clone()),
            Change::Spliced { added, removed } => object
                .with("added", Value::array(added.clone()))
                .with("removed", Value::array(removed.clone())),
        };
        Value::Object(object)
    }

    /// Inverse of [`ChangeSet::to_value`]. Values keep their identity.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let property = object.get("property").ok()?.as_str()?.to_string();
        if object.has("added") {
            let added = object.get("added").ok()?.as_array()?.items();
            let removed = object.get("removed").ok()?.as_array()?.items();
            return Some(Self::spliced(property, added, removed));
        }
        Some(Self::replaced(
            property,
            object.get("oldValue").ok()?,
            object.get("value").ok()?,
        ))
    }
}
