//! Runtime type classification. Every predicate is total.

use crate::value::Value;

pub fn is_function(value: &Value) -> bool {
    matches!(value, Value::Function(_))
}

pub fn is_string(value: &Value) -> bool {
    matches!(value, Value::String(_))
}

/// Numbers other than NaN.
pub fn is_number(value: &Value) -> bool {
    matches!(value, Value::Number(n) if !n.is_nan())
}

pub fn is_boolean(value: &Value) -> bool {
    matches!(value, Value::Bool(_))
}

pub fn is_date(value: &Value) -> bool {
    matches!(value, Value::Date(_))
}

/// Keyed objects, including class instances, but not arrays, dates,
/// functions or boxed primitives.
pub fn is_object(value: &Value) -> bool {
    match value {
        Value::Object(o) => !o.proto().is_some_and(|p| p.boxes_primitive()),
        _ => false,
    }
}

pub fn is_undefined(value: &Value) -> bool {
    matches!(value, Value::Undefined)
}

pub fn is_array(value: &Value) -> bool {
    matches!(value, Value::Array(_))
}

/// `undefined`, `null`, `false` and NaN. Zero and the empty string are not
/// falsy here.
pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Undefined | Value::Null | Value::Bool(false) => true,
        Value::Number(n) => n.is_nan(),
        _ => false,
    }
}
