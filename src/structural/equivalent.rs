use crate::value::{strict_equals, type_of, ArrayRef, ObjectRef, Value};

/// Deep structural equality.
///
/// - different `typeof` categories are never equivalent
/// - arrays: same length, pairwise equivalent elements
/// - objects: boxed primitives compare through their `valueOf`; other
///   objects need the same sorted enumerable key set and equivalent members
/// - dates: by timestamp
/// - everything else: `===`
///
/// A container pair already under comparison counts as equivalent, so
/// circular structures terminate.
pub fn equivalent(a: &Value, b: &Value) -> bool {
    let mut seen = Vec::new();
    equivalent_inner(a, b, &mut seen)
}

fn equivalent_inner(a: &Value, b: &Value, seen: &mut Vec<(usize, usize)>) -> bool {
    if type_of(a) != type_of(b) {
        return false;
    }
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => arrays_equivalent(x, y, seen),
        (Value::Object(x), Value::Object(y)) => {
            if x.ptr_eq(y) {
                return true;
            }
            match (boxed_primitive(a, x), boxed_primitive(b, y)) {
                (None, None) => objects_equivalent(x, y, seen),
                (Some(l), Some(r)) => strict_equals(&l, &r),
                _ => false,
            }
        }
        (Value::Date(x), Value::Date(y)) => x == y,
        _ => strict_equals(a, b),
    }
}

fn boxed_primitive(value: &Value, object: &ObjectRef) -> Option<Value> {
    object.proto().and_then(|p| p.value_of(value))
}

fn mark_seen(seen: &mut Vec<(usize, usize)>, pair: (usize, usize)) -> bool {
    if seen.contains(&pair) {
        return false;
    }
    seen.push(pair);
    true
}

fn arrays_equivalent(x: &ArrayRef, y: &ArrayRef, seen: &mut Vec<(usize, usize)>) -> bool {
    if x.ptr_eq(y) || !mark_seen(seen, (x.id(), y.id())) {
        return true;
    }
    let (xs, ys) = (x.items(), y.items());
    xs.len() == ys.len()
        && xs
            .iter()
            .zip(ys.iter())
            .all(|(l, r)| equivalent_inner(l, r, seen))
}

fn objects_equivalent(x: &ObjectRef, y: &ObjectRef, seen: &mut Vec<(usize, usize)>) -> bool {
    if !mark_seen(seen, (x.id(), y.id())) {
        return true;
    }
    let mut x_keys = x.keys();
    let mut y_keys = y.keys();
    x_keys.sort();
    y_keys.sort();
    if x_keys != y_keys {
        return false;
    }
    x_keys.iter().all(|key| {
        // A failing getter reads as undefined; the predicate stays total.
        let l = x.get(key).unwrap_or_default();
        let r = y.get(key).unwrap_or_default();
        equivalent_inner(&l, &r, seen)
    })
}
