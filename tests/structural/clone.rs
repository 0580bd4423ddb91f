//! Tests for `deep_clone` / `deep_clone_with`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use deepwatch::proto::{get_prototype, Proto};
use deepwatch::structural::{deep_clone, deep_clone_with, CloneOptions};
use deepwatch::value::{strict_equals, Function, Integrity, ObjectRef, Property, Value};
use serde_json::json;

// ============================================================================
// Plain data
// ============================================================================

#[test]
fn clone_copies_nested_data() {
    let source = Value::from(json!({ "a": { "b": [1, 2, { "c": "x" }] }, "n": null }));
    let copy = deep_clone(&source);
    assert_eq!(copy.to_json(), source.to_json());
}

#[test]
fn clone_does_not_share_containers_with_source() {
    let source = Value::from(json!({ "a": { "b": 1 } }));
    let copy = deep_clone(&source);

    copy.get("a").unwrap().set("b", 2).unwrap();

    assert_eq!(source.to_json(), json!({ "a": { "b": 1 } }));
    assert!(!strict_equals(&copy.get("a").unwrap(), &source.get("a").unwrap()));
}

#[test]
fn scalars_and_functions_are_returned_as_is() {
    let f = Value::from(Function::new("f", |_| Ok(Value::Undefined)));
    assert!(strict_equals(&deep_clone(&f), &f));
    assert!(strict_equals(&deep_clone(&Value::from("s")), &Value::from("s")));
    assert!(matches!(deep_clone(&Value::Date(42)), Value::Date(42)));
}

// ============================================================================
// Shape preservation
// ============================================================================

#[test]
fn circular_reference_points_at_the_clone() {
    let source = ObjectRef::new();
    source.set("self", source.clone()).unwrap();
    let source = Value::Object(source);

    let copy = deep_clone(&source);
    let back = copy.get("self").unwrap();

    assert!(strict_equals(&back, &copy));
    assert!(!strict_equals(&back, &source));
}

#[test]
fn shared_substructure_stays_shared() {
    let shared = Value::object();
    let source = Value::from(ObjectRef::new().with("a", shared.clone()).with("b", shared));

    let copy = deep_clone(&source);

    assert!(strict_equals(&copy.get("a").unwrap(), &copy.get("b").unwrap()));
}

#[test]
fn prototype_is_kept() {
    let point = Proto::new("Point");
    let source = Value::Object(ObjectRef::with_proto(Some(point.clone())).with("x", 1));

    let copy = deep_clone(&source);

    let proto = get_prototype(&copy).expect("clone should keep its prototype");
    assert!(proto.ptr_eq(&point));
}

#[test]
fn non_enumerable_properties_keep_their_descriptor() {
    let source = ObjectRef::new().with("shown", 1);
    source.define("secret", Property::hidden(2));

    let copy = deep_clone(&Value::Object(source));
    let copy = copy.as_object().unwrap();

    assert_eq!(copy.keys(), vec!["shown"]);
    let secret = copy.property("secret").expect("hidden property copied");
    assert!(!secret.enumerable);
    assert_eq!(secret.value().and_then(Value::as_f64), Some(2.0));
}

#[test]
fn accessors_are_copied_without_being_invoked() {
    let calls = Arc::new(AtomicUsize::new(0));
    let getter = {
        let calls = Arc::clone(&calls);
        Function::new("get", move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Value::from(7))
        })
    };
    let source = ObjectRef::new();
    source.define("computed", Property::accessor(Some(getter), None));

    let copy = deep_clone(&Value::Object(source));

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let property = copy.as_object().unwrap().property("computed").unwrap();
    assert!(property.is_accessor());
    assert_eq!(copy.get("computed").unwrap().as_f64(), Some(7.0));
}

// ============================================================================
// Options
// ============================================================================

#[test]
fn hook_replaces_installed_values() {
    let options = CloneOptions {
        hook: Some(Arc::new(|_container, _key, value| match value {
            Value::Number(n) => Value::Number(n * 2.0),
            other => other,
        })),
        ..Default::default()
    };
    let source = Value::from(json!({ "a": 1, "b": [2, 3] }));

    let copy = deep_clone_with(&source, &options);

    assert_eq!(copy.to_json(), json!({ "a": 2, "b": [4, 6] }));
}

#[test]
fn hook_sees_keys_and_indices() {
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let options = CloneOptions {
        hook: Some({
            let seen = Arc::clone(&seen);
            Arc::new(move |_container, key, value| {
                seen.lock().unwrap().push(key.to_string());
                value
            })
        }),
        ..Default::default()
    };

    deep_clone_with(&Value::from(json!({ "list": ["x", "y"] })), &options);

    assert_eq!(*seen.lock().unwrap(), vec!["0", "1", "list"]);
}

#[test]
fn integrity_is_reset_unless_preserved() {
    let source = ObjectRef::new().with("a", 1);
    source.freeze();
    let source = Value::Object(source);

    let loose = deep_clone(&source);
    assert_eq!(loose.as_object().unwrap().integrity(), Integrity::Open);

    let kept = deep_clone_with(
        &source,
        &CloneOptions {
            preserve_integrity: true,
            ..Default::default()
        },
    );
    assert_eq!(kept.as_object().unwrap().integrity(), Integrity::Frozen);
    assert!(!kept.set("a", 2).unwrap());
}
