//! Tests for `observe` and property writes through `Observable`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use deepwatch::events::{self, listener, Reply};
use deepwatch::observe::{observe, ChangeSet, Observable};
use deepwatch::value::{strict_equals, Function, ObjectRef, Property, Value};
use deepwatch::Error;
use serde_json::json;

/// Helper: collect every change event an observable emits.
fn record(observable: &Observable) -> Arc<Mutex<Vec<ChangeSet>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    let _ = observable.on_change(move |change| sink.lock().unwrap().push(change.clone()));
    log
}

fn properties(log: &Arc<Mutex<Vec<ChangeSet>>>) -> Vec<String> {
    log.lock().unwrap().iter().map(|c| c.property.clone()).collect()
}

// ============================================================================
// Wrapping
// ============================================================================

#[test]
fn observe_rejects_non_containers() {
    for value in [Value::from(1), Value::from("s"), Value::Null, Value::Undefined] {
        assert!(matches!(observe(&value), Err(Error::InvalidArgument(_))));
    }
    let f = Value::from(Function::new("f", |_| Ok(Value::Undefined)));
    assert!(observe(&f).is_err());
}

#[test]
fn wrapping_twice_returns_the_same_wrapper() {
    let data = Value::from(json!({ "a": { "b": 1 } }));
    let first = observe(&data).unwrap();
    let second = observe(&data).unwrap();
    assert!(first.ptr_eq(&second));
    assert!(strict_equals(second.value(), &data));
}

#[test]
fn wrapping_twice_does_not_duplicate_events() {
    let data = Value::from(json!({ "a": { "b": 1 } }));
    let first = observe(&data).unwrap();
    let log = record(&first);
    let _ = observe(&data).unwrap();

    first.child("a").unwrap().unwrap().set("b", 2).unwrap();

    assert_eq!(properties(&log), vec!["a.b"]);
}

#[test]
fn wrapping_leaves_the_data_shape_alone() {
    let data = Value::from(json!({ "a": [1, { "b": 2 }] }));
    let _ = observe(&data).unwrap();
    assert_eq!(data.to_json(), json!({ "a": [1, { "b": 2 }] }));
    assert_eq!(data.as_object().unwrap().own_keys(), vec!["a"]);
}

// ============================================================================
// Property writes
// ============================================================================

#[test]
fn set_emits_old_and_new_value() {
    let obs = observe(&Value::from(json!({ "a": 1 }))).unwrap();
    let log = record(&obs);

    assert!(obs.set("a", 2).unwrap());

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].property, "a");
    assert_eq!(log[0].old_value().and_then(Value::as_f64), Some(1.0));
    assert_eq!(log[0].value().and_then(Value::as_f64), Some(2.0));
}

#[test]
fn set_new_key_reports_undefined_old_value() {
    let obs = observe(&Value::object()).unwrap();
    let log = record(&obs);

    obs.set("fresh", "x").unwrap();

    let log = log.lock().unwrap();
    assert!(matches!(log[0].old_value(), Some(Value::Undefined)));
}

#[test]
fn assigning_the_same_value_emits_nothing() {
    let obs = observe(&Value::from(json!({ "a": 1, "s": "x" }))).unwrap();
    let log = record(&obs);

    assert!(!obs.set("a", 1).unwrap());
    assert!(!obs.set("s", "x").unwrap());

    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn assigning_the_same_container_emits_nothing() {
    let obs = observe(&Value::from(json!({ "a": {} }))).unwrap();
    let log = record(&obs);

    let same = obs.get("a").unwrap();
    assert!(!obs.set("a", same).unwrap());

    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn rejected_write_emits_nothing() {
    let object = ObjectRef::new().with("a", 1);
    object.freeze();
    let obs = observe(&Value::Object(object)).unwrap();
    let log = record(&obs);

    assert!(!obs.set("a", 2).unwrap());

    assert!(log.lock().unwrap().is_empty());
    assert_eq!(obs.get("a").unwrap().as_f64(), Some(1.0));
}

#[test]
fn generic_listeners_see_change_objects() {
    let data = Value::object();
    let obs = observe(&data).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        let _ = obs.on(
            "change",
            listener(move |args| {
                seen.lock().unwrap().push(args[0].to_json());
                Ok(Reply::ready(Value::Undefined))
            }),
        );
    }

    obs.set("k", 5).unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![json!({ "property": "k", "value": 5 })]
    );
}

#[test]
fn scope_listeners_share_the_wrapper_channel() {
    let data = Value::object();
    let hits = Arc::new(AtomicUsize::new(0));
    let callback = {
        let hits = Arc::clone(&hits);
        Value::from(Function::new("count", move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Undefined)
        }))
    };
    let _ = events::on(&data, "change", &callback).unwrap();

    observe(&data).unwrap().set("x", 1).unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn failing_listener_does_not_fail_the_write() {
    let obs = observe(&Value::object()).unwrap();
    let _ = obs.on("change", listener(|_| Err(Error::callback("listener broke"))));

    assert!(obs.set("x", 1).unwrap());
    assert_eq!(obs.get("x").unwrap().as_f64(), Some(1.0));
}

// ============================================================================
// Nested propagation
// ============================================================================

#[test]
fn nested_change_reaches_the_root_with_a_path() {
    let obs = observe(&Value::from(json!({ "a": { "b": 1 } }))).unwrap();
    let log = record(&obs);

    obs.child("a").unwrap().unwrap().set("b", 2).unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].property, "a.b");
    assert_eq!(log[0].old_value().and_then(Value::as_f64), Some(1.0));
    assert_eq!(log[0].value().and_then(Value::as_f64), Some(2.0));
}

#[test]
fn set_path_writes_through_nested_containers() {
    let obs = observe(&Value::from(json!({ "a": { "list": [{ "v": 1 }] } }))).unwrap();
    let log = record(&obs);

    assert!(obs.set_path("a.list.0.v", 2).unwrap());

    assert_eq!(properties(&log), vec!["a.list.0.v"]);
    assert_eq!(obs.get_path("a.list.0.v").unwrap().as_f64(), Some(2.0));
}

#[test]
fn set_path_with_missing_parent_is_a_no_op() {
    let obs = observe(&Value::from(json!({ "a": 1 }))).unwrap();
    let log = record(&obs);

    assert!(!obs.set_path("missing.b", 2).unwrap());
    assert!(!obs.set_path("a.b", 2).unwrap());

    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn assigned_containers_are_observed() {
    let obs = observe(&Value::object()).unwrap();
    let log = record(&obs);

    obs.set("c", json!({ "d": 1 })).unwrap();
    obs.child("c").unwrap().unwrap().set("d", 2).unwrap();

    assert_eq!(properties(&log), vec!["c", "c.d"]);
}

#[test]
fn every_level_sees_its_own_path() {
    let obs = observe(&Value::from(json!({ "a": { "b": { "c": 1 } } }))).unwrap();
    let a = obs.child("a").unwrap().unwrap();
    let b = a.child("b").unwrap().unwrap();
    let (root_log, a_log, b_log) = (record(&obs), record(&a), record(&b));

    b.set("c", 2).unwrap();

    assert_eq!(properties(&b_log), vec!["c"]);
    assert_eq!(properties(&a_log), vec!["b.c"]);
    assert_eq!(properties(&root_log), vec!["a.b.c"]);
}

#[test]
fn shared_child_notifies_every_parent() {
    let shared = Value::object();
    let left = observe(&Value::Object(ObjectRef::new().with("s", shared.clone()))).unwrap();
    let right = observe(&Value::Object(ObjectRef::new().with("t", shared.clone()))).unwrap();
    let (left_log, right_log) = (record(&left), record(&right));

    observe(&shared).unwrap().set("x", 1).unwrap();

    assert_eq!(properties(&left_log), vec!["s.x"]);
    assert_eq!(properties(&right_log), vec!["t.x"]);
}

#[test]
fn replaced_child_stops_reporting() {
    let obs = observe(&Value::from(json!({ "a": { "b": 1 } }))).unwrap();
    let old_child = obs.child("a").unwrap().unwrap();
    obs.set("a", Value::Null).unwrap();
    let log = record(&obs);

    old_child.set("b", 2).unwrap();

    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn moved_child_reports_its_current_key() {
    let obs = observe(&Value::from(json!({ "a": { "k": 0 } }))).unwrap();
    let child = obs.child("a").unwrap().unwrap();
    obs.set("b", child.value().clone()).unwrap();
    obs.set("a", Value::Null).unwrap();
    let log = record(&obs);

    child.set("k", 1).unwrap();

    assert_eq!(properties(&log), vec!["b.k"]);
}

// ============================================================================
// Cycles
// ============================================================================

#[test]
fn self_reference_emits_once() {
    let obs = observe(&Value::object()).unwrap();
    let log = record(&obs);

    obs.set("me", obs.value().clone()).unwrap();
    obs.set("x", 1).unwrap();

    assert_eq!(properties(&log), vec!["me", "x"]);
}

#[test]
fn mutual_references_terminate() {
    let a = observe(&Value::object()).unwrap();
    let b = observe(&Value::object()).unwrap();
    a.set("b", b.value().clone()).unwrap();
    b.set("a", a.value().clone()).unwrap();
    let (a_log, b_log) = (record(&a), record(&b));

    a.set("x", 1).unwrap();

    assert_eq!(properties(&a_log), vec!["x"]);
    assert_eq!(properties(&b_log), vec!["a.x"]);
}

#[test]
fn pre_existing_cycle_can_be_observed() {
    let root = ObjectRef::new().with("n", 1);
    let inner = ObjectRef::new().with("up", root.clone());
    root.set("inner", inner).unwrap();

    let obs = observe(&Value::Object(root)).unwrap();
    let log = record(&obs);
    obs.child("inner").unwrap().unwrap().set("z", true).unwrap();

    assert_eq!(properties(&log), vec!["inner.z"]);
}

// ============================================================================
// Asynchronous listeners
// ============================================================================

#[tokio::test]
async fn settled_drives_pending_listener_chains() {
    let obs = observe(&Value::object()).unwrap();
    let done = Arc::new(AtomicUsize::new(0));
    {
        let done = Arc::clone(&done);
        let _ = obs.on(
            "change",
            listener(move |_| {
                let done = Arc::clone(&done);
                Ok(Reply::pending(async move {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Undefined)
                }))
            }),
        );
    }

    obs.set("a", 1).unwrap();
    obs.set("b", 2).unwrap();
    assert_eq!(done.load(Ordering::SeqCst), 0);

    obs.settled().await.unwrap();
    assert_eq!(done.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn settled_reports_async_listener_failure() {
    let obs = observe(&Value::object()).unwrap();
    let _ = obs.on(
        "change",
        listener(|_| Ok(Reply::pending(async { Err(Error::callback("async broke")) }))),
    );

    obs.set("a", 1).unwrap();

    assert!(matches!(obs.settled().await, Err(Error::Callback(_))));
    obs.settled().await.unwrap();
}

#[tokio::test]
async fn settled_keeps_driving_after_a_failed_dispatch() {
    let obs = observe(&Value::object()).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = Arc::clone(&calls);
        let _ = obs.on(
            "change",
            listener(move |_| {
                let first = calls.fetch_add(1, Ordering::SeqCst) == 0;
                Ok(Reply::pending(async move {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    if first {
                        Err(Error::callback("first reply fails"))
                    } else {
                        Ok(Value::Undefined)
                    }
                }))
            }),
        );
    }
    let seen = record(&obs);

    obs.set("a", 1).unwrap();
    obs.set("b", 2).unwrap();

    assert!(matches!(obs.settled().await, Err(Error::Callback(_))));
    assert_eq!(properties(&seen), vec!["b"]);
    obs.settled().await.unwrap();
}

#[tokio::test]
async fn failure_seen_while_parking_is_reported_by_settled() {
    let obs = observe(&Value::object()).unwrap();
    let _ = obs.on(
        "change",
        listener(|args| {
            let fails = ChangeSet::from_value(&args[0]).is_some_and(|c| c.property == "a");
            Ok(Reply::pending(async move {
                if fails {
                    Err(Error::callback("async broke"))
                } else {
                    Ok(Value::Undefined)
                }
            }))
        }),
    );

    obs.set("a", 1).unwrap();
    obs.set("b", 2).unwrap();

    assert!(matches!(obs.settled().await, Err(Error::Callback(_))));
    obs.settled().await.unwrap();
}

#[test]
fn finished_dispatches_are_released_by_later_writes() {
    let obs = observe(&Value::object()).unwrap();
    let _ = obs.on(
        "change",
        listener(|_| Ok(Reply::pending(async { Ok(Value::Undefined) }))),
    );
    let seen = record(&obs);

    for i in 0..100 {
        obs.set("k", i).unwrap();
    }

    // Every chain but the last one finished while the next write parked.
    assert_eq!(seen.lock().unwrap().len(), 99);
}

#[tokio::test]
async fn root_settled_drives_nested_listener_chains() {
    let obs = observe(&Value::from(json!({ "inner": { "deep": {} } }))).unwrap();
    let deep = obs.child("inner").unwrap().unwrap().child("deep").unwrap().unwrap();
    let done = Arc::new(AtomicUsize::new(0));
    {
        let done = Arc::clone(&done);
        let _ = deep.on(
            "change",
            listener(move |_| {
                let done = Arc::clone(&done);
                Ok(Reply::pending(async move {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Undefined)
                }))
            }),
        );
    }
    let nested = record(&deep);

    deep.set("x", 1).unwrap();
    assert_eq!(done.load(Ordering::SeqCst), 0);

    obs.settled().await.unwrap();
    assert_eq!(done.load(Ordering::SeqCst), 1);
    assert_eq!(properties(&nested), vec!["x"]);
}

// ============================================================================
// Accessors
// ============================================================================

#[test]
fn container_behind_a_getter_is_observed_at_wrap_time() {
    let inner = Value::from(json!({ "x": 0 }));
    let data = ObjectRef::new();
    {
        let inner = inner.clone();
        data.define(
            "view",
            Property::accessor(Some(Function::new("get", move |_| Ok(inner.clone()))), None),
        );
    }
    let obs = observe(&Value::Object(data)).unwrap();
    let log = record(&obs);

    observe(&inner).unwrap().set("x", 1).unwrap();

    assert_eq!(properties(&log), vec!["view.x"]);
}
