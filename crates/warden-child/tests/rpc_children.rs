//! Drives the demo child binaries through a host-side [`warden::Cmd`].

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use serde_json::{json, Value};
use warden::{Cmd, ServiceError, WardenError};

const ECHO_CHILD: &str = env!("CARGO_BIN_EXE_echo-child");
const TICK_CHILD: &str = env!("CARGO_BIN_EXE_tick-child");
const SUM_CHILD: &str = env!("CARGO_BIN_EXE_sum-child");
const PANIC_CHILD: &str = env!("CARGO_BIN_EXE_panic-child");

#[tokio::test]
async fn echo_child_mutates_and_returns_the_message() {
    let cmd = Cmd::new(ECHO_CHILD);
    let reply: Value = cmd.handle(&json!({"yo": "who's in the house?"})).await.unwrap();
    assert_eq!(reply, json!({"yo": "who's in the house?", "returning": true}));
}

#[tokio::test]
async fn echo_child_respawns_for_each_message() {
    // The echo child exits after one answer, so every handle crosses a
    // process boundary.
    let cmd = Cmd::new(ECHO_CHILD);
    for n in 0..3 {
        let reply: Value = cmd.handle(&json!({"n": n})).await.unwrap();
        assert_eq!(reply, json!({"n": n, "returning": true}));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn tick_child_counts_within_one_process_and_resets_across_reaps() {
    let cmd = Cmd::new(TICK_CHILD).idle_timeout(Duration::from_millis(400));

    let mut tags = Vec::new();
    let mut counters = Vec::new();
    for _ in 0..4 {
        let reply: Value = cmd.handle(&json!({"yo": "who's in the house?"})).await.unwrap();
        let map = reply.as_object().unwrap();
        assert_eq!(map.len(), 4);
        assert_eq!(map["yo"], json!("who's in the house?"));
        tags.push(map["t"].as_str().unwrap().to_string());
        counters.push(map["n"].as_str().unwrap().to_string());
    }
    assert!(tags.iter().all(|tag| tag == &tags[0]));
    assert_eq!(counters, ["0", "1", "2", "3"]);

    // Sleeping past the idle timeout costs us the process; the next handle
    // gets a fresh one with a fresh counter.
    tokio::time::sleep(Duration::from_millis(1000)).await;
    let reply: Value = cmd.handle(&json!({"yo": "who's in the house?"})).await.unwrap();
    let map = reply.as_object().unwrap();
    assert_ne!(map["t"].as_str().unwrap(), tags[0]);
    assert_eq!(map["n"], json!("0"));
}

fn register_store(cmd: &Cmd) -> Arc<Mutex<HashMap<String, Value>>> {
    let store: Arc<Mutex<HashMap<String, Value>>> = Arc::default();

    let get_store = Arc::clone(&store);
    cmd.register("get", move |args: &[Value]| {
        let key = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::new("get takes a string key"))?;
        Ok(get_store
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or(Value::Null))
    });

    let set_store = Arc::clone(&store);
    cmd.register("set", move |args: &[Value]| {
        let key = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| ServiceError::new("set takes a string key"))?;
        let value = args.get(1).cloned().unwrap_or(Value::Null);
        set_store.lock().unwrap().insert(key.to_string(), value);
        Ok(Value::Null)
    });

    store
}

#[tokio::test]
async fn sum_child_accumulates_through_host_callbacks() {
    let cmd = Cmd::new(SUM_CHILD);
    let store = register_store(&cmd);

    for (increment, expected) in [(0.1, 0.1), (0.4, 0.5), (1.2, 1.7), (30.0, 31.7)] {
        let result = cmd.call("sum", vec![json!(increment)]).await.unwrap();
        let total = result.as_f64().unwrap();
        assert!(
            (total - expected).abs() < 1e-9,
            "sum({increment}) returned {total}, expected {expected}"
        );
    }

    let stored = store.lock().unwrap()["sum"].as_f64().unwrap();
    assert!((stored - 31.7).abs() < 1e-9);
}

#[tokio::test]
async fn service_panics_are_contained_in_the_child() {
    let cmd = Cmd::new(PANIC_CHILD);

    let err = cmd.call("boom", vec![]).await.unwrap_err();
    assert!(matches!(err, WardenError::ServiceFailure(ref msg) if msg.contains("blew up")));
    let survivor = cmd.pid().await;
    assert!(survivor.is_some());

    // The same process keeps serving.
    let reply = cmd.call("ok", vec![]).await.unwrap();
    assert_eq!(reply, json!("still here"));
    assert_eq!(cmd.pid().await, survivor);
}

#[tokio::test]
async fn unknown_services_are_reported_by_name() {
    let cmd = Cmd::new(PANIC_CHILD);
    let err = cmd.call("missing", vec![]).await.unwrap_err();
    assert!(matches!(err, WardenError::NoSuchService(ref name) if name == "missing"));
}
