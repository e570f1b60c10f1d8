mod common;

use common::{client, server, server_options, while_serving};
use redrpc::memory::MemoryBroker;
use redrpc::RpcError;
use serde_json::{json, Value};
use std::sync::Arc;

#[test]
fn test_value_survives_round_trip() {
    let broker = Arc::new(MemoryBroker::new());
    let server = server(&broker, server_options());
    let client = client(&broker);

    let args = json!({
        "s": "text with \"quotes\" and ünïcode",
        "n": -12.5,
        "i": 9_007_199_254_740_993_u64,
        "list": [1, null, true, {"deep": []}],
        "none": null
    });
    let (echoed, served) = while_serving(&server, || client.call::<_, Value>("echo", &args));
    served.unwrap();
    assert_eq!(echoed.unwrap(), args);
}

#[test]
fn test_typed_lookup() {
    let broker = Arc::new(MemoryBroker::new());
    let server = server(&broker, server_options());
    let client = client(&broker);

    let (value, served) = while_serving(&server, || client.call::<_, String>("get", json!({"k": "k1"})));
    served.unwrap();
    assert_eq!(value.unwrap(), "v1");
}

#[test]
fn test_missing_key_raises_remote_exception_each_time() {
    let broker = Arc::new(MemoryBroker::new());
    let server = server(&broker, server_options());
    let client = client(&broker);

    let (errors, served) = while_serving(&server, || {
        (0..2)
            .map(|_| client.call::<_, Value>("get", json!({"k": "missing"})).unwrap_err())
            .collect::<Vec<_>>()
    });
    served.unwrap();

    for err in errors {
        match err {
            RpcError::Remote(remote) => {
                assert!(remote.message.contains("missing"), "{}", remote.message);
                assert_eq!(remote.trace, None);
            }
            other => panic!("expected remote exception, got {other:?}"),
        }
    }
}

#[test]
fn test_error_chain_becomes_trace() {
    let broker = Arc::new(MemoryBroker::new());
    let server = server(&broker, server_options());
    let client = client(&broker);

    let (err, served) = while_serving(&server, || client.call::<_, Value>("fail", ()).unwrap_err());
    served.unwrap();

    let RpcError::Remote(remote) = err else {
        panic!("expected remote exception");
    };
    assert_eq!(remote.message, "storage unavailable");
    assert_eq!(remote.trace.as_deref(), Some("caused by: disk full"));
}

#[test]
fn test_mismatched_arguments_fail_the_call() {
    let broker = Arc::new(MemoryBroker::new());
    let server = server(&broker, server_options());
    let client = client(&broker);

    let (err, served) =
        while_serving(&server, || client.call::<_, Value>("get", json!({"key": "k1"})).unwrap_err());
    served.unwrap();

    let RpcError::Remote(remote) = err else {
        panic!("expected remote exception");
    };
    assert!(remote.message.starts_with("invalid arguments for `get`:"), "{}", remote.message);
}

#[test]
fn test_handler_panic_is_reported_and_server_survives() {
    let broker = Arc::new(MemoryBroker::new());
    let server = server(&broker, server_options());
    let client = client(&broker);

    let ((panicked, after), served) = while_serving(&server, || {
        let panicked = client.call::<_, Value>("panic", ()).unwrap_err();
        let after = client.call::<_, String>("get", json!({"k": "k2"}));
        (panicked, after)
    });
    served.unwrap();

    let RpcError::Remote(remote) = panicked else {
        panic!("expected remote exception");
    };
    assert_eq!(remote.message, "handler panicked: boom");
    assert_eq!(after.unwrap(), "v2");
    assert_eq!(server.served(), 2);
}

#[test]
fn test_async_calls_complete_out_of_order() {
    let broker = Arc::new(MemoryBroker::new());
    let server = server(&broker, server_options().with_workers(2));
    let client = client(&broker);

    let (values, served) = while_serving(&server, || {
        let ids: Vec<String> = (0..5)
            .map(|i| client.call_async("echo", json!({ "i": i })).unwrap())
            .collect();
        ids.iter()
            .rev()
            .map(|id| client.wait::<Value>("echo", id, std::time::Duration::from_secs(2)).unwrap())
            .collect::<Vec<_>>()
    });
    served.unwrap();

    let expected: Vec<Value> = (0..5).rev().map(|i| json!({ "i": i })).collect();
    assert_eq!(values, expected);
}
