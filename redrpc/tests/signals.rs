//! Signal disposition around `serve`.
//!
//! Each test re-runs itself in a child process, since a passing case kills
//! the process.
#![cfg(unix)]

mod common;

use common::{client, server, server_options};
use redrpc::memory::MemoryBroker;
use serde_json::json;
use signal_hook::consts::SIGTERM;
use std::os::unix::process::ExitStatusExt;
use std::process::Command;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const CHILD_ENV: &str = "REDRPC_SIGNAL_CHILD";

fn in_child() -> bool {
    std::env::var_os(CHILD_ENV).is_some()
}

/// Run `test` alone in a child process; returns the signal that ended it.
fn signal_ending_child(test: &str) -> Option<i32> {
    let status = Command::new(std::env::current_exe().unwrap())
        .args([test, "--exact", "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, "1")
        .status()
        .unwrap();
    status.signal()
}

#[test]
fn test_sigterm_after_serve_returns_terminates() {
    if !in_child() {
        assert_eq!(
            signal_ending_child("test_sigterm_after_serve_returns_terminates"),
            Some(SIGTERM)
        );
        return;
    }

    let broker = Arc::new(MemoryBroker::new());
    let server = server(
        &broker,
        server_options().with_handle_signals(true).with_limit(Some(0)),
    );
    server.serve().unwrap();

    signal_hook::low_level::raise(SIGTERM).unwrap();
    // only reached when the signal was swallowed
    thread::sleep(Duration::from_secs(5));
}

#[test]
fn test_second_sigterm_kills_stuck_handler() {
    if !in_child() {
        assert_eq!(
            signal_ending_child("test_second_sigterm_kills_stuck_handler"),
            Some(SIGTERM)
        );
        return;
    }

    let broker = Arc::new(MemoryBroker::new());
    let server = server(&broker, server_options().with_handle_signals(true));
    client(&broker)
        .call_async("sleep", json!({"t": 10.0}))
        .unwrap();

    thread::scope(|s| {
        s.spawn(|| server.serve());
        // let the worker get stuck in the handler
        thread::sleep(Duration::from_millis(300));
        assert_eq!(server.served(), 0);

        signal_hook::low_level::raise(SIGTERM).unwrap();
        thread::sleep(Duration::from_millis(50));
        signal_hook::low_level::raise(SIGTERM).unwrap();
        thread::sleep(Duration::from_secs(5));
    });
}
