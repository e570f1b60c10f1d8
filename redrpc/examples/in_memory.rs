//! Client and server in one process over the in-memory broker.
//!
//! Run with:
//! ```bash
//! cargo run --example in_memory
//! ```

use redrpc::handler::{typed, FunctionTable, HandlerError};
use redrpc::prelude::*;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Deserialize)]
struct Add {
    a: i64,
    b: i64,
}

fn run(client: &Client<Arc<MemoryBroker>>) -> Result<(), RpcError> {
    let sum: i64 = client.call("add", json!({"a": 2, "b": 40}))?;
    println!("2 + 40 = {sum}");
    println!("math servers online: {:?}", client.list_online("math")?);

    let err = client.call::<_, i64>("add", json!({"a": "two"})).unwrap_err();
    println!("bad call: {err}");
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    redrpc::dev_tracing::init_tracing();

    let broker = Arc::new(MemoryBroker::new());
    let server = Server::new(
        Arc::clone(&broker),
        FunctionTable::new().register("add", typed(|args: Add| Ok::<_, HandlerError>(args.a + args.b))),
        ServerOptions::default()
            .with_identity("math", "0")
            .with_poll_quantum(Duration::from_millis(100))
            .with_handle_signals(false),
    )?;
    let client = Client::new(Arc::clone(&broker), ClientOptions::default())?;

    thread::scope(|s| -> Result<(), RpcError> {
        let serving = s.spawn(|| server.serve());
        let outcome = run(&client);
        server.quit();
        serving.join().map_err(|_| RpcError::WorkerPanicked)??;
        outcome
    })?;
    Ok(())
}
