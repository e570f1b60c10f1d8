//! Key/value store exposed over Redis.
//!
//! Serves `get`, `set`, `keys` and `sleep`, and heartbeats as kind `kv`.
//!
//! Run with:
//! ```bash
//! cargo run --example kv_server --features redis -- --id node-1 --workers 4
//! ```

use clap::Parser;
use parking_lot::RwLock;
use redrpc::handler::{typed, FunctionTable, HandlerError};
use redrpc::monitor::ServerEvent;
use redrpc::options::ServerOptions;
use redrpc::redis::{RedisBroker, RedisConfig};
use redrpc::Server;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser)]
struct Args {
    /// Redis URL
    #[arg(long, default_value = "redis://127.0.0.1:6379/0")]
    url: String,
    /// Key namespace shared with clients
    #[arg(long, default_value = redrpc::naming::DEFAULT_PREFIX)]
    prefix: String,
    /// Server id advertised through the liveness key
    #[arg(long, default_value = "node-1")]
    id: String,
    #[arg(long, default_value_t = 1)]
    workers: usize,
    /// Stop after this many calls
    #[arg(long)]
    limit: Option<u64>,
    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Deserialize)]
struct Get {
    k: String,
}

#[derive(Deserialize)]
struct Set {
    k: String,
    v: serde_json::Value,
}

#[derive(Deserialize)]
struct Sleep {
    t: f64,
}

#[derive(Debug, thiserror::Error)]
#[error("key '{0}' not found")]
struct MissingKey(String);

fn functions(store: Arc<RwLock<BTreeMap<String, serde_json::Value>>>) -> FunctionTable {
    let get_store = Arc::clone(&store);
    let set_store = Arc::clone(&store);
    FunctionTable::new()
        .register(
            "get",
            typed(move |args: Get| {
                get_store
                    .read()
                    .get(&args.k)
                    .cloned()
                    .ok_or(MissingKey(args.k))
            }),
        )
        .register(
            "set",
            typed(move |args: Set| {
                set_store.write().insert(args.k, args.v);
                Ok::<_, HandlerError>(())
            }),
        )
        .register(
            "keys",
            typed(move |_: serde_json::Value| {
                Ok::<_, HandlerError>(store.read().keys().cloned().collect::<Vec<_>>())
            }),
        )
        .register(
            "sleep",
            typed(|args: Sleep| {
                thread::sleep(Duration::from_secs_f64(args.t.max(0.0)));
                Ok::<_, HandlerError>(args.t)
            }),
        )
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    redrpc::dev_tracing::init_tracing_verbose(args.verbose);

    let broker = RedisBroker::connect(RedisConfig::new(args.url.as_str()))?;
    let store = Arc::new(RwLock::new(BTreeMap::new()));
    let mut server = Server::new(
        broker,
        functions(store),
        ServerOptions::default()
            .with_prefix(args.prefix)
            .with_identity("kv", args.id)
            .with_workers(args.workers)
            .with_limit(args.limit),
    )?;

    let events = server.monitor();
    thread::spawn(move || {
        for event in events.iter() {
            if !matches!(event, ServerEvent::HeartbeatSent { .. }) {
                println!("{event}");
            }
        }
    });

    println!("serving {:?} (Ctrl-C to stop)", server.queues());
    server.serve()?;
    println!("served {} calls", server.served());
    Ok(())
}
