//! Client for the `kv_server` example.
//!
//! Run with:
//! ```bash
//! cargo run --example kv_client --features redis -- set k1 '"v1"'
//! cargo run --example kv_client --features redis -- get k1
//! cargo run --example kv_client --features redis -- online
//! ```

use clap::{Parser, Subcommand};
use redrpc::options::ClientOptions;
use redrpc::redis::{RedisBroker, RedisConfig};
use redrpc::{Client, RpcError};
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Parser)]
struct Args {
    #[arg(long, default_value = "redis://127.0.0.1:6379/0")]
    url: String,
    #[arg(long, default_value = redrpc::naming::DEFAULT_PREFIX)]
    prefix: String,
    /// Response timeout in seconds
    #[arg(long, default_value_t = 1.0)]
    timeout: f64,
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    Get { key: String },
    /// Value is parsed as JSON
    Set { key: String, value: String },
    Keys,
    Sleep { seconds: f64 },
    /// List kv servers currently heartbeating
    Online,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    redrpc::dev_tracing::init_tracing_verbose(args.verbose);

    let broker = RedisBroker::connect(RedisConfig::new(args.url.as_str()))?;
    let client = Client::new(
        broker,
        ClientOptions::default()
            .with_prefix(args.prefix)
            .with_response_timeout(Duration::from_secs_f64(args.timeout)),
    )?;

    let result: Result<Value, RpcError> = match args.command {
        Cmd::Get { key } => client.call("get", json!({ "k": key })),
        Cmd::Set { key, value } => {
            let value: Value = serde_json::from_str(&value)?;
            client.call("set", json!({ "k": key, "v": value }))
        }
        Cmd::Keys => client.call("keys", ()),
        Cmd::Sleep { seconds } => client.call("sleep", json!({ "t": seconds })),
        Cmd::Online => {
            for id in client.list_online("kv")? {
                println!("{id}");
            }
            return Ok(());
        }
    };

    match result {
        Ok(value) => println!("{value}"),
        Err(RpcError::Remote(remote)) => {
            eprintln!("remote error: {}", remote.message);
            if let Some(trace) = remote.trace {
                eprintln!("{trace}");
            }
            std::process::exit(1);
        }
        Err(e) if e.is_timeout() => {
            eprintln!("{e} (the call may still run)");
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
