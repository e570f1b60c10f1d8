//! # redrpc
//!
//! Request/response RPC over a shared list-and-key broker such as Redis.
//!
//! Callers and servers never connect to each other. A call is a JSON envelope
//! pushed onto the function's call queue; a server worker pops it, runs the
//! handler and pushes the result onto a response queue unique to the call.
//! Servers advertise liveness through expiring keys.
//!
//! ## Architecture
//!
//! - **`redrpc-core`**: naming, envelope codec, broker trait, in-memory
//!   broker, options, errors
//! - **`redrpc-redis`**: Redis broker adapter (feature `redis`)
//! - **`redrpc`**: `Client`, `Server`, `Heartbeat` (this crate)
//!
//! ```toml
//! [dependencies]
//! redrpc = { version = "0.1", features = ["redis"] }
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # #[cfg(feature = "redis")]
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use redrpc::prelude::*;
//! use redrpc::redis::RedisBroker;
//! use std::sync::Arc;
//!
//! let broker = Arc::new(RedisBroker::from_url("redis://127.0.0.1:6379/0")?);
//! let client = Client::new(broker, ClientOptions::default())?;
//!
//! let value: String = client.call("get", serde_json::json!({"k": "k1"}))?;
//! println!("{value}");
//! # Ok(())
//! # }
//! ```
//!
//! ## Timeouts
//!
//! Every blocking wait is bounded by the poll quantum, so servers notice
//! shutdown and clients notice their deadline promptly. A timeout leaves the
//! fate of the call unknown: it may run later, or its result may expire
//! unread.

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod client;
pub mod dev_tracing;
pub mod handler;
pub mod heartbeat;
pub mod server;

pub use redrpc_core::{broker, envelope, error, memory, monitor, naming, options};
pub use redrpc_core::error::{RemoteException, Result, RpcError};

pub use client::Client;
pub use handler::{typed, FunctionTable, Handler, HandlerError};
pub use heartbeat::Heartbeat;
pub use server::Server;

/// Redis broker adapter.
#[cfg(feature = "redis")]
pub mod redis {
    pub use redrpc_redis::{config, RedisBroker, RedisConfig};
}

pub mod prelude {
    pub use crate::client::Client;
    pub use crate::handler::{typed, FunctionTable, HandlerError};
    pub use crate::server::Server;
    pub use redrpc_core::prelude::*;
}
