#![allow(dead_code)]

use redrpc::broker::Broker;
use redrpc::handler::{typed, FunctionTable, HandlerError};
use redrpc::memory::MemoryBroker;
use redrpc::options::{ClientOptions, ServerOptions};
use redrpc::{Client, Server};
use serde::Deserialize;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const QUANTUM: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
#[error("key '{0}' not found")]
pub struct MissingKey(pub String);

#[derive(Debug, thiserror::Error)]
#[error("storage unavailable")]
pub struct StorageDown {
    #[source]
    pub source: io::Error,
}

#[derive(Deserialize)]
pub struct Get {
    pub k: String,
}

#[derive(Deserialize)]
pub struct Sleep {
    pub t: f64,
}

/// `get`, `echo`, `sleep`, `fail`, `panic` over a fixed table.
pub fn functions() -> FunctionTable {
    let table: HashMap<&'static str, &'static str> = [("k1", "v1"), ("k2", "v2")].into();

    FunctionTable::new()
        .register(
            "get",
            typed(move |args: Get| {
                table
                    .get(args.k.as_str())
                    .map(|v| (*v).to_owned())
                    .ok_or(MissingKey(args.k))
            }),
        )
        .register("echo", |args: redrpc::envelope::Arguments| {
            Ok::<_, HandlerError>(serde_json::Value::Object(args))
        })
        .register(
            "sleep",
            typed(|args: Sleep| {
                thread::sleep(Duration::from_secs_f64(args.t));
                Ok::<_, HandlerError>(args.t)
            }),
        )
        .register(
            "fail",
            typed(|_: serde_json::Value| {
                Err::<(), _>(StorageDown {
                    source: io::Error::new(io::ErrorKind::Other, "disk full"),
                })
            }),
        )
        .register(
            "panic",
            typed(|_: serde_json::Value| -> Result<(), HandlerError> { panic!("boom") }),
        )
}

pub fn server_options() -> ServerOptions {
    ServerOptions::default()
        .with_poll_quantum(QUANTUM)
        .with_handle_signals(false)
}

pub fn client_options() -> ClientOptions {
    ClientOptions::default()
        .with_poll_quantum(QUANTUM)
        .with_response_timeout(Duration::from_secs(2))
}

pub fn client(broker: &Arc<MemoryBroker>) -> Client<Arc<MemoryBroker>> {
    Client::new(Arc::clone(broker), client_options()).unwrap()
}

pub fn server(broker: &Arc<MemoryBroker>, options: ServerOptions) -> Server<Arc<MemoryBroker>> {
    Server::new(Arc::clone(broker), functions(), options).unwrap()
}

/// Stops the server when dropped, so a failing assertion cannot hang a scope.
pub struct QuitOnDrop<'a, B: Broker>(pub &'a Server<B>);

impl<B: Broker> Drop for QuitOnDrop<'_, B> {
    fn drop(&mut self) {
        self.0.quit();
    }
}

/// Run `f` while `server` serves on another thread; returns `f`'s output and
/// the result of `serve`.
pub fn while_serving<B: Broker, T>(server: &Server<B>, f: impl FnOnce() -> T) -> (T, redrpc::Result<()>) {
    thread::scope(|s| {
        let serving = s.spawn(|| server.serve());
        let out = {
            let _quit = QuitOnDrop(server);
            f()
        };
        (out, serving.join().unwrap())
    })
}
