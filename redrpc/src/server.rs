//! Server dispatch loop.
//!
//! Each worker repeats the same cycle:
//!
//! ```text
//! Idle -> PollQueues -> Empty -> Idle
//!                    \-> Hit -> Dispatch -> SendResult -> Idle
//! ```
//!
//! A poll is one blocking pop over every call queue, bounded by the poll
//! quantum. The queue order is rotated by a counter shared between workers so
//! a busy function cannot starve the others. Workers are scoped threads; they
//! share the function table (read-only), the rotation counter, the serve
//! budget and the shutdown flag.

use hashbrown::HashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::SigId;
use std::any::Any;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, error, info, info_span, warn};

use redrpc_core::broker::Broker;
use redrpc_core::envelope::{self, Outcome, ResultEnvelope};
use redrpc_core::error::{RemoteException, Result, RpcError};
use redrpc_core::monitor::{create_monitor, ServerEvent, ServerEventSender, ServerMonitor};
use redrpc_core::naming;
use redrpc_core::options::ServerOptions;
use redrpc_core::rotation::{rotated, Rotation};
use redrpc_core::shutdown::Shutdown;
use redrpc_core::timeout::poll_window;

use crate::handler::{FunctionTable, HandlerError};
use crate::heartbeat::Heartbeat;

/// Exposes a [`FunctionTable`] through a broker.
///
/// # Example
///
/// ```rust
/// use redrpc::prelude::*;
/// use redrpc::handler::{typed, FunctionTable, HandlerError};
/// use serde::Deserialize;
/// use std::sync::Arc;
///
/// #[derive(Deserialize)]
/// struct Echo {
///     text: String,
/// }
///
/// let broker = Arc::new(MemoryBroker::new());
/// let functions = FunctionTable::new()
///     .register("echo", typed(|args: Echo| Ok::<_, HandlerError>(args.text)));
/// let server = Server::new(
///     Arc::clone(&broker),
///     functions,
///     ServerOptions::default().with_limit(Some(1)).with_handle_signals(false),
/// )?;
///
/// let client = Client::new(broker, ClientOptions::default())?;
/// let request_id = client.call_async("echo", serde_json::json!({"text": "hi"}))?;
/// server.serve()?;
///
/// let reply: String = client.wait("echo", &request_id, std::time::Duration::from_secs(1))?;
/// assert_eq!(reply, "hi");
/// # Ok::<(), redrpc::RpcError>(())
/// ```
pub struct Server<B: Broker> {
    broker: B,
    options: ServerOptions,
    functions: FunctionTable,
    /// Call queue names, sorted.
    queues: Vec<String>,
    /// Call queue name -> function name.
    by_queue: HashMap<String, String>,
    rotation: Rotation,
    budget: ServeBudget,
    served: AtomicU64,
    shutdown: Shutdown,
    monitor: Option<ServerEventSender>,
}

impl<B: Broker> Server<B> {
    /// Build a server over `functions`.
    ///
    /// Fails when the options are invalid or no function is registered.
    pub fn new(broker: B, functions: FunctionTable, options: ServerOptions) -> Result<Self> {
        options.validate()?;
        if functions.is_empty() {
            return Err(RpcError::invalid_options("no functions registered"));
        }

        let by_queue: HashMap<String, String> = functions
            .names()
            .map(|name| (naming::call_queue(&options.prefix, name), name.to_owned()))
            .collect();
        let mut queues: Vec<String> = by_queue.keys().cloned().collect();
        queues.sort_unstable();

        Ok(Self {
            broker,
            budget: ServeBudget::new(options.limit),
            options,
            functions,
            queues,
            by_queue,
            rotation: Rotation::new(),
            served: AtomicU64::new(0),
            shutdown: Shutdown::new(),
            monitor: None,
        })
    }

    /// Enable event monitoring.
    ///
    /// Returns a receiver of [`ServerEvent`]s. Events are dropped silently
    /// once the receiver is gone.
    pub fn monitor(&mut self) -> ServerMonitor {
        let (sender, receiver) = create_monitor();
        self.monitor = Some(sender);
        receiver
    }

    fn emit_event(&self, event: ServerEvent) {
        if let Some(monitor) = &self.monitor {
            let _ = monitor.send(event); // Ignore errors if receiver dropped
        }
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// Call queue names this server polls, sorted.
    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    /// Number of calls served so far (failures included, dropped requests not).
    pub fn served(&self) -> u64 {
        self.served.load(Ordering::SeqCst)
    }

    /// Handle that stops this server when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Ask every worker and the heartbeat to stop.
    ///
    /// Loops observe the request within one poll quantum. A server that has
    /// been stopped does not serve again.
    pub fn quit(&self) {
        if self.shutdown.trigger() {
            debug!("quit requested");
        }
    }

    /// Poll the call queues once and dispatch at most one call.
    ///
    /// Returns `Ok(true)` when a call was served. Respects the serve limit:
    /// once it is exhausted this returns `Ok(false)` without polling.
    pub fn serve_one(&self) -> Result<bool> {
        if !self.budget.reserve() {
            return Ok(false);
        }
        match self.poll_and_dispatch() {
            Ok(true) => Ok(true),
            other => {
                self.budget.release();
                other
            }
        }
    }

    /// Serve until shutdown, the serve limit, or a broker failure.
    ///
    /// Runs `workers` dispatch threads, plus the heartbeat when an identity is
    /// configured, and joins all of them before returning. When enabled,
    /// SIGINT and SIGTERM trigger shutdown while this runs; a second signal
    /// terminates the process, as does any signal after `serve` returns. The
    /// first broker failure stops every loop and is returned.
    pub fn serve(&self) -> Result<()> {
        let _signals = if self.options.handle_signals {
            Some(SignalGuard::register(&self.shutdown)?)
        } else {
            None
        };

        info!(
            queues = ?self.queues,
            workers = self.options.workers,
            limit = ?self.options.limit,
            "serving"
        );

        let first_error = thread::scope(|scope| {
            let heartbeat = self.options.identity.as_ref().map(|identity| {
                let heartbeat = Heartbeat::new(&self.broker, identity, &self.options)
                    .with_events(self.monitor.clone());
                let shutdown = &self.shutdown;
                scope.spawn(move || heartbeat.run(shutdown))
            });

            let workers: Vec<_> = (0..self.options.workers)
                .map(|index| scope.spawn(move || self.worker_loop(index)))
                .collect();

            let mut first_error: Option<RpcError> = None;
            for worker in workers {
                if let Err(e) = worker.join().unwrap_or(Err(RpcError::WorkerPanicked)) {
                    first_error.get_or_insert(e);
                }
            }

            // workers are done; this also stops the heartbeat
            let stopped_by_request = !self.shutdown.trigger();
            if stopped_by_request && first_error.is_none() && !self.budget.exhausted() {
                info!("shutdown requested");
                self.emit_event(ServerEvent::ShutdownRequested);
            }

            if let Some(heartbeat) = heartbeat {
                if let Err(e) = heartbeat.join().unwrap_or(Err(RpcError::WorkerPanicked)) {
                    first_error.get_or_insert(e);
                }
            }
            first_error
        });

        if self.budget.exhausted() {
            let served = self.served();
            info!(served, "limit reached");
            self.emit_event(ServerEvent::LimitReached { served });
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(served = self.served(), "stopped");
                Ok(())
            }
        }
    }

    fn worker_loop(&self, index: usize) -> Result<()> {
        let span = info_span!("worker", index);
        let _enter = span.enter();
        let _guard = TriggerOnPanic(&self.shutdown);

        debug!("worker started");
        self.emit_event(ServerEvent::WorkerStarted { worker: index });

        let result = loop {
            if self.shutdown.is_triggered() {
                break Ok(());
            }
            match self.serve_one() {
                Ok(true) => {}
                Ok(false) if self.budget.exhausted() => break Ok(()),
                Ok(false) => {}
                Err(e) => {
                    error!(error = %e, "worker failed; stopping server");
                    self.shutdown.trigger();
                    break Err(e);
                }
            }
        };

        debug!("worker stopped");
        self.emit_event(ServerEvent::WorkerStopped { worker: index });
        result
    }

    /// One bounded poll of every call queue, rotated.
    fn poll_and_dispatch(&self) -> Result<bool> {
        let offset = self.rotation.advance();
        let order = rotated(&self.queues, offset);
        let window = poll_window(
            self.options.poll_quantum,
            self.options.poll_quantum,
            self.broker.timeout_granularity(),
        );

        match self.broker.block_pop(&order, window)? {
            Some((queue, payload)) => self.dispatch(&queue, &payload),
            None => Ok(false),
        }
    }

    fn dispatch(&self, queue: &str, payload: &[u8]) -> Result<bool> {
        let Some(function) = self.by_queue.get(queue) else {
            warn!(queue, "popped from an unknown queue; ignoring");
            return Ok(false);
        };

        let call = match envelope::decode_call(payload) {
            Ok(call) => call,
            Err(e) => {
                warn!(queue, error = %e, "dropping malformed request");
                self.emit_event(ServerEvent::Dropped {
                    queue: queue.to_owned(),
                    reason: e.to_string(),
                });
                return Ok(false);
            }
        };

        let started = Instant::now();
        let outcome = self.invoke(function, call.arguments);
        let failed = matches!(outcome, Outcome::Failure(_));
        let result = ResultEnvelope {
            completed_at: (self.options.time_source)(),
            outcome,
        };

        let response_queue = naming::response_queue(&self.options.prefix, function, &call.request_id);
        let encoded = envelope::encode_result(&result)?;
        self.broker
            .push_with_expiry(&response_queue, &encoded, self.options.result_expire)?;

        self.served.fetch_add(1, Ordering::SeqCst);
        debug!(
            function = %function,
            request_id = %call.request_id,
            failed,
            elapsed = ?started.elapsed(),
            "served"
        );
        self.emit_event(ServerEvent::Served {
            function: function.clone(),
            request_id: call.request_id,
            failed,
        });
        Ok(true)
    }

    fn invoke(&self, function: &str, arguments: envelope::Arguments) -> Outcome {
        let Some(handler) = self.functions.get(function) else {
            return Outcome::Failure(RemoteException::new(
                format!("unknown function `{function}`"),
                None,
            ));
        };

        match panic::catch_unwind(AssertUnwindSafe(|| handler.call(arguments))) {
            Ok(Ok(value)) => Outcome::Success(value),
            Ok(Err(err)) => Outcome::Failure(err.into_remote(function)),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(function, panic = %message, "handler panicked");
                Outcome::Failure(
                    HandlerError::new(format!("handler panicked: {message}")).into_remote(function),
                )
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// Remaining number of calls a server may serve.
///
/// A worker reserves a slot before polling and gives it back when the poll
/// served nothing, so concurrent workers never exceed the limit.
#[derive(Debug)]
struct ServeBudget {
    remaining: Option<AtomicU64>,
}

impl ServeBudget {
    fn new(limit: Option<u64>) -> Self {
        Self {
            remaining: limit.map(AtomicU64::new),
        }
    }

    fn reserve(&self) -> bool {
        match &self.remaining {
            None => true,
            Some(remaining) => remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok(),
        }
    }

    fn release(&self) {
        if let Some(remaining) = &self.remaining {
            remaining.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Every slot is either used or held by an in-flight poll.
    fn exhausted(&self) -> bool {
        matches!(&self.remaining, Some(remaining) if remaining.load(Ordering::SeqCst) == 0)
    }
}

const SIGNALS: [c_int; 2] = [SIGINT, SIGTERM];

/// Process-wide fallback for SIGINT / SIGTERM.
///
/// signal-hook never reinstates the default disposition, so the first
/// `serve` installs a conditional default that terminates the process
/// whenever no server is handling the signals.
struct DefaultDisposition {
    idle: Arc<AtomicBool>,
    serving: Mutex<usize>,
}

impl DefaultDisposition {
    fn get() -> Result<&'static Self> {
        static DISPOSITION: OnceCell<DefaultDisposition> = OnceCell::new();
        DISPOSITION.get_or_try_init(|| {
            let idle = Arc::new(AtomicBool::new(true));
            for signal in SIGNALS {
                signal_hook::flag::register_conditional_default(signal, Arc::clone(&idle))
                    .map_err(RpcError::Signal)?;
            }
            Ok(Self {
                idle,
                serving: Mutex::new(0),
            })
        })
    }

    fn enter(&self) {
        let mut serving = self.serving.lock();
        *serving += 1;
        self.idle.store(false, Ordering::SeqCst);
    }

    fn leave(&self) {
        let mut serving = self.serving.lock();
        *serving = serving.saturating_sub(1);
        if *serving == 0 {
            self.idle.store(true, Ordering::SeqCst);
        }
    }
}

/// SIGINT / SIGTERM registrations for one `serve`, removed on drop.
///
/// The first signal sets the shutdown flag; a signal arriving once the flag
/// is set terminates the process.
struct SignalGuard {
    ids: Vec<SigId>,
    fallback: &'static DefaultDisposition,
}

impl SignalGuard {
    fn register(shutdown: &Shutdown) -> Result<Self> {
        let fallback = DefaultDisposition::get()?;
        let mut ids = Vec::with_capacity(SIGNALS.len() * 2);
        for signal in SIGNALS {
            // the conditional default must run before the flag is set
            let registered = signal_hook::flag::register_conditional_default(
                signal,
                Arc::clone(shutdown.flag()),
            )
            .and_then(|default_id| {
                ids.push(default_id);
                signal_hook::flag::register(signal, Arc::clone(shutdown.flag()))
            });
            match registered {
                Ok(id) => ids.push(id),
                Err(e) => {
                    for id in ids {
                        signal_hook::low_level::unregister(id);
                    }
                    return Err(RpcError::Signal(e));
                }
            }
        }
        fallback.enter();
        Ok(Self { ids, fallback })
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.fallback.leave();
        for id in self.ids.drain(..) {
            signal_hook::low_level::unregister(id);
        }
    }
}

/// Stops the server if a worker unwinds outside handler code.
struct TriggerOnPanic<'a>(&'a Shutdown);

impl Drop for TriggerOnPanic<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.trigger();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_unlimited() {
        let budget = ServeBudget::new(None);
        assert!(budget.reserve());
        assert!(!budget.exhausted());
    }

    #[test]
    fn test_budget_reserve_release() {
        let budget = ServeBudget::new(Some(2));
        assert!(budget.reserve());
        assert!(budget.reserve());
        assert!(!budget.reserve());
        assert!(budget.exhausted());

        budget.release();
        assert!(!budget.exhausted());
        assert!(budget.reserve());
    }

    #[test]
    fn test_budget_zero_limit_is_exhausted() {
        let budget = ServeBudget::new(Some(0));
        assert!(!budget.reserve());
        assert!(budget.exhausted());
    }

    #[test]
    fn test_panic_message() {
        let payload = panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 1");
        let payload = panic::catch_unwind(|| panic!("static")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static");
    }
}
