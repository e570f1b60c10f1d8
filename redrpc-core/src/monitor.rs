//! Server event monitoring.
//!
//! Provides an event stream for tracking what a server's workers and
//! heartbeat are doing: lifecycle, served calls, dropped requests.

use std::fmt;

/// Server lifecycle and dispatch events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A worker thread entered its dispatch loop.
    WorkerStarted { worker: usize },

    /// A worker thread left its dispatch loop.
    WorkerStopped { worker: usize },

    /// A call was dispatched and its result pushed.
    Served {
        function: String,
        request_id: String,
        failed: bool,
    },

    /// A request was popped but could not be decoded; no response was sent.
    Dropped { queue: String, reason: String },

    /// The liveness key was refreshed.
    HeartbeatSent { key: String },

    /// The serve limit was reached.
    LimitReached { served: u64 },

    /// Shutdown was requested (quit or signal).
    ShutdownRequested,
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkerStarted { worker } => write!(f, "Worker {worker} started"),
            Self::WorkerStopped { worker } => write!(f, "Worker {worker} stopped"),
            Self::Served {
                function,
                request_id,
                failed,
            } => {
                let status = if *failed { "failed" } else { "ok" };
                write!(f, "Served {function} ({request_id}): {status}")
            }
            Self::Dropped { queue, reason } => write!(f, "Dropped request from {queue}: {reason}"),
            Self::HeartbeatSent { key } => write!(f, "Heartbeat {key}"),
            Self::LimitReached { served } => write!(f, "Limit reached after {served} calls"),
            Self::ShutdownRequested => write!(f, "Shutdown requested"),
        }
    }
}

/// Handle for receiving server events.
pub type ServerMonitor = flume::Receiver<ServerEvent>;

/// Sender half used by the server internals.
pub type ServerEventSender = flume::Sender<ServerEvent>;

/// Creates a new monitoring channel pair.
#[must_use]
pub fn create_monitor() -> (ServerEventSender, ServerMonitor) {
    flume::unbounded()
}
