//! Client and server configuration options
//!
//! Both sides must agree on the namespace prefix; everything else is local.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::{Result, RpcError};
use crate::naming::DEFAULT_PREFIX;

/// Clock used to stamp envelopes and liveness values.
pub type TimeSource = fn() -> DateTime<Utc>;

const DEFAULT_POLL_QUANTUM: Duration = Duration::from_secs(1);
const DEFAULT_EXPIRE: Duration = Duration::from_secs(120);

/// Client configuration.
///
/// # Examples
///
/// ```
/// use redrpc_core::options::ClientOptions;
/// use std::time::Duration;
///
/// let opts = ClientOptions::default()
///     .with_prefix("billing")
///     .with_response_timeout(Duration::from_secs(5));
/// assert!(opts.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Namespace prefix for every key (default `"redis_rpc"`).
    pub prefix: String,

    /// Upper bound of a single blocking wait for a response.
    ///
    /// Long responses are waited for in several bounded steps.
    /// - Default: 1 second
    pub poll_quantum: Duration,

    /// Expiry of a call queue, reset by every push.
    ///
    /// A call that no server picks up within this window is discarded by the
    /// broker together with the rest of the queue.
    /// - Default: 120 seconds
    pub request_expire: Duration,

    /// Default time `call` waits for a response.
    /// - Default: 1 second
    pub response_timeout: Duration,

    /// Clock for request timestamps.
    pub time_source: TimeSource,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_owned(),
            poll_quantum: DEFAULT_POLL_QUANTUM,
            request_expire: DEFAULT_EXPIRE,
            response_timeout: Duration::from_secs(1),
            time_source: Utc::now,
        }
    }
}

impl ClientOptions {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_poll_quantum(mut self, quantum: Duration) -> Self {
        self.poll_quantum = quantum;
        self
    }

    pub fn with_request_expire(mut self, expire: Duration) -> Self {
        self.request_expire = expire;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_time_source(mut self, time_source: TimeSource) -> Self {
        self.time_source = time_source;
        self
    }

    /// Check the options for values the protocol cannot work with.
    pub fn validate(&self) -> Result<()> {
        require_positive("poll_quantum", self.poll_quantum)?;
        require_expiry("request_expire", self.request_expire)
    }
}

/// Identity a server advertises through its liveness key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerIdentity {
    pub kind: String,
    pub id: String,
}

impl ServerIdentity {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }
}

/// Server configuration.
///
/// # Examples
///
/// ```
/// use redrpc_core::options::ServerOptions;
/// use std::time::Duration;
///
/// let opts = ServerOptions::default()
///     .with_identity("kv", "node-1")
///     .with_workers(4)
///     .with_heartbeat(Duration::from_millis(500), Duration::from_secs(1));
/// assert!(opts.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Namespace prefix for every key (default `"redis_rpc"`).
    pub prefix: String,

    /// Upper bound of a single blocking poll of the call queues.
    ///
    /// Also bounds how long a worker or the heartbeat takes to notice
    /// shutdown.
    /// - Default: 1 second
    pub poll_quantum: Duration,

    /// Expiry of a response queue after the result is pushed.
    /// - Default: 120 seconds
    pub result_expire: Duration,

    /// Interval between liveness key refreshes.
    /// - Default: 5 seconds
    pub heartbeat_period: Duration,

    /// Expiry of the liveness key; must exceed `heartbeat_period`.
    /// - Default: 15 seconds
    pub heartbeat_expire: Duration,

    /// Liveness identity. No heartbeat runs without one.
    pub identity: Option<ServerIdentity>,

    /// Number of worker threads polling the call queues.
    /// - Default: 1
    pub workers: usize,

    /// Total number of calls to serve before stopping.
    /// - `None`: serve until shutdown (default)
    pub limit: Option<u64>,

    /// Stop on SIGINT / SIGTERM while serving.
    /// - Default: true
    pub handle_signals: bool,

    /// Clock for result timestamps and liveness values.
    pub time_source: TimeSource,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_owned(),
            poll_quantum: DEFAULT_POLL_QUANTUM,
            result_expire: DEFAULT_EXPIRE,
            heartbeat_period: Duration::from_secs(5),
            heartbeat_expire: Duration::from_secs(15),
            identity: None,
            workers: 1,
            limit: None,
            handle_signals: true,
            time_source: Utc::now,
        }
    }
}

impl ServerOptions {
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_poll_quantum(mut self, quantum: Duration) -> Self {
        self.poll_quantum = quantum;
        self
    }

    pub fn with_result_expire(mut self, expire: Duration) -> Self {
        self.result_expire = expire;
        self
    }

    /// Set heartbeat refresh period and liveness key expiry together.
    pub fn with_heartbeat(mut self, period: Duration, expire: Duration) -> Self {
        self.heartbeat_period = period;
        self.heartbeat_expire = expire;
        self
    }

    pub fn with_identity(mut self, kind: impl Into<String>, id: impl Into<String>) -> Self {
        self.identity = Some(ServerIdentity::new(kind, id));
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_handle_signals(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    pub fn with_time_source(mut self, time_source: TimeSource) -> Self {
        self.time_source = time_source;
        self
    }

    /// Check the options for values the protocol cannot work with.
    pub fn validate(&self) -> Result<()> {
        require_positive("poll_quantum", self.poll_quantum)?;
        require_expiry("result_expire", self.result_expire)?;
        require_positive("heartbeat_period", self.heartbeat_period)?;
        if self.heartbeat_expire <= self.heartbeat_period {
            return Err(RpcError::invalid_options(format!(
                "heartbeat_expire ({:?}) must exceed heartbeat_period ({:?})",
                self.heartbeat_expire, self.heartbeat_period
            )));
        }
        if self.workers == 0 {
            return Err(RpcError::invalid_options("workers must be at least 1"));
        }
        Ok(())
    }
}

fn require_positive(name: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(RpcError::invalid_options(format!("{name} must be positive")));
    }
    Ok(())
}

// Brokers express expiry in milliseconds; anything shorter would delete the key.
fn require_expiry(name: &str, value: Duration) -> Result<()> {
    if value < Duration::from_millis(1) {
        return Err(RpcError::invalid_options(format!(
            "{name} must be at least 1ms"
        )));
    }
    Ok(())
}
