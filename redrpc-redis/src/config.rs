//! Redis connection configuration

use std::time::Duration;

/// Default socket timeout for non-blocking commands (5 seconds)
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of idle connections kept for reuse
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Default blocking timeout granularity (1 second)
///
/// Servers before Redis 6 only accept whole seconds for `BLPOP`.
pub const DEFAULT_TIMEOUT_GRANULARITY: Duration = Duration::from_secs(1);

/// Default slack added to the read timeout of a blocking pop (1 second)
pub const DEFAULT_READ_MARGIN: Duration = Duration::from_secs(1);

/// Connection settings for [`RedisBroker`](crate::RedisBroker).
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379/0`
    pub url: String,

    /// Read/write timeout for non-blocking commands, also used to connect.
    ///
    /// - `None`: no timeout; a stalled server hangs the caller (a warning
    ///   is logged on connect)
    /// - Default: 5 seconds
    pub socket_timeout: Option<Duration>,

    /// Maximum number of idle connections kept in the pool
    pub pool_size: usize,

    /// Unit in which `BLPOP` timeouts are expressed.
    ///
    /// Set to 1ms for Redis 6+ to get sub-second blocking waits.
    pub timeout_granularity: Duration,

    /// Added to the pop timeout to form the socket read timeout of a
    /// blocking pop.
    pub read_margin: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self::new("redis://127.0.0.1:6379/0")
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            socket_timeout: Some(DEFAULT_SOCKET_TIMEOUT),
            pool_size: DEFAULT_POOL_SIZE,
            timeout_granularity: DEFAULT_TIMEOUT_GRANULARITY,
            read_margin: DEFAULT_READ_MARGIN,
        }
    }

    pub fn with_socket_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.socket_timeout = timeout;
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn with_timeout_granularity(mut self, granularity: Duration) -> Self {
        self.timeout_granularity = granularity;
        self
    }

    pub fn with_read_margin(mut self, margin: Duration) -> Self {
        self.read_margin = margin;
        self
    }
}
