//! Redis implementation of the broker contract.

use bytes::Bytes;
use once_cell::sync::Lazy;
use redis::{Client, Commands, RedisError, Script};
use std::io;
use std::time::Duration;
use tracing::{debug, trace, warn};

use redrpc_core::broker::{Broker, BrokerResult};
use redrpc_core::error::BrokerError;
use redrpc_core::timeout::round_up;

use crate::config::RedisConfig;
use crate::pool::{Pool, PooledConnection};

/// `RPUSH` and `PEXPIRE` in one step: the list never exists without expiry.
static PUSH_WITH_EXPIRY: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r"
redis.call('rpush', KEYS[1], ARGV[1])
redis.call('pexpire', KEYS[1], ARGV[2])
",
    )
});

/// Broker backed by a Redis server.
///
/// # Example
///
/// ```rust,no_run
/// use redrpc_redis::{RedisBroker, RedisConfig};
/// use std::time::Duration;
///
/// let broker = RedisBroker::connect(
///     RedisConfig::new("redis://127.0.0.1:6379/0")
///         .with_timeout_granularity(Duration::from_millis(1)),
/// )?;
/// # Ok::<(), redrpc_core::error::BrokerError>(())
/// ```
pub struct RedisBroker {
    pool: Pool,
    config: RedisConfig,
}

impl std::fmt::Debug for RedisBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBroker")
            .field("url", &self.config.url)
            .field("idle", &self.pool.idle_count())
            .finish()
    }
}

impl RedisBroker {
    /// Open a broker and verify the server is reachable.
    pub fn connect(config: RedisConfig) -> BrokerResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(map_error)?;
        if config.socket_timeout.is_none() {
            warn!(
                url = %config.url,
                "[REDIS] no socket timeout configured; a stalled server will hang callers"
            );
        }
        let broker = Self {
            pool: Pool::new(client, config.pool_size, config.socket_timeout),
            config,
        };

        let mut conn = broker.checkout(broker.config.socket_timeout)?;
        let pong: String = redis::cmd("PING").query(&mut *conn).map_err(|e| fail(&mut conn, e))?;
        debug!(url = %broker.config.url, reply = %pong, "[REDIS] connected");
        drop(conn);
        Ok(broker)
    }

    /// Shorthand for [`connect`](Self::connect) with default settings.
    pub fn from_url(url: impl Into<String>) -> BrokerResult<Self> {
        Self::connect(RedisConfig::new(url))
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// Check out a connection with `read_timeout` applied.
    fn checkout(&self, read_timeout: Option<Duration>) -> BrokerResult<PooledConnection<'_>> {
        let mut conn = self.pool.get().map_err(map_error)?;
        let applied = conn
            .set_read_timeout(read_timeout)
            .and_then(|()| conn.set_write_timeout(self.config.socket_timeout));
        if let Err(e) = applied {
            return Err(fail(&mut conn, e));
        }
        Ok(conn)
    }
}

impl Broker for RedisBroker {
    fn push_with_expiry(&self, key: &str, payload: &[u8], ttl: Duration) -> BrokerResult<()> {
        let mut conn = self.checkout(self.config.socket_timeout)?;
        PUSH_WITH_EXPIRY
            .key(key)
            .arg(payload)
            .arg(millis(ttl))
            .invoke::<()>(&mut *conn)
            .map_err(|e| fail(&mut conn, e))?;
        trace!(key, "[REDIS] push");
        Ok(())
    }

    fn block_pop(&self, keys: &[&str], timeout: Duration) -> BrokerResult<Option<(String, Bytes)>> {
        let wait = round_up(timeout, self.config.timeout_granularity);
        let mut conn = self.checkout(Some(wait.saturating_add(self.config.read_margin)))?;

        let mut cmd = redis::cmd("BLPOP");
        cmd.arg(keys);
        // BLPOP 0 blocks forever
        if wait.subsec_nanos() == 0 && wait.as_secs() > 0 {
            cmd.arg(wait.as_secs());
        } else {
            cmd.arg(wait.as_secs_f64().max(0.001));
        }

        let popped: Option<(String, Vec<u8>)> =
            cmd.query(&mut *conn).map_err(|e| fail(&mut conn, e))?;
        Ok(popped.map(|(key, payload)| {
            trace!(key = %key, "[REDIS] pop");
            (key, Bytes::from(payload))
        }))
    }

    fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> BrokerResult<()> {
        let mut conn = self.checkout(self.config.socket_timeout)?;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(millis(ttl))
            .query::<()>(&mut *conn)
            .map_err(|e| fail(&mut conn, e))
    }

    fn key_exists(&self, key: &str) -> BrokerResult<bool> {
        let mut conn = self.checkout(self.config.socket_timeout)?;
        conn.exists(key).map_err(|e| fail(&mut conn, e))
    }

    fn scan_keys(&self, pattern: &str) -> BrokerResult<Vec<String>> {
        let mut conn = self.checkout(self.config.socket_timeout)?;
        let keys: BrokerResult<Vec<String>> = match conn.scan_match::<_, String>(pattern) {
            Ok(iter) => Ok(iter.collect()),
            Err(e) => Err(map_error(e)),
        };
        if keys.is_err() {
            conn.mark_broken();
        }
        keys
    }

    fn timeout_granularity(&self) -> Duration {
        self.config.timeout_granularity
    }
}

/// Redis rejects expiries that overflow a signed millisecond clock.
const MAX_EXPIRE_MS: u64 = 1 << 62;

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis())
        .unwrap_or(u64::MAX)
        .clamp(1, MAX_EXPIRE_MS)
}

/// Map the error and drop the connection if it may be unusable.
fn fail(conn: &mut PooledConnection<'_>, err: RedisError) -> BrokerError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_timeout() {
        conn.mark_broken();
    }
    map_error(err)
}

fn map_error(err: RedisError) -> BrokerError {
    if err.is_timeout() {
        BrokerError::Io(io::Error::new(io::ErrorKind::TimedOut, err))
    } else if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
        BrokerError::Io(io::Error::new(io::ErrorKind::Other, err))
    } else {
        BrokerError::backend(err)
    }
}
