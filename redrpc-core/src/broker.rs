//! Broker capability surface.
//!
//! This is everything the protocol needs from the external store. Any list
//! and key store that can honour these operations is usable; see
//! [`MemoryBroker`](crate::memory::MemoryBroker) for an in-process one and the
//! `redrpc-redis` crate for Redis.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use crate::error::BrokerError;

/// Result type alias for broker operations
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

/// Minimal broker contract.
///
/// All blocking is bounded: `block_pop` must return `Ok(None)` once `timeout`
/// elapses. Implementations must be shareable across worker threads.
pub trait Broker: Send + Sync {
    /// Append `payload` to the list at `key` and reset its expiry to `ttl`.
    ///
    /// Both effects must be applied atomically: there is no moment where the
    /// list holds the new element without the refreshed expiry.
    fn push_with_expiry(&self, key: &str, payload: &[u8], ttl: Duration) -> BrokerResult<()>;

    /// Remove and return the head of the first non-empty list among `keys`.
    ///
    /// Lists are checked in the order given. Waits up to `timeout` for one
    /// to become ready; returns `Ok(None)` on timeout.
    fn block_pop(&self, keys: &[&str], timeout: Duration) -> BrokerResult<Option<(String, Bytes)>>;

    /// Set a plain key with an expiry.
    fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> BrokerResult<()>;

    /// Check whether a key currently exists.
    fn key_exists(&self, key: &str) -> BrokerResult<bool>;

    /// List keys matching a glob `pattern`.
    fn scan_keys(&self, pattern: &str) -> BrokerResult<Vec<String>>;

    /// Smallest unit in which the broker honours blocking timeouts.
    ///
    /// Callers round blocking waits up to a multiple of this value.
    fn timeout_granularity(&self) -> Duration {
        Duration::from_millis(1)
    }
}

impl<B: Broker + ?Sized> Broker for Arc<B> {
    fn push_with_expiry(&self, key: &str, payload: &[u8], ttl: Duration) -> BrokerResult<()> {
        (**self).push_with_expiry(key, payload, ttl)
    }

    fn block_pop(&self, keys: &[&str], timeout: Duration) -> BrokerResult<Option<(String, Bytes)>> {
        (**self).block_pop(keys, timeout)
    }

    fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> BrokerResult<()> {
        (**self).set_with_expiry(key, value, ttl)
    }

    fn key_exists(&self, key: &str) -> BrokerResult<bool> {
        (**self).key_exists(key)
    }

    fn scan_keys(&self, pattern: &str) -> BrokerResult<Vec<String>> {
        (**self).scan_keys(pattern)
    }

    fn timeout_granularity(&self) -> Duration {
        (**self).timeout_granularity()
    }
}
