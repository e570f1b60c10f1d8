//! In-process broker.
//!
//! `MemoryBroker` implements the [`Broker`] contract inside one process: lists
//! and plain keys live in a mutex-protected map, blocked pops park on a
//! condition variable, and expiry is applied lazily whenever a key is touched.
//!
//! It backs the test suites and single-process deployments. It is not a
//! replacement for a shared broker: nothing is persisted and nothing crosses
//! process boundaries.
//!
//! # Example
//!
//! ```rust
//! use redrpc_core::broker::Broker;
//! use redrpc_core::memory::MemoryBroker;
//! use std::time::Duration;
//!
//! let broker = MemoryBroker::new();
//! broker.push_with_expiry("jobs", b"one", Duration::from_secs(10)).unwrap();
//!
//! let (key, payload) = broker
//!     .block_pop(&["other", "jobs"], Duration::from_millis(10))
//!     .unwrap()
//!     .unwrap();
//! assert_eq!(key, "jobs");
//! assert_eq!(&payload[..], b"one");
//! ```

use bytes::Bytes;
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::broker::{Broker, BrokerResult};
use crate::error::BrokerError;

#[derive(Debug)]
enum Slot {
    List(VecDeque<Bytes>),
    Plain(Bytes),
}

#[derive(Debug)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    closed: bool,
}

impl State {
    fn purge(&mut self, key: &str, now: Instant) {
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
    }

    /// Drop `key` if it has expired, then return whatever is left.
    fn live(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        self.purge(key, now);
        self.entries.get_mut(key)
    }

    fn check_open(&self) -> BrokerResult<()> {
        if self.closed {
            Err(BrokerError::Closed)
        } else {
            Ok(())
        }
    }
}

/// In-process implementation of the broker contract.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    state: Mutex<State>,
    ready: Condvar,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining time to live of `key`, if it exists and has an expiry.
    ///
    /// Keys whose expiry lies beyond what `Instant` can hold report `None`.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let entry = state.live(key, now)?;
        entry.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Value of the plain key `key`, if it exists.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        let mut state = self.state.lock();
        match state.live(key, now) {
            Some(Entry {
                slot: Slot::Plain(value),
                ..
            }) => Some(value.clone()),
            _ => None,
        }
    }

    /// Number of elements in the list at `key` (0 when absent).
    pub fn len(&self, key: &str) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        match state.live(key, now) {
            Some(Entry {
                slot: Slot::List(list),
                ..
            }) => list.len(),
            _ => 0,
        }
    }

    /// Check whether no live key is stored.
    pub fn is_empty(&self) -> bool {
        let now = Instant::now();
        let state = self.state.lock();
        state.entries.values().all(|e| e.is_expired(now))
    }

    /// Remove a key regardless of its type.
    pub fn delete(&self, key: &str) -> bool {
        self.state.lock().entries.remove(key).is_some()
    }

    /// Shut the broker down.
    ///
    /// Every subsequent operation fails with [`BrokerError::Closed`], and
    /// blocked pops wake up with the same error. Used to simulate losing the
    /// broker.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }
}

impl Broker for MemoryBroker {
    fn push_with_expiry(&self, key: &str, payload: &[u8], ttl: Duration) -> BrokerResult<()> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.check_open()?;

        state.purge(key, now);
        let entry = state.entries.entry(key.to_owned()).or_insert_with(|| Entry {
            slot: Slot::List(VecDeque::new()),
            expires_at: None,
        });
        match &mut entry.slot {
            Slot::List(list) => list.push_back(Bytes::copy_from_slice(payload)),
            Slot::Plain(_) => {
                return Err(BrokerError::backend(format!(
                    "WRONGTYPE key {key:?} holds a plain value"
                )))
            }
        }
        // an expiry beyond what `Instant` can hold never fires
        entry.expires_at = now.checked_add(ttl);
        drop(state);

        trace!(key, ttl_ms = ttl.as_millis() as u64, "[MEM] push");
        self.ready.notify_all();
        Ok(())
    }

    fn block_pop(&self, keys: &[&str], timeout: Duration) -> BrokerResult<Option<(String, Bytes)>> {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.state.lock();

        loop {
            state.check_open()?;
            let now = Instant::now();

            for &key in keys {
                let popped = match state.live(key, now) {
                    Some(Entry {
                        slot: Slot::List(list),
                        ..
                    }) => list.pop_front().map(|payload| (payload, list.is_empty())),
                    _ => None,
                };
                if let Some((payload, now_empty)) = popped {
                    if now_empty {
                        state.entries.remove(key);
                    }
                    trace!(key, "[MEM] pop");
                    return Ok(Some((key.to_owned(), payload)));
                }
            }

            match deadline {
                Some(deadline) if now >= deadline => return Ok(None),
                Some(deadline) => {
                    self.ready.wait_until(&mut state, deadline);
                }
                None => self.ready.wait(&mut state),
            }
        }
    }

    fn set_with_expiry(&self, key: &str, value: &[u8], ttl: Duration) -> BrokerResult<()> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.check_open()?;
        state.entries.insert(
            key.to_owned(),
            Entry {
                slot: Slot::Plain(Bytes::copy_from_slice(value)),
                expires_at: now.checked_add(ttl),
            },
        );
        Ok(())
    }

    fn key_exists(&self, key: &str) -> BrokerResult<bool> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.check_open()?;
        Ok(state.live(key, now).is_some())
    }

    fn scan_keys(&self, pattern: &str) -> BrokerResult<Vec<String>> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.check_open()?;
        state.entries.retain(|_, entry| !entry.is_expired(now));
        Ok(state
            .entries
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect())
    }
}

/// Redis-style glob matching: `*`, `?`, `[abc]`, `[a-z]`, `[^a]` and `\` escapes.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    // last `*` seen and the text position it is currently absorbing up to
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
            continue;
        }
        if pi < p.len() {
            if let Some(next) = match_one(&p, pi, t[ti]) {
                pi = next;
                ti += 1;
                continue;
            }
        }
        match star {
            Some((sp, st)) => {
                pi = sp + 1;
                ti = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Match a single non-`*` pattern token at `pi` against `c`.
///
/// Returns the index of the next token on success.
fn match_one(p: &[char], pi: usize, c: char) -> Option<usize> {
    match p[pi] {
        '?' => Some(pi + 1),
        '\\' if pi + 1 < p.len() => (p[pi + 1] == c).then_some(pi + 2),
        '[' => {
            let mut j = pi + 1;
            let negate = j < p.len() && p[j] == '^';
            if negate {
                j += 1;
            }
            let mut matched = false;
            while j < p.len() && p[j] != ']' {
                if p[j] == '\\' && j + 1 < p.len() {
                    matched |= p[j + 1] == c;
                    j += 2;
                } else if j + 2 < p.len() && p[j + 1] == '-' && p[j + 2] != ']' {
                    matched |= p[j] <= c && c <= p[j + 2];
                    j += 3;
                } else {
                    matched |= p[j] == c;
                    j += 1;
                }
            }
            if j >= p.len() {
                // unterminated class: treat `[` literally
                return (c == '[').then_some(pi + 1);
            }
            (matched != negate).then_some(j + 1)
        }
        literal => (literal == c).then_some(pi + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const TTL: Duration = Duration::from_secs(10);

    #[test]
    fn test_push_pop_fifo() {
        let broker = MemoryBroker::new();
        broker.push_with_expiry("q", b"1", TTL).unwrap();
        broker.push_with_expiry("q", b"2", TTL).unwrap();
        assert_eq!(broker.len("q"), 2);

        let (_, first) = broker.block_pop(&["q"], Duration::ZERO).unwrap().unwrap();
        let (_, second) = broker.block_pop(&["q"], Duration::ZERO).unwrap().unwrap();
        assert_eq!((&first[..], &second[..]), (&b"1"[..], &b"2"[..]));
        assert!(broker.block_pop(&["q"], Duration::ZERO).unwrap().is_none());
        assert!(!broker.key_exists("q").unwrap());
    }

    #[test]
    fn test_pop_honours_key_order() {
        let broker = MemoryBroker::new();
        broker.push_with_expiry("a", b"from-a", TTL).unwrap();
        broker.push_with_expiry("b", b"from-b", TTL).unwrap();

        let (key, _) = broker.block_pop(&["b", "a"], Duration::ZERO).unwrap().unwrap();
        assert_eq!(key, "b");
        let (key, _) = broker.block_pop(&["b", "a"], Duration::ZERO).unwrap().unwrap();
        assert_eq!(key, "a");
    }

    #[test]
    fn test_push_refreshes_expiry() {
        let broker = MemoryBroker::new();
        broker.push_with_expiry("q", b"1", Duration::from_millis(50)).unwrap();
        broker.push_with_expiry("q", b"2", TTL).unwrap();
        let ttl = broker.ttl("q").unwrap();
        assert!(ttl > Duration::from_secs(9) && ttl <= TTL);
    }

    #[test]
    fn test_expired_list_disappears() {
        let broker = MemoryBroker::new();
        broker.push_with_expiry("q", b"1", Duration::from_millis(20)).unwrap();
        thread::sleep(Duration::from_millis(40));
        assert_eq!(broker.len("q"), 0);
        assert!(broker.block_pop(&["q"], Duration::ZERO).unwrap().is_none());
    }

    #[test]
    fn test_blocked_pop_wakes_on_push() {
        let broker = Arc::new(MemoryBroker::new());
        let popper = {
            let broker = Arc::clone(&broker);
            thread::spawn(move || broker.block_pop(&["q"], Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(50));
        broker.push_with_expiry("q", b"late", TTL).unwrap();

        let (_, payload) = popper.join().unwrap().unwrap().unwrap();
        assert_eq!(&payload[..], b"late");
    }

    #[test]
    fn test_pop_times_out() {
        let broker = MemoryBroker::new();
        let started = Instant::now();
        assert!(broker
            .block_pop(&["q"], Duration::from_millis(50))
            .unwrap()
            .is_none());
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_plain_keys_and_scan() {
        let broker = MemoryBroker::new();
        broker.set_with_expiry("p:X:alive:1", b"t", TTL).unwrap();
        broker.set_with_expiry("p:X:alive:2", b"t", Duration::from_millis(10)).unwrap();
        broker.set_with_expiry("p:Y:alive:3", b"t", TTL).unwrap();
        thread::sleep(Duration::from_millis(30));

        assert!(broker.key_exists("p:X:alive:1").unwrap());
        assert!(!broker.key_exists("p:X:alive:2").unwrap());
        assert_eq!(broker.scan_keys("p:X:alive:*").unwrap(), vec!["p:X:alive:1"]);
    }

    #[test]
    fn test_huge_durations_do_not_overflow() {
        let broker = MemoryBroker::new();
        broker.push_with_expiry("q", b"1", Duration::MAX).unwrap();
        broker.set_with_expiry("k", b"v", Duration::MAX).unwrap();
        assert!(broker.key_exists("q").unwrap());
        assert_eq!(broker.get("k").as_deref(), Some(&b"v"[..]));
        assert_eq!(broker.ttl("k"), None);

        let (key, payload) = broker.block_pop(&["q"], Duration::MAX).unwrap().unwrap();
        assert_eq!((key.as_str(), &payload[..]), ("q", &b"1"[..]));
    }

    #[test]
    fn test_unbounded_pop_wakes_on_push() {
        let broker = Arc::new(MemoryBroker::new());
        let popper = {
            let broker = Arc::clone(&broker);
            thread::spawn(move || broker.block_pop(&["q"], Duration::MAX))
        };
        thread::sleep(Duration::from_millis(50));
        broker.push_with_expiry("q", b"late", TTL).unwrap();
        assert!(popper.join().unwrap().unwrap().is_some());
    }

    #[test]
    fn test_get_reads_plain_values_only() {
        let broker = MemoryBroker::new();
        broker.set_with_expiry("k", b"stamp", TTL).unwrap();
        broker.push_with_expiry("q", b"1", TTL).unwrap();
        assert_eq!(broker.get("k").as_deref(), Some(&b"stamp"[..]));
        assert_eq!(broker.get("q"), None);
        assert_eq!(broker.get("missing"), None);
    }

    #[test]
    fn test_push_onto_plain_key_fails() {
        let broker = MemoryBroker::new();
        broker.set_with_expiry("k", b"v", TTL).unwrap();
        assert!(broker.push_with_expiry("k", b"x", TTL).is_err());
    }

    #[test]
    fn test_close_fails_operations_and_wakes_waiters() {
        let broker = Arc::new(MemoryBroker::new());
        let popper = {
            let broker = Arc::clone(&broker);
            thread::spawn(move || broker.block_pop(&["q"], Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(50));
        broker.close();

        assert!(matches!(popper.join().unwrap(), Err(BrokerError::Closed)));
        assert!(matches!(
            broker.push_with_expiry("q", b"x", TTL),
            Err(BrokerError::Closed)
        ));
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("*", ""));
        assert!(glob_match("a*c", "abbbc"));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("a?c", "ac"));
        assert!(glob_match("h[ae]llo", "hallo"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("h[a-c]llo", "hbllo"));
        assert!(glob_match("p\\*:k", "p*:k"));
        assert!(!glob_match("p\\*:k", "px:k"));
        assert!(glob_match("p:X:alive:*", "p:X:alive:42"));
        assert!(!glob_match("p:X:alive:*", "p:XY:alive:42"));
        assert!(glob_match("[oops", "[oops"));
    }
}
