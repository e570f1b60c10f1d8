//! Poll-order rotation.
//!
//! A blocking pop over several lists always takes from the first ready one,
//! so a fixed order would let the first busy queue starve the rest. Each poll
//! attempt therefore offers the queues starting at a different position.

use smallvec::SmallVec;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Rotation state shared by all workers of one server.
#[derive(Debug, Default)]
pub struct Rotation {
    counter: AtomicUsize,
}

impl Rotation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the offset for the next poll attempt.
    ///
    /// Concurrent callers always receive distinct consecutive values.
    pub fn advance(&self) -> usize {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Current counter value (number of poll attempts so far).
    pub fn attempts(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }
}

/// `queues` rotated left by `offset` (modulo its length).
pub fn rotated<'a, S: AsRef<str>>(queues: &'a [S], offset: usize) -> SmallVec<[&'a str; 8]> {
    if queues.is_empty() {
        return SmallVec::new();
    }
    let start = offset % queues.len();
    queues[start..]
        .iter()
        .chain(&queues[..start])
        .map(AsRef::as_ref)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_rotated() {
        let queues = ["a", "b", "c"];
        assert_eq!(rotated(&queues, 0).as_slice(), ["a", "b", "c"]);
        assert_eq!(rotated(&queues, 1).as_slice(), ["b", "c", "a"]);
        assert_eq!(rotated(&queues, 5).as_slice(), ["c", "a", "b"]);
        assert!(rotated::<&str>(&[], 3).is_empty());
    }

    #[test]
    fn test_every_queue_leads_within_n_attempts() {
        let queues: Vec<String> = (0..7).map(|i| format!("q{i}")).collect();
        let rotation = Rotation::new();
        for _ in 0..3 {
            rotation.advance();
        }
        let leaders: HashSet<&str> = (0..queues.len())
            .map(|_| rotated(&queues, rotation.advance())[0])
            .collect();
        assert_eq!(leaders.len(), queues.len());
    }

    #[test]
    fn test_concurrent_advance_is_lossless() {
        let rotation = Arc::new(Rotation::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let rotation = Arc::clone(&rotation);
                thread::spawn(move || (0..1000).map(|_| rotation.advance()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen: Vec<usize> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..4000).collect::<Vec<_>>());
        assert_eq!(rotation.attempts(), 4000);
    }
}
