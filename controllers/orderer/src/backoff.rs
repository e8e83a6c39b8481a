//! # Fibonacci Backoff
//!
//! Requeue delays for passes that asked to run again or failed.
//! The sequence grows more slowly than exponential backoff, which suits
//! waiting on the platform (port assignment, API hiccups) without going quiet
//! for long.
//!
//! Sequence in seconds: 1, 1, 2, 3, 5, 8, 13, ... capped at the configured maximum.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use cluster_client::ObjectKey;

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two backoffs.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    /// Previous backoff value in seconds
    prev_seconds: u64,
    /// Current backoff value in seconds
    current_seconds: u64,
    /// Maximum backoff value in seconds
    max_seconds: u64,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with minimum and maximum values in seconds
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            prev_seconds: 0,
            current_seconds: min_seconds.min(max_seconds),
            max_seconds,
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_seconds;

        let next = self.prev_seconds.saturating_add(self.current_seconds);
        self.prev_seconds = self.current_seconds;
        self.current_seconds = next.min(self.max_seconds);

        Duration::from_secs(result)
    }
}

/// Backoff state per Orderer
///
/// A key's sequence advances each time it is requeued and is forgotten once a
/// pass for it finishes.
#[derive(Debug)]
pub struct RequeueBackoff {
    max_seconds: u64,
    states: Mutex<HashMap<ObjectKey, FibonacciBackoff>>,
}

impl RequeueBackoff {
    /// Per-key backoff capped at `max_seconds`
    pub fn new(max_seconds: u64) -> Self {
        Self {
            max_seconds,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Delay before the next pass for `key`
    pub fn next_delay(&self, key: &ObjectKey) -> Duration {
        let mut states = self.states.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        states
            .entry(key.clone())
            .or_insert_with(|| FibonacciBackoff::new(1, self.max_seconds))
            .next_backoff()
    }

    /// Forget `key` so its next requeue starts from the beginning
    pub fn forget(&self, key: &ObjectKey) {
        let mut states = self.states.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        states.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(values: &[u64]) -> Vec<Duration> {
        values.iter().copied().map(Duration::from_secs).collect()
    }

    #[test]
    fn test_fibonacci_backoff_sequence() {
        let mut backoff = FibonacciBackoff::new(1, 60);
        let delays: Vec<Duration> = (0..10).map(|_| backoff.next_backoff()).collect();
        assert_eq!(delays, secs(&[1, 1, 2, 3, 5, 8, 13, 21, 34, 55]));
    }

    #[test]
    fn test_fibonacci_backoff_max_cap() {
        let mut backoff = FibonacciBackoff::new(1, 10);
        let delays: Vec<Duration> = (0..9).map(|_| backoff.next_backoff()).collect();
        // Next would be 13s (8+5), but should be capped at 10s and stay there
        assert_eq!(delays, secs(&[1, 1, 2, 3, 5, 8, 10, 10, 10]));
    }

    #[test]
    fn test_requeue_backoff_is_per_key() {
        let backoff = RequeueBackoff::new(60);
        let a = ObjectKey::new("fabric", "orderer0");
        let b = ObjectKey::new("fabric", "orderer1");

        for _ in 0..4 {
            backoff.next_delay(&a);
        }
        assert_eq!(backoff.next_delay(&a), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(&b), Duration::from_secs(1));
    }

    #[test]
    fn test_requeue_backoff_forget_restarts() {
        let backoff = RequeueBackoff::new(60);
        let key = ObjectKey::new("fabric", "orderer0");
        for _ in 0..5 {
            backoff.next_delay(&key);
        }

        backoff.forget(&key);

        assert_eq!(backoff.next_delay(&key), Duration::from_secs(1));
    }
}
