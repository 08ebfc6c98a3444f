//! Run-wide healing attempt counter keyed by error signature

use parking_lot::Mutex;
use std::collections::HashMap;

/// Bounds how often the same error is healed within one process.
///
/// Share one instance (behind `Arc`) between every orchestrator that
/// should see the same budget.
#[derive(Debug, Default)]
pub struct AttemptTracker {
    counts: Mutex<HashMap<String, u32>>,
}

impl AttemptTracker {
    /// Create tracker
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check-and-increment in one step.
    ///
    /// Returns the attempt number now granted, or the exhausted count
    /// when `max` has already been reached.
    pub fn try_acquire(&self, error_key: &str, max: u32) -> Result<u32, u32> {
        let mut counts = self.counts.lock();
        let count = counts.entry(error_key.to_string()).or_insert(0);
        if *count >= max {
            return Err(*count);
        }
        *count += 1;
        Ok(*count)
    }

    /// Attempts recorded for `error_key`
    #[must_use]
    pub fn count(&self, error_key: &str) -> u32 {
        self.counts.lock().get(error_key).copied().unwrap_or(0)
    }

    /// Forget every counter
    pub fn reset(&self) {
        self.counts.lock().clear();
    }

    /// Forget one counter
    pub fn reset_key(&self, error_key: &str) {
        self.counts.lock().remove(error_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_budget_exhausts() {
        let tracker = AttemptTracker::new();
        assert_eq!(tracker.try_acquire("k", 2), Ok(1));
        assert_eq!(tracker.try_acquire("k", 2), Ok(2));
        assert_eq!(tracker.try_acquire("k", 2), Err(2));
        assert_eq!(tracker.try_acquire("other", 2), Ok(1));
    }

    #[test]
    fn test_reset() {
        let tracker = AttemptTracker::new();
        let _ = tracker.try_acquire("k", 1);
        tracker.reset();
        assert_eq!(tracker.count("k"), 0);
        assert_eq!(tracker.try_acquire("k", 1), Ok(1));
    }

    #[test]
    fn test_concurrent_acquire_never_overshoots() {
        let tracker = Arc::new(AttemptTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = tracker.clone();
                std::thread::spawn(move || t.try_acquire("shared", 3).is_ok())
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(granted, 3);
        assert_eq!(tracker.count("shared"), 3);
    }
}
