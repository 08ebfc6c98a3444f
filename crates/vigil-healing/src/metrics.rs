//! Healing metrics collector

use crate::models::{DiagnosticResult, ErrorCategory};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Point-in-time metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealingMetrics {
    /// Healing attempts (after the attempt limit check)
    pub total_attempts: u64,
    /// Attempts per category
    pub attempts_by_category: HashMap<ErrorCategory, u64>,
    /// Cache lookups that found a record
    pub cache_hits: u64,
    /// Cache lookups that found nothing
    pub cache_misses: u64,
    /// Outcomes marked fixed
    pub fixes: u64,
    /// Outcomes not fixed
    pub failures: u64,
    /// Winning (fixed) strategy counts
    pub fixes_by_strategy: HashMap<String, u64>,
    /// Sum of recorded durations
    pub total_duration_ms: u64,
}

impl HealingMetrics {
    /// Fraction of outcomes that were fixes
    #[must_use]
    pub fn fix_rate(&self) -> f64 {
        let total = self.fixes + self.failures;
        if total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.fixes as f64 / total as f64;
        rate
    }

    /// Mean duration per recorded outcome
    #[must_use]
    pub fn average_duration_ms(&self) -> u64 {
        let total = self.fixes + self.failures;
        if total == 0 {
            0
        } else {
            self.total_duration_ms / total
        }
    }

    /// Fraction of cache lookups that hit
    #[must_use]
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let rate = self.cache_hits as f64 / total as f64;
        rate
    }
}

#[derive(Debug, Default)]
struct Inner {
    metrics: HealingMetrics,
    timers: HashMap<String, Instant>,
}

/// Thread-safe metrics collector
#[derive(Debug, Default)]
pub struct HealingMetricsCollector {
    inner: Mutex<Inner>,
}

impl HealingMetricsCollector {
    /// Create collector
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the timer for `key`
    pub fn start_timer(&self, key: &str) {
        self.inner.lock().timers.insert(key.to_string(), Instant::now());
    }

    /// Stop the timer for `key`; zero when no timer was running
    pub fn stop_timer(&self, key: &str) -> Duration {
        self.inner
            .lock()
            .timers
            .remove(key)
            .map_or(Duration::ZERO, |started| started.elapsed())
    }

    /// Count one attempt for `category`
    pub fn record_attempt(&self, category: ErrorCategory) {
        let mut inner = self.inner.lock();
        inner.metrics.total_attempts += 1;
        *inner
            .metrics
            .attempts_by_category
            .entry(category)
            .or_insert(0) += 1;
    }

    /// Count a cache hit
    pub fn record_cache_hit(&self) {
        self.inner.lock().metrics.cache_hits += 1;
    }

    /// Count a cache miss
    pub fn record_cache_miss(&self) {
        self.inner.lock().metrics.cache_misses += 1;
    }

    /// Record a terminal outcome
    pub fn record_result(&self, result: &DiagnosticResult) {
        let mut inner = self.inner.lock();
        let m = &mut inner.metrics;
        if result.fixed {
            m.fixes += 1;
            if let Some(strategy) = &result.strategy_used {
                *m.fixes_by_strategy.entry(strategy.clone()).or_insert(0) += 1;
            }
        } else {
            m.failures += 1;
        }
        m.total_duration_ms = m
            .total_duration_ms
            .saturating_add(u64::try_from(result.duration.as_millis()).unwrap_or(u64::MAX));
    }

    /// Current snapshot
    #[must_use]
    pub fn snapshot(&self) -> HealingMetrics {
        self.inner.lock().metrics.clone()
    }

    /// Zero all counters and timers
    pub fn reset(&self) {
        *self.inner.lock() = Inner::default();
    }
}
