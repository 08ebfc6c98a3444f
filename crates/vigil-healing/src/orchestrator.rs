//! Self-healing orchestrator
//!
//! One call of [`SelfHealingOrchestrator::diagnose_and_fix`]:
//! attempt budget -> cache -> classify -> prioritized strategies ->
//! LLM fallback -> generic result. Every terminal outcome is cached and
//! counted. Calls for the same error signature are serialized.

use crate::attempts::AttemptTracker;
use crate::cache::{HealingCache, HealingStore};
use crate::classifier::ErrorClassifier;
use crate::metrics::{HealingMetrics, HealingMetricsCollector};
use crate::models::{DiagnosticResult, ErrorCategory, ErrorReport, HealingRecord};
use crate::registry::StrategyRegistry;
use crate::strategies::{ConfigHealer, ImportHealer, ProviderHealer, LLM_HEALER};
use crate::strategy::HealOutcome;
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;

/// Default per-signature attempt budget
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Coordinates classification, strategies, caching and metrics
pub struct SelfHealingOrchestrator {
    max_attempts: u32,
    classifier: ErrorClassifier,
    registry: StrategyRegistry,
    store: Arc<dyn HealingStore>,
    metrics: Arc<HealingMetricsCollector>,
    attempts: Arc<AttemptTracker>,
    key_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl std::fmt::Debug for SelfHealingOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfHealingOrchestrator")
            .field("max_attempts", &self.max_attempts)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl SelfHealingOrchestrator {
    /// Create orchestrator over an explicit registry and store
    #[must_use]
    pub fn new(registry: StrategyRegistry, store: Arc<dyn HealingStore>) -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            classifier: ErrorClassifier::new(),
            registry,
            store,
            metrics: Arc::new(HealingMetricsCollector::new()),
            attempts: Arc::new(AttemptTracker::new()),
            key_locks: DashMap::new(),
        }
    }

    /// Built-in strategies and the file cache under `project_root`
    pub async fn for_project(project_root: impl AsRef<Path>) -> Self {
        let root = project_root.as_ref();
        let registry = Self::default_registry(root);
        let store = Arc::new(HealingCache::open(root).await);
        Self::new(registry, store)
    }

    /// Registry with the built-in diagnostic strategies
    #[must_use]
    pub fn default_registry(project_root: &Path) -> StrategyRegistry {
        StrategyRegistry::new()
            .with(Arc::new(ImportHealer))
            .with(Arc::new(ProviderHealer))
            .with(Arc::new(ConfigHealer::new(project_root)))
    }

    /// Set attempt budget
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Replace classifier
    #[inline]
    #[must_use]
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Share an attempt tracker with other orchestrators
    #[inline]
    #[must_use]
    pub fn with_attempt_tracker(mut self, attempts: Arc<AttemptTracker>) -> Self {
        self.attempts = attempts;
        self
    }

    /// Share a metrics collector
    #[inline]
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<HealingMetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Strategy registry
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Mutable registry, for registering strategies after construction
    #[inline]
    pub fn registry_mut(&mut self) -> &mut StrategyRegistry {
        &mut self.registry
    }

    /// Backing store
    #[inline]
    #[must_use]
    pub fn store(&self) -> &Arc<dyn HealingStore> {
        &self.store
    }

    /// Attempt tracker
    #[inline]
    #[must_use]
    pub fn attempts(&self) -> &Arc<AttemptTracker> {
        &self.attempts
    }

    /// Metrics snapshot
    #[must_use]
    pub fn metrics(&self) -> HealingMetrics {
        self.metrics.snapshot()
    }

    /// Clear every attempt counter
    pub fn reset_attempts(&self) {
        self.attempts.reset();
    }

    /// Diagnose `error` and try to fix it
    pub async fn diagnose_and_fix(&self, error: &ErrorReport, context: &str) -> DiagnosticResult {
        let error_key = error.error_key();
        let lock = self.key_locks.entry(error_key.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            self.diagnose_locked(error, context, &error_key).await
        };
        drop(lock);
        self.key_locks.remove_if(&error_key, |_, held| Arc::strong_count(held) == 1);
        result
    }

    async fn diagnose_locked(&self, error: &ErrorReport, context: &str, error_key: &str) -> DiagnosticResult {
        let attempt = match self.attempts.try_acquire(error_key, self.max_attempts) {
            Ok(attempt) => attempt,
            Err(attempts) => {
                tracing::warn!(error_key = %error_key, attempts, "self_healing_max_attempts_reached");
                return DiagnosticResult::diagnosis(
                    ErrorCategory::Unknown,
                    format!("Max healing attempts ({}) reached for this error.", self.max_attempts),
                )
                .with_suggestion("Check provider availability and configuration, then rerun.");
            }
        };
        self.metrics.start_timer(error_key);

        let cached = self.store.get(error_key).await;
        match &cached {
            Some(record) => {
                self.metrics.record_cache_hit();
                if record.fixed {
                    tracing::info!(error_key = %error_key, action = %record.action_taken, "self_healing_cache_hit");
                    let mut result = DiagnosticResult::fixed(
                        record.error_category,
                        format!("Cache hit: {}", record.action_taken),
                    )
                    .with_strategy(record.strategy_used.clone());
                    result.duration = self.metrics.stop_timer(error_key);
                    self.metrics.record_attempt(record.error_category);
                    self.metrics.record_result(&result);
                    return result;
                }
                tracing::debug!(error_key = %error_key, strategy = %record.strategy_used, "self_healing_cache_skip");
            }
            None => self.metrics.record_cache_miss(),
        }
        let excluded = cached.as_ref().map(|r| r.strategy_used.as_str());

        let category = self.classifier.classify(error);
        self.metrics.record_attempt(category);
        tracing::info!(
            error_type = error.type_name(),
            category = %category,
            attempt,
            "self_healing_started"
        );

        let mut last_result: Option<DiagnosticResult> = None;
        for strategy in self.registry.for_category(category) {
            if Some(strategy.name()) == excluded {
                continue;
            }
            if !strategy.can_heal(error, category).await {
                continue;
            }
            match strategy.heal(error, context).await {
                Ok(HealOutcome::Fixed(result)) => {
                    let result = Self::stamp(result, category, strategy.name(), true);
                    return self.finish(error_key, category, result).await;
                }
                Ok(HealOutcome::Diagnosis(result)) => {
                    last_result = Some(Self::stamp(result, category, strategy.name(), false));
                }
                Err(e) => {
                    tracing::debug!(
                        strategy = strategy.name(),
                        error_key = %error_key,
                        category = %category,
                        error = %e,
                        "strategy_failed"
                    );
                }
            }
        }

        if category.is_diagnostic_only() {
            if let Some(result) = last_result.take() {
                return self.finish(error_key, category, result).await;
            }
        }

        if category != ErrorCategory::Unknown && excluded != Some(LLM_HEALER) {
            if let Some(llm) = self.registry.get(LLM_HEALER) {
                match llm.heal(error, context).await {
                    Ok(outcome) => {
                        let fixed = outcome.is_fixed();
                        let result = Self::stamp(outcome.into_result(), category, LLM_HEALER, fixed);
                        return self.finish(error_key, category, result).await;
                    }
                    Err(e) => {
                        tracing::debug!(error_key = %error_key, error = %e, "llm_fallback_failed");
                    }
                }
            }
        }

        let result = last_result.unwrap_or_else(|| {
            DiagnosticResult::diagnosis(
                category,
                format!("Unhandled {}: {}", error.type_name(), error.message()),
            )
            .with_suggestion("Check your setup, or report this issue with the log output.")
        });
        self.finish(error_key, category, result).await
    }

    /// Only fixes are attributed to the strategy; a diagnosis keeps its own
    /// label so an unlabeled one does not exclude the strategy next time.
    fn stamp(
        mut result: DiagnosticResult,
        category: ErrorCategory,
        strategy: &str,
        fixed: bool,
    ) -> DiagnosticResult {
        result.error_category = category;
        result.fixed = fixed;
        if fixed {
            result.should_retry = true;
            if result.strategy_used.is_none() {
                result.strategy_used = Some(strategy.to_string());
            }
        }
        result
    }

    async fn finish(
        &self,
        error_key: &str,
        category: ErrorCategory,
        mut result: DiagnosticResult,
    ) -> DiagnosticResult {
        result.duration = self.metrics.stop_timer(error_key);
        self.metrics.record_result(&result);

        let strategy = result.strategy_used.clone().unwrap_or_else(|| "none".to_string());
        let record = HealingRecord::new(
            error_key,
            category,
            strategy.clone(),
            result.fixed,
            result.action_summary(),
        )
        .with_duration(result.duration);
        self.store.put(record).await;
        self.store.flush().await;

        tracing::info!(
            error_key = %error_key,
            category = %category,
            strategy = %strategy,
            fixed = result.fixed,
            "self_healing_finished"
        );
        result
    }
}
