//! Strategy registry: category -> strategies ordered by priority

use crate::models::ErrorCategory;
use crate::strategy::HealingStrategy;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of healing strategies
#[derive(Default, Clone)]
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn HealingStrategy>>,
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.names())
            .finish()
    }
}

impl StrategyRegistry {
    /// Empty registry
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a strategy; one registered under the same name is replaced
    pub fn register(&mut self, strategy: Arc<dyn HealingStrategy>) {
        if let Some(slot) = self
            .strategies
            .iter_mut()
            .find(|s| s.name() == strategy.name())
        {
            tracing::debug!(strategy = strategy.name(), "healing_strategy_replaced");
            *slot = strategy;
        } else {
            self.strategies.push(strategy);
        }
    }

    /// Builder form of [`Self::register`]
    #[must_use]
    pub fn with(mut self, strategy: Arc<dyn HealingStrategy>) -> Self {
        self.register(strategy);
        self
    }

    /// Strategies for `category`, highest priority first (ties keep
    /// registration order)
    #[must_use]
    pub fn for_category(&self, category: ErrorCategory) -> Vec<Arc<dyn HealingStrategy>> {
        let mut matching: Vec<_> = self
            .strategies
            .iter()
            .filter(|s| s.handles().contains(&category))
            .cloned()
            .collect();
        matching.sort_by_key(|s| std::cmp::Reverse(s.priority()));
        matching
    }

    /// Look up by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn HealingStrategy>> {
        self.strategies.iter().find(|s| s.name() == name).cloned()
    }

    /// Check if a strategy is registered
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.strategies.iter().any(|s| s.name() == name)
    }

    /// Registered names in registration order
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Number of strategies per category
    #[must_use]
    pub fn coverage(&self) -> HashMap<ErrorCategory, usize> {
        ErrorCategory::ALL
            .iter()
            .map(|c| (*c, self.for_category(*c).len()))
            .collect()
    }

    /// Number of registered strategies
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Check if empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::models::{DiagnosticResult, ErrorReport};
    use crate::strategy::HealOutcome;
    use async_trait::async_trait;

    struct Named {
        name: &'static str,
        priority: i32,
        handles: Vec<ErrorCategory>,
    }

    #[async_trait]
    impl HealingStrategy for Named {
        fn name(&self) -> &str {
            self.name
        }
        fn handles(&self) -> &[ErrorCategory] {
            &self.handles
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        async fn can_heal(&self, _: &ErrorReport, _: ErrorCategory) -> bool {
            true
        }
        async fn heal(&self, _: &ErrorReport, _: &str) -> Result<HealOutcome> {
            Ok(HealOutcome::Diagnosis(DiagnosticResult::diagnosis(
                ErrorCategory::Unknown,
                self.name,
            )))
        }
    }

    fn named(name: &'static str, priority: i32, handles: &[ErrorCategory]) -> Arc<dyn HealingStrategy> {
        Arc::new(Named {
            name,
            priority,
            handles: handles.to_vec(),
        })
    }

    #[test]
    fn test_priority_order() {
        let registry = StrategyRegistry::new()
            .with(named("low", 10, &[ErrorCategory::ImportError]))
            .with(named("high", 200, &[ErrorCategory::ImportError]))
            .with(named("other", 500, &[ErrorCategory::Timeout]));

        let names: Vec<_> = registry
            .for_category(ErrorCategory::ImportError)
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["high", "low"]);
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = StrategyRegistry::new();
        registry.register(named("config_healer", 10, &[ErrorCategory::ConfigError]));
        registry.register(named("config_healer", 50, &[ErrorCategory::ConfigError]));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("config_healer").map(|s| s.priority()), Some(50));
    }

    #[test]
    fn test_coverage() {
        let registry = StrategyRegistry::new().with(named(
            "provider",
            100,
            &[ErrorCategory::Timeout, ErrorCategory::ExternalService],
        ));
        let coverage = registry.coverage();
        assert_eq!(coverage[&ErrorCategory::Timeout], 1);
        assert_eq!(coverage[&ErrorCategory::Unknown], 0);
    }
}
