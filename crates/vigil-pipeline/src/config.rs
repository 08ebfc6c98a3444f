//! Pipeline configuration
//!
//! Loaded from TOML or YAML (chosen by extension) with every field
//! optional, or built programmatically with the `with_*` methods.

use crate::context::Phase;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use vigil_resilience::{CircuitBreakerOptions, ResiliencePipeline, RetryOptions};

/// How validation frames are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// One frame at a time, tier by tier
    #[default]
    Sequential,
    /// Frames of a tier run concurrently, bounded by `parallel_limit`
    Parallel,
    /// Like `Parallel`, but a blocker failure stops lower tiers and later phases
    FailFast,
}

impl ExecutionStrategy {
    /// Frames of a tier may overlap
    #[inline]
    #[must_use]
    pub const fn is_concurrent(self) -> bool {
        matches!(self, Self::Parallel | Self::FailFast)
    }
}

/// Per-phase enable flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct PhaseToggles {
    /// PRE_ANALYSIS
    pub pre_analysis: bool,
    /// TRIAGE
    pub triage: bool,
    /// ANALYSIS
    pub analysis: bool,
    /// CLASSIFICATION
    pub classification: bool,
    /// VALIDATION
    pub validation: bool,
    /// FORTIFICATION
    pub fortification: bool,
    /// CLEANING
    pub cleaning: bool,
}

impl Default for PhaseToggles {
    fn default() -> Self {
        Self {
            pre_analysis: true,
            triage: true,
            analysis: true,
            classification: true,
            validation: true,
            fortification: true,
            cleaning: true,
        }
    }
}

impl PhaseToggles {
    /// Whether `phase` runs
    #[must_use]
    pub const fn is_enabled(&self, phase: Phase) -> bool {
        match phase {
            Phase::PreAnalysis => self.pre_analysis,
            Phase::Triage => self.triage,
            Phase::Analysis => self.analysis,
            Phase::Classification => self.classification,
            Phase::Validation => self.validation,
            Phase::Fortification => self.fortification,
            Phase::Cleaning => self.cleaning,
        }
    }

    /// Enable or disable `phase`
    pub fn set(&mut self, phase: Phase, enabled: bool) {
        let slot = match phase {
            Phase::PreAnalysis => &mut self.pre_analysis,
            Phase::Triage => &mut self.triage,
            Phase::Analysis => &mut self.analysis,
            Phase::Classification => &mut self.classification,
            Phase::Validation => &mut self.validation,
            Phase::Fortification => &mut self.fortification,
            Phase::Cleaning => &mut self.cleaning,
        };
        *slot = enabled;
    }
}

/// Retry and breaker settings for LLM calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    /// Total attempts per call
    pub max_attempts: u32,
    /// Base backoff
    pub initial_delay_ms: u64,
    /// Backoff cap
    pub max_delay_ms: u64,
    /// Exponential backoff
    pub exponential_backoff: bool,
    /// ±20% jitter
    pub jitter: bool,
    /// Failure ratio that opens the breaker
    pub failure_threshold: f64,
    /// Breaker window
    pub sampling_secs: u64,
    /// Minimum calls before the ratio counts
    pub minimum_throughput: usize,
    /// Time the breaker stays open
    pub break_secs: u64,
    /// Per-attempt timeout
    pub attempt_timeout_secs: Option<u64>,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        let retry = RetryOptions::default();
        let breaker = CircuitBreakerOptions::default();
        Self {
            max_attempts: retry.max_attempts,
            initial_delay_ms: u64::try_from(retry.initial_delay.as_millis()).unwrap_or(u64::MAX),
            max_delay_ms: u64::try_from(retry.max_delay.as_millis()).unwrap_or(u64::MAX),
            exponential_backoff: retry.use_exponential_backoff,
            jitter: retry.use_jitter,
            failure_threshold: breaker.failure_threshold,
            sampling_secs: breaker.sampling_duration.as_secs(),
            minimum_throughput: breaker.minimum_throughput,
            break_secs: breaker.break_duration.as_secs(),
            attempt_timeout_secs: None,
        }
    }
}

impl ResilienceSettings {
    /// Retry options
    #[must_use]
    pub fn retry_options(&self) -> RetryOptions {
        RetryOptions::default()
            .with_max_attempts(self.max_attempts)
            .with_initial_delay(Duration::from_millis(self.initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_exponential_backoff(self.exponential_backoff)
            .with_jitter(self.jitter)
    }

    /// Breaker options
    #[must_use]
    pub fn breaker_options(&self) -> CircuitBreakerOptions {
        CircuitBreakerOptions {
            failure_threshold: self.failure_threshold,
            sampling_duration: Duration::from_secs(self.sampling_secs),
            minimum_throughput: self.minimum_throughput,
            break_duration: Duration::from_secs(self.break_secs),
        }
    }

    /// Build a pipeline with a breaker named after the provider
    #[must_use]
    pub fn build(&self, provider: &str) -> ResiliencePipeline {
        let pipeline =
            ResiliencePipeline::with_circuit_breaker(self.retry_options(), provider, self.breaker_options());
        match self.attempt_timeout_secs {
            Some(secs) => pipeline.with_attempt_timeout(Duration::from_secs(secs)),
            None => pipeline,
        }
    }
}

/// Self-healing settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingSettings {
    /// Consult the healer after LLM calls exhaust their retries
    pub enabled: bool,
    /// Attempt budget per error signature
    pub max_attempts: u32,
}

impl Default for HealingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: vigil_healing::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Frame scheduling
    pub strategy: ExecutionStrategy,
    /// Concurrent frames per tier
    pub parallel_limit: usize,
    /// Budget per frame execution
    pub frame_timeout_secs: u64,
    /// Budget for the whole run
    pub timeout_secs: u64,
    /// Phase flags
    pub phases: PhaseToggles,
    /// Use the LLM classifier (heuristics otherwise)
    pub use_llm: bool,
    /// Run false-positive verification
    pub enable_verification: bool,
    /// Suppress findings present in the baseline
    pub enable_baseline: bool,
    /// Baseline location, relative to the project root
    pub baseline_path: PathBuf,
    /// Skip re-classifying unchanged files
    pub incremental: bool,
    /// LLM retry/breaker settings
    pub resilience: ResilienceSettings,
    /// Self-healing settings
    pub healing: HealingSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            strategy: ExecutionStrategy::Sequential,
            parallel_limit: 3,
            frame_timeout_secs: 30,
            timeout_secs: 300,
            phases: PhaseToggles::default(),
            use_llm: true,
            enable_verification: true,
            enable_baseline: true,
            baseline_path: PathBuf::from(".vigil/baseline.json"),
            incremental: true,
            resilience: ResilienceSettings::default(),
            healing: HealingSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a `.toml`, `.yaml` or `.yml` file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&raw)?,
            Some("yaml" | "yml") => Self::from_yaml_str(&raw)?,
            other => {
                return Err(ConfigError::UnsupportedFormat(
                    other.unwrap_or("<none>").to_string(),
                ))
            }
        };
        tracing::debug!(path = %path.display(), strategy = ?config.strategy, "pipeline_config_loaded");
        Ok(config)
    }

    /// Parse TOML
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parallel_limit == 0 {
            return Err(ConfigError::Invalid {
                field: "parallel_limit",
                reason: "must be at least 1".into(),
            });
        }
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "timeout_secs",
                reason: "must be positive".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.resilience.failure_threshold) {
            return Err(ConfigError::Invalid {
                field: "resilience.failure_threshold",
                reason: format!("{} is outside 0.0..=1.0", self.resilience.failure_threshold),
            });
        }
        Ok(())
    }

    /// Set strategy
    #[inline]
    #[must_use]
    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set concurrency bound (at least one)
    #[inline]
    #[must_use]
    pub fn with_parallel_limit(mut self, limit: usize) -> Self {
        self.parallel_limit = limit.max(1);
        self
    }

    /// Set per-frame timeout
    #[inline]
    #[must_use]
    pub fn with_frame_timeout(mut self, timeout: Duration) -> Self {
        self.frame_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set run timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Enable or disable one phase
    #[must_use]
    pub fn with_phase(mut self, phase: Phase, enabled: bool) -> Self {
        self.phases.set(phase, enabled);
        self
    }

    /// Toggle LLM classification
    #[inline]
    #[must_use]
    pub fn with_llm(mut self, enabled: bool) -> Self {
        self.use_llm = enabled;
        self
    }

    /// Toggle verification
    #[inline]
    #[must_use]
    pub fn with_verification(mut self, enabled: bool) -> Self {
        self.enable_verification = enabled;
        self
    }

    /// Toggle baseline suppression
    #[inline]
    #[must_use]
    pub fn with_baseline(mut self, enabled: bool) -> Self {
        self.enable_baseline = enabled;
        self
    }

    /// Toggle incremental mode
    #[inline]
    #[must_use]
    pub fn with_incremental(mut self, enabled: bool) -> Self {
        self.incremental = enabled;
        self
    }

    /// Replace resilience settings
    #[inline]
    #[must_use]
    pub fn with_resilience(mut self, resilience: ResilienceSettings) -> Self {
        self.resilience = resilience;
        self
    }

    /// Per-frame timeout
    #[inline]
    #[must_use]
    pub fn frame_timeout(&self) -> Duration {
        Duration::from_secs(self.frame_timeout_secs)
    }

    /// Run timeout
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.strategy, ExecutionStrategy::Sequential);
        assert_eq!(config.parallel_limit, 3);
        assert_eq!(config.frame_timeout(), Duration::from_secs(30));
        assert!(Phase::ALL.iter().all(|p| config.phases.is_enabled(*p)));
        assert_eq!(config.baseline_path, PathBuf::from(".vigil/baseline.json"));
    }

    #[test]
    fn test_partial_toml() {
        let config = PipelineConfig::from_toml_str(
            r#"
            strategy = "fail_fast"
            parallel_limit = 8

            [phases]
            cleaning = false

            [resilience]
            max_attempts = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.strategy, ExecutionStrategy::FailFast);
        assert_eq!(config.parallel_limit, 8);
        assert!(!config.phases.is_enabled(Phase::Cleaning));
        assert!(config.phases.is_enabled(Phase::Fortification));
        assert_eq!(config.resilience.max_attempts, 5);
        assert_eq!(config.timeout_secs, 300);
    }

    #[test]
    fn test_yaml() {
        let config = PipelineConfig::from_yaml_str("strategy: parallel\nuse_llm: false\n").unwrap();
        assert_eq!(config.strategy, ExecutionStrategy::Parallel);
        assert!(!config.use_llm);
    }

    #[test]
    fn test_validation_rejects_zero_limit() {
        let err = PipelineConfig::from_toml_str("parallel_limit = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "parallel_limit", .. }));
    }

    #[test]
    fn test_load_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let toml_path = dir.path().join("vigil.toml");
        std::fs::write(&toml_path, "timeout_secs = 10").unwrap();
        assert_eq!(PipelineConfig::load(&toml_path).unwrap().timeout_secs, 10);

        let ini = dir.path().join("vigil.ini");
        std::fs::write(&ini, "").unwrap();
        assert!(matches!(
            PipelineConfig::load(&ini),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_resilience_build() {
        let settings = ResilienceSettings {
            attempt_timeout_secs: Some(5),
            ..ResilienceSettings::default()
        };
        let pipeline = settings.build("openai");
        assert_eq!(pipeline.breaker().map(|b| b.name()), Some("openai"));
        assert_eq!(pipeline.retry_policy().options().max_attempts, 3);
    }
}
