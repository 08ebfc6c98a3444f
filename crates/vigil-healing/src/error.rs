//! Error types for self-healing

/// Failure raised by a strategy or the healing cache.
///
/// Strategy failures never escape [`crate::SelfHealingOrchestrator`]: they
/// are logged and the next strategy is tried.
#[derive(Debug, thiserror::Error)]
pub enum HealingError {
    /// I/O failure (cache file, config file)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed persisted data
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Strategy received input it cannot work with
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Strategy failed while running
    #[error("strategy '{strategy}' failed: {reason}")]
    StrategyFailed {
        /// Strategy name
        strategy: String,
        /// What went wrong
        reason: String,
    },

    /// Diagnosis backend (LLM) unavailable
    #[error("diagnosis backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Result alias for healing operations
pub type Result<T> = std::result::Result<T, HealingError>;
