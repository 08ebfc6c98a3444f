//! Error types for the pipeline
//!
//! Most failures are recorded into the run's `errors` list instead of being
//! returned. Only fatal classification errors abort a run, and even then the
//! partial run is handed back inside [`PipelineError::Aborted`].

use crate::context::Phase;
use crate::orchestrator::PipelineRun;
use std::path::PathBuf;

/// Main pipeline error type
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// LLM call failed after retries and healing
    #[error("llm error: {0}")]
    Llm(String),

    /// A frame could not run
    #[error("frame {frame_id} failed: {reason}")]
    Frame {
        /// Frame id
        frame_id: String,
        /// Reason
        reason: String,
    },

    /// A phase executor failed
    #[error("{phase} failed: {reason}")]
    Executor {
        /// Phase
        phase: Phase,
        /// Reason
        reason: String,
    },

    /// A blocker frame failed under the fail-fast strategy
    #[error("blocker frame {frame_id} failed")]
    BlockerFailure {
        /// Frame id
        frame_id: String,
    },

    /// Classification could not produce any decision; aborts the run
    #[error("classification failed: {0}")]
    Classification(String),

    /// Verifier call failed
    #[error("verification failed: {0}")]
    Verification(String),

    /// Run was aborted; the partial run is attached
    #[error("pipeline aborted: {reason}")]
    Aborted {
        /// Error that caused the abort
        reason: String,
        /// Partial run after state-consistency repair
        run: Box<PipelineRun>,
    },
}

impl PipelineError {
    /// Errors that stop the remaining phases regardless of strategy
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Classification(_))
    }

    /// Errors that stop the remaining phases under fail-fast
    #[inline]
    #[must_use]
    pub const fn is_blocker(&self) -> bool {
        matches!(self, Self::BlockerFailure { .. })
    }

    /// Transient errors worth retrying
    #[inline]
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Llm(_) | Self::Io(_))
    }

    /// The partial run, when aborted
    #[must_use]
    pub fn into_run(self) -> Option<PipelineRun> {
        match self {
            Self::Aborted { run, .. } => Some(*run),
            _ => None,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read {path}: {source}")]
    Read {
        /// File
        path: PathBuf,
        /// Cause
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax or schema error
    #[error("invalid toml: {0}")]
    Toml(#[from] toml::de::Error),

    /// YAML syntax or schema error
    #[error("invalid yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Unknown file extension
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// Semantically invalid value
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Field
        field: &'static str,
        /// Reason
        reason: String,
    },
}

/// Result alias
pub type Result<T> = std::result::Result<T, PipelineError>;
