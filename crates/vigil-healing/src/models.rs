//! Healing domain types
//!
//! - [`ErrorCategory`]: closed classification of runtime errors
//! - [`ErrorReport`]: type-erased view of an error (type name + message)
//! - [`DiagnosticResult`]: outcome of one healing invocation
//! - [`HealingRecord`]: cache-persisted outcome keyed by error signature

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::io;
use std::time::Duration;

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Operation exceeded its deadline
    Timeout,
    /// Remote service refused or dropped the connection
    ExternalService,
    /// Filesystem or API permission denied
    PermissionError,
    /// LLM provider missing, rate limited or down
    ProviderUnavailable,
    /// Optional dependency missing
    ImportError,
    /// Module/crate/package could not be located
    ModuleNotFound,
    /// Broken or missing configuration
    ConfigError,
    /// Model missing or misconfigured at the provider
    ModelError,
    /// Anything else
    Unknown,
}

impl ErrorCategory {
    /// Every category, in declaration order
    pub const ALL: [Self; 9] = [
        Self::Timeout,
        Self::ExternalService,
        Self::PermissionError,
        Self::ProviderUnavailable,
        Self::ImportError,
        Self::ModuleNotFound,
        Self::ConfigError,
        Self::ModelError,
        Self::Unknown,
    ];

    /// Stable identifier
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ExternalService => "external_service",
            Self::PermissionError => "permission_error",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::ImportError => "import_error",
            Self::ModuleNotFound => "module_not_found",
            Self::ConfigError => "config_error",
            Self::ModelError => "model_error",
            Self::Unknown => "unknown",
        }
    }

    /// Categories whose dedicated diagnosis is final (no generic fallback)
    #[must_use]
    pub const fn is_diagnostic_only(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ExternalService | Self::PermissionError | Self::ProviderUnavailable
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rewrites applied in order to strip volatile parts of a message
static NORMALIZERS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"0x[0-9a-fA-F]+", "0x_"),
        (r"\b[0-9a-fA-F-]{12,}\b", "<id>"),
        (r"\d+", "N"),
        (r"\s+", " "),
    ]
    .into_iter()
    .filter_map(|(pattern, with)| Regex::new(pattern).ok().map(|re| (re, with)))
    .collect()
});

/// Type-erased description of a runtime error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    type_name: String,
    message: String,
    io_kind: Option<io::ErrorKind>,
}

impl ErrorReport {
    /// Build from explicit parts
    #[must_use]
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            io_kind: None,
        }
    }

    /// Attach the `io::ErrorKind` found in the error chain
    #[inline]
    #[must_use]
    pub fn with_io_kind(mut self, kind: io::ErrorKind) -> Self {
        self.io_kind = Some(kind);
        self
    }

    /// Capture a concrete error: short type name, display message and the
    /// first `io::ErrorKind` in its source chain
    #[must_use]
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::error::Error + 'static,
    {
        let type_name = short_type_name(std::any::type_name::<E>());
        let io_kind = find_io_kind(err);
        Self {
            type_name,
            message: err.to_string(),
            io_kind,
        }
    }

    /// Short type name (`TimeoutError`, `Error`, ...)
    #[inline]
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Display message
    #[inline]
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// I/O kind, if any
    #[inline]
    #[must_use]
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        self.io_kind
    }

    /// Message with volatile parts (numbers, addresses, ids) collapsed
    #[must_use]
    pub fn normalized_message(&self) -> String {
        NORMALIZERS
            .iter()
            .fold(self.message.trim().to_string(), |acc, (re, with)| {
                re.replace_all(&acc, *with).into_owned()
            })
    }

    /// Stable signature: recurring errors map to the same key
    #[must_use]
    pub fn error_key(&self) -> String {
        let signature = format!("{}:{}", self.type_name, self.normalized_message());
        let hash = blake3::hash(signature.as_bytes());
        hash.to_hex().as_str()[..16].to_string()
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

impl std::error::Error for ErrorReport {}

fn short_type_name(full: &str) -> String {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

fn find_io_kind(err: &(dyn std::error::Error + 'static)) -> Option<io::ErrorKind> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        current = e.source();
    }
    None
}

/// Outcome of a healing invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticResult {
    /// Whether the underlying problem was repaired
    pub fixed: bool,
    /// Human-readable diagnosis
    pub diagnosis: String,
    /// Next step for the user when not fixed
    pub suggested_action: Option<String>,
    /// Category assigned by the classifier
    pub error_category: ErrorCategory,
    /// Strategy that produced the result
    pub strategy_used: Option<String>,
    /// Caller should re-attempt the failed operation
    pub should_retry: bool,
    /// Remedies applied (e.g. `config_reset`)
    #[serde(default)]
    pub actions: Vec<String>,
    /// Wall time spent healing
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl DiagnosticResult {
    /// Unfixed result with a diagnosis
    #[must_use]
    pub fn diagnosis(category: ErrorCategory, diagnosis: impl Into<String>) -> Self {
        Self {
            fixed: false,
            diagnosis: diagnosis.into(),
            suggested_action: None,
            error_category: category,
            strategy_used: None,
            should_retry: false,
            actions: Vec::new(),
            duration: Duration::ZERO,
        }
    }

    /// Fixed result; the caller should retry
    #[must_use]
    pub fn fixed(category: ErrorCategory, diagnosis: impl Into<String>) -> Self {
        Self {
            fixed: true,
            should_retry: true,
            ..Self::diagnosis(category, diagnosis)
        }
    }

    /// Set suggested action
    #[inline]
    #[must_use]
    pub fn with_suggestion(mut self, action: impl Into<String>) -> Self {
        self.suggested_action = Some(action.into());
        self
    }

    /// Set producing strategy
    #[inline]
    #[must_use]
    pub fn with_strategy(mut self, name: impl Into<String>) -> Self {
        self.strategy_used = Some(name.into());
        self
    }

    /// Record an applied remedy
    #[inline]
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.actions.push(action.into());
        self
    }

    /// Short summary for cache storage
    #[must_use]
    pub fn action_summary(&self) -> String {
        if self.actions.is_empty() {
            "diagnosis_only".to_string()
        } else {
            self.actions.join("|")
        }
    }
}

/// Cached outcome for one error signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealingRecord {
    /// Normalized error signature
    pub error_key: String,
    /// Category at the time of healing
    pub error_category: ErrorCategory,
    /// Strategy that produced the outcome (`none` when no strategy ran)
    pub strategy_used: String,
    /// Whether the outcome was a fix
    #[serde(deserialize_with = "deserialize_flag")]
    pub fixed: bool,
    /// Action summary
    pub action_taken: String,
    /// Healing duration in milliseconds
    #[serde(default)]
    pub duration_ms: u64,
    /// When the record was written; missing means expired
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl HealingRecord {
    /// Build a record stamped now
    #[must_use]
    pub fn new(
        error_key: impl Into<String>,
        error_category: ErrorCategory,
        strategy_used: impl Into<String>,
        fixed: bool,
        action_taken: impl Into<String>,
    ) -> Self {
        Self {
            error_key: error_key.into(),
            error_category,
            strategy_used: strategy_used.into(),
            fixed,
            action_taken: action_taken.into(),
            duration_ms: 0,
            timestamp: Some(Utc::now()),
        }
    }

    /// Set duration
    #[inline]
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Override timestamp
    #[inline]
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: Option<DateTime<Utc>>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Expired when older than `ttl` or never stamped
    #[must_use]
    pub fn is_expired(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        let Some(stamp) = self.timestamp else {
            return true;
        };
        let Ok(ttl) = chrono::Duration::from_std(ttl) else {
            return false;
        };
        now.signed_duration_since(stamp) > ttl
    }
}

/// Accepts `true`, `"true"`, `"false"`, `1`, `0`
fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
        Text(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(n) => n != 0,
        Flag::Text(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
    })
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
