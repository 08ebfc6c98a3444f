//! Maps an [`ErrorReport`] onto an [`ErrorCategory`]
//!
//! Order of evaluation: `io::ErrorKind`, then keyword rules against the
//! lowercase type name and message. The first matching rule wins.

use crate::models::{ErrorCategory, ErrorReport};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io;

/// Built-in keyword table; earlier rows take precedence
const DEFAULT_RULES: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::Timeout,
        &["timed out", "timeout", "deadline exceeded", "elapsed"],
    ),
    (
        ErrorCategory::PermissionError,
        &["permission denied", "access denied", "forbidden", "eacces", "not permitted"],
    ),
    (
        ErrorCategory::ProviderUnavailable,
        &[
            "provider unavailable",
            "no llm provider",
            "rate limit",
            "too many requests",
            "service unavailable",
            "quota exceeded",
            "api key",
            "503",
            "429",
        ],
    ),
    (
        ErrorCategory::ExternalService,
        &[
            "connection refused",
            "connection reset",
            "broken pipe",
            "network is unreachable",
            "host unreachable",
            "dns error",
            "bad gateway",
            "502",
        ],
    ),
    (
        ErrorCategory::ModuleNotFound,
        &["no module named", "module not found", "cannot find module", "unresolved import"],
    ),
    (
        ErrorCategory::ImportError,
        &["cannot import", "importerror", "import error", "missing dependency", "failed to load library"],
    ),
    (
        ErrorCategory::ModelError,
        &["model not found", "unknown model", "model does not exist", "context length"],
    ),
    (
        ErrorCategory::ConfigError,
        &["config", "yaml", "toml", "missing field", "invalid setting"],
    ),
];

static MODULE_NAME: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(?:no module named|cannot find module|unresolved import|cannot import name|missing dependency)[:\s]+['"`]?([A-Za-z_][\w.:-]*)"#,
    )
    .ok()
});

/// Keyword-table error classifier
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    extra_rules: Vec<(ErrorCategory, String)>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    /// Classifier with the built-in table
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            extra_rules: Vec::new(),
        }
    }

    /// Add a keyword rule evaluated before the built-in table
    #[must_use]
    pub fn with_rule(mut self, category: ErrorCategory, keyword: impl Into<String>) -> Self {
        self.extra_rules
            .push((category, keyword.into().to_ascii_lowercase()));
        self
    }

    /// Classify an error
    #[must_use]
    pub fn classify(&self, error: &ErrorReport) -> ErrorCategory {
        if let Some(category) = error.io_kind().and_then(Self::classify_io_kind) {
            return category;
        }

        let haystack = format!("{} {}", error.type_name(), error.message()).to_ascii_lowercase();

        if let Some((category, _)) = self
            .extra_rules
            .iter()
            .find(|(_, keyword)| haystack.contains(keyword.as_str()))
        {
            return *category;
        }

        DEFAULT_RULES
            .iter()
            .find(|(_, keywords)| keywords.iter().any(|k| haystack.contains(k)))
            .map_or(ErrorCategory::Unknown, |(category, _)| *category)
    }

    fn classify_io_kind(kind: io::ErrorKind) -> Option<ErrorCategory> {
        match kind {
            io::ErrorKind::TimedOut => Some(ErrorCategory::Timeout),
            io::ErrorKind::PermissionDenied => Some(ErrorCategory::PermissionError),
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe => Some(ErrorCategory::ExternalService),
            _ => None,
        }
    }

    /// Name of the missing module, if the message mentions one
    #[must_use]
    pub fn extract_module_name(error: &ErrorReport) -> Option<String> {
        let re = MODULE_NAME.as_ref()?;
        re.captures(error.message())
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim_end_matches(['.', ':']).to_string())
    }
}
