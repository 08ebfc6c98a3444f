//! Built-in healing strategies
//!
//! None of these touch the environment: they turn an error into an
//! actionable diagnosis. Strategies that actually repair something are
//! registered by the embedding application.

use crate::classifier::ErrorClassifier;
use crate::error::{HealingError, Result};
use crate::models::{DiagnosticResult, ErrorCategory, ErrorReport};
use crate::strategy::{HealOutcome, HealingStrategy};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;

/// Name of the generic LLM fallback strategy
pub const LLM_HEALER: &str = "llm_healer";

/// Diagnoses network, permission and provider failures
#[derive(Debug, Default, Clone)]
pub struct ProviderHealer;

const PROVIDER_CATEGORIES: [ErrorCategory; 4] = [
    ErrorCategory::Timeout,
    ErrorCategory::ExternalService,
    ErrorCategory::PermissionError,
    ErrorCategory::ProviderUnavailable,
];

#[async_trait]
impl HealingStrategy for ProviderHealer {
    fn name(&self) -> &str {
        "provider_healer"
    }

    fn handles(&self) -> &[ErrorCategory] {
        &PROVIDER_CATEGORIES
    }

    fn priority(&self) -> i32 {
        150
    }

    async fn can_heal(&self, _error: &ErrorReport, category: ErrorCategory) -> bool {
        PROVIDER_CATEGORIES.contains(&category)
    }

    async fn heal(&self, error: &ErrorReport, _context: &str) -> Result<HealOutcome> {
        let category = ErrorClassifier::new().classify(error);
        let (diagnosis, action) = match category {
            ErrorCategory::Timeout => (
                "The provider did not answer in time.",
                "Increase the LLM timeout or switch to a faster model.",
            ),
            ErrorCategory::ExternalService => (
                "Could not reach the external service.",
                "Check network connectivity and the service endpoint.",
            ),
            ErrorCategory::PermissionError => (
                "Access was denied.",
                "Check file permissions and API credentials.",
            ),
            _ => (
                "The LLM provider is unavailable or rate limited.",
                "Wait and retry, or configure a fallback provider.",
            ),
        };

        Ok(HealOutcome::Diagnosis(
            DiagnosticResult::diagnosis(category, format!("{diagnosis} ({})", error.message()))
                .with_suggestion(action)
                .with_strategy(self.name()),
        ))
    }
}

/// Names the missing module behind import failures
#[derive(Debug, Default, Clone)]
pub struct ImportHealer;

const IMPORT_CATEGORIES: [ErrorCategory; 2] =
    [ErrorCategory::ImportError, ErrorCategory::ModuleNotFound];

#[async_trait]
impl HealingStrategy for ImportHealer {
    fn name(&self) -> &str {
        "import_healer"
    }

    fn handles(&self) -> &[ErrorCategory] {
        &IMPORT_CATEGORIES
    }

    fn priority(&self) -> i32 {
        200
    }

    async fn can_heal(&self, error: &ErrorReport, _category: ErrorCategory) -> bool {
        ErrorClassifier::extract_module_name(error).is_some()
    }

    async fn heal(&self, error: &ErrorReport, _context: &str) -> Result<HealOutcome> {
        let module = ErrorClassifier::extract_module_name(error)
            .ok_or_else(|| HealingError::InvalidInput("no module name in error".to_string()))?;

        Ok(HealOutcome::Diagnosis(
            DiagnosticResult::diagnosis(
                ErrorCategory::ModuleNotFound,
                format!("Optional dependency '{module}' is not installed."),
            )
            .with_suggestion(format!("Install '{module}' or disable the feature that needs it."))
            .with_strategy(self.name()),
        ))
    }
}

static CONFIG_FILE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"([\w./-]+\.(?:ya?ml|toml|json))").ok());
static CONFIG_KEY: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?:missing field|unknown field|invalid value for)\s+`?([\w.-]+)`?").ok());

/// Points at the config file/key a configuration error refers to
#[derive(Debug, Clone)]
pub struct ConfigHealer {
    project_root: PathBuf,
}

impl ConfigHealer {
    /// Resolve relative config paths against `project_root`
    #[must_use]
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
        }
    }

    fn capture(re: &Lazy<Option<Regex>>, text: &str) -> Option<String> {
        re.as_ref()?
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }
}

#[async_trait]
impl HealingStrategy for ConfigHealer {
    fn name(&self) -> &str {
        "config_healer"
    }

    fn handles(&self) -> &[ErrorCategory] {
        &[ErrorCategory::ConfigError]
    }

    async fn can_heal(&self, _error: &ErrorReport, category: ErrorCategory) -> bool {
        category == ErrorCategory::ConfigError
    }

    async fn heal(&self, error: &ErrorReport, _context: &str) -> Result<HealOutcome> {
        let file = Self::capture(&CONFIG_FILE, error.message());
        let key = Self::capture(&CONFIG_KEY, error.message());

        let mut diagnosis = String::from("Configuration could not be loaded");
        if let Some(file) = &file {
            let path = self.project_root.join(file);
            let state = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                "exists"
            } else {
                "is missing"
            };
            diagnosis.push_str(&format!(" from {} ({state})", path.display()));
        }
        if let Some(key) = &key {
            diagnosis.push_str(&format!("; offending key: {key}"));
        }
        diagnosis.push('.');

        Ok(HealOutcome::Diagnosis(
            DiagnosticResult::diagnosis(ErrorCategory::ConfigError, diagnosis)
                .with_suggestion("Fix the reported entry or regenerate the config with defaults.")
                .with_strategy(self.name()),
        ))
    }
}

/// Free-text diagnosis backend used by [`LlmHealer`]
#[async_trait]
pub trait DiagnosisModel: Send + Sync {
    /// Answer a diagnosis prompt
    async fn diagnose(&self, prompt: &str) -> Result<String>;
}

/// Generic fallback: asks a model to explain the error
pub struct LlmHealer {
    model: std::sync::Arc<dyn DiagnosisModel>,
}

impl std::fmt::Debug for LlmHealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmHealer").finish_non_exhaustive()
    }
}

impl LlmHealer {
    /// Wrap a diagnosis backend
    #[must_use]
    pub fn new(model: std::sync::Arc<dyn DiagnosisModel>) -> Self {
        Self { model }
    }

    fn prompt(error: &ErrorReport, context: &str) -> String {
        format!(
            "A code analysis pipeline failed.\n\
             Error type: {}\n\
             Message: {}\n\
             Context: {}\n\n\
             Explain the most likely cause in one or two sentences. \
             Put each concrete remediation step on its own line starting with 'FIX:'.",
            error.type_name(),
            error.message(),
            if context.is_empty() { "none" } else { context },
        )
    }

    /// Lines of the answer that start with `FIX:`
    #[must_use]
    pub fn parse_fix_steps(answer: &str) -> Vec<String> {
        answer
            .lines()
            .filter_map(|line| line.trim().strip_prefix("FIX:"))
            .map(|step| step.trim().to_string())
            .filter(|step| !step.is_empty())
            .collect()
    }
}

#[async_trait]
impl HealingStrategy for LlmHealer {
    fn name(&self) -> &str {
        LLM_HEALER
    }

    fn handles(&self) -> &[ErrorCategory] {
        // Only used as the orchestrator's fallback
        &[]
    }

    fn priority(&self) -> i32 {
        0
    }

    async fn can_heal(&self, _error: &ErrorReport, category: ErrorCategory) -> bool {
        category != ErrorCategory::Unknown
    }

    async fn heal(&self, error: &ErrorReport, context: &str) -> Result<HealOutcome> {
        let answer = self.model.diagnose(&Self::prompt(error, context)).await?;
        let steps = Self::parse_fix_steps(&answer);
        let explanation: String = answer
            .lines()
            .filter(|l| !l.trim().starts_with("FIX:"))
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string();

        let mut result = DiagnosticResult::diagnosis(
            ErrorCategory::Unknown,
            if explanation.is_empty() {
                "LLM returned no explanation.".to_string()
            } else {
                explanation
            },
        )
        .with_strategy(LLM_HEALER);
        if !steps.is_empty() {
            result = result.with_suggestion(steps.join("; "));
        }
        Ok(HealOutcome::Diagnosis(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Canned(&'static str);

    #[async_trait]
    impl DiagnosisModel for Canned {
        async fn diagnose(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_provider_healer_is_diagnostic() {
        let report = ErrorReport::new("ProviderError", "HTTP 503 service unavailable");
        let outcome = ProviderHealer.heal(&report, "").await.unwrap();
        assert!(!outcome.is_fixed());
        let result = outcome.into_result();
        assert_eq!(result.error_category, ErrorCategory::ProviderUnavailable);
        assert_eq!(result.strategy_used.as_deref(), Some("provider_healer"));
        assert!(result.suggested_action.is_some());
    }

    #[tokio::test]
    async fn test_import_healer_names_module() {
        let report = ErrorReport::new("ModuleNotFoundError", "No module named 'chromadb'");
        assert!(ImportHealer.can_heal(&report, ErrorCategory::ModuleNotFound).await);
        let result = ImportHealer.heal(&report, "").await.unwrap().into_result();
        assert!(result.diagnosis.contains("chromadb"));
    }

    #[tokio::test]
    async fn test_config_healer_reports_file_and_key() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vigil.toml"), "x = 1").unwrap();
        let healer = ConfigHealer::new(dir.path());
        let report = ErrorReport::new("ConfigError", "vigil.toml: missing field `timeout_secs`");
        let result = healer.heal(&report, "").await.unwrap().into_result();
        assert!(result.diagnosis.contains("vigil.toml (exists)"));
        assert!(result.diagnosis.contains("offending key: timeout_secs"));
    }

    #[tokio::test]
    async fn test_llm_healer_parses_steps() {
        let healer = LlmHealer::new(Arc::new(Canned(
            "The model name is wrong.\nFIX: set model = \"small\"\nFIX: restart",
        )));
        let report = ErrorReport::new("ModelError", "model not found");
        let result = healer.heal(&report, "classification").await.unwrap().into_result();
        assert_eq!(result.diagnosis, "The model name is wrong.");
        assert_eq!(
            result.suggested_action.as_deref(),
            Some("set model = \"small\"; restart")
        );
        assert!(!result.fixed);
    }
}
