//! LLM client contract and the guarded wrapper phases use
//!
//! Every LLM call made by an executor goes through [`GuardedLlm`]:
//! retries and the provider breaker first, then one self-healing
//! consultation, then at most one extra attempt when the healer reports a
//! fix.

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use vigil_healing::{DiagnosisModel, ErrorReport, HealingError, SelfHealingOrchestrator};
use vigil_resilience::{ResilienceError, ResiliencePipeline};

/// Request to a provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    /// System prompt
    pub system_prompt: String,
    /// User message
    pub user_message: String,
    /// Output cap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl LlmRequest {
    /// Create request
    #[must_use]
    pub fn new(system_prompt: impl Into<String>, user_message: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_message: user_message.into(),
            max_tokens: None,
            temperature: None,
        }
    }

    /// Set output cap
    #[inline]
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set temperature
    #[inline]
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Provider response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Whether the call succeeded
    pub success: bool,
    /// Completion text
    pub content: String,
    /// Provider error, when unsuccessful
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl LlmResponse {
    /// Successful response
    #[must_use]
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            success: true,
            content: content.into(),
            error_message: None,
        }
    }

    /// Failed response
    #[must_use]
    pub fn failure(error_message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: String::new(),
            error_message: Some(error_message.into()),
        }
    }
}

/// Provider transport
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider name, used for the breaker and logs
    fn provider(&self) -> &str {
        "llm"
    }

    /// Send one request
    async fn send(&self, request: &LlmRequest) -> LlmResponse;
}

/// Unsuccessful provider response
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{provider}: {message}")]
pub struct LlmCallError {
    /// Provider
    pub provider: String,
    /// Provider message
    pub message: String,
}

/// LLM access with retries, breaker and self-healing
#[derive(Clone)]
pub struct GuardedLlm {
    client: Arc<dyn LlmClient>,
    resilience: ResiliencePipeline,
    healer: Option<Arc<SelfHealingOrchestrator>>,
}

impl fmt::Debug for GuardedLlm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuardedLlm")
            .field("provider", &self.client.provider())
            .field("resilience", &self.resilience)
            .field("healing", &self.healer.is_some())
            .finish()
    }
}

impl GuardedLlm {
    /// Wrap `client` with `resilience`
    #[must_use]
    pub fn new(client: Arc<dyn LlmClient>, resilience: ResiliencePipeline) -> Self {
        Self {
            client,
            resilience,
            healer: None,
        }
    }

    /// Consult `healer` when retries are exhausted
    #[must_use]
    pub fn with_healer(mut self, healer: Arc<SelfHealingOrchestrator>) -> Self {
        self.healer = Some(healer);
        self
    }

    /// Underlying client
    #[must_use]
    pub fn client(&self) -> &Arc<dyn LlmClient> {
        &self.client
    }

    /// Resilience pipeline
    #[must_use]
    pub fn resilience(&self) -> &ResiliencePipeline {
        &self.resilience
    }

    /// Send `request` and return the completion text. `purpose` is passed
    /// to the healer as context.
    pub async fn complete(&self, request: &LlmRequest, purpose: &str) -> Result<String> {
        let err = match self.attempt(request).await {
            Ok(content) => return Ok(content),
            Err(err) => err,
        };

        let Some(healer) = &self.healer else {
            return Err(PipelineError::Llm(err.to_string()));
        };

        let report = Self::report(&err);
        let diagnosis = healer.diagnose_and_fix(&report, purpose).await;
        tracing::info!(
            provider = self.client.provider(),
            category = %diagnosis.error_category,
            fixed = diagnosis.fixed,
            "llm_call_healed"
        );

        if diagnosis.fixed && diagnosis.should_retry {
            return self
                .attempt(request)
                .await
                .map_err(|e| PipelineError::Llm(e.to_string()));
        }
        Err(PipelineError::Llm(format!("{err} ({})", diagnosis.diagnosis)))
    }

    async fn attempt(&self, request: &LlmRequest) -> std::result::Result<String, ResilienceError<LlmCallError>> {
        self.resilience
            .execute(|| async move {
                let response = self.client.send(request).await;
                if response.success {
                    Ok(response.content)
                } else {
                    Err(LlmCallError {
                        provider: self.client.provider().to_string(),
                        message: response
                            .error_message
                            .unwrap_or_else(|| "unsuccessful response".to_string()),
                    })
                }
            })
            .await
    }

    fn report(err: &ResilienceError<LlmCallError>) -> ErrorReport {
        match err {
            ResilienceError::CircuitOpen { .. } => {
                ErrorReport::new("CircuitOpenError", format!("provider unavailable: {err}"))
            }
            ResilienceError::Timeout { .. } => ErrorReport::new("TimeoutError", err.to_string()),
            ResilienceError::BulkheadFull { .. } => {
                ErrorReport::new("ProviderError", format!("rate limit: {err}"))
            }
            ResilienceError::Operation(e) => ErrorReport::new("ProviderError", e.message.clone()),
        }
    }
}

/// Lets the healer's LLM fallback use a pipeline client directly
pub struct LlmDiagnosisModel {
    client: Arc<dyn LlmClient>,
}

impl LlmDiagnosisModel {
    /// Wrap a client
    #[must_use]
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

impl fmt::Debug for LlmDiagnosisModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmDiagnosisModel")
            .field("provider", &self.client.provider())
            .finish()
    }
}

#[async_trait]
impl DiagnosisModel for LlmDiagnosisModel {
    async fn diagnose(&self, prompt: &str) -> vigil_healing::Result<String> {
        let request = LlmRequest::new("You diagnose failures of a code analysis tool.", prompt)
            .with_temperature(0.0);
        let response = self.client.send(&request).await;
        if response.success {
            Ok(response.content)
        } else {
            Err(HealingError::BackendUnavailable(
                response.error_message.unwrap_or_default(),
            ))
        }
    }
}

/// Strip a surrounding Markdown code fence from a completion
#[must_use]
pub fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.strip_suffix("```").unwrap_or(body).trim()
}
