//! Runs one step: render, invoke, bind outputs, retry.
//!
//! `StepRunner` never touches `WorkflowState`. It receives a snapshot of the
//! bindings taken when the step was dispatched and returns a finished
//! [`StepResult`] for the executor's single writer to record.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value;
use stepwise_types::error::{ActionError, ProviderError};
use stepwise_types::execution::{ErrorCategory, StepFailure, StepResult};
use stepwise_types::workflow::{StepDefinition, StepType};
use tokio_util::sync::CancellationToken;

use crate::action::ActionRegistry;
use crate::llm::box_port::BoxLlmPort;
use crate::llm::port::GenerationParams;

use super::outputs::{StepProduct, bind_outputs};
use super::retry::{RetryHandler, RetrySchedule};
use super::template::{self, RenderError};

// ---------------------------------------------------------------------------
// StepError
// ---------------------------------------------------------------------------

/// A failure raised while executing one step attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{category} error: {message}")]
pub struct StepError {
    pub category: ErrorCategory,
    pub message: String,
    pub retryable: bool,
}

impl StepError {
    pub fn permanent(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn transient(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn to_failure(&self) -> StepFailure {
        StepFailure {
            category: self.category,
            message: self.message.clone(),
            retryable: self.retryable,
        }
    }
}

impl From<ProviderError> for StepError {
    fn from(err: ProviderError) -> Self {
        Self {
            category: ErrorCategory::Provider,
            retryable: err.is_retryable(),
            message: err.message,
        }
    }
}

impl From<ActionError> for StepError {
    fn from(err: ActionError) -> Self {
        let category = match err {
            ActionError::Configuration(_) => ErrorCategory::Configuration,
            ActionError::Transient(_) | ActionError::Permanent(_) => ErrorCategory::Action,
        };
        Self {
            category,
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

impl From<RenderError> for StepError {
    fn from(err: RenderError) -> Self {
        Self::permanent(ErrorCategory::Render, err.to_string())
    }
}

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Per-step execution settings resolved by the executor.
#[derive(Debug, Clone)]
pub struct StepSettings {
    pub timeout: Duration,
    pub retry: RetrySchedule,
}

/// Executes individual workflow steps against the LLM port and action registry.
#[derive(Clone)]
pub struct StepRunner {
    actions: Arc<ActionRegistry>,
    llm: Option<Arc<BoxLlmPort>>,
    default_model: String,
}

impl StepRunner {
    pub fn new(
        actions: Arc<ActionRegistry>,
        llm: Option<Arc<BoxLlmPort>>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            actions,
            llm,
            default_model: default_model.into(),
        }
    }

    /// Run a step to completion, retrying per `settings`.
    ///
    /// Every attempt re-renders the step's templates from `bindings`. A
    /// cancellation observed while waiting to retry ends the step with its
    /// last failure.
    pub async fn run(
        &self,
        step: &StepDefinition,
        bindings: &BTreeMap<String, Value>,
        settings: &StepSettings,
        cancel: &CancellationToken,
    ) -> StepResult {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut attempt: u32 = 0;

        let outcome = loop {
            attempt += 1;
            let result = match tokio::time::timeout(settings.timeout, self.run_once(step, bindings))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(StepError::transient(
                    ErrorCategory::Timeout,
                    format!("step timed out after {}s", settings.timeout.as_secs_f64()),
                )),
            };

            let err = match result {
                Ok(outputs) => break Ok(outputs),
                Err(err) => err,
            };

            if !RetryHandler::should_retry(&settings.retry, attempt, err.retryable) {
                break Err(err);
            }

            let delay = settings.retry.backoff(attempt);
            tracing::warn!(
                step_id = %step.id,
                attempt,
                max_retries = settings.retry.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Step attempt failed, retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(step_id = %step.id, attempt, "Retry abandoned after cancellation");
                    break Err(err);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        };

        let duration_ms = clock.elapsed().as_millis() as u64;
        let completed_at = Utc::now();
        match outcome {
            Ok(outputs) => StepResult {
                step_id: step.id.clone(),
                success: true,
                outputs,
                duration_ms,
                attempts: attempt,
                error: None,
                started_at,
                completed_at,
            },
            Err(err) => StepResult {
                step_id: step.id.clone(),
                success: false,
                outputs: BTreeMap::new(),
                duration_ms,
                attempts: attempt,
                error: Some(err.to_failure()),
                started_at,
                completed_at,
            },
        }
    }

    /// A single attempt: render, invoke, bind.
    pub async fn run_once(
        &self,
        step: &StepDefinition,
        bindings: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>, StepError> {
        let product = match &step.step_type {
            StepType::LlmCall => self.run_llm_call(step, bindings).await?,
            StepType::Action => self.run_action(step, bindings).await?,
            StepType::Unknown(name) => {
                return Err(StepError::permanent(
                    ErrorCategory::Configuration,
                    format!("unknown step type '{name}'"),
                ));
            }
        };
        bind_outputs(step, product)
    }

    async fn run_llm_call(
        &self,
        step: &StepDefinition,
        bindings: &BTreeMap<String, Value>,
    ) -> Result<StepProduct, StepError> {
        let config = step
            .llm_call_config()
            .map_err(|e| StepError::permanent(ErrorCategory::Configuration, e.to_string()))?;
        let llm = self.llm.as_ref().ok_or_else(|| {
            StepError::permanent(
                ErrorCategory::Configuration,
                "no LLM backend configured for llm_call steps",
            )
        })?;

        let prompt = template::render(&config.prompt, bindings)?;
        let system = config
            .system
            .as_deref()
            .map(|s| template::render(s, bindings))
            .transpose()?;
        let params = GenerationParams {
            system,
            extra: template::render_map(&config.parameters, bindings)?,
        };
        let model = match config.model.as_deref() {
            Some(model) => template::render(model, bindings)?,
            None => self.default_model.clone(),
        };

        tracing::debug!(step_id = %step.id, model = %model, prompt_len = prompt.len(), "Invoking LLM");
        let text = llm.generate(&model, &prompt, &params).await?;
        Ok(StepProduct::Text(text))
    }

    async fn run_action(
        &self,
        step: &StepDefinition,
        bindings: &BTreeMap<String, Value>,
    ) -> Result<StepProduct, StepError> {
        let config = step
            .action_config()
            .map_err(|e| StepError::permanent(ErrorCategory::Configuration, e.to_string()))?;
        let params = template::render_map(&config.params, bindings)?;

        tracing::debug!(step_id = %step.id, action = %config.action, "Invoking action");
        let value = self.actions.invoke(&config.action, &params).await?;
        Ok(StepProduct::Value(value))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionHandler;
    use crate::llm::port::LlmPort;
    use serde_json::{Map, json};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        calls: Arc<AtomicU32>,
        succeed_on: u32,
    }

    impl ActionHandler for Flaky {
        async fn handle(&self, _params: &Map<String, Value>) -> Result<Value, ActionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.succeed_on {
                Ok(json!({"call": n}))
            } else {
                Err(ActionError::Transient(format!("call {n} failed")))
            }
        }
    }

    struct Shout;

    impl LlmPort for Shout {
        fn name(&self) -> &str {
            "shout"
        }

        async fn generate(
            &self,
            model_id: &str,
            prompt: &str,
            params: &GenerationParams,
        ) -> Result<String, ProviderError> {
            if prompt.is_empty() {
                return Err(ProviderError::fatal("empty prompt"));
            }
            let system = params.system.as_deref().unwrap_or("-");
            Ok(format!("{model_id}|{system}|{}", prompt.to_uppercase()))
        }
    }

    fn step(yaml: &str) -> StepDefinition {
        serde_yaml_ng::from_str(yaml).unwrap()
    }

    fn settings(max_retries: u32) -> StepSettings {
        StepSettings {
            timeout: Duration::from_secs(5),
            retry: RetrySchedule {
                max_retries,
                initial_backoff: Duration::from_millis(1),
                multiplier: 1.0,
                max_backoff: Duration::from_millis(1),
            },
        }
    }

    fn runner_with(calls: Arc<AtomicU32>, succeed_on: u32) -> StepRunner {
        let mut registry = ActionRegistry::new();
        registry.register("flaky", Flaky { calls, succeed_on });
        StepRunner::new(
            Arc::new(registry),
            Some(Arc::new(BoxLlmPort::new(Shout))),
            "default-model",
        )
    }

    #[tokio::test]
    async fn test_llm_call_renders_and_binds() {
        let runner = runner_with(Arc::new(AtomicU32::new(0)), 1);
        let s = step(
            "id: s\ntype: llm_call\noutputs: [text]\nconfig:\n  prompt: 'hi {{who}}'\n  system: 'be {{mood}}'\n",
        );
        let bindings = BTreeMap::from([
            ("who".to_string(), json!("bob")),
            ("mood".to_string(), json!("terse")),
        ]);
        let out = runner.run_once(&s, &bindings).await.unwrap();
        assert_eq!(out["text"], json!("default-model|be terse|HI BOB"));
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let runner = runner_with(calls.clone(), 3);
        let s = step("id: s\ntype: action\nconfig:\n  action: flaky\n");
        let result = runner
            .run(&s, &BTreeMap::new(), &settings(2), &CancellationToken::new())
            .await;
        assert!(result.success);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.outputs["output"], json!({"call": 3}));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let runner = runner_with(calls.clone(), u32::MAX);
        let s = step("id: s\ntype: action\nconfig:\n  action: flaky\n");
        let result = runner
            .run(&s, &BTreeMap::new(), &settings(2), &CancellationToken::new())
            .await;
        assert!(!result.success);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.retries(), 2);
        let failure = result.error.unwrap();
        assert_eq!(failure.category, ErrorCategory::Action);
        assert!(failure.retryable);
    }

    #[tokio::test]
    async fn test_unknown_action_not_retried() {
        let runner = runner_with(Arc::new(AtomicU32::new(0)), 1);
        let s = step("id: s\ntype: action\nconfig:\n  action: missing\n");
        let result = runner
            .run(&s, &BTreeMap::new(), &settings(5), &CancellationToken::new())
            .await;
        assert!(!result.success);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.error.unwrap().category, ErrorCategory::Configuration);
    }

    #[tokio::test]
    async fn test_missing_llm_backend_is_configuration_error() {
        let runner = StepRunner::new(Arc::new(ActionRegistry::new()), None, "m");
        let s = step("id: s\ntype: llm_call\nconfig:\n  prompt: hi\n");
        let err = runner.run_once(&s, &BTreeMap::new()).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Configuration);
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn test_render_failure_is_permanent() {
        let runner = runner_with(Arc::new(AtomicU32::new(0)), 1);
        let s = step("id: s\ntype: llm_call\nconfig:\n  prompt: '{{nowhere}}'\n");
        let err = runner.run_once(&s, &BTreeMap::new()).await.unwrap_err();
        assert_eq!(err.category, ErrorCategory::Render);
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn test_cancel_stops_retrying() {
        let calls = Arc::new(AtomicU32::new(0));
        let runner = runner_with(calls.clone(), u32::MAX);
        let s = step("id: s\ntype: action\nconfig:\n  action: flaky\n");
        let mut slow = settings(10);
        slow.retry.initial_backoff = Duration::from_secs(3600);
        slow.retry.max_backoff = Duration::from_secs(3600);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = runner.run(&s, &BTreeMap::new(), &slow, &cancel).await;
        assert!(!result.success);
        assert_eq!(result.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_error_conversions() {
        let err: StepError = ProviderError::fatal("401").into();
        assert_eq!(err.category, ErrorCategory::Provider);
        assert!(!err.retryable);
        let err: StepError = ProviderError::retryable("429").into();
        assert!(err.retryable);
        let err: StepError = ActionError::Transient("503".into()).into();
        assert_eq!(err.category, ErrorCategory::Action);
        assert!(err.retryable);
    }
}
