//! Action oracle client: bounded, shaped retries over an [`LlmBackend`].

use crate::interfaces::{CompletionRequest, LlmBackend, RuntimeError};
use crate::json_coerce::coerce_action;
use crate::llm_client::head;
use crate::run_config::OracleConfig;
use crate::types::{AttemptOutcome, Decision};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const RAW_HEAD_CHARS: usize = 160;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleSettings {
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub stop: Vec<String>,
    pub max_prompt_chars: usize,
}

impl OracleSettings {
    pub fn from_config(config: &OracleConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            backoff_max: Duration::from_millis(config.backoff_max_ms),
            stop: config.stop.clone(),
            max_prompt_chars: config.max_prompt_chars,
        }
    }
}

/// Asks the backend for one action. Failures never escape as errors: after
/// `max_attempts` the caller gets a [`Decision::Defer`].
pub struct ActionOracle {
    backend: Arc<dyn LlmBackend>,
    settings: OracleSettings,
}

impl ActionOracle {
    pub fn new(backend: Arc<dyn LlmBackend>, settings: OracleSettings) -> Self {
        Self { backend, settings }
    }

    pub fn settings(&self) -> &OracleSettings {
        &self.settings
    }

    /// Pause after the zero-based `attempt` failed: `base * 2^attempt`, capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let multiplier = 2_u32.saturating_pow(attempt);
        self.settings
            .backoff_base
            .checked_mul(multiplier)
            .unwrap_or(self.settings.backoff_max)
            .min(self.settings.backoff_max)
    }

    /// The first attempt sends stop sequences, later ones drop them, and from
    /// the third on the prompt is cut to `max_prompt_chars`.
    pub fn shape_request(&self, prompt: &str, n_predict: u32, attempt: u32) -> CompletionRequest {
        let stop = if attempt == 0 {
            self.settings.stop.clone()
        } else {
            Vec::new()
        };
        let prompt = if attempt >= 2 {
            head(prompt, self.settings.max_prompt_chars)
        } else {
            prompt.to_string()
        };
        CompletionRequest {
            prompt,
            n_predict,
            stop,
        }
    }

    /// One request, classified.
    pub async fn attempt(&self, request: &CompletionRequest) -> AttemptOutcome {
        let _timer = crate::metrics::MetricTimer::new("oracle_request_latency");

        match self.backend.complete(request).await {
            Ok(text) => match coerce_action(&text) {
                Ok(action) => AttemptOutcome::Action(action),
                Err(reason) => AttemptOutcome::ParseFailure {
                    reason,
                    raw_head: head(&text, RAW_HEAD_CHARS),
                },
            },
            Err(RuntimeError::LLMTimeout) => AttemptOutcome::Timeout,
            Err(e) => AttemptOutcome::Unavailable(e.to_string()),
        }
    }

    pub async fn decide(&self, prompt: &str, n_predict: u32) -> Decision {
        let max_attempts = self.settings.max_attempts;
        let mut last_reason = String::from("no attempt made");

        for attempt in 0..max_attempts {
            debug!("Oracle attempt {}/{}", attempt + 1, max_attempts);
            let request = self.shape_request(prompt, n_predict, attempt);

            match self.attempt(&request).await {
                AttemptOutcome::Action(action) => {
                    return Decision::Act {
                        action,
                        attempts: attempt + 1,
                    }
                }
                outcome => {
                    last_reason = outcome.reason();
                    if let AttemptOutcome::ParseFailure { raw_head, .. } = &outcome {
                        warn!(
                            "Oracle attempt {} unparseable ({}): {:?}",
                            attempt + 1,
                            last_reason,
                            raw_head
                        );
                    } else {
                        warn!("Oracle attempt {} failed: {}", attempt + 1, last_reason);
                    }
                }
            }

            if attempt + 1 < max_attempts {
                tokio::time::sleep(self.backoff_for(attempt)).await;
            }
        }

        Decision::Defer {
            reason: format!(
                "oracle output rejected after {} attempts: {}",
                max_attempts, last_reason
            ),
            attempts: max_attempts,
        }
    }
}
