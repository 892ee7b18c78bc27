// SPDX-License-Identifier: MIT

//! Bounded retry-with-validation loop
//!
//! Each attempt is invoke, parse, then validators in order. A failed attempt
//! feeds its diagnostic into the next prompt. After `max_retries + 1`
//! attempts the last diagnostic is returned as `ValidationExhausted`.

use super::executor::{AgentExecutor, Turn, TurnOutput};
use super::retry::Backoff;
use super::validator::Validators;
use crate::deckflow::error::AgentError;
use crate::deckflow::workflow::state::ExecutionState;

/// How a single attempt ended
pub(crate) enum RetryOutcome {
    Validated(TurnOutput),
    /// Retry with this diagnostic
    Invalid { source: String, diagnostic: String },
    /// Stop retrying
    Failed(AgentError),
}

impl RetryOutcome {
    fn classify(
        attempt: Result<TurnOutput, AgentError>,
        validators: &Validators,
        state: &ExecutionState,
    ) -> Self {
        match attempt {
            Ok(output) => match validators.run(&output.value, state) {
                Ok(()) => RetryOutcome::Validated(output),
                Err((validator, diagnostic)) => RetryOutcome::Invalid {
                    source: validator,
                    diagnostic,
                },
            },
            Err(err @ AgentError::Parse { .. }) | Err(err @ AgentError::UnexpectedOutput { .. }) => {
                RetryOutcome::Invalid {
                    source: "parser".to_string(),
                    diagnostic: err.to_string(),
                }
            }
            Err(AgentError::ToolCall(err)) => RetryOutcome::Invalid {
                source: "model".to_string(),
                diagnostic: err.to_string(),
            },
            Err(err) => RetryOutcome::Failed(err),
        }
    }
}

/// Text appended to the task prompt after a rejected attempt
pub(crate) fn feedback_prompt(diagnostic: &str) -> String {
    format!(
        "Your previous answer was rejected: {}\nFix the problem and answer again.",
        diagnostic
    )
}

pub(crate) async fn run_with_validation(
    executor: &AgentExecutor,
    turn: &Turn<'_>,
    state: &ExecutionState,
    validators: &Validators,
    max_retries: u32,
    backoff: Backoff,
) -> Result<TurnOutput, AgentError> {
    let attempts = max_retries.saturating_add(1);
    let mut feedback: Option<String> = None;
    let mut last_diagnostic = String::new();

    for attempt in 0..attempts {
        if attempt > 0 {
            backoff.wait(attempt - 1).await;
        }

        let result = executor
            .invoke_once(turn, state, feedback.as_deref())
            .await;
        match RetryOutcome::classify(result, validators, state) {
            RetryOutcome::Validated(output) => {
                if attempt > 0 {
                    log::info!("Agent '{}' validated on attempt {}", turn.role, attempt + 1);
                }
                return Ok(output);
            }
            RetryOutcome::Invalid { source, diagnostic } => {
                log::warn!(
                    "Agent '{}' attempt {}/{} rejected by {}: {}",
                    turn.role,
                    attempt + 1,
                    attempts,
                    source,
                    diagnostic
                );
                feedback = Some(feedback_prompt(&diagnostic));
                last_diagnostic = diagnostic;
            }
            RetryOutcome::Failed(err) => return Err(err),
        }
    }

    log::error!(
        "Agent '{}' exhausted {} attempts: {}",
        turn.role,
        attempts,
        last_diagnostic
    );
    Err(AgentError::ValidationExhausted {
        role: turn.role.to_string(),
        attempts,
        diagnostic: last_diagnostic,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adk::model::Content;
    use crate::deckflow::agent::validator::RequiredKeys;
    use crate::deckflow::error::{ModelError, ParseError};
    use serde_json::json;
    use std::sync::Arc;

    fn output(value: serde_json::Value) -> TurnOutput {
        TurnOutput {
            value,
            exchange: [Content::user("q"), Content::assistant("a")],
        }
    }

    #[test]
    fn test_classify() {
        let mut validators = Validators::default();
        validators.push(Arc::new(RequiredKeys::new(["title"])));
        let state = ExecutionState::default();

        assert!(matches!(
            RetryOutcome::classify(Ok(output(json!({"title": "x"}))), &validators, &state),
            RetryOutcome::Validated(_)
        ));
        match RetryOutcome::classify(Ok(output(json!({}))), &validators, &state) {
            RetryOutcome::Invalid { source, diagnostic } => {
                assert_eq!(source, "required_keys");
                assert_eq!(diagnostic, "Missing required keys: title");
            }
            _ => panic!("expected a retryable outcome"),
        }

        let parse = AgentError::Parse {
            role: "r".into(),
            source: ParseError::NoJsonFound,
        };
        assert!(matches!(
            RetryOutcome::classify(Err(parse), &validators, &state),
            RetryOutcome::Invalid { .. }
        ));

        let transient = AgentError::ToolCall(ModelError::Timeout { secs: 5 });
        assert!(matches!(
            RetryOutcome::classify(Err(transient), &validators, &state),
            RetryOutcome::Invalid { .. }
        ));

        for err in [
            ModelError::ApiKeyMissing,
            ModelError::InvalidResponse("choice has no text content".into()),
        ] {
            match RetryOutcome::classify(Err(AgentError::ToolCall(err)), &validators, &state) {
                RetryOutcome::Invalid { source, .. } => assert_eq!(source, "model"),
                _ => panic!("tool call errors are retried"),
            }
        }

        let render = AgentError::PromptRender {
            template: "task_prompt_for_r".into(),
            message: "template not found".into(),
        };
        assert!(matches!(
            RetryOutcome::classify(Err(render), &validators, &state),
            RetryOutcome::Failed(AgentError::PromptRender { .. })
        ));

        let cancelled = AgentError::Cancelled { role: "r".into() };
        assert!(matches!(
            RetryOutcome::classify(Err(cancelled), &validators, &state),
            RetryOutcome::Failed(AgentError::Cancelled { .. })
        ));
    }

    #[test]
    fn test_feedback_prompt_carries_diagnostic() {
        assert!(feedback_prompt("Missing required keys: title").contains("Missing required keys: title"));
    }
}
