// SPDX-License-Identifier: MIT

//! Validators run against parsed results in the validation retry loop

use crate::deckflow::workflow::state::ExecutionState;
use serde_json::Value;
use std::sync::Arc;

/// A check on a parsed result. `Err` carries the diagnostic fed back to the model.
pub trait Validator: Send + Sync {
    fn name(&self) -> &str {
        "validator"
    }

    fn validate(&self, result: &Value, state: &ExecutionState) -> Result<(), String>;
}

impl<F> Validator for F
where
    F: Fn(&Value, &ExecutionState) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, result: &Value, state: &ExecutionState) -> Result<(), String> {
        self(result, state)
    }
}

/// Keys that must be present in an object result
pub struct RequiredKeys {
    keys: Vec<String>,
}

impl RequiredKeys {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

impl Validator for RequiredKeys {
    fn name(&self) -> &str {
        "required_keys"
    }

    fn validate(&self, result: &Value, _state: &ExecutionState) -> Result<(), String> {
        let obj = result
            .as_object()
            .ok_or_else(|| "Expected a JSON object but got a non-object".to_string())?;
        let missing: Vec<&str> = self
            .keys
            .iter()
            .filter(|k| !obj.contains_key(k.as_str()))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("Missing required keys: {}", missing.join(", ")))
        }
    }
}

/// Rejects null, empty strings, empty arrays and empty objects
pub struct NonEmpty;

impl Validator for NonEmpty {
    fn name(&self) -> &str {
        "non_empty"
    }

    fn validate(&self, result: &Value, _state: &ExecutionState) -> Result<(), String> {
        let empty = match result {
            Value::Null => true,
            Value::String(s) => s.trim().is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
            _ => false,
        };
        if empty {
            Err("Result is empty".to_string())
        } else {
            Ok(())
        }
    }
}

/// Ordered validator list. Code only, never serialized.
#[derive(Clone, Default)]
pub struct Validators(Vec<Arc<dyn Validator>>);

impl Validators {
    pub fn push(&mut self, validator: Arc<dyn Validator>) {
        self.0.push(validator);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Run in order, stopping at the first failure.
    /// Returns the failing validator's name and diagnostic.
    pub fn run(&self, result: &Value, state: &ExecutionState) -> Result<(), (String, String)> {
        for validator in &self.0 {
            if let Err(diagnostic) = validator.validate(result, state) {
                return Err((validator.name().to_string(), diagnostic));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Validators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.0.iter().map(|v| v.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_required_keys() {
        let v = RequiredKeys::new(["title", "bullets"]);
        let state = ExecutionState::default();
        assert!(v.validate(&json!({"title": "a", "bullets": []}), &state).is_ok());
        assert_eq!(
            v.validate(&json!({"title": "a"}), &state),
            Err("Missing required keys: bullets".to_string())
        );
        assert!(v.validate(&json!([1]), &state).is_err());
    }

    #[test]
    fn test_non_empty() {
        let state = ExecutionState::default();
        assert!(NonEmpty.validate(&json!("  "), &state).is_err());
        assert!(NonEmpty.validate(&json!([]), &state).is_err());
        assert!(NonEmpty.validate(&json!(0), &state).is_ok());
    }

    #[test]
    fn test_run_short_circuits() {
        static SECOND_CALLS: AtomicUsize = AtomicUsize::new(0);

        let mut validators = Validators::default();
        validators.push(Arc::new(NonEmpty));
        validators.push(Arc::new(|_: &Value, _: &ExecutionState| {
            SECOND_CALLS.fetch_add(1, Ordering::SeqCst);
            Ok::<(), String>(())
        }));

        let state = ExecutionState::default();
        let err = validators.run(&json!({}), &state).unwrap_err();
        assert_eq!(err, ("non_empty".to_string(), "Result is empty".to_string()));
        assert_eq!(SECOND_CALLS.load(Ordering::SeqCst), 0);

        assert!(validators.run(&json!({"a": 1}), &state).is_ok());
        assert_eq!(SECOND_CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_closure_validator_reads_state() {
        let mut state = ExecutionState::default();
        state.update(
            "slide_count",
            json!(2),
            crate::deckflow::workflow::state::Reducer::Overwrite,
        );
        let matches_count = |result: &Value, state: &ExecutionState| {
            let want = state.get("slide_count").and_then(Value::as_u64).unwrap_or(0) as usize;
            match result.as_array() {
                Some(slides) if slides.len() == want => Ok(()),
                _ => Err(format!("Expected {} slides", want)),
            }
        };
        assert!(matches_count.validate(&json!([1, 2]), &state).is_ok());
        assert_eq!(
            matches_count.validate(&json!([1]), &state),
            Err("Expected 2 slides".to_string())
        );
    }
}
