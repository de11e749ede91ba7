//! `delay` action: sleep for a fixed duration.
//!
//! Parameters: `ms` (integer) or `secs` (number). Returns `{"slept_ms": n}`.

use std::time::Duration;

use serde_json::{Map, Value, json};
use stepwise_types::error::ActionError;

use super::registry::ActionHandler;

/// Upper bound on a single delay.
const MAX_DELAY_MS: u64 = 24 * 60 * 60 * 1000;

pub struct DelayAction;

impl DelayAction {
    fn duration(params: &Map<String, Value>) -> Result<Duration, ActionError> {
        let ms = if let Some(ms) = params.get("ms") {
            lenient_u64(ms).ok_or_else(|| {
                ActionError::Configuration(format!("'ms' must be a non-negative integer, got {ms}"))
            })?
        } else if let Some(secs) = params.get("secs") {
            let secs = lenient_f64(secs)
                .filter(|s| s.is_finite() && *s >= 0.0)
                .ok_or_else(|| {
                    ActionError::Configuration(format!(
                        "'secs' must be a non-negative number, got {secs}"
                    ))
                })?;
            (secs * 1000.0).round() as u64
        } else {
            return Err(ActionError::Configuration(
                "delay requires 'ms' or 'secs'".to_string(),
            ));
        };

        if ms > MAX_DELAY_MS {
            return Err(ActionError::Configuration(format!(
                "delay of {ms}ms exceeds the {MAX_DELAY_MS}ms maximum"
            )));
        }
        Ok(Duration::from_millis(ms))
    }
}

// Rendered templates arrive as strings, so numeric strings are accepted.
fn lenient_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl ActionHandler for DelayAction {
    async fn handle(&self, params: &Map<String, Value>) -> Result<Value, ActionError> {
        let duration = Self::duration(params)?;
        tokio::time::sleep(duration).await;
        Ok(json!({ "slept_ms": duration.as_millis() as u64 }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_duration_from_ms_and_secs() {
        assert_eq!(
            DelayAction::duration(&params(json!({"ms": 250}))).unwrap(),
            Duration::from_millis(250)
        );
        assert_eq!(
            DelayAction::duration(&params(json!({"secs": 1.5}))).unwrap(),
            Duration::from_millis(1500)
        );
        assert_eq!(
            DelayAction::duration(&params(json!({"ms": "40"}))).unwrap(),
            Duration::from_millis(40)
        );
    }

    #[test]
    fn test_invalid_params_are_configuration_errors() {
        for bad in [json!({}), json!({"ms": -1}), json!({"secs": "soon"})] {
            let err = DelayAction::duration(&params(bad)).unwrap_err();
            assert!(matches!(err, ActionError::Configuration(_)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_sleeps() {
        let start = tokio::time::Instant::now();
        let out = DelayAction.handle(&params(json!({"ms": 1000}))).await.unwrap();
        assert_eq!(out, json!({"slept_ms": 1000}));
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }
}
