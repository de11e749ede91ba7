//! Binding step products to declared outputs.
//!
//! A step's declared outputs land in the execution's variable map as
//! `<step_id>.<output>`. Each bound value is capped at
//! [`MAX_STEP_OUTPUT_SIZE`] bytes of serialized JSON.

use std::collections::BTreeMap;

use serde_json::{Value, json};
use stepwise_types::execution::ErrorCategory;
use stepwise_types::workflow::StepDefinition;

use super::step_runner::StepError;

/// Maximum size of a single bound output (1 MB).
pub const MAX_STEP_OUTPUT_SIZE: usize = 1_048_576;

/// What a step produced before output binding.
#[derive(Debug, Clone, PartialEq)]
pub enum StepProduct {
    /// Generated text from the LLM port.
    Text(String),
    /// Value returned by an action handler.
    Value(Value),
}

/// Map a step product onto the step's declared output names.
///
/// - One declared output (or none, meaning `output`): text binds directly;
///   an action value binds its field of that name when it is an object
///   carrying one, otherwise the whole value.
/// - Several declared outputs: the product must be a JSON object (text is
///   parsed) holding every declared name.
///
/// A missing output is a permanent [`ErrorCategory::Output`] failure.
pub fn bind_outputs(
    step: &StepDefinition,
    product: StepProduct,
) -> Result<BTreeMap<String, Value>, StepError> {
    let names = step.output_names();

    let bound: BTreeMap<String, Value> = if let [name] = names.as_slice() {
        let value = match product {
            StepProduct::Text(text) => Value::String(text),
            StepProduct::Value(Value::Object(mut map)) if map.contains_key(*name) => {
                map.remove(*name).unwrap_or(Value::Null)
            }
            StepProduct::Value(value) => value,
        };
        BTreeMap::from([(name.to_string(), value)])
    } else {
        let object = match product {
            StepProduct::Value(Value::Object(map)) => map,
            StepProduct::Text(text) => match serde_json::from_str::<Value>(text.trim()) {
                Ok(Value::Object(map)) => map,
                _ => {
                    return Err(StepError::permanent(
                        ErrorCategory::Output,
                        format!(
                            "step declares outputs [{}] but the model did not return a JSON object",
                            names.join(", ")
                        ),
                    ));
                }
            },
            StepProduct::Value(other) => {
                return Err(StepError::permanent(
                    ErrorCategory::Output,
                    format!(
                        "step declares outputs [{}] but the action returned {}",
                        names.join(", "),
                        type_name(&other)
                    ),
                ));
            }
        };
        names
            .iter()
            .map(|name| {
                object
                    .get(*name)
                    .cloned()
                    .map(|v| (name.to_string(), v))
                    .ok_or_else(|| {
                        StepError::permanent(
                            ErrorCategory::Output,
                            format!("declared output '{name}' missing from step result"),
                        )
                    })
            })
            .collect::<Result<_, _>>()?
    };

    Ok(bound
        .into_iter()
        .map(|(name, value)| {
            let value = cap_size(&step.id, &name, value);
            (name, value)
        })
        .collect())
}

/// Merge bound outputs into the variable map under the step's namespace.
pub fn merge_outputs(
    variables: &mut BTreeMap<String, Value>,
    step_id: &str,
    outputs: &BTreeMap<String, Value>,
) {
    for (name, value) in outputs {
        variables.insert(format!("{step_id}.{name}"), value.clone());
    }
}

fn cap_size(step_id: &str, name: &str, value: Value) -> Value {
    let size = serde_json::to_string(&value).map(|s| s.len()).unwrap_or(0);
    if size <= MAX_STEP_OUTPUT_SIZE {
        return value;
    }
    tracing::warn!(
        step_id,
        output = name,
        size,
        max = MAX_STEP_OUTPUT_SIZE,
        "step output exceeds size limit, truncating"
    );
    json!({
        "_truncated": true,
        "_original_size_bytes": size,
    })
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_types::workflow::StepType;

    fn step(outputs: &[&str]) -> StepDefinition {
        StepDefinition {
            id: "s".to_string(),
            name: "s".to_string(),
            step_type: StepType::Action,
            config: Default::default(),
            depends_on: vec![],
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            timeout_secs: None,
            retry: None,
        }
    }

    #[test]
    fn test_text_binds_to_single_output() {
        let out = bind_outputs(&step(&["summary"]), StepProduct::Text("hello".into())).unwrap();
        assert_eq!(out, BTreeMap::from([("summary".into(), json!("hello"))]));
    }

    #[test]
    fn test_default_output_name() {
        let out = bind_outputs(&step(&[]), StepProduct::Value(json!(42))).unwrap();
        assert_eq!(out, BTreeMap::from([("output".into(), json!(42))]));
    }

    #[test]
    fn test_single_output_picks_matching_field() {
        let value = json!({"status": 200, "body": "ok"});
        let out = bind_outputs(&step(&["body"]), StepProduct::Value(value.clone())).unwrap();
        assert_eq!(out["body"], json!("ok"));

        let out = bind_outputs(&step(&["content"]), StepProduct::Value(value.clone())).unwrap();
        assert_eq!(out["content"], value);
    }

    #[test]
    fn test_multiple_outputs_from_json_text() {
        let text = r#" {"title": "T", "tags": ["a"], "extra": 1} "#;
        let out = bind_outputs(&step(&["title", "tags"]), StepProduct::Text(text.into())).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out["title"], json!("T"));
        assert_eq!(out["tags"], json!(["a"]));
    }

    #[test]
    fn test_missing_output_is_permanent_error() {
        let err = bind_outputs(
            &step(&["title", "tags"]),
            StepProduct::Value(json!({"title": "T"})),
        )
        .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Output);
        assert!(!err.retryable);
        assert!(err.message.contains("tags"));

        let err = bind_outputs(&step(&["a", "b"]), StepProduct::Text("prose".into())).unwrap_err();
        assert_eq!(err.category, ErrorCategory::Output);
    }

    #[test]
    fn test_oversized_output_truncated() {
        let big = "x".repeat(MAX_STEP_OUTPUT_SIZE + 10);
        let out = bind_outputs(&step(&["blob"]), StepProduct::Text(big)).unwrap();
        assert_eq!(out["blob"]["_truncated"], json!(true));
    }

    #[test]
    fn test_merge_outputs_namespaces() {
        let mut vars = BTreeMap::from([("topic".to_string(), json!("AI"))]);
        let outputs = BTreeMap::from([("summary".to_string(), json!("short"))]);
        merge_outputs(&mut vars, "summarize", &outputs);
        assert_eq!(vars["summarize.summary"], json!("short"));
        assert_eq!(vars["topic"], json!("AI"));
    }
}
