//! Workflow definition types.
//!
//! A [`Workflow`] is the immutable, parsed form of a workflow document. Steps
//! keep their type-specific `config` block as an untyped JSON map; the typed
//! views ([`LlmCallConfig`], [`ActionConfig`]) are derived on demand so that a
//! document with an unknown step type or a malformed config still parses and
//! the validator can report every problem at once.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Output name bound when a step declares no outputs.
pub const DEFAULT_OUTPUT: &str = "output";

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// A parsed workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Human-readable workflow name.
    #[serde(default)]
    pub name: String,
    /// Free-form version string. Numeric YAML scalars are accepted.
    #[serde(default = "default_version", deserialize_with = "deserialize_version")]
    pub version: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Declared variables and their default values.
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    /// Ordered step list.
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn deserialize_version<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum VersionRepr {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match VersionRepr::deserialize(deserializer)? {
        VersionRepr::Text(s) => s,
        VersionRepr::Int(i) => i.to_string(),
        VersionRepr::Float(f) => f.to_string(),
    })
}

impl Workflow {
    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Ids of all steps, in declaration order.
    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.id.as_str())
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// A single step in the workflow DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step id, unique within a workflow.
    pub id: String,
    /// Human-readable step name. Defaults to the id when omitted.
    #[serde(default)]
    pub name: String,
    /// The kind of step.
    #[serde(rename = "type")]
    pub step_type: StepType,
    /// Type-specific configuration. String leaves may contain `{{var}}` templates.
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Step ids this step depends on (DAG edges).
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Declared output names.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Step-level timeout in seconds (engine default when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Retry policy for this step (engine defaults when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
}

impl StepDefinition {
    /// Output names this step binds on success.
    ///
    /// A step that declares nothing binds a single [`DEFAULT_OUTPUT`].
    pub fn output_names(&self) -> Vec<&str> {
        if self.outputs.is_empty() {
            vec![DEFAULT_OUTPUT]
        } else {
            self.outputs.iter().map(String::as_str).collect()
        }
    }

    /// Typed view of an `llm_call` configuration block.
    pub fn llm_call_config(&self) -> Result<LlmCallConfig, serde_json::Error> {
        serde_json::from_value(Value::Object(self.config.clone()))
    }

    /// Typed view of an `action` configuration block.
    pub fn action_config(&self) -> Result<ActionConfig, serde_json::Error> {
        serde_json::from_value(Value::Object(self.config.clone()))
    }
}

/// The kind of step.
///
/// Unrecognized type names are preserved as [`StepType::Unknown`] so the
/// validator can report them instead of failing the whole parse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepType {
    LlmCall,
    Action,
    Unknown(String),
}

impl StepType {
    pub fn is_known(&self) -> bool {
        !matches!(self, StepType::Unknown(_))
    }
}

impl From<String> for StepType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "llm_call" => StepType::LlmCall,
            "action" => StepType::Action,
            _ => StepType::Unknown(s),
        }
    }
}

impl From<StepType> for String {
    fn from(t: StepType) -> Self {
        t.to_string()
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepType::LlmCall => write!(f, "llm_call"),
            StepType::Action => write!(f, "action"),
            StepType::Unknown(name) => write!(f, "{name}"),
        }
    }
}

/// Per-step retry policy. Unset fields fall back to engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    #[serde(default)]
    pub max_retries: u32,
    /// Delay before the first retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_ms: Option<u64>,
    /// Growth factor applied to the delay after each retry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_multiplier: Option<f64>,
    /// Upper bound for a single delay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backoff_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Typed config views
// ---------------------------------------------------------------------------

/// Configuration of an `llm_call` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmCallConfig {
    /// Model id passed to the LLM port. Engine default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Prompt template.
    pub prompt: String,
    /// Optional system prompt template.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// Free-form generation parameters (temperature, max_tokens, ...).
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// Configuration of an `action` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Registered action name.
    pub action: String,
    /// Parameter bag. String leaves are templates.
    #[serde(default)]
    pub params: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
name: research
version: 2
variables:
  topic: AI
steps:
  - id: fetch
    type: action
    config:
      action: http
      params:
        url: "https://example.com/{{topic}}"
    outputs: [content]
  - id: summarize
    type: llm_call
    depends_on: [fetch]
    retry:
      max_retries: 2
    config:
      prompt: "Summarize {{fetch.content}}"
  - id: odd
    type: teleport
"#;

    #[test]
    fn test_workflow_deserializes_from_yaml() {
        let wf: Workflow = serde_yaml_ng::from_str(DOC).unwrap();
        assert_eq!(wf.name, "research");
        assert_eq!(wf.version, "2");
        assert_eq!(wf.variables["topic"], Value::String("AI".into()));
        assert_eq!(wf.steps.len(), 3);
        assert_eq!(wf.steps[0].step_type, StepType::Action);
        assert_eq!(wf.steps[1].step_type, StepType::LlmCall);
        assert_eq!(wf.steps[1].retry.as_ref().unwrap().max_retries, 2);
        assert_eq!(wf.steps[2].step_type, StepType::Unknown("teleport".into()));
    }

    #[test]
    fn test_typed_config_views() {
        let wf: Workflow = serde_yaml_ng::from_str(DOC).unwrap();
        let action = wf.steps[0].action_config().unwrap();
        assert_eq!(action.action, "http");
        assert!(action.params.contains_key("url"));

        let llm = wf.steps[1].llm_call_config().unwrap();
        assert_eq!(llm.prompt, "Summarize {{fetch.content}}");
        assert!(llm.model.is_none());

        // An action step has no prompt.
        assert!(wf.steps[0].llm_call_config().is_err());
    }

    #[test]
    fn test_output_names_default() {
        let wf: Workflow = serde_yaml_ng::from_str(DOC).unwrap();
        assert_eq!(wf.steps[0].output_names(), vec!["content"]);
        assert_eq!(wf.steps[1].output_names(), vec![DEFAULT_OUTPUT]);
    }

    #[test]
    fn test_step_type_serializes_as_string() {
        let json = serde_json::to_string(&StepType::LlmCall).unwrap();
        assert_eq!(json, "\"llm_call\"");
        let unknown: StepType = serde_json::from_str("\"shell\"").unwrap();
        assert_eq!(unknown.to_string(), "shell");
        assert!(!unknown.is_known());
    }

    #[test]
    fn test_workflow_json_roundtrip() {
        let wf: Workflow = serde_yaml_ng::from_str(DOC).unwrap();
        let json = serde_json::to_string(&wf).unwrap();
        let parsed: Workflow = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, wf);
    }
}
