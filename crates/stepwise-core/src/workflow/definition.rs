//! Workflow document parsing and validation.
//!
//! [`parse_workflow`] turns YAML (or JSON) text into a [`Workflow`] and
//! nothing more. [`validate_workflow`] checks the structural and semantic
//! rules and returns every problem it finds; an empty list means the
//! workflow may be executed. [`load_workflow`] runs both.

use std::collections::{BTreeSet, HashSet};

use serde_json::Value;
use stepwise_types::workflow::{StepDefinition, StepType, Workflow};
use thiserror::Error;

use super::dag;
use super::template;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur before a workflow starts executing.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// Malformed document. No partial workflow is returned.
    #[error("parse error: {0}")]
    Parse(String),

    /// Well-formed document describing an invalid workflow.
    #[error("{}", format_validation(.0))]
    Validation(Vec<ValidationError>),

    /// Filesystem I/O failure while reading a definition.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_validation(errors: &[ValidationError]) -> String {
    let joined = errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    format!("{} validation error(s): {joined}", errors.len())
}

/// A single semantic problem in a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("workflow name is empty")]
    MissingName,

    #[error("workflow has no steps")]
    EmptyWorkflow,

    #[error("invalid step id '{0}': ids must be non-empty and contain no '.', whitespace or braces")]
    InvalidStepId(String),

    #[error("duplicate step id '{0}'")]
    DuplicateStepId(String),

    #[error("invalid variable name '{0}': names must be non-empty and contain no '.', whitespace or braces")]
    InvalidVariableName(String),

    #[error("step '{step_id}' depends on unknown step '{dependency}'")]
    UnknownDependency { step_id: String, dependency: String },

    #[error("step '{0}' depends on itself")]
    SelfDependency(String),

    #[error("dependency cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("step '{step_id}' has unknown type '{step_type}'")]
    UnknownStepType { step_id: String, step_type: String },

    #[error("step '{step_id}' has invalid config: {message}")]
    InvalidConfig { step_id: String, message: String },

    #[error("step '{step_id}' declares invalid output name '{name}'")]
    InvalidOutputName { step_id: String, name: String },

    #[error("step '{step_id}' has a malformed template: {message}")]
    MalformedTemplate { step_id: String, message: String },

    #[error("step '{step_id}' references undeclared variable or output '{reference}'")]
    UnresolvedReference { step_id: String, reference: String },

    #[error(
        "step '{step_id}' references '{reference}' but step '{source_step}' is not one of its dependencies"
    )]
    NotUpstream {
        step_id: String,
        reference: String,
        source_step: String,
    },
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML or JSON document into a [`Workflow`].
///
/// Pure: performs no validation beyond what the document shape requires.
/// Steps without a `name` take their id as name.
pub fn parse_workflow(text: &str) -> Result<Workflow, WorkflowError> {
    if text.trim().is_empty() {
        return Err(WorkflowError::Parse("empty workflow document".to_string()));
    }
    let mut workflow: Workflow =
        serde_yaml_ng::from_str(text).map_err(|e| WorkflowError::Parse(e.to_string()))?;
    for step in &mut workflow.steps {
        if step.name.trim().is_empty() {
            step.name = step.id.clone();
        }
    }
    Ok(workflow)
}

/// Parse then validate. Validation problems come back together in
/// [`WorkflowError::Validation`].
pub fn load_workflow(text: &str) -> Result<Workflow, WorkflowError> {
    let workflow = parse_workflow(text)?;
    let errors = validate_workflow(&workflow);
    if errors.is_empty() {
        Ok(workflow)
    } else {
        Err(WorkflowError::Validation(errors))
    }
}

/// Serialize a workflow back to YAML.
pub fn serialize_workflow(workflow: &Workflow) -> Result<String, WorkflowError> {
    serde_yaml_ng::to_string(workflow).map_err(|e| WorkflowError::Parse(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Check a parsed workflow. Returns every problem found; empty means valid.
///
/// Never mutates its input.
pub fn validate_workflow(workflow: &Workflow) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if workflow.name.trim().is_empty() {
        errors.push(ValidationError::MissingName);
    }
    if workflow.steps.is_empty() {
        errors.push(ValidationError::EmptyWorkflow);
    }
    for name in workflow.variables.keys() {
        if !is_valid_identifier(name) {
            errors.push(ValidationError::InvalidVariableName(name.clone()));
        }
    }

    let mut seen = HashSet::new();
    for step in &workflow.steps {
        if !is_valid_identifier(&step.id) {
            errors.push(ValidationError::InvalidStepId(step.id.clone()));
        }
        if !seen.insert(step.id.as_str()) {
            errors.push(ValidationError::DuplicateStepId(step.id.clone()));
        }
    }

    for step in &workflow.steps {
        check_dependencies(step, &seen, &mut errors);
        check_outputs(step, &mut errors);
        check_step_config(step, &mut errors);
    }

    for path in dag::find_cycles(&workflow.steps) {
        errors.push(ValidationError::Cycle { path });
    }

    for step in &workflow.steps {
        check_references(workflow, step, &mut errors);
    }

    errors
}

fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c == '.' || c == '{' || c == '}' || c.is_whitespace())
}

fn check_dependencies(step: &StepDefinition, ids: &HashSet<&str>, errors: &mut Vec<ValidationError>) {
    for dep in &step.depends_on {
        if dep == &step.id {
            errors.push(ValidationError::SelfDependency(step.id.clone()));
        } else if !ids.contains(dep.as_str()) {
            errors.push(ValidationError::UnknownDependency {
                step_id: step.id.clone(),
                dependency: dep.clone(),
            });
        }
    }
}

fn check_outputs(step: &StepDefinition, errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for name in &step.outputs {
        if !is_valid_identifier(name) || !seen.insert(name.as_str()) {
            errors.push(ValidationError::InvalidOutputName {
                step_id: step.id.clone(),
                name: name.clone(),
            });
        }
    }
}

fn check_step_config(step: &StepDefinition, errors: &mut Vec<ValidationError>) {
    let invalid = |message: String| ValidationError::InvalidConfig {
        step_id: step.id.clone(),
        message,
    };

    match &step.step_type {
        StepType::LlmCall => match step.llm_call_config() {
            Ok(cfg) if cfg.prompt.trim().is_empty() => {
                errors.push(invalid("'prompt' is empty".to_string()));
            }
            Ok(_) => {}
            Err(e) => errors.push(invalid(e.to_string())),
        },
        StepType::Action => match step.action_config() {
            Ok(cfg) if cfg.action.trim().is_empty() => {
                errors.push(invalid("'action' is empty".to_string()));
            }
            Ok(cfg) if cfg.action.contains("{{") => {
                errors.push(invalid("'action' cannot be a template".to_string()));
            }
            Ok(_) => {}
            Err(e) => errors.push(invalid(e.to_string())),
        },
        StepType::Unknown(name) => errors.push(ValidationError::UnknownStepType {
            step_id: step.id.clone(),
            step_type: name.clone(),
        }),
    }

    if step.timeout_secs == Some(0) {
        errors.push(invalid("'timeout_secs' must be greater than 0".to_string()));
    }
    if let Some(retry) = &step.retry {
        if retry
            .backoff_multiplier
            .is_some_and(|m| !m.is_finite() || m < 1.0)
        {
            errors.push(invalid("'retry.backoff_multiplier' must be at least 1.0".to_string()));
        }
    }
}

/// Every `{{ref}}` must name a declared variable or a declared output of an
/// upstream step.
fn check_references(workflow: &Workflow, step: &StepDefinition, errors: &mut Vec<ValidationError>) {
    let upstream = dag::upstream_steps(&step.id, &workflow.steps);
    let config = Value::Object(step.config.clone());

    // Report each distinct reference once per step.
    let mut reported = BTreeSet::new();
    for text in template::template_strings(&config) {
        let refs = match template::references(text) {
            Ok(refs) => refs,
            Err(e) => {
                errors.push(ValidationError::MalformedTemplate {
                    step_id: step.id.clone(),
                    message: e.to_string(),
                });
                continue;
            }
        };
        for reference in refs {
            if !reported.insert(reference.to_string()) {
                continue;
            }
            if let Some(error) = resolve_reference(workflow, step, &upstream, reference) {
                errors.push(error);
            }
        }
    }
}

fn resolve_reference(
    workflow: &Workflow,
    step: &StepDefinition,
    upstream: &HashSet<&str>,
    reference: &str,
) -> Option<ValidationError> {
    if workflow
        .variables
        .keys()
        .any(|name| template::is_bound_by(reference, name))
    {
        return None;
    }

    let source = workflow.steps.iter().find(|other| {
        other
            .output_names()
            .iter()
            .any(|output| template::is_bound_by(reference, &format!("{}.{}", other.id, output)))
    });

    match source {
        Some(source) if upstream.contains(source.id.as_str()) => None,
        Some(source) => Some(ValidationError::NotUpstream {
            step_id: step.id.clone(),
            reference: reference.to_string(),
            source_step: source.id.clone(),
        }),
        None => Some(ValidationError::UnresolvedReference {
            step_id: step.id.clone(),
            reference: reference.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
name: research
version: "1.0"
variables:
  topic: AI
steps:
  - id: fetch_data
    type: action
    config:
      action: http
      params:
        url: "https://example.com/search?q={{ topic }}"
    outputs: [content]
  - id: summarize
    name: Summarize
    type: llm_call
    depends_on: [fetch_data]
    config:
      prompt: "Summarize {{fetch_data.content.body}} about {{topic}}"
    outputs: [summary]
  - id: save
    type: action
    depends_on: [summarize]
    config:
      action: file_write
      params:
        path: "out/{{topic}}.md"
        content: "{{summarize.summary}}"
"#;

    fn validation_errors(text: &str) -> Vec<ValidationError> {
        validate_workflow(&parse_workflow(text).unwrap())
    }

    #[test]
    fn test_parse_valid_workflow() {
        let wf = parse_workflow(VALID).unwrap();
        assert_eq!(wf.name, "research");
        assert_eq!(wf.steps.len(), 3);
        assert_eq!(wf.steps[0].name, "fetch_data", "name defaults to id");
        assert_eq!(wf.steps[1].name, "Summarize");
        assert!(validate_workflow(&wf).is_empty());
        assert!(load_workflow(VALID).is_ok());
    }

    #[test]
    fn test_parse_json_document() {
        let json = r#"{"name": "j", "steps": [{"id": "a", "type": "action", "config": {"action": "delay", "params": {"ms": 1}}}]}"#;
        let wf = load_workflow(json).unwrap();
        assert_eq!(wf.steps[0].id, "a");
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse_workflow("   "), Err(WorkflowError::Parse(_))));
        assert!(matches!(
            parse_workflow("name: [unclosed"),
            Err(WorkflowError::Parse(_))
        ));
        assert!(matches!(
            parse_workflow("name: x\nsteps:\n  - type: action\n"),
            Err(WorkflowError::Parse(_))
        ));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let wf = parse_workflow(VALID).unwrap();
        let yaml = serialize_workflow(&wf).unwrap();
        assert_eq!(parse_workflow(&yaml).unwrap(), wf);
    }

    #[test]
    fn test_unknown_dependency_and_self_dependency() {
        let errors = validation_errors(
            r#"
name: deps
steps:
  - id: a
    type: action
    depends_on: [ghost, a]
    config: { action: delay }
"#,
        );
        assert!(errors.contains(&ValidationError::UnknownDependency {
            step_id: "a".into(),
            dependency: "ghost".into(),
        }));
        assert!(errors.contains(&ValidationError::SelfDependency("a".into())));
    }

    #[test]
    fn test_cycle_reported_with_path() {
        let errors = validation_errors(
            r#"
name: loop
steps:
  - id: a
    type: action
    depends_on: [b]
    config: { action: delay }
  - id: b
    type: action
    depends_on: [a]
    config: { action: delay }
"#,
        );
        assert!(errors.contains(&ValidationError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        }));
        let message = WorkflowError::Validation(errors).to_string();
        assert!(message.contains("dependency cycle: a -> b -> a"), "{message}");
    }

    #[test]
    fn test_unknown_step_type_and_missing_fields() {
        let errors = validation_errors(
            r#"
name: types
steps:
  - id: a
    type: shell
  - id: b
    type: llm_call
    config: { model: gpt }
  - id: c
    type: action
    config: {}
    timeout_secs: 0
"#,
        );
        assert!(errors.contains(&ValidationError::UnknownStepType {
            step_id: "a".into(),
            step_type: "shell".into(),
        }));
        let invalid: Vec<&str> = errors
            .iter()
            .filter_map(|e| match e {
                ValidationError::InvalidConfig { step_id, .. } => Some(step_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(invalid, vec!["b", "c", "c"]);
    }

    #[test]
    fn test_undeclared_variable_rejected() {
        let errors = validation_errors(
            r#"
name: vars
variables:
  topic: AI
steps:
  - id: a
    type: llm_call
    config:
      prompt: "Tell me about {{topic}} and {{audience}}"
"#,
        );
        assert_eq!(
            errors,
            vec![ValidationError::UnresolvedReference {
                step_id: "a".into(),
                reference: "audience".into(),
            }]
        );
    }

    #[test]
    fn test_reference_to_non_upstream_output_rejected() {
        let errors = validation_errors(
            r#"
name: sibling
steps:
  - id: a
    type: llm_call
    config: { prompt: "one" }
    outputs: [text]
  - id: b
    type: llm_call
    config: { prompt: "uses {{a.text}}" }
"#,
        );
        assert_eq!(
            errors,
            vec![ValidationError::NotUpstream {
                step_id: "b".into(),
                reference: "a.text".into(),
                source_step: "a".into(),
            }]
        );
    }

    #[test]
    fn test_undeclared_output_rejected() {
        let errors = validation_errors(
            r#"
name: outputs
steps:
  - id: a
    type: llm_call
    config: { prompt: "one" }
    outputs: [text]
  - id: b
    type: llm_call
    depends_on: [a]
    config: { prompt: "uses {{a.output}} and {{a.text}}" }
"#,
        );
        assert_eq!(
            errors,
            vec![ValidationError::UnresolvedReference {
                step_id: "b".into(),
                reference: "a.output".into(),
            }]
        );
    }

    #[test]
    fn test_default_output_name_resolves() {
        let errors = validation_errors(
            r#"
name: default-output
steps:
  - id: a
    type: llm_call
    config: { prompt: "one" }
  - id: b
    type: llm_call
    depends_on: [a]
    config: { prompt: "uses {{a.output}}" }
"#,
        );
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn test_malformed_template_reported() {
        let errors = validation_errors(
            r#"
name: broken
steps:
  - id: a
    type: llm_call
    config: { prompt: "oops {{ topic" }
"#,
        );
        assert!(matches!(
            errors.as_slice(),
            [ValidationError::MalformedTemplate { step_id, .. }] if step_id == "a"
        ));
    }

    #[test]
    fn test_all_problems_reported_together() {
        let errors = validation_errors(
            r#"
name: ""
steps:
  - id: a
    type: action
    config: { action: delay }
  - id: a
    type: nonsense
  - id: "b.c"
    type: llm_call
    depends_on: [zzz]
    config: { prompt: "{{missing}}" }
"#,
        );
        assert!(errors.contains(&ValidationError::MissingName));
        assert!(errors.contains(&ValidationError::DuplicateStepId("a".into())));
        assert!(errors.contains(&ValidationError::InvalidStepId("b.c".into())));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnknownStepType { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnknownDependency { .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::UnresolvedReference { .. })));
        assert!(matches!(
            load_workflow("name: ''\nsteps: []"),
            Err(WorkflowError::Validation(errs)) if errs.len() == 2
        ));
    }
}
