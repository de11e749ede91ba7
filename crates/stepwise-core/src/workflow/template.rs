//! `{{ name }}` template rendering.
//!
//! Names are workflow variables or `<step_id>.<output>` bindings. A name may
//! continue past a binding into structured data: with `fetch.content` bound
//! to `{"title": "x"}`, `{{ fetch.content.title }}` renders `x`. Array
//! elements are addressed by index (`items.0`).
//!
//! Rendering is a pure function of the template and the bindings.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Errors from template parsing or rendering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("unterminated placeholder starting at byte {0}")]
    Unterminated(usize),

    #[error("empty placeholder at byte {0}")]
    EmptyPlaceholder(usize),

    #[error("unresolved reference '{0}'")]
    Unresolved(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Reference(&'a str),
}

fn parse(template: &str) -> Result<Vec<Segment<'_>>, RenderError> {
    let mut segments = Vec::new();
    let mut rest = template;
    let mut offset = 0;

    while let Some(start) = rest.find(OPEN) {
        if start > 0 {
            segments.push(Segment::Literal(&rest[..start]));
        }
        let after_open = &rest[start + OPEN.len()..];
        let end = after_open
            .find(CLOSE)
            .ok_or(RenderError::Unterminated(offset + start))?;
        let name = after_open[..end].trim();
        if name.is_empty() {
            return Err(RenderError::EmptyPlaceholder(offset + start));
        }
        segments.push(Segment::Reference(name));

        let consumed = start + OPEN.len() + end + CLOSE.len();
        offset += consumed;
        rest = &rest[consumed..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    Ok(segments)
}

/// Names referenced by a template, in order of appearance (duplicates kept).
pub fn references(template: &str) -> Result<Vec<&str>, RenderError> {
    Ok(parse(template)?
        .into_iter()
        .filter_map(|s| match s {
            Segment::Reference(name) => Some(name),
            Segment::Literal(_) => None,
        })
        .collect())
}

/// Every template string inside a JSON value (recursing into maps and lists).
pub fn template_strings(value: &Value) -> Vec<&str> {
    let mut out = Vec::new();
    collect_strings(value, &mut out);
    out
}

fn collect_strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Look up `name` in `bindings`, descending into structured values when the
/// full name is not itself bound.
pub fn resolve<'a>(name: &str, bindings: &'a BTreeMap<String, Value>) -> Option<&'a Value> {
    if let Some(value) = bindings.get(name) {
        return Some(value);
    }
    // Longest bound prefix wins: "a.b.c" tries "a.b" then "a".
    let mut cut = name.len();
    while let Some(dot) = name[..cut].rfind('.') {
        if let Some(base) = bindings.get(&name[..dot]) {
            return descend(base, &name[dot + 1..]);
        }
        cut = dot;
    }
    None
}

fn descend<'a>(mut value: &'a Value, path: &str) -> Option<&'a Value> {
    for key in path.split('.') {
        value = match value {
            Value::Object(map) => map.get(key)?,
            Value::Array(items) => items.get(key.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(value)
}

/// Whether `name` is `bound` itself or a path below it.
pub fn is_bound_by(name: &str, bound: &str) -> bool {
    name == bound
        || name
            .strip_prefix(bound)
            .is_some_and(|rest| rest.starts_with('.'))
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

/// Substitute every placeholder in `template`.
pub fn render(template: &str, bindings: &BTreeMap<String, Value>) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.len());
    for segment in parse(template)? {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Reference(name) => {
                let value =
                    resolve(name, bindings).ok_or_else(|| RenderError::Unresolved(name.to_string()))?;
                out.push_str(&value_to_string(value));
            }
        }
    }
    Ok(out)
}

/// Render every string leaf of a JSON value.
///
/// A string that is exactly one placeholder is replaced by the bound value
/// itself, keeping its JSON type.
pub fn render_value(value: &Value, bindings: &BTreeMap<String, Value>) -> Result<Value, RenderError> {
    Ok(match value {
        Value::String(s) => match parse(s)?.as_slice() {
            [Segment::Reference(name)] => resolve(name, bindings)
                .cloned()
                .ok_or_else(|| RenderError::Unresolved(name.to_string()))?,
            _ => Value::String(render(s, bindings)?),
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| render_value(v, bindings))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => Value::Object(render_map(map, bindings)?),
        other => other.clone(),
    })
}

/// Render every string leaf of a parameter map.
pub fn render_map(
    map: &Map<String, Value>,
    bindings: &BTreeMap<String, Value>,
) -> Result<Map<String, Value>, RenderError> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), render_value(v, bindings)?)))
        .collect()
}

/// Convert a JSON value to its template display form.
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        // For objects/arrays, return compact JSON
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
