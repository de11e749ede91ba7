//! `file_write` action: write (or append) rendered content to a file.
//!
//! Params: `path` (required), `content` (strings written as-is, other JSON
//! pretty-printed), `append` (default false), `create_dirs` (default true).
//! Returns `{path, bytes_written}`.

use std::io::ErrorKind;
use std::path::PathBuf;

use serde_json::{Map, Value, json};
use stepwise_core::action::ActionHandler;
use stepwise_types::error::ActionError;
use tokio::io::AsyncWriteExt;

pub struct FileWriteAction;

fn flag(params: &Map<String, Value>, key: &str, default: bool) -> Result<bool, ActionError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| ActionError::Configuration(format!("'{key}' must be true or false"))),
        Some(other) => Err(ActionError::Configuration(format!(
            "'{key}' must be a boolean, got {other}"
        ))),
    }
}

fn io_error(path: &std::path::Path, e: std::io::Error) -> ActionError {
    let message = format!("{}: {e}", path.display());
    match e.kind() {
        ErrorKind::Interrupted | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
            ActionError::Transient(message)
        }
        _ => ActionError::Permanent(message),
    }
}

impl ActionHandler for FileWriteAction {
    async fn handle(&self, params: &Map<String, Value>) -> Result<Value, ActionError> {
        let path = params
            .get("path")
            .and_then(Value::as_str)
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| ActionError::Configuration("file_write requires a 'path' string".into()))?;

        let content = match params.get("content") {
            None => {
                return Err(ActionError::Configuration(
                    "file_write requires 'content'".into(),
                ));
            }
            Some(Value::String(s)) => s.clone(),
            Some(other) => serde_json::to_string_pretty(other)
                .map_err(|e| ActionError::Permanent(format!("cannot serialize content: {e}")))?,
        };
        let append = flag(params, "append", false)?;
        let create_dirs = flag(params, "create_dirs", true)?;

        if create_dirs {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| io_error(parent, e))?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)
            .await
            .map_err(|e| io_error(&path, e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| io_error(&path, e))?;
        file.flush().await.map_err(|e| io_error(&path, e))?;

        tracing::info!(path = %path.display(), bytes = content.len(), append, "Wrote file");

        Ok(json!({
            "path": path.display().to_string(),
            "bytes_written": content.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/nested/report.md");

        let out = FileWriteAction
            .handle(&params(json!({
                "path": path.to_str().unwrap(),
                "content": "# Report",
            })))
            .await
            .unwrap();

        assert_eq!(out["bytes_written"], json!(8));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Report");
    }

    #[tokio::test]
    async fn test_overwrite_then_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");
        let p = path.to_str().unwrap();

        FileWriteAction
            .handle(&params(json!({"path": p, "content": "first\n"})))
            .await
            .unwrap();
        FileWriteAction
            .handle(&params(json!({"path": p, "content": "second\n"})))
            .await
            .unwrap();
        FileWriteAction
            .handle(&params(json!({"path": p, "content": "third\n", "append": "true"})))
            .await
            .unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second\nthird\n");
    }

    #[tokio::test]
    async fn test_structured_content_is_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        FileWriteAction
            .handle(&params(json!({
                "path": path.to_str().unwrap(),
                "content": {"a": [1, 2]},
            })))
            .await
            .unwrap();
        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written, json!({"a": [1, 2]}));
    }

    #[tokio::test]
    async fn test_missing_parent_without_create_dirs_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent/file.txt");
        let err = FileWriteAction
            .handle(&params(json!({
                "path": path.to_str().unwrap(),
                "content": "x",
                "create_dirs": false,
            })))
            .await
            .unwrap_err();
        assert!(matches!(err, ActionError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_missing_params_are_configuration_errors() {
        let err = FileWriteAction.handle(&params(json!({"content": "x"}))).await.unwrap_err();
        assert!(matches!(err, ActionError::Configuration(_)));
        let err = FileWriteAction.handle(&params(json!({"path": "/tmp/x"}))).await.unwrap_err();
        assert!(matches!(err, ActionError::Configuration(_)));
    }
}
