//! `http` action: one HTTP request via `reqwest`.
//!
//! Params: `url` (required), `method` (default GET), `headers` (map of
//! strings), `body` (string sent verbatim, anything else sent as JSON),
//! `timeout_secs`. Returns `{status, headers, body}`; `body` is parsed JSON
//! when the response says it is JSON, text otherwise.
//!
//! Connection failures, timeouts, 429 and 5xx are transient; other non-2xx
//! responses are permanent.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::{Map, Value, json};
use stepwise_core::action::ActionHandler;
use stepwise_types::error::ActionError;

/// Longest response body excerpt carried in an error message.
const ERROR_BODY_EXCERPT: usize = 200;

pub struct HttpAction {
    client: reqwest::Client,
    default_timeout: Duration,
}

impl HttpAction {
    pub fn new(default_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("stepwise/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            default_timeout,
        })
    }

    fn build_request(&self, params: &Map<String, Value>) -> Result<reqwest::RequestBuilder, ActionError> {
        let url = params
            .get("url")
            .and_then(Value::as_str)
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ActionError::Configuration("http requires a 'url' string".into()))?;

        let method = params.get("method").and_then(Value::as_str).unwrap_or("GET");
        let method: reqwest::Method = method
            .to_uppercase()
            .parse()
            .map_err(|_| ActionError::Configuration(format!("invalid HTTP method: {method}")))?;

        let timeout = match params.get("timeout_secs") {
            None => self.default_timeout,
            Some(v) => v
                .as_f64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
                .filter(|s| s.is_finite() && *s > 0.0)
                .map(Duration::from_secs_f64)
                .ok_or_else(|| {
                    ActionError::Configuration(format!("invalid 'timeout_secs': {v}"))
                })?,
        };

        let mut request = self.client.request(method, url).timeout(timeout);

        if let Some(headers) = params.get("headers") {
            let headers = headers.as_object().ok_or_else(|| {
                ActionError::Configuration("'headers' must be a map of strings".into())
            })?;
            for (key, value) in headers {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                request = request.header(key.as_str(), value);
            }
        }

        request = match params.get("body") {
            None | Some(Value::Null) => request,
            Some(Value::String(text)) => request.body(text.clone()),
            Some(other) => request.json(other),
        };

        Ok(request)
    }
}

impl ActionHandler for HttpAction {
    async fn handle(&self, params: &Map<String, Value>) -> Result<Value, ActionError> {
        let request = self.build_request(params)?;

        let response = request.send().await.map_err(|e| {
            if e.is_builder() {
                ActionError::Configuration(format!("invalid HTTP request: {e}"))
            } else {
                ActionError::Transient(format!("HTTP request failed: {e}"))
            }
        })?;

        let status = response.status();
        let url = response.url().to_string();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    v.to_str().unwrap_or("<binary>").to_string(),
                )
            })
            .collect();
        let is_json = headers
            .get("content-type")
            .is_some_and(|ct| ct.contains("json"));

        let text = response
            .text()
            .await
            .map_err(|e| ActionError::Transient(format!("failed to read HTTP response body: {e}")))?;

        tracing::info!(
            url = url.as_str(),
            status = status.as_u16(),
            body_len = text.len(),
            "HTTP action completed"
        );

        if !status.is_success() {
            let excerpt: String = text.chars().take(ERROR_BODY_EXCERPT).collect();
            let message = format!("{url} returned {status}: {excerpt}");
            return Err(if status.is_server_error() || status.as_u16() == 429 {
                ActionError::Transient(message)
            } else {
                ActionError::Permanent(message)
            });
        }

        let body = if is_json {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        } else {
            Value::String(text)
        };

        Ok(json!({
            "status": status.as_u16(),
            "headers": headers,
            "body": body,
        }))
    }
}
