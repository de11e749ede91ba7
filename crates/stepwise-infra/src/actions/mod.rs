//! Built-in action handlers that need I/O.
//!
//! `delay` lives in `stepwise-core`; `http` and `file_write` live here.

pub mod file_write;
pub mod http;

use std::time::Duration;

use stepwise_core::action::ActionRegistry;
use stepwise_core::action::delay::DelayAction;
use stepwise_types::config::EngineConfig;

use self::file_write::FileWriteAction;
use self::http::HttpAction;

/// Registry pre-populated with every built-in action.
///
/// Callers may register more handlers on the returned registry before
/// handing it to the engine.
pub fn builtin_registry(config: &EngineConfig) -> Result<ActionRegistry, reqwest::Error> {
    let mut registry = ActionRegistry::new();
    registry.register("delay", DelayAction);
    registry.register(
        "http",
        HttpAction::new(Duration::from_secs(config.http_timeout_secs))?,
    );
    registry.register("file_write", FileWriteAction);
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names() {
        let registry = builtin_registry(&EngineConfig::default()).unwrap();
        assert_eq!(registry.names(), vec!["delay", "file_write", "http"]);
    }
}
