//! String-keyed action dispatch.
//!
//! Handlers implement [`ActionHandler`] (RPITIT). The registry stores them
//! behind the object-safe [`ActionHandlerDyn`] twin, same blanket-impl
//! pattern as `BoxLlmPort`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value};
use stepwise_types::error::ActionError;

/// A named side-effecting operation invoked by `action` steps.
pub trait ActionHandler: Send + Sync {
    /// Run the action with its rendered parameter bag.
    fn handle(
        &self,
        params: &Map<String, Value>,
    ) -> impl Future<Output = Result<Value, ActionError>> + Send;
}

/// Object-safe version of [`ActionHandler`].
pub trait ActionHandlerDyn: Send + Sync {
    fn handle_boxed<'a>(
        &'a self,
        params: &'a Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ActionError>> + Send + 'a>>;
}

impl<T: ActionHandler> ActionHandlerDyn for T {
    fn handle_boxed<'a>(
        &'a self,
        params: &'a Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ActionError>> + Send + 'a>> {
        Box::pin(self.handle(params))
    }
}

/// Lookup table from action name to handler.
///
/// Populate it before handing it to the engine; the executor only reads it.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandlerDyn>>,
}

impl ActionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `name`.
    pub fn register<H: ActionHandler + 'static>(&mut self, name: impl Into<String>, handler: H) {
        let name = name.into();
        if self.handlers.insert(name.clone(), Arc::new(handler)).is_some() {
            tracing::debug!(action = %name, "Replaced action handler");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Invoke the handler registered under `name`.
    ///
    /// An unknown name is a permanent [`ActionError::Configuration`].
    pub async fn invoke(
        &self,
        name: &str,
        params: &Map<String, Value>,
    ) -> Result<Value, ActionError> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| ActionError::Configuration(format!("unknown action '{name}'")))?;
        handler.handle_boxed(params).await
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}
