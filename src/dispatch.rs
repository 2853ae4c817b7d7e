use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::warn;

use crate::catalog::ItemDefinition;
use crate::envelope::Envelope;
use crate::error::{BlocksError, Result};

/// Behavior for one item kind.
///
/// Handlers see the item read-only; they act on the collaborators they were
/// built with and never touch the catalog.
#[async_trait]
pub trait Handler: Send + Sync {
    fn kind(&self) -> &str;

    fn operations(&self) -> &[&str];

    async fn handle(
        &self,
        item: &ItemDefinition,
        operation: &str,
        payload: &Map<String, Value>,
    ) -> Result<Value>;

    fn supports(&self, operation: &str) -> bool {
        self.operations().contains(&operation)
    }
}

/// Routes a validated request to the handler registered for the item's kind.
#[derive(Clone, Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn Handler>>,
    timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: Handler + 'static>(&mut self, handler: H) {
        self.register_arc(Arc::new(handler));
    }

    pub fn register_arc(&mut self, handler: Arc<dyn Handler>) {
        self.handlers.insert(handler.kind().to_string(), handler);
    }

    pub fn with<H: Handler + 'static>(mut self, handler: H) -> Self {
        self.register(handler);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn handler(&self, kind: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(kind).cloned()
    }

    pub fn supports(&self, kind: &str, operation: &str) -> bool {
        self.handlers
            .get(kind)
            .is_some_and(|handler| handler.supports(operation))
    }

    /// Invokes the handler exactly once. Failures, panics and timeouts come back
    /// as error envelopes.
    pub async fn dispatch(
        &self,
        item: &ItemDefinition,
        operation: &str,
        payload: &Map<String, Value>,
    ) -> Envelope {
        match self.invoke(item, operation, payload).await {
            Ok(value) => Envelope::from_value(value),
            Err(err) => {
                warn!(kind = %item.kind, id = %item.id, operation, error = %err, "dispatch failed");
                Envelope::from_error(&err)
            }
        }
    }

    async fn invoke(
        &self,
        item: &ItemDefinition,
        operation: &str,
        payload: &Map<String, Value>,
    ) -> Result<Value> {
        let handler = self
            .handlers
            .get(&item.kind)
            .filter(|handler| handler.supports(operation))
            .ok_or_else(|| BlocksError::UnsupportedOperation(operation.to_string()))?;

        let call = AssertUnwindSafe(handler.handle(item, operation, payload)).catch_unwind();
        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                BlocksError::Timeout {
                    kind: item.kind.clone(),
                    millis: limit.as_millis() as u64,
                }
            })?,
            None => call.await,
        };

        match outcome {
            Ok(result) => result.map_err(|err| match err {
                BlocksError::HandlerFailure { .. } | BlocksError::UnsupportedOperation(_) => err,
                other => BlocksError::handler(&item.kind, other.to_string()),
            }),
            Err(panic) => Err(BlocksError::handler(&item.kind, panic_message(&panic))),
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {text}")
    } else if let Some(text) = panic.downcast_ref::<String>() {
        format!("handler panicked: {text}")
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl Handler for EchoHandler {
        fn kind(&self) -> &str {
            "echo"
        }

        fn operations(&self) -> &[&str] {
            &["echo", "fail", "panic", "sleep"]
        }

        async fn handle(
            &self,
            _item: &ItemDefinition,
            operation: &str,
            payload: &Map<String, Value>,
        ) -> Result<Value> {
            match operation {
                "echo" => Ok(json!({ "echo": payload })),
                "fail" => Err(BlocksError::handler("echo", "simulated outage")),
                "sleep" => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok(json!("late"))
                }
                _ => panic!("boom"),
            }
        }
    }

    fn item() -> ItemDefinition {
        ItemDefinition::new("echo-1", "echo")
    }

    #[tokio::test]
    async fn dispatches_to_handler() {
        let dispatcher = Dispatcher::new().with(EchoHandler);
        let payload = json!({"x": 1}).as_object().cloned().unwrap();
        let envelope = dispatcher.dispatch(&item(), "echo", &payload).await;
        assert!(envelope.is_success());
        assert_eq!(envelope.get("echo"), Some(&json!({"x": 1})));
    }

    #[tokio::test]
    async fn unknown_operation_and_kind_are_reported() {
        let dispatcher = Dispatcher::new().with(EchoHandler);
        let envelope = dispatcher.dispatch(&item(), "shout", &Map::new()).await;
        assert_eq!(envelope.message(), Some("Unknown operation: shout"));

        let stranger = ItemDefinition::new("s", "stranger");
        let envelope = dispatcher.dispatch(&stranger, "echo", &Map::new()).await;
        assert_eq!(envelope.message(), Some("Unknown operation: echo"));
    }

    #[tokio::test]
    async fn failures_and_panics_become_error_envelopes() {
        let dispatcher = Dispatcher::new().with(EchoHandler);
        let failed = dispatcher.dispatch(&item(), "fail", &Map::new()).await;
        assert_eq!(failed.message(), Some("simulated outage"));

        let panicked = dispatcher.dispatch(&item(), "panic", &Map::new()).await;
        assert!(!panicked.is_success());
        assert_eq!(panicked.message(), Some("handler panicked: boom"));
    }

    #[tokio::test]
    async fn timeout_applies_to_handler_call() {
        let dispatcher = Dispatcher::new()
            .with(EchoHandler)
            .with_timeout(Duration::from_millis(20));
        let envelope = dispatcher.dispatch(&item(), "sleep", &Map::new()).await;
        assert_eq!(
            envelope.message(),
            Some("handler for `echo` timed out after 20ms")
        );
    }
}
