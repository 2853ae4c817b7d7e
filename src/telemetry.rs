use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::TelemetryConfig;
use crate::error::{BlocksError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub kind: String,
    pub timestamp: SystemTime,
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub context: String,
    pub error: String,
}

/// In-process event sink shared by clones. Engines record lifecycle events
/// here; callers inspect them with [`TelemetryCollector::drain`].
#[derive(Default, Clone)]
pub struct TelemetryCollector {
    events: Arc<Mutex<Vec<TelemetryEvent>>>,
    failures: Arc<Mutex<Vec<FailureRecord>>>,
}

impl TelemetryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, kind: impl Into<String>, detail: serde_json::Value) {
        if let Ok(mut events) = self.events.lock() {
            events.push(TelemetryEvent {
                kind: kind.into(),
                timestamp: SystemTime::now(),
                detail,
            });
        }
    }

    pub fn record_failure(&self, context: impl Into<String>, error: impl Into<String>) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(FailureRecord {
                context: context.into(),
                error: error.into(),
            });
        }
    }

    pub fn count(&self, kind: &str) -> usize {
        self.events
            .lock()
            .map(|events| events.iter().filter(|event| event.kind == kind).count())
            .unwrap_or(0)
    }

    pub fn drain(&self) -> (Vec<TelemetryEvent>, Vec<FailureRecord>) {
        let events = self
            .events
            .lock()
            .map(|mut events| std::mem::take(&mut *events))
            .unwrap_or_default();
        let failures = self
            .failures
            .lock()
            .map(|mut failures| std::mem::take(&mut *failures))
            .unwrap_or_default();
        (events, failures)
    }
}

/// Installs the global tracing subscriber. `RUST_LOG` wins over the configured filter.
pub fn init_tracing(service_name: &str, config: &TelemetryConfig) -> Result<()> {
    let fallback = config
        .filter
        .clone()
        .unwrap_or_else(|| format!("{}=info,mcp_blocks=info", service_name.replace('-', "_")));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };
    installed.map_err(|err| BlocksError::Config(format!("tracing already initialised: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn drain_empties_collector() {
        let telemetry = TelemetryCollector::new();
        telemetry.record("execute", json!({"id": "calc"}));
        telemetry.record("execute", json!({"id": "calc"}));
        telemetry.record_failure("calculator", "Division by zero");
        assert_eq!(telemetry.count("execute"), 2);

        let (events, failures) = telemetry.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(failures[0].error, "Division by zero");
        assert!(telemetry.drain().0.is_empty());
    }

    #[test]
    fn clones_share_events() {
        let telemetry = TelemetryCollector::new();
        let clone = telemetry.clone();
        clone.record("validation_failed", json!({}));
        assert_eq!(telemetry.count("validation_failed"), 1);
    }
}
