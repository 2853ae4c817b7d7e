use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::BlocksError;
use crate::validator::ValidationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Uniform `{status, ...}` response returned by every public operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub status: Status,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Envelope {
    pub fn success() -> Self {
        Self {
            status: Status::Success,
            fields: Map::new(),
        }
    }

    /// Success envelope carrying a handler value: objects are flattened, anything
    /// else lands under `result`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(mut fields) => {
                fields.remove("status");
                Self {
                    status: Status::Success,
                    fields,
                }
            }
            other => Self::success().with("result", other),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            fields: Map::new(),
        }
        .with("message", Value::String(message.into()))
    }

    pub fn invalid(report: ValidationReport) -> Self {
        Self {
            status: Status::Error,
            fields: Map::new(),
        }
        .with("validation", json!(report))
    }

    pub fn from_error(err: &BlocksError) -> Self {
        match err {
            BlocksError::ValidationFailed(errors) => {
                Self::invalid(ValidationReport::from_errors(errors.clone()))
            }
            other => Self::error(other.envelope_message()),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn message(&self) -> Option<&str> {
        self.fields.get("message").and_then(Value::as_str)
    }

    pub fn validation(&self) -> Option<ValidationReport> {
        self.fields
            .get("validation")
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn into_value(self) -> Value {
        let mut body = Map::new();
        body.insert("status".into(), json!(self.status));
        body.extend(self.fields);
        Value::Object(body)
    }
}

impl From<crate::error::Result<Envelope>> for Envelope {
    fn from(result: crate::error::Result<Envelope>) -> Self {
        result.unwrap_or_else(|err| Envelope::from_error(&err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_flat() {
        let envelope = Envelope::success().with("result", json!(5));
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({"status": "success", "result": 5})
        );
        assert_eq!(envelope.into_value(), json!({"status": "success", "result": 5}));
    }

    #[test]
    fn handler_objects_are_flattened_without_status_override() {
        let envelope = Envelope::from_value(json!({"status": "error", "sum": 3}));
        assert!(envelope.is_success());
        assert_eq!(envelope.get("sum"), Some(&json!(3)));
    }

    #[test]
    fn validation_errors_round_trip() {
        let report = ValidationReport::from_errors(vec!["x: bad".into()]);
        let envelope = Envelope::invalid(report.clone());
        assert_eq!(
            envelope.clone().into_value(),
            json!({"status": "error", "validation": {"valid": false, "errors": ["x: bad"]}})
        );
        assert_eq!(envelope.validation(), Some(report));
    }

    #[test]
    fn not_found_message_uses_noun() {
        let envelope = Envelope::from_error(&BlocksError::not_found("tool", "nope"));
        assert_eq!(envelope.message(), Some("Tool not found"));
    }
}
