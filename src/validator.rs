use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::{bracketed_list, PatternCache, Schema, ViolationKind};

/// Outcome of checking a payload against a schema. `errors` is empty iff `valid`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

/// Applies schema rules to candidate payloads.
///
/// Violations accumulate across fields: every missing required field is
/// reported in one message, and present fields are still checked.
#[derive(Debug, Default)]
pub struct Validator {
    patterns: PatternCache,
}

/// `null` and the empty string both leave a required field unanswered.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate(&self, schema: &Schema, payload: &Map<String, Value>) -> ValidationReport {
        let mut errors = Vec::new();

        let missing: Vec<Value> = schema
            .required_fields()
            .filter(|name| payload.get(*name).map_or(true, is_blank))
            .map(|name| Value::String(name.to_string()))
            .collect();
        if !missing.is_empty() {
            errors.push(format!(
                "Missing required parameters: {}",
                bracketed_list(&missing)
            ));
        }

        for (name, spec) in schema.iter() {
            let Some(value) = payload.get(name).filter(|v| !v.is_null()) else {
                continue;
            };
            if spec.required && is_blank(value) {
                continue;
            }

            let mut type_reported = false;
            if let Some(violation) = spec.field_type.check(name, value) {
                errors.push(violation.message);
                type_reported = true;
            }

            for constraint in &spec.constraints {
                let Some(violation) = constraint.check(name, value, payload, &self.patterns)
                else {
                    continue;
                };
                if violation.kind == ViolationKind::Type {
                    if type_reported {
                        continue;
                    }
                    type_reported = true;
                }
                errors.push(violation.message);
            }
        }

        ValidationReport::from_errors(errors)
    }

    /// Same as [`Validator::validate`] for an arbitrary JSON payload; non-objects
    /// are treated as empty submissions.
    pub fn validate_value(&self, schema: &Schema, payload: &Value) -> ValidationReport {
        match payload {
            Value::Object(entries) => self.validate(schema, entries),
            _ => self.validate(schema, &Map::new()),
        }
    }
}
