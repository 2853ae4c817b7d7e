//! Field and constraint vocabulary shared by the catalog and the validator.
//!
//! A [`Schema`] is an ordered list of named [`FieldSpec`]s. Each spec declares a
//! [`FieldType`], whether the field is required, and a list of [`Constraint`]s.
//! Constraints form a closed set; every variant is checked through the same
//! [`Constraint::check`] contract.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use fancy_regex::Regex;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{BlocksError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    pub const ALL: [FieldType; 5] = [
        FieldType::String,
        FieldType::Number,
        FieldType::Boolean,
        FieldType::Array,
        FieldType::Object,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }

    /// Type check for a present value. Numbers accept numeric-looking strings.
    pub fn check(&self, field: &str, value: &Value) -> Option<Violation> {
        let accepted = match self {
            FieldType::String => value.is_string(),
            FieldType::Number => as_number(value).is_some(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
        };
        if accepted {
            None
        } else {
            Some(Violation::type_mismatch(format!(
                "{field}: expected {}, got {}",
                self.name(),
                json_type_name(value)
            )))
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Declared rules for one parameter of an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Constraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Descriptive only; never injected into payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            constraints: Vec::new(),
            description: None,
            default: None,
        }
    }

    pub fn string() -> Self {
        Self::new(FieldType::String)
    }

    pub fn number() -> Self {
        Self::new(FieldType::Number)
    }

    pub fn boolean() -> Self {
        Self::new(FieldType::Boolean)
    }

    pub fn array() -> Self {
        Self::new(FieldType::Array)
    }

    pub fn object() -> Self {
        Self::new(FieldType::Object)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Closed set of checkable rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Constraint {
    MinLength {
        value: usize,
    },
    MaxLength {
        value: usize,
    },
    /// Regular expression anchored at the start of the value.
    Pattern {
        regex: String,
    },
    Range {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    OneOf {
        values: Vec<Value>,
    },
    /// Value must equal the one submitted under `field` in the same payload.
    Matches {
        field: String,
    },
    Integer,
    NonEmpty,
    /// Applies the nested constraints to every array element or object value.
    Each {
        constraints: Vec<Constraint>,
    },
}

impl Constraint {
    pub fn min_length(value: usize) -> Self {
        Constraint::MinLength { value }
    }

    pub fn max_length(value: usize) -> Self {
        Constraint::MaxLength { value }
    }

    pub fn pattern(regex: impl Into<String>) -> Self {
        Constraint::Pattern {
            regex: regex.into(),
        }
    }

    pub fn range(min: Option<f64>, max: Option<f64>) -> Self {
        Constraint::Range { min, max }
    }

    pub fn at_least(min: f64) -> Self {
        Constraint::Range {
            min: Some(min),
            max: None,
        }
    }

    pub fn one_of<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Constraint::OneOf {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(field: impl Into<String>) -> Self {
        Constraint::Matches {
            field: field.into(),
        }
    }

    pub fn each(constraints: Vec<Constraint>) -> Self {
        Constraint::Each { constraints }
    }

    /// Checks one submitted value. `payload` is the full submission, used by
    /// cross-field rules.
    pub fn check(
        &self,
        field: &str,
        value: &Value,
        payload: &Map<String, Value>,
        patterns: &PatternCache,
    ) -> Option<Violation> {
        match self {
            Constraint::MinLength { value: min } => {
                let len = measure(value)?;
                (len < *min).then(|| {
                    Violation::constraint(format!(
                        "{field}: minimum length is {min} (got {len})"
                    ))
                })
            }
            Constraint::MaxLength { value: max } => {
                let len = measure(value)?;
                (len > *max).then(|| {
                    Violation::constraint(format!(
                        "{field}: maximum length is {max} (got {len})"
                    ))
                })
            }
            Constraint::Pattern { regex } => {
                let Some(text) = scalar_text(value) else {
                    return Some(Violation::type_mismatch(format!(
                        "{field}: expected string, got {}",
                        json_type_name(value)
                    )));
                };
                match patterns.compile(regex) {
                    Ok(compiled) => match compiled.find(&text) {
                        Ok(found) if found.is_some_and(|m| m.start() == 0) => None,
                        Ok(_) => Some(Violation::constraint(format!(
                            "{field}: value does not match pattern '{regex}'"
                        ))),
                        // Backtrack limit exceeded.
                        Err(err) => Some(Violation::constraint(format!(
                            "{field}: pattern '{regex}' could not be evaluated: {err}"
                        ))),
                    },
                    Err(err) => Some(Violation::constraint(format!("{field}: {err}"))),
                }
            }
            Constraint::Range { min, max } => {
                let Some(number) = as_number(value) else {
                    return Some(Violation::type_mismatch(format!(
                        "{field}: expected number, got {}",
                        json_type_name(value)
                    )));
                };
                if let Some(min) = min {
                    if number < *min {
                        return Some(Violation::constraint(format!(
                            "{field}: value {} is below minimum {}",
                            format_number(number),
                            format_number(*min)
                        )));
                    }
                }
                if let Some(max) = max {
                    if number > *max {
                        return Some(Violation::constraint(format!(
                            "{field}: value {} is above maximum {}",
                            format_number(number),
                            format_number(*max)
                        )));
                    }
                }
                None
            }
            Constraint::OneOf { values } => {
                if values.iter().any(|allowed| loosely_equal(allowed, value)) {
                    None
                } else {
                    Some(Violation::constraint(format!(
                        "{field}: value {} not in {}",
                        quoted_repr(value),
                        bracketed_list(values)
                    )))
                }
            }
            Constraint::Matches { field: other } => {
                let reference = payload.get(other).filter(|v| !v.is_null())?;
                let same = match (scalar_text(reference), scalar_text(value)) {
                    (Some(expected), Some(actual)) => expected == actual,
                    _ => reference == value,
                };
                if same {
                    None
                } else {
                    Some(Violation::constraint(format!(
                        "{field}: value does not match field '{other}'"
                    )))
                }
            }
            Constraint::Integer => {
                let Some(number) = as_number(value) else {
                    return Some(Violation::type_mismatch(format!(
                        "{field}: expected integer, got {}",
                        json_type_name(value)
                    )));
                };
                (number.fract() != 0.0)
                    .then(|| Violation::constraint(format!("{field}: must be an integer")))
            }
            Constraint::NonEmpty => {
                let empty = match value {
                    Value::Null => true,
                    Value::String(text) => text.trim().is_empty(),
                    Value::Array(items) => items.is_empty(),
                    Value::Object(entries) => entries.is_empty(),
                    _ => false,
                };
                empty.then(|| Violation::constraint(format!("{field}: must not be empty")))
            }
            Constraint::Each { constraints } => match value {
                Value::Array(items) => items.iter().enumerate().find_map(|(idx, item)| {
                    let label = format!("{field}[{idx}]");
                    constraints
                        .iter()
                        .find_map(|c| c.check(&label, item, payload, patterns))
                }),
                Value::Object(entries) => entries.iter().find_map(|(key, item)| {
                    let label = format!("{field}.{key}");
                    constraints
                        .iter()
                        .find_map(|c| c.check(&label, item, payload, patterns))
                }),
                other => Some(Violation::type_mismatch(format!(
                    "{field}: expected array or object, got {}",
                    json_type_name(other)
                ))),
            },
        }
    }

    fn verify(&self, field: &str) -> Result<()> {
        match self {
            Constraint::Pattern { regex } => Regex::new(regex)
                .map(|_| ())
                .map_err(|err| BlocksError::InvalidSchema {
                    field: field.to_string(),
                    message: err.to_string(),
                }),
            Constraint::Range {
                min: Some(min),
                max: Some(max),
            } if min > max => Err(BlocksError::InvalidSchema {
                field: field.to_string(),
                message: format!("range minimum {min} exceeds maximum {max}"),
            }),
            Constraint::Each { constraints } => {
                constraints.iter().try_for_each(|c| c.verify(field))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationKind {
    Type,
    Constraint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub kind: ViolationKind,
    pub message: String,
}

impl Violation {
    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self {
            kind: ViolationKind::Type,
            message: message.into(),
        }
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self {
            kind: ViolationKind::Constraint,
            message: message.into(),
        }
    }
}

/// Compiled regular expressions keyed by their source text.
#[derive(Debug, Default)]
pub struct PatternCache {
    compiled: RwLock<HashMap<String, Regex>>,
}

impl PatternCache {
    pub fn compile(&self, source: &str) -> Result<Regex> {
        if let Ok(cache) = self.compiled.read() {
            if let Some(regex) = cache.get(source) {
                return Ok(regex.clone());
            }
        }
        let regex = Regex::new(source).map_err(|err| BlocksError::InvalidSchema {
            field: String::new(),
            message: format!("invalid pattern '{source}': {err}"),
        })?;
        if let Ok(mut cache) = self.compiled.write() {
            cache.insert(source.to_string(), regex.clone());
        }
        Ok(regex)
    }

    pub fn len(&self) -> usize {
        self.compiled.read().map(|cache| cache.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordered mapping from field name to [`FieldSpec`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: Vec<(String, FieldSpec)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.insert(name, spec);
        self
    }

    /// Inserts or replaces a field, keeping the original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, spec: FieldSpec) {
        let name = name.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = spec,
            None => self.fields.push((name, spec)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, spec)| spec)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, spec)| spec.required)
            .map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Rejects schemas whose constraints can never be evaluated.
    pub fn verify(&self) -> Result<()> {
        for (name, spec) in &self.fields {
            for constraint in &spec.constraints {
                constraint.verify(name)?;
            }
        }
        Ok(())
    }
}

impl FromIterator<(String, FieldSpec)> for Schema {
    fn from_iter<T: IntoIterator<Item = (String, FieldSpec)>>(iter: T) -> Self {
        let mut schema = Schema::new();
        for (name, spec) in iter {
            schema.insert(name, spec);
        }
        schema
    }
}

impl Serialize for Schema {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, spec) in &self.fields {
            map.serialize_entry(name, spec)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Schema {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SchemaVisitor;

        impl<'de> Visitor<'de> for SchemaVisitor {
            type Value = Schema;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field names to field specs")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Schema, A::Error> {
                let mut schema = Schema::new();
                while let Some((name, spec)) = access.next_entry::<String, FieldSpec>()? {
                    schema.insert(name, spec);
                }
                Ok(schema)
            }
        }

        deserializer.deserialize_map(SchemaVisitor)
    }
}

/// One step of a session-bearing template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub title: String,
    #[serde(default)]
    pub schema: Schema,
}

impl StepDefinition {
    pub fn new(title: impl Into<String>, schema: Schema) -> Self {
        Self {
            title: title.into(),
            schema,
        }
    }
}

// Value helpers

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Numeric view of a value; numeric-looking strings are coerced.
pub fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// String form of scalar values; arrays, objects and null have none.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn measure(value: &Value) -> Option<usize> {
    match value {
        Value::Array(items) => Some(items.len()),
        Value::Object(entries) => Some(entries.len()),
        other => scalar_text(other).map(|text| text.chars().count()),
    }
}

fn loosely_equal(expected: &Value, actual: &Value) -> bool {
    if expected == actual {
        return true;
    }
    match (expected, actual) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => false,
    }
}

fn format_number(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        number.to_string()
    }
}

pub(crate) fn quoted_repr(value: &Value) -> String {
    match value {
        Value::String(text) => format!("'{text}'"),
        other => other.to_string(),
    }
}

pub(crate) fn bracketed_list<'a>(values: impl IntoIterator<Item = &'a Value>) -> String {
    let rendered: Vec<String> = values.into_iter().map(quoted_repr).collect();
    format!("[{}]", rendered.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn check(constraint: &Constraint, value: Value) -> Option<Violation> {
        constraint.check("f", &value, &Map::new(), &PatternCache::default())
    }

    #[test]
    fn number_type_accepts_numeric_strings() {
        assert!(FieldType::Number.check("n", &json!("42.5")).is_none());
        let violation = FieldType::Number.check("n", &json!("forty")).unwrap();
        assert_eq!(violation.kind, ViolationKind::Type);
        assert_eq!(violation.message, "n: expected number, got string");
    }

    #[test]
    fn pattern_is_anchored_at_start() {
        let rule = Constraint::pattern("[a-z]+");
        assert!(check(&rule, json!("abc1")).is_none());
        assert!(check(&rule, json!("1abc")).is_some());
        let violation = check(&rule, json!(["a"])).unwrap();
        assert_eq!(violation.kind, ViolationKind::Type);
    }

    #[test]
    fn pattern_supports_lookahead() {
        let rule = Constraint::pattern(r"^(?=.*[a-z])(?=.*[A-Z])(?=.*\d)");
        assert!(rule.verify("password").is_ok());
        assert!(check(&rule, json!("Secret12")).is_none());
        assert!(check(&rule, json!("aaaaaaaa")).is_some());
        assert!(check(&rule, json!("AAAA1111")).is_some());
    }

    #[test]
    fn range_reports_type_for_non_numeric() {
        let rule = Constraint::range(Some(13.0), Some(120.0));
        assert!(check(&rule, json!("30")).is_none());
        assert_eq!(
            check(&rule, json!(5)).unwrap().message,
            "f: value 5 is below minimum 13"
        );
        assert_eq!(check(&rule, json!(true)).unwrap().kind, ViolationKind::Type);
    }

    #[test]
    fn one_of_formats_like_a_list() {
        let rule = Constraint::one_of(["add", "sub"]);
        assert_eq!(
            check(&rule, json!("bogus")).unwrap().message,
            "f: value 'bogus' not in ['add', 'sub']"
        );
        let numeric = Constraint::one_of([1, 2]);
        assert!(check(&numeric, json!(2.0)).is_none());
    }

    #[test]
    fn matches_skips_when_reference_absent() {
        let rule = Constraint::matches("password");
        let cache = PatternCache::default();
        let empty = Map::new();
        assert!(rule.check("confirm", &json!("x"), &empty, &cache).is_none());

        let payload = json!({"password": "Secret1x"});
        let payload = payload.as_object().unwrap();
        assert!(rule
            .check("confirm", &json!("Secret1x"), payload, &cache)
            .is_none());
        assert!(rule.check("confirm", &json!("other"), payload, &cache).is_some());
    }

    #[test]
    fn matches_compares_text_forms() {
        let rule = Constraint::matches("pin");
        let cache = PatternCache::default();
        let payload = json!({"pin": "1234"});
        let payload = payload.as_object().unwrap();
        assert!(rule.check("confirm", &json!(1234), payload, &cache).is_none());
        assert!(rule.check("confirm", &json!("1234"), payload, &cache).is_none());
        assert!(rule.check("confirm", &json!(1234.5), payload, &cache).is_some());
    }

    #[test]
    fn each_labels_offending_element() {
        let rule = Constraint::each(vec![Constraint::Integer, Constraint::at_least(1.0)]);
        assert!(check(&rule, json!([1, 2, 3])).is_none());
        assert_eq!(
            check(&rule, json!([1, 0])).unwrap().message,
            "f[1]: value 0 is below minimum 1"
        );
        assert_eq!(
            check(&rule, json!({"a": 2.5})).unwrap().message,
            "f.a: must be an integer"
        );
    }

    #[test]
    fn schema_preserves_declaration_order_through_serde() {
        let raw = r#"{"zeta": {"type": "string"}, "alpha": {"type": "number", "required": true}}"#;
        let schema: Schema = serde_json::from_str(raw).unwrap();
        assert_eq!(schema.names(), vec!["zeta".to_string(), "alpha".to_string()]);
        let encoded = serde_json::to_string(&schema).unwrap();
        assert!(encoded.find("zeta").unwrap() < encoded.find("alpha").unwrap());
    }

    #[test]
    fn constraint_serde_uses_rule_tag() {
        let rule: Constraint =
            serde_json::from_value(json!({"rule": "range", "min": 1})).unwrap();
        assert_eq!(rule, Constraint::at_least(1.0));
        let encoded = serde_json::to_value(Constraint::NonEmpty).unwrap();
        assert_eq!(encoded, json!({"rule": "non_empty"}));
    }

    #[test]
    fn verify_rejects_bad_patterns() {
        let schema = Schema::new().field(
            "name",
            FieldSpec::string().with(Constraint::pattern("([unclosed")),
        );
        assert!(matches!(
            schema.verify(),
            Err(BlocksError::InvalidSchema { .. })
        ));
    }
}
