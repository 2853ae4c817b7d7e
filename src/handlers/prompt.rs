//! Prompt rendering.
//!
//! The prompt body lives in item metadata, shaped by `prompt_type`:
//! `text`/`template` carry a string `content`, `structured` an object `content`,
//! `multi_step` a `steps` array and `conditional` a `conditions` array whose
//! entries select on `user_type` (an entry without one is the fallback).

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::catalog::ItemDefinition;
use crate::dispatch::Handler;
use crate::error::{BlocksError, Result};
use crate::schema::scalar_text;

const KIND: &str = "prompt";

pub struct PromptHandler;

#[async_trait]
impl Handler for PromptHandler {
    fn kind(&self) -> &str {
        KIND
    }

    fn operations(&self) -> &[&str] {
        &["render"]
    }

    async fn handle(
        &self,
        item: &ItemDefinition,
        _operation: &str,
        payload: &Map<String, Value>,
    ) -> Result<Value> {
        let prompt_type = item
            .metadata
            .get("prompt_type")
            .and_then(Value::as_str)
            .unwrap_or("text");

        let rendered = match prompt_type {
            "structured" => {
                let content = item
                    .metadata
                    .get("content")
                    .ok_or_else(|| missing(item, "content"))?;
                render_value(content, payload)
            }
            "multi_step" => {
                let steps = item
                    .metadata
                    .get("steps")
                    .and_then(Value::as_array)
                    .ok_or_else(|| missing(item, "steps"))?;
                Value::Array(steps.iter().map(|step| render_value(step, payload)).collect())
            }
            "conditional" => {
                let user_type = payload
                    .get("user_type")
                    .and_then(Value::as_str)
                    .unwrap_or("default");
                let conditions = item
                    .metadata
                    .get("conditions")
                    .and_then(Value::as_array)
                    .ok_or_else(|| missing(item, "conditions"))?;
                let chosen = conditions
                    .iter()
                    .find(|entry| {
                        entry.get("user_type").and_then(Value::as_str) == Some(user_type)
                    })
                    .or_else(|| conditions.iter().find(|entry| entry.get("user_type").is_none()))
                    .and_then(|entry| entry.get("prompt"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        BlocksError::handler(KIND, format!("no branch for user_type `{user_type}`"))
                    })?;
                Value::String(substitute(chosen, payload))
            }
            _ => {
                let content = item
                    .metadata
                    .get("content")
                    .and_then(Value::as_str)
                    .ok_or_else(|| missing(item, "content"))?;
                Value::String(substitute(content, payload))
            }
        };

        Ok(json!({
            "prompt_id": item.id,
            "prompt_type": prompt_type,
            "rendered": rendered,
        }))
    }
}

fn missing(item: &ItemDefinition, key: &str) -> BlocksError {
    BlocksError::handler(KIND, format!("prompt `{}` has no `{key}`", item.id))
}

/// Replaces every `{name}` placeholder whose name is a payload key.
pub fn substitute(template: &str, variables: &Map<String, Value>) -> String {
    variables
        .iter()
        .fold(template.to_string(), |text, (name, value)| {
            let replacement = scalar_text(value).unwrap_or_else(|| value.to_string());
            text.replace(&format!("{{{name}}}"), &replacement)
        })
}

fn render_value(value: &Value, variables: &Map<String, Value>) -> Value {
    match value {
        Value::String(text) => Value::String(substitute(text, variables)),
        Value::Array(items) => Value::Array(items.iter().map(|v| render_value(v, variables)).collect()),
        Value::Object(entries) => Value::Object(
            entries
                .iter()
                .map(|(key, v)| (key.clone(), render_value(v, variables)))
                .collect(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn substitution_leaves_unknown_placeholders() {
        let text = substitute("Dear {recipient}, re: {subject}", &vars(json!({"recipient": "Ann", "count": 2})));
        assert_eq!(text, "Dear Ann, re: {subject}");
    }

    #[tokio::test]
    async fn renders_template_content() {
        let item = ItemDefinition::new("analysis", KIND)
            .with_metadata("content", json!("Analyze: {data} ({n} rows)"));
        let value = PromptHandler
            .handle(&item, "render", &vars(json!({"data": "sales", "n": 3})))
            .await
            .unwrap();
        assert_eq!(value["rendered"], json!("Analyze: sales (3 rows)"));
    }

    #[tokio::test]
    async fn conditional_falls_back_to_default_branch() {
        let item = ItemDefinition::new("explain", KIND)
            .with_metadata("prompt_type", json!("conditional"))
            .with_metadata(
                "conditions",
                json!([
                    {"user_type": "expert", "prompt": "Technical: {query}"},
                    {"prompt": "Balanced: {query}"}
                ]),
            );
        let expert = PromptHandler
            .handle(&item, "render", &vars(json!({"query": "tcp", "user_type": "expert"})))
            .await
            .unwrap();
        assert_eq!(expert["rendered"], json!("Technical: tcp"));
        let other = PromptHandler
            .handle(&item, "render", &vars(json!({"query": "tcp"})))
            .await
            .unwrap();
        assert_eq!(other["rendered"], json!("Balanced: tcp"));
    }

    #[tokio::test]
    async fn multi_step_renders_every_step() {
        let item = ItemDefinition::new("steps", KIND)
            .with_metadata("prompt_type", json!("multi_step"))
            .with_metadata(
                "steps",
                json!([{"step": 1, "prompt": "Inspect {data}"}, {"step": 2, "prompt": "Conclude"}]),
            );
        let value = PromptHandler
            .handle(&item, "render", &vars(json!({"data": "logs"})))
            .await
            .unwrap();
        assert_eq!(value["rendered"][0]["prompt"], json!("Inspect logs"));
        assert_eq!(value["rendered"][1]["step"], json!(2));
    }
}
