//! Calculator handler.
//!
//! `run` reads the arithmetic operation from the payload (`op` or `operation`);
//! `add`, `subtract`, `multiply` and `divide` can also be invoked directly.

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{number_arg, number_value};
use crate::catalog::ItemDefinition;
use crate::dispatch::Handler;
use crate::error::{BlocksError, Result};

const KIND: &str = "calculator";

pub struct CalculatorHandler;

#[async_trait]
impl Handler for CalculatorHandler {
    fn kind(&self) -> &str {
        KIND
    }

    fn operations(&self) -> &[&str] {
        &["run", "add", "subtract", "multiply", "divide"]
    }

    async fn handle(
        &self,
        _item: &ItemDefinition,
        operation: &str,
        payload: &Map<String, Value>,
    ) -> Result<Value> {
        let requested = if operation == "run" {
            payload
                .get("op")
                .or_else(|| payload.get("operation"))
                .and_then(Value::as_str)
                .ok_or_else(|| BlocksError::handler(KIND, "missing `op` for calculator"))?
        } else {
            operation
        };

        let a = number_arg(payload, "a", KIND)?;
        let b = number_arg(payload, "b", KIND)?;
        let result = match requested {
            "add" => a + b,
            "sub" | "subtract" => a - b,
            "mul" | "multiply" => a * b,
            "div" | "divide" => {
                if b == 0.0 {
                    return Err(BlocksError::handler(KIND, "Division by zero"));
                }
                a / b
            }
            other => return Err(BlocksError::UnsupportedOperation(other.to_string())),
        };

        Ok(json!({
            "result": number_value(result),
            "operation": requested,
            "operands": [number_value(a), number_value(b)],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn run_dispatches_on_op_field() {
        let item = ItemDefinition::new("calc", KIND);
        let value = CalculatorHandler
            .handle(&item, "run", &payload(json!({"a": 2, "b": 3, "op": "add"})))
            .await
            .unwrap();
        assert_eq!(value["result"], json!(5));
        assert_eq!(value["operands"], json!([2, 3]));
    }

    #[tokio::test]
    async fn direct_operations_and_coerced_operands() {
        let item = ItemDefinition::new("calc", KIND);
        let value = CalculatorHandler
            .handle(&item, "divide", &payload(json!({"a": "7", "b": 2})))
            .await
            .unwrap();
        assert_eq!(value["result"], json!(3.5));
    }

    #[tokio::test]
    async fn division_by_zero_fails() {
        let item = ItemDefinition::new("calc", KIND);
        let err = CalculatorHandler
            .handle(&item, "run", &payload(json!({"a": 1, "b": 0, "op": "divide"})))
            .await
            .unwrap_err();
        assert_eq!(err.envelope_message(), "Division by zero");
    }
}
