use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{number_value, str_arg};
use crate::catalog::ItemDefinition;
use crate::dispatch::Handler;
use crate::error::{BlocksError, Result};
use crate::schema::as_number;

const KIND: &str = "data_processor";

/// Aggregates over a numeric `data` array.
pub struct DataProcessorHandler;

#[async_trait]
impl Handler for DataProcessorHandler {
    fn kind(&self) -> &str {
        KIND
    }

    fn operations(&self) -> &[&str] {
        &["run"]
    }

    async fn handle(
        &self,
        _item: &ItemDefinition,
        _operation: &str,
        payload: &Map<String, Value>,
    ) -> Result<Value> {
        let aggregate = str_arg(payload, "operation", KIND)?;
        let data = payload
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| BlocksError::handler(KIND, "missing `data` for data_processor"))?;
        let numbers = data
            .iter()
            .map(as_number)
            .collect::<Option<Vec<f64>>>()
            .ok_or_else(|| BlocksError::handler(KIND, "`data` must contain only numbers"))?;

        let result = match aggregate {
            "sum" => number_value(numbers.iter().sum()),
            "average" if numbers.is_empty() => json!(0),
            "average" => number_value(numbers.iter().sum::<f64>() / numbers.len() as f64),
            "min" => numbers
                .iter()
                .copied()
                .reduce(f64::min)
                .map_or(Value::Null, number_value),
            "max" => numbers
                .iter()
                .copied()
                .reduce(f64::max)
                .map_or(Value::Null, number_value),
            "sort" => {
                let mut sorted = numbers.clone();
                sorted.sort_by(f64::total_cmp);
                Value::Array(sorted.into_iter().map(number_value).collect())
            }
            other => return Err(BlocksError::UnsupportedOperation(other.to_string())),
        };

        Ok(json!({
            "result": result,
            "operation": aggregate,
            "data_length": numbers.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn run(input: Value) -> Result<Value> {
        let item = ItemDefinition::new("data_processor", KIND);
        DataProcessorHandler
            .handle(&item, "run", input.as_object().unwrap())
            .await
    }

    #[tokio::test]
    async fn aggregates() {
        let sum = run(json!({"data": [1, 2, 3.5], "operation": "sum"})).await.unwrap();
        assert_eq!(sum["result"], json!(6.5));
        let avg = run(json!({"data": [2, 4], "operation": "average"})).await.unwrap();
        assert_eq!(avg["result"], json!(3));
        let empty = run(json!({"data": [], "operation": "max"})).await.unwrap();
        assert_eq!(empty["result"], Value::Null);
        let sorted = run(json!({"data": [3, 1, 2], "operation": "sort"})).await.unwrap();
        assert_eq!(sorted["result"], json!([1, 2, 3]));
        assert_eq!(sorted["data_length"], json!(3));
    }

    #[tokio::test]
    async fn non_numeric_data_is_rejected() {
        assert!(run(json!({"data": [1, "x"], "operation": "sum"})).await.is_err());
    }
}
