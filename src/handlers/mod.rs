//! Standard handlers, one per item kind.
//!
//! - Calculator: arithmetic on two operands
//! - Data processor: aggregates over numeric arrays
//! - Prompt: placeholder rendering for prompt templates
//! - Sampling: seeded sampling strategies
//! - Roots: memory, file system and network roots
//! - Resource: file-backed resources addressed by item

pub mod calculator;
pub mod data;
pub mod prompt;
pub mod resource;
pub mod roots;
pub mod sampling;

pub use calculator::CalculatorHandler;
pub use data::DataProcessorHandler;
pub use prompt::PromptHandler;
pub use resource::ResourceHandler;
pub use roots::{FileRootHandler, MemoryRootHandler, NetworkRootHandler};
pub use sampling::SamplingHandler;

use serde_json::{json, Map, Value};

use crate::capabilities::Capabilities;
use crate::dispatch::Dispatcher;
use crate::error::{BlocksError, Result};
use crate::schema::as_number;

/// Dispatcher with every standard handler registered against `capabilities`.
pub fn standard_dispatcher(capabilities: &Capabilities, sampling_seed: Option<u64>) -> Dispatcher {
    let sampling = match sampling_seed {
        Some(seed) => SamplingHandler::seeded(seed),
        None => SamplingHandler::new(),
    };
    Dispatcher::new()
        .with(CalculatorHandler)
        .with(DataProcessorHandler)
        .with(PromptHandler)
        .with(sampling)
        .with(MemoryRootHandler::new(capabilities.memory.clone()))
        .with(FileRootHandler::new(capabilities.files.clone()))
        .with(NetworkRootHandler::new(capabilities.network.clone()))
        .with(ResourceHandler::new(capabilities.files.clone()))
}

pub(crate) fn number_arg(payload: &Map<String, Value>, field: &str, kind: &str) -> Result<f64> {
    payload
        .get(field)
        .and_then(as_number)
        .ok_or_else(|| BlocksError::handler(kind, format!("missing `{field}` for {kind}")))
}

pub(crate) fn str_arg<'a>(payload: &'a Map<String, Value>, field: &str, kind: &str) -> Result<&'a str> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| BlocksError::handler(kind, format!("missing `{field}` for {kind}")))
}

pub(crate) fn count_arg(payload: &Map<String, Value>, field: &str, kind: &str) -> Result<usize> {
    let number = number_arg(payload, field, kind)?;
    if number < 0.0 || number.fract() != 0.0 {
        return Err(BlocksError::handler(
            kind,
            format!("`{field}` must be a non-negative integer"),
        ));
    }
    Ok(number as usize)
}

/// JSON number, written as an integer when it has no fractional part.
pub(crate) fn number_value(number: f64) -> Value {
    if number.fract() == 0.0 && number.abs() < 9.0e15 {
        json!(number as i64)
    } else {
        json!(number)
    }
}
