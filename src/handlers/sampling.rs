use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::{Rng, SeedableRng};
use serde_json::{json, Map, Value};

use super::{count_arg, number_value};
use crate::catalog::ItemDefinition;
use crate::dispatch::Handler;
use crate::error::{BlocksError, Result};
use crate::schema::as_number;

const KIND: &str = "sampling";

/// Largest count any strategy will materialise: sizes, iterations, and the
/// total number of drawn values.
pub const MAX_SAMPLE_COUNT: usize = 1_000_000;

fn within_budget(what: &str, count: usize) -> Result<usize> {
    if count > MAX_SAMPLE_COUNT {
        return Err(BlocksError::handler(
            KIND,
            format!("`{what}` of {count} exceeds the limit of {MAX_SAMPLE_COUNT}"),
        ));
    }
    Ok(count)
}

fn bounded(payload: &Map<String, Value>, field: &str) -> Result<usize> {
    within_budget(field, count_arg(payload, field, KIND)?)
}

/// Sampling strategies selected by the item's `strategy` metadata (defaults to its id).
///
/// A seeded handler produces the same draws for the same sequence of calls.
pub struct SamplingHandler {
    rng: Mutex<StdRng>,
}

impl SamplingHandler {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn sample(&self, strategy: &str, payload: &Map<String, Value>) -> Result<Value> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| BlocksError::handler(KIND, "sampling rng poisoned"))?;
        match strategy {
            "random" => random(&mut rng, payload),
            "stratified" => stratified(&mut rng, payload),
            "systematic" => systematic(payload),
            "cluster" => cluster(&mut rng, payload),
            "adaptive" => adaptive(&mut rng, payload),
            "monte_carlo" => monte_carlo(&mut rng, payload),
            "bootstrap" => bootstrap(&mut rng, payload),
            other => Err(BlocksError::handler(KIND, format!("Unknown strategy: {other}"))),
        }
    }
}

impl Default for SamplingHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for SamplingHandler {
    fn kind(&self) -> &str {
        KIND
    }

    fn operations(&self) -> &[&str] {
        &["sample"]
    }

    async fn handle(
        &self,
        item: &ItemDefinition,
        _operation: &str,
        payload: &Map<String, Value>,
    ) -> Result<Value> {
        let strategy = item
            .metadata
            .get("strategy")
            .and_then(Value::as_str)
            .unwrap_or(item.id.as_str());
        self.sample(strategy, payload)
    }
}

fn fraction(taken: usize, population: usize) -> f64 {
    if population == 0 {
        0.0
    } else {
        taken as f64 / population as f64
    }
}

fn random(rng: &mut StdRng, payload: &Map<String, Value>) -> Result<Value> {
    let sample_size = bounded(payload, "sample_size")?;
    let population = bounded(payload, "population_size")?;
    let mut indices = index::sample(rng, population, sample_size.min(population)).into_vec();
    indices.sort_unstable();
    Ok(json!({
        "strategy": "random",
        "sample_size": indices.len(),
        "population_size": population,
        "sampling_fraction": fraction(indices.len(), population),
        "sample_indices": indices,
    }))
}

fn stratified(rng: &mut StdRng, payload: &Map<String, Value>) -> Result<Value> {
    let sample_size = bounded(payload, "sample_size")?;
    let population = bounded(payload, "population_size")?;
    let strata = payload
        .get("strata")
        .and_then(Value::as_object)
        .ok_or_else(|| BlocksError::handler(KIND, "missing `strata` for sampling"))?;

    let sizes: Vec<(&String, usize)> = strata
        .iter()
        .map(|(name, size)| (name, as_number(size).unwrap_or(0.0).max(0.0) as usize))
        .collect();
    let total = sizes
        .iter()
        .fold(0usize, |acc, (_, size)| acc.saturating_add(*size));
    within_budget("strata", total)?;

    let mut allocation = Map::new();
    let mut all_indices = Vec::new();
    for (name, size) in sizes {
        let share = fraction(size, total);
        let wanted = ((sample_size as f64) * share) as usize;
        let mut picked = index::sample(rng, size, wanted.min(size)).into_vec();
        picked.sort_unstable();
        all_indices.extend(picked.iter().copied());
        allocation.insert(name.clone(), json!(picked));
    }

    Ok(json!({
        "strategy": "stratified",
        "sample_size": all_indices.len(),
        "population_size": population,
        "strata_allocation": allocation,
        "sampling_fraction": fraction(all_indices.len(), population),
        "sample_indices": all_indices,
    }))
}

fn systematic(payload: &Map<String, Value>) -> Result<Value> {
    let interval = bounded(payload, "interval")?;
    let population = bounded(payload, "population_size")?;
    let start = match payload.get("start_index") {
        Some(_) => bounded(payload, "start_index")?,
        None => 0,
    };
    if interval == 0 {
        return Err(BlocksError::handler(KIND, "`interval` must be positive"));
    }
    let indices: Vec<usize> = (start..population).step_by(interval).collect();
    Ok(json!({
        "strategy": "systematic",
        "sample_size": indices.len(),
        "population_size": population,
        "interval": interval,
        "start_index": start,
        "sampling_fraction": fraction(indices.len(), population),
        "sample_indices": indices,
    }))
}

fn cluster(rng: &mut StdRng, payload: &Map<String, Value>) -> Result<Value> {
    let to_select = bounded(payload, "clusters_to_select")?;
    let population = bounded(payload, "population_size")?;
    let clusters: Vec<usize> = payload
        .get("clusters")
        .and_then(Value::as_array)
        .ok_or_else(|| BlocksError::handler(KIND, "missing `clusters` for sampling"))?
        .iter()
        .map(|size| as_number(size).unwrap_or(0.0).max(0.0) as usize)
        .collect();
    within_budget(
        "clusters",
        clusters.iter().fold(0usize, |acc, size| acc.saturating_add(*size)),
    )?;

    let selected = index::sample(rng, clusters.len(), to_select.min(clusters.len())).into_vec();
    let indices: Vec<usize> = selected
        .iter()
        .flat_map(|&cluster| 0..clusters[cluster])
        .collect();
    Ok(json!({
        "strategy": "cluster",
        "sample_size": indices.len(),
        "population_size": population,
        "selected_clusters": selected,
        "sampling_fraction": fraction(indices.len(), population),
        "sample_indices": indices,
    }))
}

fn adaptive(rng: &mut StdRng, payload: &Map<String, Value>) -> Result<Value> {
    let max_samples = bounded(payload, "max_samples")?;
    let threshold = payload.get("threshold").and_then(as_number).unwrap_or(0.5);
    let criteria = payload.get("criteria").cloned().unwrap_or(Value::Null);
    let indices: Vec<usize> = (0..max_samples)
        .filter(|_| rng.gen::<f64>() > threshold)
        .collect();
    Ok(json!({
        "strategy": "adaptive",
        "sample_size": indices.len(),
        "max_samples": max_samples,
        "criteria": criteria,
        "threshold": threshold,
        "sampling_fraction": fraction(indices.len(), max_samples),
        "sample_indices": indices,
    }))
}

fn monte_carlo(rng: &mut StdRng, payload: &Map<String, Value>) -> Result<Value> {
    let iterations = bounded(payload, "iterations")?;
    let distribution = payload
        .get("distribution")
        .and_then(Value::as_str)
        .unwrap_or("uniform");
    let params = payload
        .get("parameters")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let param = |name: &str, default: f64| params.get(name).and_then(as_number).unwrap_or(default);

    let samples: Vec<f64> = match distribution {
        "normal" => {
            let (mean, std) = (param("mean", 0.0), param("std", 1.0));
            (0..iterations)
                .map(|_| mean + std * standard_normal(rng))
                .collect()
        }
        "exponential" => {
            let scale = param("scale", 1.0);
            (0..iterations)
                .map(|_| -scale * (1.0 - rng.gen::<f64>()).ln())
                .collect()
        }
        "uniform" => {
            let (low, high) = (param("low", 0.0), param("high", 1.0));
            (0..iterations)
                .map(|_| low + (high - low) * rng.gen::<f64>())
                .collect()
        }
        other => {
            return Err(BlocksError::handler(
                KIND,
                format!("unsupported distribution `{other}`"),
            ))
        }
    };

    let (mean, std) = mean_and_std(&samples);
    Ok(json!({
        "strategy": "monte_carlo",
        "iterations": iterations,
        "distribution": distribution,
        "parameters": params,
        "samples": samples,
        "sample_mean": mean,
        "sample_std": std,
    }))
}

fn bootstrap(rng: &mut StdRng, payload: &Map<String, Value>) -> Result<Value> {
    let rounds = bounded(payload, "bootstrap_samples")?;
    let data: Vec<f64> = payload
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| BlocksError::handler(KIND, "missing `data` for sampling"))?
        .iter()
        .map(as_number)
        .collect::<Option<Vec<f64>>>()
        .ok_or_else(|| BlocksError::handler(KIND, "`data` must contain only numbers"))?;
    if data.is_empty() {
        return Err(BlocksError::handler(KIND, "`data` must not be empty"));
    }
    let sample_size = match payload.get("sample_size") {
        Some(_) => bounded(payload, "sample_size")?,
        None => data.len(),
    };

    within_budget(
        "bootstrap_samples * sample_size",
        rounds.checked_mul(sample_size).unwrap_or(usize::MAX),
    )?;

    let mut results = Vec::with_capacity(rounds);
    let mut means = Vec::with_capacity(rounds);
    for _ in 0..rounds {
        let resample: Vec<f64> = (0..sample_size)
            .filter_map(|_| data.choose(rng).copied())
            .collect();
        means.push(mean_and_std(&resample).0);
        results.push(Value::Array(resample.into_iter().map(number_value).collect()));
    }

    Ok(json!({
        "strategy": "bootstrap",
        "bootstrap_samples": rounds,
        "sample_size": sample_size,
        "original_data_size": data.len(),
        "bootstrap_results": results,
        "bootstrap_means": means,
    }))
}

/// Box-Muller transform.
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(strategy: &str) -> ItemDefinition {
        ItemDefinition::new(strategy, KIND)
    }

    async fn draw(handler: &SamplingHandler, strategy: &str, input: Value) -> Value {
        handler
            .handle(&item(strategy), "sample", input.as_object().unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn random_sample_is_sorted_and_bounded() {
        let handler = SamplingHandler::seeded(7);
        let value = draw(&handler, "random", json!({"sample_size": 5, "population_size": 20})).await;
        let indices: Vec<u64> = serde_json::from_value(value["sample_indices"].clone()).unwrap();
        assert_eq!(indices.len(), 5);
        assert!(indices.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(indices.iter().all(|&i| i < 20));
        assert_eq!(value["sampling_fraction"], json!(0.25));
    }

    #[tokio::test]
    async fn seeded_handlers_agree() {
        let input = json!({"iterations": 4, "distribution": "normal", "parameters": {"mean": 10}});
        let first = draw(&SamplingHandler::seeded(42), "monte_carlo", input.clone()).await;
        let second = draw(&SamplingHandler::seeded(42), "monte_carlo", input).await;
        assert_eq!(first["samples"], second["samples"]);
    }

    #[tokio::test]
    async fn systematic_steps_through_population() {
        let handler = SamplingHandler::new();
        let value = draw(
            &handler,
            "systematic",
            json!({"interval": 3, "population_size": 10, "start_index": 1}),
        )
        .await;
        assert_eq!(value["sample_indices"], json!([1, 4, 7]));
    }

    #[tokio::test]
    async fn bootstrap_resamples_from_data() {
        let handler = SamplingHandler::seeded(1);
        let value = draw(&handler, "bootstrap", json!({"data": [1, 2, 3], "bootstrap_samples": 2})).await;
        assert_eq!(value["bootstrap_results"].as_array().unwrap().len(), 2);
        assert_eq!(value["sample_size"], json!(3));
    }

    #[tokio::test]
    async fn oversized_requests_fail_before_allocating() {
        let handler = SamplingHandler::seeded(5);
        let cases = [
            ("systematic", json!({"interval": 1, "population_size": 1e15})),
            ("monte_carlo", json!({"iterations": 1e12, "distribution": "uniform"})),
            ("adaptive", json!({"max_samples": 1e13, "criteria": {}})),
            ("cluster", json!({"clusters": [1e12, 1e12], "clusters_to_select": 1, "population_size": 10})),
            ("bootstrap", json!({"data": [1, 2], "bootstrap_samples": 1000, "sample_size": 1000000})),
        ];
        for (strategy, input) in cases {
            let err = handler
                .handle(&item(strategy), "sample", input.as_object().unwrap())
                .await
                .unwrap_err();
            assert!(
                err.to_string().contains("exceeds the limit"),
                "{strategy}: {err}"
            );
        }
    }

    #[tokio::test]
    async fn strategy_metadata_overrides_id() {
        let handler = SamplingHandler::seeded(3);
        let item = ItemDefinition::new("nightly", KIND).with_metadata("strategy", json!("systematic"));
        let value = handler
            .handle(
                &item,
                "sample",
                json!({"interval": 5, "population_size": 10}).as_object().unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(value["strategy"], json!("systematic"));
    }
}
