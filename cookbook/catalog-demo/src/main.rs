//! Walks every preset engine, or serves one over stdio/HTTP.
//!
//! ```text
//! catalog-demo                         # run the walkthrough
//! catalog-demo --stdio [config.toml]   # JSON-RPC over stdin/stdout
//! catalog-demo --http [config.toml]    # axum server on [server] host/port
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use mcp_blocks::config::TelemetryConfig;
use mcp_blocks::presets::engine_from_config;
use mcp_blocks::protocol::serve_stdio;
use mcp_blocks::{
    init_tracing, preset_engine, AppConfig, BlocksError, BlocksServer, Capabilities, Envelope,
    InMemoryFileStore, OperationRouter, Result, TelemetryCollector,
};
use serde_json::{json, Map, Value};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = args.first().map(String::as_str);
    let config = match args.get(1) {
        Some(path) => AppConfig::from_env_or_file(path)?,
        None => {
            let mut config = AppConfig::default();
            config.apply_env();
            config
        }
    };

    match mode {
        Some("--stdio") => {
            // stdout carries the protocol; no subscriber is installed.
            let engine = engine_from_config(&config)?;
            serve_stdio(&OperationRouter::new(Arc::new(engine))).await
        }
        Some("--http") => {
            init_tracing("catalog-demo", &config.telemetry)?;
            let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
                .parse()
                .map_err(|err| BlocksError::Config(format!("bad server address: {err}")))?;
            let engine = engine_from_config(&config)?;
            BlocksServer::new(Arc::new(engine)).serve(addr).await
        }
        _ => {
            init_tracing("catalog-demo", &TelemetryConfig::default())?;
            walkthrough().await
        }
    }
}

fn params(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn show(label: &str, envelope: Envelope) {
    println!("{label}: {}", envelope.into_value());
}

async fn walkthrough() -> Result<()> {
    let files = InMemoryFileStore::new()
        .with_file("config.json", r#"{"name": "config", "version": "1.0", "debug": true}"#)
        .with_file("data.csv", "id,value\n1,10\n2,20\n")
        .with_file("readme.txt", "building blocks demo\n");
    let capabilities = Capabilities::in_memory().with_files(Arc::new(files));
    let telemetry = TelemetryCollector::new();

    let tools = preset_engine("tools", &capabilities, None)?.with_telemetry(telemetry.clone());
    show("tool_info", tools.info());
    show(
        "add",
        tools
            .execute("simple_calculator", "run", &params(json!({"a": 2, "b": 3, "op": "add"})))
            .await,
    );
    show(
        "bogus",
        tools
            .execute("simple_calculator", "run", &params(json!({"a": 2, "op": "bogus"})))
            .await,
    );
    show(
        "divide by zero",
        tools
            .execute("simple_calculator", "run", &params(json!({"a": 1, "b": 0, "op": "div"})))
            .await,
    );
    show(
        "average",
        tools
            .execute(
                "data_processor",
                "run",
                &params(json!({"data": [4, 8, 15, 16, 23, 42], "operation": "average"})),
            )
            .await,
    );

    let prompts = preset_engine("prompts", &capabilities, None)?;
    show(
        "conditional_response",
        prompts
            .execute(
                "conditional_response",
                "render",
                &params(json!({"query": "ownership", "user_type": "beginner"})),
            )
            .await,
    );

    let sampling = preset_engine("sampling", &capabilities, Some(42))?;
    show(
        "bootstrap",
        sampling
            .execute(
                "bootstrap",
                "sample",
                &params(json!({"data": [1, 2, 3, 4, 5], "bootstrap_samples": 3})),
            )
            .await,
    );

    let roots = OperationRouter::new(Arc::new(preset_engine("roots", &capabilities, None)?));
    show(
        "store",
        roots
            .call(
                "execute_root",
                &json!({"root_id": "memory", "operation": "store", "parameters": {"key": "greeting", "value": "hi"}}),
            )
            .await,
    );
    show(
        "scan",
        roots
            .call(
                "execute_root",
                &json!({"root_id": "network", "operation": "scan", "parameters": {"host": "localhost"}}),
            )
            .await,
    );

    let resources = preset_engine("resources", &capabilities, None)?;
    show(
        "read config.json",
        resources.execute("file://config.json", "read", &Map::new()).await,
    );

    let templates = preset_engine("elicitation", &capabilities, None)?;
    let started = templates.start_session("project_requirements", Some("demo".into()));
    show("start_session", started);
    let answers = [
        json!({"project_name": "atlas", "project_type": "api"}),
        json!({"technologies": ["rust"], "timeline": "3_months"}),
        json!({"budget_range": "10k_50k", "team_size": 4}),
    ];
    for answer in answers {
        show("questions", templates.current_questions("demo"));
        show("submit", templates.submit("demo", params(answer)));
    }
    show("results", templates.session_results("demo"));

    let (events, failures) = telemetry.drain();
    info!(events = events.len(), failures = failures.len(), "walkthrough finished");
    Ok(())
}
