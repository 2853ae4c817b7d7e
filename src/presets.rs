//! Seed catalogs for the standard item kinds.
//!
//! Each preset pairs a noun with a list of item definitions. [`preset_engine`]
//! builds an engine for one of them with every standard handler registered.

use serde_json::{json, Value};

use crate::capabilities::Capabilities;
use crate::catalog::ItemDefinition;
use crate::config::{AppConfig, EngineConfig};
use crate::engine::Engine;
use crate::error::{BlocksError, Result};
use crate::handlers::sampling::MAX_SAMPLE_COUNT;
use crate::handlers::standard_dispatcher;
use crate::schema::{Constraint, FieldSpec, Schema, StepDefinition};

pub const PRESETS: [&str; 6] = ["tools", "prompts", "sampling", "roots", "resources", "elicitation"];

/// Noun and seed items for a preset name.
pub fn preset(name: &str) -> Result<(&'static str, Vec<ItemDefinition>)> {
    Ok(match name {
        "tools" => ("tool", tool_items()),
        "prompts" => ("prompt", prompt_items()),
        "sampling" => ("strategy", sampling_items()),
        "roots" => ("root", root_items()),
        "resources" => ("resource", resource_items()),
        "elicitation" => ("template", elicitation_items()),
        other => {
            return Err(BlocksError::Config(format!(
                "unknown preset `{other}`; expected one of {}",
                PRESETS.join(", ")
            )))
        }
    })
}

pub fn preset_engine(name: &str, capabilities: &Capabilities, sampling_seed: Option<u64>) -> Result<Engine> {
    let (noun, items) = preset(name)?;
    Engine::new(noun, standard_dispatcher(capabilities, sampling_seed)).with_items(items)
}

/// Engine described by a loaded configuration: the preset (if any) seeds the
/// catalog, then `[[items]]` are added on top. Files resolve under `files.base_dir`.
pub fn engine_from_config(config: &AppConfig) -> Result<Engine> {
    let capabilities = Capabilities::local(config.files.base_dir.clone());
    let mut dispatcher = standard_dispatcher(&capabilities, config.engine.sampling_seed);
    if let Some(timeout) = config.engine.handler_timeout() {
        dispatcher = dispatcher.with_timeout(timeout);
    }
    let (noun, seeds) = match &config.engine.preset {
        // An explicit noun wins over the preset's own.
        Some(name) => {
            let (preset_noun, items) = preset(name)?;
            let noun = if config.engine.noun == EngineConfig::default().noun {
                preset_noun.to_string()
            } else {
                config.engine.noun.clone()
            };
            (noun, items)
        }
        None => (config.engine.noun.clone(), Vec::new()),
    };
    Engine::new(noun, dispatcher)
        .with_items(seeds)?
        .with_items(config.items.iter().cloned())
}

fn tags(values: &[&str]) -> Value {
    json!(values)
}

fn positive_integer() -> FieldSpec {
    FieldSpec::number()
        .with(Constraint::Integer)
        .with(Constraint::range(Some(1.0), Some(MAX_SAMPLE_COUNT as f64)))
}

fn non_negative_integer() -> FieldSpec {
    FieldSpec::number()
        .with(Constraint::Integer)
        .with(Constraint::range(Some(0.0), Some(MAX_SAMPLE_COUNT as f64)))
}

pub fn tool_items() -> Vec<ItemDefinition> {
    vec![
        ItemDefinition::new("simple_calculator", "calculator")
            .with_schema(
                Schema::new()
                    .field("a", FieldSpec::number().required().describe("First operand"))
                    .field("b", FieldSpec::number().required().describe("Second operand"))
                    .field(
                        "op",
                        FieldSpec::string()
                            .required()
                            .with(Constraint::one_of(["add", "sub", "mul", "div"])),
                    ),
            )
            .with_metadata("description", json!("Basic arithmetic on two operands"))
            .with_metadata("category", json!("math"))
            .with_metadata("tags", tags(&["arithmetic", "basic"])),
        ItemDefinition::new("data_processor", "data_processor")
            .with_schema(
                Schema::new()
                    .field("data", FieldSpec::array().required())
                    .field(
                        "operation",
                        FieldSpec::string()
                            .required()
                            .with(Constraint::one_of(["sum", "average", "min", "max", "sort"])),
                    ),
            )
            .with_metadata("description", json!("Aggregates over a list of numbers"))
            .with_metadata("category", json!("data"))
            .with_metadata("tags", tags(&["data", "aggregation"])),
        ItemDefinition::new("file_operations", "file_system")
            .with_schema(
                Schema::new().field(
                    "path",
                    FieldSpec::string()
                        .required()
                        .with(Constraint::NonEmpty)
                        .with(Constraint::max_length(255)),
                ),
            )
            .with_metadata("description", json!("Read and write files under the workspace"))
            .with_metadata("category", json!("file_system"))
            .with_metadata("tags", tags(&["file", "io"]))
            .with_metadata("capabilities", json!(["read", "write", "list"])),
    ]
}

pub fn prompt_items() -> Vec<ItemDefinition> {
    vec![
        ItemDefinition::new("greeting", "prompt")
            .with_metadata("prompt_type", json!("text"))
            .with_metadata("content", json!("Hello! How can I help you today?"))
            .with_metadata("category", json!("conversation"))
            .with_metadata("tags", tags(&["greeting", "welcome"])),
        ItemDefinition::new("analysis", "prompt")
            .with_schema(Schema::new().field("data", FieldSpec::string().required()))
            .with_metadata("prompt_type", json!("text"))
            .with_metadata(
                "content",
                json!("Please analyze the following data and provide insights: {data}"),
            )
            .with_metadata("category", json!("analysis"))
            .with_metadata("tags", tags(&["analysis", "data"])),
        ItemDefinition::new("email_template", "prompt")
            .with_schema(
                Schema::new()
                    .field("subject", FieldSpec::string().required())
                    .field("recipient", FieldSpec::string().required())
                    .field(
                        "body",
                        FieldSpec::string().required().with(Constraint::max_length(1000)),
                    )
                    .field("sender", FieldSpec::string().required()),
            )
            .with_metadata("prompt_type", json!("template"))
            .with_metadata(
                "content",
                json!("Subject: {subject}\n\nDear {recipient},\n\n{body}\n\nBest regards,\n{sender}"),
            )
            .with_metadata("category", json!("communication"))
            .with_metadata("tags", tags(&["email", "template"])),
        ItemDefinition::new("code_review", "prompt")
            .with_schema(
                Schema::new()
                    .field(
                        "language",
                        FieldSpec::string()
                            .required()
                            .with(Constraint::one_of(["python", "javascript", "java", "cpp", "go", "rust"])),
                    )
                    .field("code", FieldSpec::string().required().with(Constraint::NonEmpty)),
            )
            .with_metadata("prompt_type", json!("template"))
            .with_metadata(
                "content",
                json!(
                    "Please review the following code:\n\n```{language}\n{code}\n```\n\n\
                     Focus on:\n- Code quality and best practices\n- Potential bugs or issues\n\
                     - Performance considerations\n- Security concerns\n\n\
                     Provide a detailed review with suggestions for improvement."
                ),
            )
            .with_metadata("category", json!("development"))
            .with_metadata("tags", tags(&["code", "review", "development"])),
        ItemDefinition::new("structured_qa", "prompt")
            .with_schema(Schema::new().field("country", FieldSpec::string().required()))
            .with_metadata("prompt_type", json!("structured"))
            .with_metadata(
                "content",
                json!({
                    "question": "What is the capital of {country}?",
                    "context": "Geography knowledge",
                    "expected_format": "city_name",
                    "difficulty": "easy",
                }),
            )
            .with_metadata("category", json!("education"))
            .with_metadata("tags", tags(&["geography", "quiz"])),
        ItemDefinition::new("multi_step_analysis", "prompt")
            .with_schema(Schema::new().field("data", FieldSpec::string().required()))
            .with_metadata("prompt_type", json!("multi_step"))
            .with_metadata(
                "steps",
                json!([
                    {"step": 1, "prompt": "First, identify the key components in the data: {data}", "output_format": "list"},
                    {"step": 2, "prompt": "Based on the components identified, analyze their relationships.", "output_format": "analysis"},
                    {"step": 3, "prompt": "Finally, provide recommendations based on your analysis.", "output_format": "recommendations"},
                ]),
            )
            .with_metadata("category", json!("analysis"))
            .with_metadata("tags", tags(&["multi_step", "analysis"])),
        ItemDefinition::new("conditional_response", "prompt")
            .with_schema(
                Schema::new()
                    .field("query", FieldSpec::string().required())
                    .field(
                        "user_type",
                        FieldSpec::string().with(Constraint::one_of(["expert", "beginner", "default"])),
                    ),
            )
            .with_metadata("prompt_type", json!("conditional"))
            .with_metadata(
                "conditions",
                json!([
                    {"user_type": "expert", "prompt": "Provide detailed technical analysis: {query}"},
                    {"user_type": "beginner", "prompt": "Explain in simple terms: {query}"},
                    {"prompt": "Provide a balanced explanation: {query}"},
                ]),
            )
            .with_metadata("category", json!("adaptive"))
            .with_metadata("tags", tags(&["conditional", "adaptive"])),
    ]
}

pub fn sampling_items() -> Vec<ItemDefinition> {
    let strategy = |id: &str, description: &str, schema: Schema| {
        ItemDefinition::new(id, "sampling")
            .with_schema(schema)
            .with_metadata("strategy", json!(id))
            .with_metadata("description", json!(description))
            .with_metadata("category", json!("sampling"))
    };
    vec![
        strategy(
            "random",
            "Simple random sampling",
            Schema::new()
                .field("sample_size", positive_integer().required())
                .field("population_size", positive_integer().required()),
        ),
        strategy(
            "stratified",
            "Stratified sampling with proportional allocation",
            Schema::new()
                .field(
                    "strata",
                    FieldSpec::object()
                        .required()
                        .with(Constraint::each(vec![
                            Constraint::Integer,
                            Constraint::range(Some(1.0), Some(MAX_SAMPLE_COUNT as f64)),
                        ])),
                )
                .field("sample_size", positive_integer().required())
                .field("population_size", positive_integer().required()),
        ),
        strategy(
            "systematic",
            "Systematic sampling with fixed interval",
            Schema::new()
                .field("interval", positive_integer().required())
                .field("population_size", positive_integer().required())
                .field("start_index", non_negative_integer()),
        ),
        strategy(
            "cluster",
            "Cluster sampling with random cluster selection",
            Schema::new()
                .field(
                    "clusters",
                    FieldSpec::array()
                        .required()
                        .with(Constraint::NonEmpty)
                        .with(Constraint::each(vec![
                            Constraint::Integer,
                            Constraint::range(Some(1.0), Some(MAX_SAMPLE_COUNT as f64)),
                        ])),
                )
                .field("clusters_to_select", positive_integer().required())
                .field("population_size", positive_integer().required()),
        ),
        strategy(
            "adaptive",
            "Adaptive sampling based on criteria",
            Schema::new()
                .field("criteria", FieldSpec::object().required())
                .field("max_samples", positive_integer().required())
                .field(
                    "threshold",
                    FieldSpec::number().with(Constraint::range(Some(0.0), Some(1.0))),
                ),
        ),
        strategy(
            "monte_carlo",
            "Monte Carlo simulation sampling",
            Schema::new()
                .field("iterations", positive_integer().required())
                .field(
                    "distribution",
                    FieldSpec::string()
                        .required()
                        .with(Constraint::one_of(["normal", "uniform", "exponential"])),
                )
                .field("parameters", FieldSpec::object()),
        ),
        strategy(
            "bootstrap",
            "Bootstrap resampling",
            Schema::new()
                .field("data", FieldSpec::array().required().with(Constraint::NonEmpty))
                .field("bootstrap_samples", positive_integer().required())
                .field("sample_size", positive_integer()),
        ),
    ]
}

pub fn root_items() -> Vec<ItemDefinition> {
    vec![
        ItemDefinition::new("memory", "memory")
            .with_schema(
                Schema::new().field("key", FieldSpec::string().with(Constraint::NonEmpty)),
            )
            .with_metadata("uri", json!("memory://"))
            .with_metadata("description", json!("In-process key/value storage"))
            .with_metadata("category", json!("storage"))
            .with_metadata("tags", tags(&["memory", "cache"])),
        ItemDefinition::new("file_system", "file_system")
            .with_schema(
                Schema::new()
                    .field("path", FieldSpec::string().with(Constraint::max_length(255)))
                    .field("content", FieldSpec::string()),
            )
            .with_metadata("uri", json!("file:///"))
            .with_metadata("base_path", json!("."))
            .with_metadata("description", json!("Files under the configured base directory"))
            .with_metadata("category", json!("storage"))
            .with_metadata("tags", tags(&["file", "io"])),
        ItemDefinition::new("network", "network")
            .with_schema(
                Schema::new()
                    .field("host", FieldSpec::string().required().with(Constraint::NonEmpty))
                    .field(
                        "port",
                        FieldSpec::number()
                            .with(Constraint::Integer)
                            .with(Constraint::range(Some(1.0), Some(65535.0))),
                    )
                    .field(
                        "ports",
                        FieldSpec::array().with(Constraint::each(vec![
                            Constraint::Integer,
                            Constraint::range(Some(1.0), Some(65535.0)),
                        ])),
                    ),
            )
            .with_metadata("uri", json!("network://"))
            .with_metadata("description", json!("Reachability checks against known hosts"))
            .with_metadata("category", json!("network"))
            .with_metadata("tags", tags(&["network", "diagnostics"])),
    ]
}

pub fn resource_items() -> Vec<ItemDefinition> {
    let resource = |path: &str, mime: &str, description: &str| {
        ItemDefinition::new(format!("file://{path}"), "resource")
            .with_schema(Schema::new().field("content", FieldSpec::string()))
            .with_metadata("path", json!(path))
            .with_metadata("mime_type", json!(mime))
            .with_metadata("description", json!(description))
            .with_metadata("category", json!("file"))
    };
    vec![
        resource("config.json", "application/json", "Application configuration"),
        resource("data.csv", "text/csv", "Sample tabular data"),
        resource("readme.txt", "text/plain", "Project notes"),
    ]
}

pub fn elicitation_items() -> Vec<ItemDefinition> {
    let select = |options: &[&str]| FieldSpec::string().with(Constraint::one_of(options.iter().copied()));
    vec![
        ItemDefinition::new("user_registration", "template")
            .with_schema(
                Schema::new()
                    .field(
                        "username",
                        FieldSpec::string()
                            .required()
                            .describe("Username")
                            .with(Constraint::min_length(3))
                            .with(Constraint::max_length(20))
                            .with(Constraint::pattern("^[a-zA-Z0-9_]+$")),
                    )
                    .field(
                        "email",
                        FieldSpec::string()
                            .required()
                            .describe("Email Address")
                            .with(Constraint::pattern(r"^[^@]+@[^@]+\.[^@]+$")),
                    )
                    .field(
                        "password",
                        FieldSpec::string()
                            .required()
                            .describe("Password")
                            .with(Constraint::min_length(8))
                            .with(Constraint::pattern(r"^(?=.*[a-z])(?=.*[A-Z])(?=.*\d)")),
                    )
                    .field(
                        "confirm_password",
                        FieldSpec::string()
                            .required()
                            .describe("Confirm Password")
                            .with(Constraint::matches("password")),
                    )
                    .field(
                        "age",
                        FieldSpec::number()
                            .describe("Age")
                            .with(Constraint::range(Some(13.0), Some(120.0))),
                    )
                    .field(
                        "interests",
                        FieldSpec::array().describe("Interests").with(Constraint::each(vec![
                            Constraint::one_of(["technology", "sports", "music", "reading", "travel"]),
                        ])),
                    )
                    .field(
                        "newsletter",
                        FieldSpec::boolean()
                            .describe("Subscribe to newsletter")
                            .with_default(json!(false)),
                    ),
            )
            .with_metadata("flow", json!("form"))
            .with_metadata("title", json!("User Registration"))
            .with_metadata(
                "description",
                json!("Please provide your information to create an account"),
            )
            .with_metadata("category", json!("account")),
        ItemDefinition::new("conversational_survey", "template")
            .with_metadata("flow", json!("conversational"))
            .with_metadata("title", json!("Customer Satisfaction Survey"))
            .with_metadata(
                "description",
                json!("Let's have a quick conversation about your experience"),
            )
            .with_metadata("category", json!("feedback"))
            .with_step(StepDefinition::new(
                "How would you rate your overall experience with our service?",
                Schema::new().field(
                    "response",
                    FieldSpec::number()
                        .required()
                        .with(Constraint::Integer)
                        .with(Constraint::range(Some(1.0), Some(5.0))),
                ),
            ))
            .with_step(StepDefinition::new(
                "What aspects of our service did you find most valuable?",
                Schema::new().field(
                    "valuable_aspects",
                    FieldSpec::array().with(Constraint::each(vec![Constraint::one_of([
                        "Customer Support",
                        "Product Quality",
                        "Pricing",
                        "Ease of Use",
                        "Features",
                    ])])),
                ),
            ))
            .with_step(StepDefinition::new(
                "Is there anything specific you'd like us to improve?",
                Schema::new().field("improvements", FieldSpec::string()),
            ))
            .with_step(StepDefinition::new(
                "Would you recommend our service to others?",
                Schema::new().field("recommend", FieldSpec::boolean().required()),
            )),
        ItemDefinition::new("project_requirements", "template")
            .with_metadata("flow", json!("multi_step"))
            .with_metadata("title", json!("Project Requirements Gathering"))
            .with_metadata(
                "description",
                json!("Let's gather information about your project requirements"),
            )
            .with_metadata("category", json!("planning"))
            .with_step(StepDefinition::new(
                "Project Overview",
                Schema::new()
                    .field(
                        "project_name",
                        FieldSpec::string().required().with(Constraint::NonEmpty),
                    )
                    .field(
                        "project_type",
                        select(&["web_app", "mobile_app", "desktop_app", "api", "other"]).required(),
                    ),
            ))
            .with_step(StepDefinition::new(
                "Technical Requirements",
                Schema::new()
                    .field(
                        "technologies",
                        FieldSpec::array().with(Constraint::each(vec![Constraint::one_of([
                            "python",
                            "javascript",
                            "java",
                            "csharp",
                            "go",
                            "rust",
                        ])])),
                    )
                    .field(
                        "timeline",
                        select(&["1_month", "3_months", "6_months", "1_year", "flexible"]).required(),
                    ),
            ))
            .with_step(StepDefinition::new(
                "Budget and Resources",
                Schema::new()
                    .field(
                        "budget_range",
                        select(&["under_10k", "10k_50k", "50k_100k", "over_100k"]).required(),
                    )
                    .field(
                        "team_size",
                        FieldSpec::number()
                            .with(Constraint::Integer)
                            .with(Constraint::range(Some(1.0), Some(50.0))),
                    ),
            )),
        ItemDefinition::new("adaptive_consultation", "template")
            .with_schema(
                Schema::new()
                    .field(
                        "experience_level",
                        select(&["beginner", "intermediate", "expert"])
                            .required()
                            .describe("What is your experience level?"),
                    )
                    .field("basic_needs", FieldSpec::string())
                    .field(
                        "technical_details",
                        FieldSpec::array().with(Constraint::each(vec![Constraint::one_of([
                            "scalability",
                            "security",
                            "performance",
                            "integration",
                        ])])),
                    )
                    .field("advanced_features", FieldSpec::string()),
            )
            .with_metadata("flow", json!("adaptive"))
            .with_metadata("title", json!("Adaptive Consultation"))
            .with_metadata(
                "description",
                json!("This consultation adapts based on your responses"),
            )
            .with_metadata("category", json!("consulting")),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn every_preset_builds_with_valid_schemas() {
        let capabilities = Capabilities::in_memory();
        for name in PRESETS {
            let engine = preset_engine(name, &capabilities, Some(7)).unwrap();
            assert!(!engine.catalog().is_empty(), "{name} is empty");
        }
        assert!(matches!(
            preset_engine("widgets", &capabilities, None),
            Err(BlocksError::Config(_))
        ));
    }

    #[test]
    fn every_seed_kind_has_a_handler() {
        let dispatcher = standard_dispatcher(&Capabilities::in_memory(), None);
        for name in PRESETS {
            let (_, items) = preset(name).unwrap();
            for item in items {
                assert!(
                    dispatcher.handler(&item.kind).is_some(),
                    "no handler for `{}`",
                    item.kind
                );
            }
        }
    }

    #[test]
    fn config_preset_keeps_its_noun_and_adds_items() {
        let config = AppConfig::from_toml_str(
            r#"
[engine]
preset = "roots"

[[items]]
id = "scratch"
kind = "memory"
"#,
        )
        .unwrap();
        let engine = engine_from_config(&config).unwrap();
        assert_eq!(engine.noun(), "root");
        assert_eq!(engine.catalog().len(), root_items().len() + 1);
        assert!(engine.catalog().contains("scratch"));
    }

    #[tokio::test]
    async fn registration_rejects_mismatched_passwords() {
        let engine = preset_engine("elicitation", &Capabilities::in_memory(), None).unwrap();
        let report = engine
            .validate_report(
                "user_registration",
                &payload(json!({
                    "username": "ada_l",
                    "email": "ada@example.com",
                    "password": "Sup3rSecret",
                    "confirm_password": "Sup3rSecreT",
                })),
            )
            .unwrap();
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("confirm_password"));
    }

    #[test]
    fn registration_requires_mixed_case_and_digit_password() {
        let engine = preset_engine("elicitation", &Capabilities::in_memory(), None).unwrap();
        let report = engine
            .validate_report(
                "user_registration",
                &payload(json!({
                    "username": "ada_l",
                    "email": "ada@example.com",
                    "password": "aaaaaaaa",
                    "confirm_password": "aaaaaaaa",
                })),
            )
            .unwrap();
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("password: value does not match pattern"));
    }

    #[tokio::test]
    async fn systematic_strategy_samples_every_interval() {
        let engine = preset_engine("sampling", &Capabilities::in_memory(), Some(1)).unwrap();
        let envelope = engine
            .execute(
                "systematic",
                "sample",
                &payload(json!({"interval": 10, "population_size": 50, "start_index": 5})),
            )
            .await;
        assert!(envelope.is_success());
        assert_eq!(envelope.get("sample_indices"), Some(&json!([5, 15, 25, 35, 45])));

        let rejected = engine
            .execute("random", "sample", &payload(json!({"sample_size": 0, "population_size": 10})))
            .await;
        assert!(!rejected.is_success());
        assert!(rejected.validation().is_some());
    }
}
