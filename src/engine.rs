use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, ItemDefinition, ItemUpdate, ListFilter};
use crate::dispatch::Dispatcher;
use crate::envelope::Envelope;
use crate::error::{BlocksError, Result};
use crate::protocol::OperationRequest;
use crate::schema::FieldType;
use crate::session::{SessionStatus, SessionStore};
use crate::telemetry::TelemetryCollector;
use crate::validator::{ValidationReport, Validator};

/// Short listing entry; schemas stay behind [`Engine::describe`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySummary {
    pub id: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl From<&ItemDefinition> for CapabilitySummary {
    fn from(item: &ItemDefinition) -> Self {
        Self {
            id: item.id.clone(),
            kind: item.kind.clone(),
            description: item.description().map(str::to_string),
            category: item.category().map(str::to_string),
            tags: item.tags().into_iter().map(str::to_string).collect(),
        }
    }
}

/// Registry-validate-execute engine over one catalog.
///
/// Every public operation returns an [`Envelope`]; lookup and validation run
/// synchronously and only the handler call is awaited.
pub struct Engine {
    noun: String,
    plural: String,
    catalog: Catalog,
    validator: Validator,
    dispatcher: Dispatcher,
    sessions: SessionStore,
    telemetry: Option<TelemetryCollector>,
}

impl Engine {
    pub fn new(noun: impl Into<String>, dispatcher: Dispatcher) -> Self {
        let noun = noun.into();
        Self {
            plural: pluralize(&noun),
            catalog: Catalog::new(noun.clone()),
            noun,
            validator: Validator::new(),
            dispatcher,
            sessions: SessionStore::new(),
            telemetry: None,
        }
    }

    pub fn with_plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = plural.into();
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryCollector) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Seeds the catalog; fails on the first duplicate or invalid schema.
    pub fn with_items(self, items: impl IntoIterator<Item = ItemDefinition>) -> Result<Self> {
        for item in items {
            self.catalog.create(item)?;
        }
        Ok(self)
    }

    pub fn noun(&self) -> &str {
        &self.noun
    }

    pub fn plural(&self) -> &str {
        &self.plural
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    fn id_key(&self) -> String {
        format!("{}_id", self.noun)
    }

    fn record(&self, kind: &str, detail: Value) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.record(kind, detail);
        }
    }

    /// Operation used when a request names none: `metadata.operation`, else the
    /// handler's first operation.
    pub fn default_operation(&self, item: &ItemDefinition) -> Option<String> {
        item.metadata
            .get("operation")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                self.dispatcher
                    .handler(&item.kind)
                    .and_then(|handler| handler.operations().first().map(|op| op.to_string()))
            })
    }

    /// Lookup, validate, then dispatch. The handler runs at most once, and only
    /// after validation passed.
    pub async fn execute(&self, id: &str, operation: &str, payload: &Map<String, Value>) -> Envelope {
        let item = match self.catalog.get(id) {
            Ok(item) => item,
            Err(err) => return Envelope::from_error(&err),
        };

        let report = self.validator.validate(&item.schema, payload);
        if !report.valid {
            debug!(noun = %self.noun, id, errors = report.errors.len(), "payload rejected");
            self.record(
                "validation_failed",
                json!({ "id": id, "operation": operation, "errors": report.errors }),
            );
            return Envelope::invalid(report);
        }

        if let Some(allowed) = item.capabilities() {
            if !allowed.contains(&operation) {
                return Envelope::from_error(&BlocksError::UnsupportedOperation(
                    operation.to_string(),
                ));
            }
        }

        let envelope = self.dispatcher.dispatch(&item, operation, payload).await;
        if envelope.is_success() {
            self.record("execute", json!({ "id": id, "kind": item.kind, "operation": operation }));
        } else if let Some(telemetry) = &self.telemetry {
            telemetry.record_failure(
                format!("{}:{}", item.kind, operation),
                envelope.message().unwrap_or_default(),
            );
        }
        envelope
    }

    /// Checks a payload without executing (`validate_<noun>_parameters`).
    pub fn validate(&self, id: &str, payload: &Map<String, Value>) -> Envelope {
        match self.catalog.get(id) {
            Ok(item) => {
                let report = self.validator.validate(&item.schema, payload);
                Envelope::success()
                    .with(self.id_key(), json!(id))
                    .with("validation", json!(report))
            }
            Err(err) => Envelope::from_error(&err),
        }
    }

    pub fn validate_report(&self, id: &str, payload: &Map<String, Value>) -> Result<ValidationReport> {
        let item = self.catalog.get(id)?;
        Ok(self.validator.validate(&item.schema, payload))
    }

    pub fn describe(&self, id: &str) -> Result<ItemDefinition> {
        self.catalog.get(id)
    }

    /// `get_<noun>`: the full definition, schema included.
    pub fn get(&self, id: &str) -> Envelope {
        match self.catalog.get(id) {
            Ok(item) => Envelope::success().with(self.noun.clone(), json!(item)),
            Err(err) => Envelope::from_error(&err),
        }
    }

    pub fn list_capabilities(&self, filter: &ListFilter) -> Vec<CapabilitySummary> {
        self.catalog
            .list(filter)
            .iter()
            .map(CapabilitySummary::from)
            .collect()
    }

    /// `list_<noun>s`: summaries plus the filter that produced them.
    pub fn list(&self, filter: &ListFilter) -> Envelope {
        let summaries = self.list_capabilities(filter);
        Envelope::success()
            .with("count", json!(summaries.len()))
            .with(self.plural.clone(), json!(summaries))
            .with("filter", json!(filter))
    }

    /// `<noun>_info`: aggregate view of the catalog.
    pub fn info(&self) -> Envelope {
        let items = self.catalog.list(&ListFilter::default());
        let kinds: BTreeSet<&str> = items.iter().map(|item| item.kind.as_str()).collect();
        let categories: BTreeSet<&str> = items.iter().filter_map(ItemDefinition::category).collect();
        let ids: Vec<&str> = items.iter().map(|item| item.id.as_str()).collect();
        let types: Vec<&str> = FieldType::ALL.iter().map(FieldType::name).collect();

        Envelope::success()
            .with(format!("total_{}", self.plural), json!(items.len()))
            .with(format!("{}_kinds", self.noun), json!(kinds))
            .with("categories", json!(categories))
            .with(format!("available_{}", self.plural), json!(ids))
            .with("supported_parameter_types", json!(types))
            .with("handler_kinds", json!(self.dispatcher.kinds()))
            .with("active_sessions", json!(self.sessions.list(Some(SessionStatus::Active)).len()))
    }

    pub fn create(&self, item: ItemDefinition) -> Envelope {
        match self.catalog.create(item) {
            Ok(created) => {
                info!(noun = %self.noun, id = %created.id, "created");
                self.record("create", json!({ "id": created.id, "kind": created.kind }));
                Envelope::success().with(self.id_key(), json!(created.id))
            }
            Err(err) => Envelope::from_error(&err),
        }
    }

    pub fn update(&self, id: &str, update: ItemUpdate) -> Envelope {
        match self.catalog.update(id, update) {
            Ok(updated) => {
                info!(noun = %self.noun, id, "updated");
                self.record("update", json!({ "id": id }));
                Envelope::success()
                    .with(self.id_key(), json!(id))
                    .with(self.noun.clone(), json!(updated))
            }
            Err(err) => Envelope::from_error(&err),
        }
    }

    pub fn delete(&self, id: &str) -> Envelope {
        match self.catalog.delete(id) {
            Ok(()) => {
                info!(noun = %self.noun, id, "deleted");
                self.record("delete", json!({ "id": id }));
                Envelope::success().with(self.id_key(), json!(id))
            }
            Err(err) => Envelope::from_error(&err),
        }
    }

    /// Executes a wire request, resolving a missing operation to the item's default.
    pub async fn handle(&self, request: &OperationRequest) -> Envelope {
        let operation = match &request.operation {
            Some(operation) => operation.clone(),
            None => match self.catalog.get(&request.item_id) {
                Ok(item) => match self.default_operation(&item) {
                    Some(operation) => operation,
                    None => {
                        return Envelope::from_error(&BlocksError::UnsupportedOperation(
                            item.kind.clone(),
                        ))
                    }
                },
                Err(err) => return Envelope::from_error(&err),
            },
        };
        self.execute(&request.item_id, &operation, &request.parameters)
            .await
    }

    pub fn start_session(&self, template_id: &str, session_id: Option<String>) -> Envelope {
        let started = self
            .catalog
            .get(template_id)
            .and_then(|template| self.sessions.start(&template, session_id));
        match started {
            Ok(session) => {
                self.record("session_started", json!({ "session_id": session.session_id }));
                Envelope::success()
                    .with("session_id", json!(session.session_id))
                    .with("session", json!(session))
            }
            Err(err) => Envelope::from_error(&err),
        }
    }

    /// Validates `responses` against the session's current step and advances it.
    pub fn submit(&self, session_id: &str, responses: Map<String, Value>) -> Envelope {
        match self.try_submit(session_id, responses) {
            Ok(envelope) => envelope,
            Err(err) => {
                if matches!(err, BlocksError::ValidationFailed(_)) {
                    self.record("validation_failed", json!({ "session_id": session_id }));
                } else {
                    warn!(session = %session_id, error = %err, "submission refused");
                }
                Envelope::from_error(&err)
            }
        }
    }

    fn try_submit(&self, session_id: &str, responses: Map<String, Value>) -> Result<Envelope> {
        let snapshot = self.sessions.get(session_id)?;
        let template = self.catalog.get(&snapshot.template_id)?;

        let session = self.sessions.update(session_id, |session| {
            if session.completed {
                return Err(BlocksError::Session("Session already completed".into()));
            }
            let report = self
                .validator
                .validate(session.expected_schema(&template), &responses);
            if !report.valid {
                return Err(BlocksError::ValidationFailed(report.errors));
            }
            session.accept(responses)?;
            Ok(session.clone())
        })?;

        let mut envelope = Envelope::success()
            .with("session_id", json!(session.session_id))
            .with("current_step", json!(session.current_step))
            .with("total_steps", json!(session.total_steps))
            .with("completed", json!(session.completed));
        if session.completed {
            self.record("session_completed", json!({ "session_id": session.session_id }));
            envelope = envelope.with("message", json!("Session completed"));
        }
        Ok(envelope)
    }

    /// Questions for the session's current step.
    pub fn current_questions(&self, session_id: &str) -> Envelope {
        let result = self.sessions.get(session_id).and_then(|session| {
            if session.completed {
                return Err(BlocksError::Session("Session completed".into()));
            }
            let template = self.catalog.get(&session.template_id)?;
            let title = if session.flow.is_stepwise() {
                template
                    .steps
                    .get(session.current_step - 1)
                    .map(|step| step.title.clone())
            } else {
                template
                    .metadata
                    .get("title")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            };
            Ok(Envelope::success()
                .with("session_id", json!(session.session_id))
                .with("type", json!(session.flow))
                .with("title", json!(title))
                .with("description", json!(template.description()))
                .with("current_step", json!(session.current_step))
                .with("total_steps", json!(session.total_steps))
                .with("fields", json!(session.expected_schema(&template))))
        });
        result.into()
    }

    pub fn session_results(&self, session_id: &str) -> Envelope {
        let result = self.sessions.get(session_id).and_then(|session| {
            if !session.completed {
                return Err(BlocksError::Session("Session not completed".into()));
            }
            Ok(Envelope::success()
                .with("session_id", json!(session.session_id))
                .with("template_id", json!(session.template_id))
                .with("total_responses", json!(session.responses.len()))
                .with("responses", Value::Object(session.responses))
                .with("completed_at", json!(session.completed_at)))
        });
        result.into()
    }

    pub fn list_sessions(&self, status: Option<SessionStatus>) -> Envelope {
        let sessions = self.sessions.list(status);
        Envelope::success()
            .with("count", json!(sessions.len()))
            .with("sessions", json!(sessions))
            .with("status_filter", json!(status))
    }

    pub fn delete_session(&self, session_id: &str) -> Envelope {
        match self.sessions.remove(session_id) {
            Ok(session) => Envelope::success().with("session_id", json!(session.session_id)),
            Err(err) => Envelope::from_error(&err),
        }
    }
}

/// English plural used in operation names (`list_tools`, `list_strategies`).
pub fn pluralize(noun: &str) -> String {
    let consonant_y = noun.ends_with('y')
        && !noun
            .chars()
            .rev()
            .nth(1)
            .is_some_and(|c| "aeiou".contains(c));
    if consonant_y {
        format!("{}ies", &noun[..noun.len() - 1])
    } else if noun.ends_with('s') {
        format!("{noun}es")
    } else {
        format!("{noun}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::CalculatorHandler;
    use crate::schema::{Constraint, FieldSpec, Schema};

    fn calc_engine() -> Engine {
        let schema = Schema::new()
            .field("a", FieldSpec::number().required())
            .field("b", FieldSpec::number().required())
            .field(
                "op",
                FieldSpec::string()
                    .required()
                    .with(Constraint::one_of(["add", "sub"])),
            );
        Engine::new("tool", Dispatcher::new().with(CalculatorHandler))
            .with_items([ItemDefinition::new("calc", "calculator")
                .with_schema(schema)
                .with_metadata("category", json!("math"))])
            .unwrap()
    }

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn executes_valid_request() {
        let engine = calc_engine();
        let envelope = engine
            .execute("calc", "run", &payload(json!({"a": 2, "b": 3, "op": "add"})))
            .await;
        assert!(envelope.is_success());
        assert_eq!(envelope.get("result"), Some(&json!(5)));
    }

    #[tokio::test]
    async fn invalid_payload_never_reaches_handler() {
        let telemetry = TelemetryCollector::new();
        let engine = calc_engine().with_telemetry(telemetry.clone());
        let envelope = engine
            .execute("calc", "run", &payload(json!({"a": 2, "op": "bogus"})))
            .await;
        let report = envelope.validation().unwrap();
        assert_eq!(
            report.errors,
            vec![
                "Missing required parameters: ['b']".to_string(),
                "op: value 'bogus' not in ['add', 'sub']".to_string(),
            ]
        );
        assert_eq!(telemetry.count("validation_failed"), 1);
        assert_eq!(telemetry.count("execute"), 0);
    }

    #[tokio::test]
    async fn unknown_item_uses_noun() {
        let envelope = calc_engine().execute("nope", "run", &Map::new()).await;
        assert_eq!(envelope.message(), Some("Tool not found"));
    }

    #[tokio::test]
    async fn capability_list_gates_operations() {
        let engine = calc_engine();
        engine.update(
            "calc",
            ItemUpdate::metadata("capabilities", json!(["run"])),
        );
        let envelope = engine
            .execute("calc", "divide", &payload(json!({"a": 2, "b": 3, "op": "add"})))
            .await;
        assert_eq!(envelope.message(), Some("Unknown operation: divide"));
    }

    #[test]
    fn validate_reports_without_executing() {
        let envelope = calc_engine().validate("calc", &payload(json!({"a": 1})));
        assert!(envelope.is_success());
        assert_eq!(envelope.get("tool_id"), Some(&json!("calc")));
        assert_eq!(envelope.get("validation").unwrap()["valid"], json!(false));
    }

    #[test]
    fn info_aggregates_catalog() {
        let info = calc_engine().info();
        assert_eq!(info.get("total_tools"), Some(&json!(1)));
        assert_eq!(info.get("categories"), Some(&json!(["math"])));
        assert_eq!(
            info.get("supported_parameter_types"),
            Some(&json!(["string", "number", "boolean", "array", "object"]))
        );
    }

    #[tokio::test]
    async fn handle_resolves_default_operation() {
        let engine = calc_engine();
        let request = OperationRequest::new("calc", payload(json!({"a": 4, "b": 1, "op": "sub"})));
        let envelope = engine.handle(&request).await;
        assert_eq!(envelope.get("result"), Some(&json!(3)));
    }

    #[test]
    fn plurals() {
        assert_eq!(pluralize("tool"), "tools");
        assert_eq!(pluralize("strategy"), "strategies");
        assert_eq!(pluralize("key"), "keys");
        assert_eq!(pluralize("class"), "classes");
    }
}
