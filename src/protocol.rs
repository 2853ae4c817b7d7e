//! Remote-callable surface.
//!
//! [`OperationRouter`] maps named operations (`list_tools`, `execute_tool`,
//! `tool_info`, ...) onto an [`Engine`], and [`serve_lines`] speaks
//! newline-delimited JSON-RPC 2.0 over any async reader/writer pair.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::catalog::{ItemDefinition, ItemUpdate, ListFilter};
use crate::engine::Engine;
use crate::envelope::Envelope;
use crate::error::{BlocksError, Result};
use crate::session::SessionStatus;

/// Wire form of an execute call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRequest {
    pub item_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl OperationRequest {
    pub fn new(item_id: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            item_id: item_id.into(),
            operation: None,
            parameters,
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }
}

/// JSON-RPC request structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// JSON-RPC response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

pub const PARSE_ERROR: i32 = -32700;
pub const METHOD_NOT_FOUND: i32 = -32601;

impl JsonRpcResponse {
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    List,
    Get,
    Create,
    Update,
    Delete,
    Validate,
    Execute,
    Info,
    StartSession,
    CurrentQuestions,
    Submit,
    SessionResults,
    ListSessions,
    DeleteSession,
    ListOperations,
}

/// Named operations for one engine, spelled with the engine's noun.
#[derive(Clone)]
pub struct OperationRouter {
    engine: Arc<Engine>,
    routes: Vec<(String, Route)>,
}

impl OperationRouter {
    pub fn new(engine: Arc<Engine>) -> Self {
        let noun = engine.noun().to_string();
        let plural = engine.plural().to_string();
        let routes = vec![
            (format!("list_{plural}"), Route::List),
            (format!("get_{noun}"), Route::Get),
            (format!("create_{noun}"), Route::Create),
            (format!("update_{noun}"), Route::Update),
            (format!("delete_{noun}"), Route::Delete),
            (format!("validate_{noun}_parameters"), Route::Validate),
            (format!("execute_{noun}"), Route::Execute),
            (format!("{noun}_info"), Route::Info),
            ("start_session".to_string(), Route::StartSession),
            ("get_current_questions".to_string(), Route::CurrentQuestions),
            ("submit_response".to_string(), Route::Submit),
            ("get_session_results".to_string(), Route::SessionResults),
            ("list_sessions".to_string(), Route::ListSessions),
            ("delete_session".to_string(), Route::DeleteSession),
            ("list_operations".to_string(), Route::ListOperations),
        ];
        Self { engine, routes }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn operations(&self) -> Vec<&str> {
        self.routes.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn knows(&self, name: &str) -> bool {
        self.route(name).is_some()
    }

    fn route(&self, name: &str) -> Option<Route> {
        self.routes
            .iter()
            .find(|(known, _)| known == name)
            .map(|(_, route)| *route)
    }

    /// Runs a named operation; malformed parameters and unknown names come back
    /// as error envelopes.
    pub async fn call(&self, name: &str, params: &Value) -> Envelope {
        let Some(route) = self.route(name) else {
            return Envelope::from_error(&BlocksError::UnsupportedOperation(name.to_string()));
        };
        debug!(operation = name, "routing");
        match self.dispatch(route, params).await {
            Ok(envelope) => envelope,
            Err(err) => Envelope::from_error(&err),
        }
    }

    async fn dispatch(&self, route: Route, params: &Value) -> Result<Envelope> {
        let engine = &self.engine;
        let id_key = format!("{}_id", engine.noun());
        let item_id = || {
            text(params, &id_key)
                .or_else(|| text(params, "id"))
                .ok_or_else(|| BlocksError::Protocol(format!("missing `{id_key}`")))
        };
        let session_id = || {
            text(params, "session_id").ok_or_else(|| BlocksError::Protocol("missing `session_id`".into()))
        };

        Ok(match route {
            Route::List => {
                let filter: ListFilter = match params {
                    Value::Null => ListFilter::default(),
                    other => serde_json::from_value(other.clone())?,
                };
                engine.list(&filter)
            }
            Route::Get => engine.get(&item_id()?),
            Route::Create => {
                let source = params.get(engine.noun()).unwrap_or(params);
                let item: ItemDefinition = serde_json::from_value(source.clone())?;
                engine.create(item)
            }
            Route::Update => {
                let updates: ItemUpdate = match params.get("updates") {
                    Some(updates) => serde_json::from_value(updates.clone())?,
                    None => ItemUpdate::default(),
                };
                engine.update(&item_id()?, updates)
            }
            Route::Delete => engine.delete(&item_id()?),
            Route::Validate => engine.validate(&item_id()?, &object(params, "parameters")),
            Route::Execute => {
                let mut request = OperationRequest::new(item_id()?, object(params, "parameters"));
                request.operation = text(params, "operation");
                engine.handle(&request).await
            }
            Route::Info => engine.info(),
            Route::StartSession => {
                let template_id = text(params, "template_id")
                    .ok_or_else(|| BlocksError::Protocol("missing `template_id`".into()))?;
                engine.start_session(&template_id, text(params, "session_id"))
            }
            Route::CurrentQuestions => engine.current_questions(&session_id()?),
            Route::Submit => engine.submit(&session_id()?, object(params, "responses")),
            Route::SessionResults => engine.session_results(&session_id()?),
            Route::ListSessions => {
                let status = match params.get("status") {
                    Some(Value::Null) | None => None,
                    Some(status) => Some(serde_json::from_value::<SessionStatus>(status.clone())?),
                };
                engine.list_sessions(status)
            }
            Route::DeleteSession => engine.delete_session(&session_id()?),
            Route::ListOperations => Envelope::success().with("operations", json!(self.operations())),
        })
    }

    /// Answers one JSON-RPC request. Unknown methods are JSON-RPC errors; every
    /// known method answers with its envelope as the result.
    pub async fn respond(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        if !self.knows(&request.method) {
            return JsonRpcResponse::error(
                request.id,
                METHOD_NOT_FOUND,
                format!("Unknown operation: {}", request.method),
            );
        }
        let params = request.params.unwrap_or(Value::Null);
        let envelope = self.call(&request.method, &params).await;
        JsonRpcResponse::result(request.id, envelope.into_value())
    }
}

fn text(params: &Value, key: &str) -> Option<String> {
    params.get(key).and_then(Value::as_str).map(str::to_string)
}

fn object(params: &Value, key: &str) -> Map<String, Value> {
    params
        .get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

/// Reads newline-delimited JSON-RPC requests until EOF, writing one response per line.
pub async fn serve_lines<R, W>(router: &OperationRouter, mut reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        if reader.read_until(b'\n', &mut buffer).await? == 0 {
            break;
        }
        let response = match std::str::from_utf8(&buffer) {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => match serde_json::from_str::<JsonRpcRequest>(line) {
                Ok(request) => router.respond(request).await,
                Err(err) => {
                    warn!(error = %err, "unparsable request");
                    JsonRpcResponse::error(Value::Null, PARSE_ERROR, format!("Parse error: {err}"))
                }
            },
            Err(err) => {
                warn!(error = %err, "request is not valid UTF-8");
                JsonRpcResponse::error(
                    Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: invalid UTF-8: {err}"),
                )
            }
        };
        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
        writer.flush().await?;
    }
    Ok(())
}

pub async fn serve_stdio(router: &OperationRouter) -> Result<()> {
    serve_lines(router, BufReader::new(tokio::io::stdin()), tokio::io::stdout()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::handlers::CalculatorHandler;
    use crate::schema::{FieldSpec, Schema};

    fn router() -> OperationRouter {
        let engine = Engine::new("tool", Dispatcher::new().with(CalculatorHandler))
            .with_items([ItemDefinition::new("calc", "calculator").with_schema(
                Schema::new()
                    .field("a", FieldSpec::number().required())
                    .field("b", FieldSpec::number().required()),
            )])
            .unwrap();
        OperationRouter::new(Arc::new(engine))
    }

    #[tokio::test]
    async fn routes_named_operations() {
        let router = router();
        let listed = router.call("list_tools", &Value::Null).await;
        assert_eq!(listed.get("count"), Some(&json!(1)));

        let executed = router
            .call(
                "execute_tool",
                &json!({"tool_id": "calc", "operation": "multiply", "parameters": {"a": 3, "b": 4}}),
            )
            .await;
        assert_eq!(executed.get("result"), Some(&json!(12)));

        let unknown = router.call("launch_rocket", &Value::Null).await;
        assert_eq!(unknown.message(), Some("Unknown operation: launch_rocket"));
    }

    #[tokio::test]
    async fn create_then_get_over_router() {
        let router = router();
        let created = router
            .call(
                "create_tool",
                &json!({"id": "adder", "kind": "calculator", "metadata": {"category": "math"}}),
            )
            .await;
        assert!(created.is_success());
        let fetched = router.call("get_tool", &json!({"tool_id": "adder"})).await;
        assert_eq!(fetched.get("tool").unwrap()["id"], json!("adder"));

        let missing = router.call("get_tool", &json!({})).await;
        assert_eq!(missing.message(), Some("protocol error: missing `tool_id`"));
    }

    #[tokio::test]
    async fn serves_json_rpc_lines() {
        let router = router();
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tool_info\"}\n",
            "not json\n",
            "{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"nope\"}\n",
        );
        let mut output = Vec::new();
        serve_lines(&router, input.as_bytes(), &mut output).await.unwrap();

        let responses: Vec<JsonRpcResponse> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0].result.as_ref().unwrap()["total_tools"], json!(1));
        assert_eq!(responses[1].error.as_ref().unwrap().code, PARSE_ERROR);
        assert_eq!(responses[2].error.as_ref().unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_utf8_line_does_not_end_the_loop() {
        let router = router();
        let mut input = b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tool_info\"}\n".to_vec();
        input.extend_from_slice(b"\xff\xfe{\"id\":7}\n");
        input.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"tool_info\"}\n");
        let mut output = Vec::new();
        serve_lines(&router, &input[..], &mut output).await.unwrap();

        let responses: Vec<JsonRpcResponse> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(responses.len(), 3);
        assert!(responses[0].result.is_some());
        let error = responses[1].error.as_ref().unwrap();
        assert_eq!(error.code, PARSE_ERROR);
        assert!(error.message.contains("invalid UTF-8"));
        assert_eq!(responses[2].id, json!(3));
        assert!(responses[2].result.is_some());
    }
}
