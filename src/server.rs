use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::info;

use crate::catalog::ListFilter;
use crate::engine::Engine;
use crate::envelope::Envelope;
use crate::error::{BlocksError, Result};
use crate::protocol::{OperationRequest, OperationRouter};

/// HTTP front for one engine.
#[derive(Clone)]
pub struct BlocksServer {
    router: OperationRouter,
}

impl BlocksServer {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            router: OperationRouter::new(engine),
        }
    }

    pub fn app(&self) -> Router {
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/items", get(list_items))
            .route("/items/:id", get(get_item))
            .route("/invoke", post(invoke))
            .route("/call/:operation", post(call_operation))
            .with_state(self.clone())
    }

    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let app = self.app();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, noun = self.router.engine().noun(), "serving catalog");
        axum::serve(listener, app.into_make_service())
            .await
            .map_err(|err| BlocksError::Protocol(format!("server error: {err}")))?;
        Ok(())
    }
}

fn respond(envelope: Envelope) -> Response {
    let code = if envelope.is_success() {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (code, Json(envelope.into_value())).into_response()
}

async fn list_items(
    State(state): State<BlocksServer>,
    Query(filter): Query<FilterQuery>,
) -> impl IntoResponse {
    Json(state.router.engine().list(&filter.into()).into_value())
}

async fn get_item(State(state): State<BlocksServer>, Path(id): Path<String>) -> Response {
    let envelope = state.router.engine().get(&id);
    if envelope.is_success() {
        Json(envelope.into_value()).into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(envelope.into_value())).into_response()
    }
}

async fn invoke(State(state): State<BlocksServer>, Json(request): Json<OperationRequest>) -> Response {
    respond(state.router.engine().handle(&request).await)
}

async fn call_operation(
    State(state): State<BlocksServer>,
    Path(operation): Path<String>,
    body: Option<Json<Value>>,
) -> Response {
    if !state.router.knows(&operation) {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({"status": "error", "message": format!("Unknown operation: {operation}")})),
        )
            .into_response();
    }
    let params = body.map(|Json(value)| value).unwrap_or(Value::Null);
    respond(state.router.call(&operation, &params).await)
}

/// Query-string form of [`ListFilter`]; tags arrive comma separated.
#[derive(Debug, Default, serde::Deserialize)]
struct FilterQuery {
    kind: Option<String>,
    category: Option<String>,
    tags: Option<String>,
}

impl From<FilterQuery> for ListFilter {
    fn from(query: FilterQuery) -> Self {
        ListFilter {
            kind: query.kind,
            category: query.category,
            tags: query
                .tags
                .map(|tags| {
                    tags.split(',')
                        .map(str::trim)
                        .filter(|tag| !tag.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}
