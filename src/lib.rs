//! Registry, validate and execute building blocks for MCP-style catalogs.
//!
//! The crate provides:
//! - A declarative schema vocabulary (`Schema`, `FieldSpec`, `Constraint`).
//! - An owned item catalog with filtered listing (`Catalog`).
//! - A validator that reports every violation at once (`Validator`).
//! - A kind-to-handler dispatcher that never lets a handler failure escape (`Dispatcher`).
//! - An `Engine` tying them together, with sessions for multi-step templates.

pub mod capabilities;
pub mod catalog;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod envelope;
mod error;
pub mod handlers;
pub mod presets;
pub mod protocol;
pub mod schema;
#[cfg(feature = "server")]
pub mod server;
pub mod session;
pub mod telemetry;
pub mod validator;

pub use capabilities::{
    Capabilities, FileStore, InMemoryFileStore, InMemoryKeyValueStore, KeyValueStore,
    LocalFileStore, NetworkProbe, StaticNetworkProbe,
};
pub use catalog::{Catalog, ItemDefinition, ItemUpdate, ListFilter};
pub use config::AppConfig;
pub use dispatch::{Dispatcher, Handler};
pub use engine::{CapabilitySummary, Engine};
pub use envelope::{Envelope, Status};
pub use error::{BlocksError, Result};
pub use handlers::standard_dispatcher;
pub use presets::preset_engine;
pub use protocol::{OperationRequest, OperationRouter};
pub use schema::{Constraint, FieldSpec, FieldType, Schema, StepDefinition};
#[cfg(feature = "server")]
pub use server::BlocksServer;
pub use session::{FlowKind, Session, SessionStatus, SessionStore};
pub use telemetry::{init_tracing, TelemetryCollector};
pub use validator::{ValidationReport, Validator};
