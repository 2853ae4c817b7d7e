//! Root handlers: memory, file system and network roots.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::str_arg;
use crate::capabilities::{FileStore, KeyValueStore, NetworkProbe};
use crate::catalog::ItemDefinition;
use crate::dispatch::Handler;
use crate::error::{BlocksError, Result};
use crate::schema::as_number;

pub struct MemoryRootHandler {
    store: Arc<dyn KeyValueStore>,
}

impl MemoryRootHandler {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Handler for MemoryRootHandler {
    fn kind(&self) -> &str {
        "memory"
    }

    fn operations(&self) -> &[&str] {
        &["store", "retrieve", "delete", "list"]
    }

    async fn handle(
        &self,
        item: &ItemDefinition,
        operation: &str,
        payload: &Map<String, Value>,
    ) -> Result<Value> {
        // Keys are namespaced per root so two memory roots never collide.
        let namespace = format!("{}:", item.id);
        if operation == "list" {
            let keys: Vec<String> = self
                .store
                .keys()
                .into_iter()
                .filter_map(|key| key.strip_prefix(&namespace).map(str::to_string))
                .collect();
            return Ok(json!({ "operation": "list", "keys": keys }));
        }

        let key = str_arg(payload, "key", "memory")?;
        let scoped = format!("{namespace}{key}");
        match operation {
            "store" => {
                let value = payload.get("value").cloned().unwrap_or(Value::Null);
                let replaced = self.store.set(&scoped, value.clone()).is_some();
                Ok(json!({ "operation": "store", "key": key, "value": value, "replaced": replaced }))
            }
            "retrieve" => {
                let value = self
                    .store
                    .get(&scoped)
                    .ok_or_else(|| BlocksError::handler("memory", format!("key `{key}` not found")))?;
                Ok(json!({ "operation": "retrieve", "key": key, "value": value }))
            }
            _ => {
                let removed = self.store.remove(&scoped).is_some();
                Ok(json!({ "operation": "delete", "key": key, "removed": removed }))
            }
        }
    }
}

/// File roots resolve payload paths under the root's `base_path` metadata.
pub struct FileRootHandler {
    files: Arc<dyn FileStore>,
}

impl FileRootHandler {
    pub fn new(files: Arc<dyn FileStore>) -> Self {
        Self { files }
    }
}

fn join(base: Option<&str>, path: &str) -> String {
    match base.map(|b| b.trim_end_matches('/')).filter(|b| !b.is_empty()) {
        Some(base) if path.is_empty() || path == "." => base.to_string(),
        Some(base) => format!("{base}/{path}"),
        None => path.to_string(),
    }
}

#[async_trait]
impl Handler for FileRootHandler {
    fn kind(&self) -> &str {
        "file_system"
    }

    fn operations(&self) -> &[&str] {
        &["read", "write", "list", "delete"]
    }

    async fn handle(
        &self,
        item: &ItemDefinition,
        operation: &str,
        payload: &Map<String, Value>,
    ) -> Result<Value> {
        let base = item.metadata.get("base_path").and_then(Value::as_str);
        let path = payload.get("path").and_then(Value::as_str).unwrap_or("");
        let target = join(base, path);

        match operation {
            "read" => {
                let content = self.files.read(&target).await?;
                Ok(json!({ "operation": "read", "path": path, "size": content.len(), "content": content }))
            }
            "write" => {
                let content = payload.get("content").and_then(Value::as_str).unwrap_or("");
                let size = self.files.write(&target, content).await?;
                Ok(json!({ "operation": "write", "path": path, "size": size }))
            }
            "list" => {
                let entries = self.files.list(&target).await?;
                Ok(json!({ "operation": "list", "path": path, "count": entries.len(), "entries": entries }))
            }
            _ => {
                self.files.remove(&target).await?;
                Ok(json!({ "operation": "delete", "path": path }))
            }
        }
    }
}

pub struct NetworkRootHandler {
    probe: Arc<dyn NetworkProbe>,
}

impl NetworkRootHandler {
    pub fn new(probe: Arc<dyn NetworkProbe>) -> Self {
        Self { probe }
    }
}

fn port_of(value: &Value) -> Option<u16> {
    as_number(value)
        .filter(|n| n.fract() == 0.0 && (0.0..=65535.0).contains(n))
        .map(|n| n as u16)
}

#[async_trait]
impl Handler for NetworkRootHandler {
    fn kind(&self) -> &str {
        "network"
    }

    fn operations(&self) -> &[&str] {
        &["ping", "scan", "connect"]
    }

    async fn handle(
        &self,
        _item: &ItemDefinition,
        operation: &str,
        payload: &Map<String, Value>,
    ) -> Result<Value> {
        let host = str_arg(payload, "host", "network")?;
        match operation {
            "ping" => {
                let report = self.probe.ping(host).await?;
                Ok(json!({ "operation": "ping", "report": report }))
            }
            "scan" => {
                let ports: Vec<u16> = match payload.get("ports").and_then(Value::as_array) {
                    Some(ports) => ports.iter().filter_map(port_of).collect(),
                    None => vec![22, 80, 443],
                };
                let reports = self.probe.scan(host, &ports).await?;
                let open: Vec<u16> = reports.iter().filter(|r| r.open).map(|r| r.port).collect();
                Ok(json!({ "operation": "scan", "host": host, "open_ports": open, "ports": reports }))
            }
            _ => {
                let port = payload.get("port").and_then(port_of).unwrap_or(80);
                let connected = self.probe.connect(host, port).await?;
                Ok(json!({
                    "operation": "connect",
                    "host": host,
                    "port": port,
                    "connection_status": if connected { "established" } else { "refused" },
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::{InMemoryFileStore, InMemoryKeyValueStore, StaticNetworkProbe};

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn memory_root_round_trips_values_per_root() {
        let handler = MemoryRootHandler::new(Arc::new(InMemoryKeyValueStore::new()));
        let cache = ItemDefinition::new("cache", "memory");
        let other = ItemDefinition::new("scratch", "memory");

        handler
            .handle(&cache, "store", &payload(json!({"key": "a", "value": 1})))
            .await
            .unwrap();
        let got = handler
            .handle(&cache, "retrieve", &payload(json!({"key": "a"})))
            .await
            .unwrap();
        assert_eq!(got["value"], json!(1));

        let listed = handler.handle(&other, "list", &Map::new()).await.unwrap();
        assert_eq!(listed["keys"], json!([]));
        assert!(handler
            .handle(&other, "retrieve", &payload(json!({"key": "a"})))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn file_root_scopes_paths_under_base() {
        let files = Arc::new(InMemoryFileStore::new().with_file("workspace/notes.txt", "hi"));
        let handler = FileRootHandler::new(files.clone());
        let root = ItemDefinition::new("workspace", "file_system")
            .with_metadata("base_path", json!("workspace"));

        let read = handler
            .handle(&root, "read", &payload(json!({"path": "notes.txt"})))
            .await
            .unwrap();
        assert_eq!(read["content"], json!("hi"));

        handler
            .handle(&root, "write", &payload(json!({"path": "todo.txt", "content": "x"})))
            .await
            .unwrap();
        let listed = handler.handle(&root, "list", &Map::new()).await.unwrap();
        assert_eq!(listed["entries"], json!(["notes.txt", "todo.txt"]));
    }

    #[tokio::test]
    async fn network_root_uses_probe() {
        let handler = NetworkRootHandler::new(Arc::new(StaticNetworkProbe::new()));
        let root = ItemDefinition::new("lan", "network");
        let scan = handler
            .handle(&root, "scan", &payload(json!({"host": "localhost", "ports": [22, 9999]})))
            .await
            .unwrap();
        assert_eq!(scan["open_ports"], json!([22]));

        let connect = handler
            .handle(&root, "connect", &payload(json!({"host": "nowhere", "port": 80})))
            .await
            .unwrap();
        assert_eq!(connect["connection_status"], json!("refused"));
    }
}
