use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::capabilities::FileStore;
use crate::catalog::ItemDefinition;
use crate::dispatch::Handler;
use crate::error::Result;

const KIND: &str = "resource";

/// A resource is one file; its location comes from `metadata.path`, or the
/// item id with any `file://` prefix removed.
pub struct ResourceHandler {
    files: Arc<dyn FileStore>,
}

impl ResourceHandler {
    pub fn new(files: Arc<dyn FileStore>) -> Self {
        Self { files }
    }
}

pub fn resource_path(item: &ItemDefinition) -> &str {
    item.metadata
        .get("path")
        .and_then(Value::as_str)
        .unwrap_or_else(|| item.id.strip_prefix("file://").unwrap_or(&item.id))
}

#[async_trait]
impl Handler for ResourceHandler {
    fn kind(&self) -> &str {
        KIND
    }

    fn operations(&self) -> &[&str] {
        &["read", "write", "delete"]
    }

    async fn handle(
        &self,
        item: &ItemDefinition,
        operation: &str,
        payload: &Map<String, Value>,
    ) -> Result<Value> {
        let path = resource_path(item);
        match operation {
            "read" => {
                let content = self.files.read(path).await?;
                Ok(json!({ "uri": item.id, "type": "text", "content": content }))
            }
            "write" => {
                let content = payload.get("content").and_then(Value::as_str).unwrap_or("");
                let size = self.files.write(path, content).await?;
                Ok(json!({ "uri": item.id, "size": size }))
            }
            _ => {
                self.files.remove(path).await?;
                Ok(json!({ "uri": item.id }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::LocalFileStore;

    #[tokio::test]
    async fn reads_and_writes_through_local_store() {
        let dir = tempfile::tempdir().unwrap();
        let handler = ResourceHandler::new(Arc::new(LocalFileStore::new(dir.path())));
        let item = ItemDefinition::new("file://readme.md", KIND);

        let mut payload = Map::new();
        payload.insert("content".into(), json!("# Resources"));
        let written = handler.handle(&item, "write", &payload).await.unwrap();
        assert_eq!(written["size"], json!(11));

        let read = handler.handle(&item, "read", &Map::new()).await.unwrap();
        assert_eq!(read["content"], json!("# Resources"));
        assert!(dir.path().join("readme.md").exists());
    }

    #[test]
    fn path_prefers_metadata() {
        let item = ItemDefinition::new("file://a.txt", KIND).with_metadata("path", json!("docs/a.txt"));
        assert_eq!(resource_path(&item), "docs/a.txt");
        assert_eq!(resource_path(&ItemDefinition::new("file://b.txt", KIND)), "b.txt");
    }
}
