use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{BlocksError, Result};
use crate::schema::{Schema, StepDefinition};

/// One registered capability: a tool, prompt, root, sampling strategy or template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDefinition {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub schema: Schema,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepDefinition>,
}

impl ItemDefinition {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            schema: Schema::new(),
            metadata: Map::new(),
            steps: Vec::new(),
        }
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn description(&self) -> Option<&str> {
        self.metadata.get("description").and_then(Value::as_str)
    }

    pub fn category(&self) -> Option<&str> {
        self.metadata.get("category").and_then(Value::as_str)
    }

    pub fn tags(&self) -> Vec<&str> {
        string_list(self.metadata.get("tags"))
    }

    /// Operations this item admits, when it restricts them.
    pub fn capabilities(&self) -> Option<Vec<&str>> {
        self.metadata
            .get("capabilities")
            .filter(|value| value.is_array())
            .map(|value| string_list(Some(value)))
    }
}

fn string_list(value: Option<&Value>) -> Vec<&str> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Partial update applied by [`Catalog::update`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemUpdate {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub schema: Option<Schema>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub steps: Option<Vec<StepDefinition>>,
}

impl ItemUpdate {
    pub fn metadata(key: impl Into<String>, value: Value) -> Self {
        let mut entries = Map::new();
        entries.insert(key.into(), value);
        Self {
            metadata: Some(entries),
            ..Self::default()
        }
    }

    pub fn schema(schema: Schema) -> Self {
        Self {
            schema: Some(schema),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListFilter {
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ListFilter {
    pub fn kind(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            ..Self::default()
        }
    }

    pub fn category(category: impl Into<String>) -> Self {
        Self {
            category: Some(category.into()),
            ..Self::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Filters combine with AND; an item matches the tag filter when it carries any listed tag.
    pub fn accepts(&self, item: &ItemDefinition) -> bool {
        if let Some(kind) = &self.kind {
            if &item.kind != kind {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if item.category() != Some(category.as_str()) {
                return false;
            }
        }
        if !self.tags.is_empty() {
            let tags = item.tags();
            if !self.tags.iter().any(|wanted| tags.contains(&wanted.as_str())) {
                return false;
            }
        }
        true
    }
}

/// Process-lifetime store of item definitions, keyed by id, kept in insertion order.
#[derive(Clone)]
pub struct Catalog {
    noun: String,
    items: Arc<RwLock<Vec<ItemDefinition>>>,
}

impl Catalog {
    pub fn new(noun: impl Into<String>) -> Self {
        Self {
            noun: noun.into(),
            items: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn noun(&self) -> &str {
        &self.noun
    }

    pub fn create(&self, item: ItemDefinition) -> Result<ItemDefinition> {
        item.schema.verify()?;
        for step in &item.steps {
            step.schema.verify()?;
        }
        let mut items = self.write()?;
        if items.iter().any(|existing| existing.id == item.id) {
            return Err(BlocksError::DuplicateId(item.id));
        }
        debug!(noun = %self.noun, id = %item.id, kind = %item.kind, "catalog item created");
        items.push(item.clone());
        Ok(item)
    }

    pub fn get(&self, id: &str) -> Result<ItemDefinition> {
        self.read()?
            .iter()
            .find(|item| item.id == id)
            .cloned()
            .ok_or_else(|| BlocksError::not_found(&self.noun, id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read()
            .map(|items| items.iter().any(|item| item.id == id))
            .unwrap_or(false)
    }

    pub fn update(&self, id: &str, update: ItemUpdate) -> Result<ItemDefinition> {
        if let Some(schema) = &update.schema {
            schema.verify()?;
        }
        if let Some(steps) = &update.steps {
            for step in steps {
                step.schema.verify()?;
            }
        }

        let mut items = self.write()?;
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or_else(|| BlocksError::not_found(&self.noun, id))?;

        if let Some(kind) = &update.kind {
            if kind != &item.kind {
                return Err(BlocksError::KindChange {
                    id: id.to_string(),
                    from: item.kind.clone(),
                    to: kind.clone(),
                });
            }
        }

        // The write lock is held for the whole merge.
        if let Some(schema) = update.schema {
            item.schema = schema;
        }
        if let Some(steps) = update.steps {
            item.steps = steps;
        }
        if let Some(metadata) = update.metadata {
            for (key, value) in metadata {
                item.metadata.insert(key, value);
            }
        }
        debug!(noun = %self.noun, id = %id, "catalog item updated");
        Ok(item.clone())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let mut items = self.write()?;
        let position = items
            .iter()
            .position(|item| item.id == id)
            .ok_or_else(|| BlocksError::not_found(&self.noun, id))?;
        items.remove(position);
        debug!(noun = %self.noun, id = %id, "catalog item deleted");
        Ok(())
    }

    pub fn list(&self, filter: &ListFilter) -> Vec<ItemDefinition> {
        self.read()
            .map(|items| {
                items
                    .iter()
                    .filter(|item| filter.accepts(item))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn ids(&self) -> Vec<String> {
        self.read()
            .map(|items| items.iter().map(|item| item.id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<ItemDefinition>>> {
        self.items
            .read()
            .map_err(|_| BlocksError::Protocol("catalog lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<ItemDefinition>>> {
        self.items
            .write()
            .map_err(|_| BlocksError::Protocol("catalog lock poisoned".into()))
    }
}
