//! Side-effect collaborators handed to handlers at construction.
//!
//! Handlers never reach the outside world directly; they go through one of the
//! traits below so that tests can swap in the in-memory fakes.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{fs, io::AsyncWriteExt};

use crate::error::{BlocksError, Result};

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn read(&self, path: &str) -> Result<String>;

    /// Returns the number of bytes written.
    async fn write(&self, path: &str, contents: &str) -> Result<usize>;

    async fn list(&self, dir: &str) -> Result<Vec<String>>;

    async fn remove(&self, path: &str) -> Result<()>;
}

/// Files under a base directory. Paths that climb out of it are refused.
#[derive(Debug, Clone)]
pub struct LocalFileStore {
    base_dir: PathBuf,
}

impl LocalFileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative.components().any(|component| {
            matches!(
                component,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        });
        if escapes {
            return Err(BlocksError::handler(
                "file_system",
                format!("path `{path}` is outside the store"),
            ));
        }
        Ok(self.base_dir.join(relative))
    }
}

fn io_failure(path: &str, err: std::io::Error) -> BlocksError {
    BlocksError::handler("file_system", format!("{path}: {err}"))
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn read(&self, path: &str) -> Result<String> {
        let target = self.resolve(path)?;
        fs::read_to_string(&target)
            .await
            .map_err(|err| io_failure(path, err))
    }

    async fn write(&self, path: &str, contents: &str) -> Result<usize> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| io_failure(path, err))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&target)
            .await
            .map_err(|err| io_failure(path, err))?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(|err| io_failure(path, err))?;
        Ok(contents.len())
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let target = self.resolve(dir)?;
        let mut entries = fs::read_dir(&target)
            .await
            .map_err(|err| io_failure(dir, err))?;
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| io_failure(dir, err))?
        {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let target = self.resolve(path)?;
        fs::remove_file(&target)
            .await
            .map_err(|err| io_failure(path, err))
    }
}

/// Flat path → contents map; `list` matches on path prefix.
#[derive(Debug, Default)]
pub struct InMemoryFileStore {
    files: RwLock<BTreeMap<String, String>>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        if let Ok(mut files) = self.files.write() {
            files.insert(path.into(), contents.into());
        }
        self
    }
}

fn poisoned() -> BlocksError {
    BlocksError::Protocol("store lock poisoned".into())
}

#[async_trait]
impl FileStore for InMemoryFileStore {
    async fn read(&self, path: &str) -> Result<String> {
        self.files
            .read()
            .map_err(|_| poisoned())?
            .get(path)
            .cloned()
            .ok_or_else(|| BlocksError::handler("file_system", format!("{path}: no such file")))
    }

    async fn write(&self, path: &str, contents: &str) -> Result<usize> {
        self.files
            .write()
            .map_err(|_| poisoned())?
            .insert(path.to_string(), contents.to_string());
        Ok(contents.len())
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let prefix = dir.trim_end_matches('/');
        let files = self.files.read().map_err(|_| poisoned())?;
        Ok(files
            .keys()
            .filter_map(|path| {
                if prefix.is_empty() || prefix == "." {
                    Some(path.clone())
                } else {
                    path.strip_prefix(prefix)
                        .and_then(|rest| rest.strip_prefix('/'))
                        .map(str::to_string)
                }
            })
            .collect())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.files
            .write()
            .map_err(|_| poisoned())?
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| BlocksError::handler("file_system", format!("{path}: no such file")))
    }
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    /// Returns the previous value, if any.
    fn set(&self, key: &str, value: Value) -> Option<Value>;

    fn remove(&self, key: &str) -> Option<Value>;

    fn keys(&self) -> Vec<String>;
}

#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for InMemoryKeyValueStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Option<Value> {
        self.entries.write().ok()?.insert(key.to_string(), value)
    }

    fn remove(&self, key: &str) -> Option<Value> {
        self.entries.write().ok()?.remove(key)
    }

    fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingReport {
    pub host: String,
    pub reachable: bool,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortReport {
    pub port: u16,
    pub open: bool,
}

#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn ping(&self, host: &str) -> Result<PingReport>;

    async fn scan(&self, host: &str, ports: &[u16]) -> Result<Vec<PortReport>>;

    async fn connect(&self, host: &str, port: u16) -> Result<bool>;
}

/// Answers from a fixed table: hosts listed are reachable, listed ports are open.
#[derive(Debug, Clone, Default)]
pub struct StaticNetworkProbe {
    hosts: Vec<String>,
    open_ports: Vec<u16>,
    latency_ms: u64,
}

impl StaticNetworkProbe {
    pub fn new() -> Self {
        Self {
            hosts: vec!["localhost".into(), "127.0.0.1".into()],
            open_ports: vec![22, 80, 443],
            latency_ms: 1,
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.hosts.push(host.into());
        self
    }

    pub fn with_open_ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.open_ports = ports.into_iter().collect();
        self
    }

    fn knows(&self, host: &str) -> bool {
        self.hosts.iter().any(|known| known == host)
    }
}

#[async_trait]
impl NetworkProbe for StaticNetworkProbe {
    async fn ping(&self, host: &str) -> Result<PingReport> {
        Ok(PingReport {
            host: host.to_string(),
            reachable: self.knows(host),
            latency_ms: self.latency_ms,
        })
    }

    async fn scan(&self, host: &str, ports: &[u16]) -> Result<Vec<PortReport>> {
        let reachable = self.knows(host);
        Ok(ports
            .iter()
            .map(|&port| PortReport {
                port,
                open: reachable && self.open_ports.contains(&port),
            })
            .collect())
    }

    async fn connect(&self, host: &str, port: u16) -> Result<bool> {
        Ok(self.knows(host) && self.open_ports.contains(&port))
    }
}

/// Bundle of collaborators handed to the standard handlers.
#[derive(Clone)]
pub struct Capabilities {
    pub files: Arc<dyn FileStore>,
    pub memory: Arc<dyn KeyValueStore>,
    pub network: Arc<dyn NetworkProbe>,
}

impl Capabilities {
    pub fn in_memory() -> Self {
        Self {
            files: Arc::new(InMemoryFileStore::new()),
            memory: Arc::new(InMemoryKeyValueStore::new()),
            network: Arc::new(StaticNetworkProbe::new()),
        }
    }

    pub fn local(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            files: Arc::new(LocalFileStore::new(base_dir)),
            ..Self::in_memory()
        }
    }

    pub fn with_files(mut self, files: Arc<dyn FileStore>) -> Self {
        self.files = files;
        self
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::in_memory()
    }
}
