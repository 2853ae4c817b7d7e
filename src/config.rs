use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::catalog::ItemDefinition;
use crate::error::{BlocksError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default = "default_noun")]
    pub noun: String,
    /// Name of a seed catalog from `presets` to load before `[[items]]`.
    #[serde(default)]
    pub preset: Option<String>,
    #[serde(default)]
    pub handler_timeout_ms: Option<u64>,
    #[serde(default)]
    pub sampling_seed: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            noun: default_noun(),
            preset: None,
            handler_timeout_ms: None,
            sampling_seed: None,
        }
    }
}

impl EngineConfig {
    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }
}

fn default_noun() -> String {
    "tool".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilesConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
        }
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub items: Vec<ItemDefinition>,
}

impl AppConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw)
            .map_err(|err| BlocksError::Config(format!("Failed to parse configuration: {err}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let mut cfg = Self::from_file(path)?;
        cfg.apply_env();
        Ok(cfg)
    }

    /// Overrides from `BLOCKS_*` variables; unparsable values are ignored.
    pub fn apply_env(&mut self) {
        if let Ok(host) = env::var("BLOCKS_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = env::var("BLOCKS_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                self.server.port = parsed;
            }
        }
        if let Ok(json) = env::var("BLOCKS_LOG_JSON") {
            if let Ok(parsed) = json.parse::<bool>() {
                self.telemetry.json = parsed;
            }
        }
        if let Ok(timeout) = env::var("BLOCKS_HANDLER_TIMEOUT_MS") {
            if let Ok(parsed) = timeout.parse::<u64>() {
                self.engine.handler_timeout_ms = Some(parsed);
            }
        }
        if let Ok(seed) = env::var("BLOCKS_SAMPLING_SEED") {
            if let Ok(parsed) = seed.parse::<u64>() {
                self.engine.sampling_seed = Some(parsed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_and_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[engine]\nnoun='root'\nhandler_timeout_ms=250\n[server]\nhost='0.0.0.0'\nport=9000"
        )
        .unwrap();

        env::set_var("BLOCKS_PORT", "9100");
        env::set_var("BLOCKS_SAMPLING_SEED", "17");
        let cfg = AppConfig::from_env_or_file(file.path()).unwrap();
        env::remove_var("BLOCKS_PORT");
        env::remove_var("BLOCKS_SAMPLING_SEED");

        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.engine.noun, "root");
        assert_eq!(cfg.engine.sampling_seed, Some(17));
        assert_eq!(cfg.engine.handler_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(cfg.files.base_dir, PathBuf::from("."));
    }

    #[test]
    fn parses_seed_items() {
        let cfg = AppConfig::from_toml_str(
            r#"
[[items]]
id = "calc"
kind = "calculator"
metadata = { category = "math", tags = ["arithmetic"] }

[items.schema.a]
type = "number"
required = true

[items.schema.op]
type = "string"
required = true
constraints = [{ rule = "one_of", values = ["add", "sub"] }]
"#,
        )
        .unwrap();

        assert_eq!(cfg.items.len(), 1);
        let item = &cfg.items[0];
        assert_eq!(item.category(), Some("math"));
        assert_eq!(item.schema.names(), vec!["a".to_string(), "op".to_string()]);
        assert_eq!(cfg.engine, EngineConfig::default());
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = AppConfig::from_toml_str("[engine\nnoun=").unwrap_err();
        assert!(matches!(err, BlocksError::Config(_)));
    }
}
