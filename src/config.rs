//! Ambient configuration (spec §6 "Environment": the core depends only on a
//! small key subset — plugin root paths, manifest filename, trusted roots,
//! timeouts, parallelism, health toggles).
//!
//! Grounded on the teacher's `ConfigManager` (typed config struct,
//! TOML-on-disk persistence via `tokio::fs`), trimmed to the subset spec §6
//! names; the teacher's free-form per-plugin settings map is kept as
//! `PluginConfigData` since `update_config`/`on_config_changed` need
//! somewhere to carry the module-specific payload.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

use crate::error::{PluginError, PluginResult};

/// Typed configuration the supervisor is constructed with. The core never
/// reads environment variables directly (spec §6); the host is responsible
/// for populating this from whatever configuration source it uses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Root directories the discovery pipeline scans.
    pub plugin_roots: Vec<PathBuf>,

    /// Manifest filename discovery looks for in each directory.
    #[serde(default = "default_manifest_filename")]
    pub manifest_filename: String,

    /// If non-empty, artifact paths must start with one of these roots.
    #[serde(default)]
    pub trusted_roots: Vec<PathBuf>,

    /// Deny-listed dependency ids (spec §4.3 "prohibited dependencies").
    #[serde(default)]
    pub prohibited_dependencies: Vec<String>,

    /// Maximum concurrent loads during `start_all` (spec §4.7, §5).
    #[serde(default = "default_max_concurrent_loads")]
    pub max_concurrent_loads: usize,

    /// Per-stage timeouts (spec §5).
    #[serde(default)]
    pub stage_timeouts: StageTimeouts,

    /// Whether the periodic health scheduler runs at all.
    #[serde(default = "default_true")]
    pub health_monitoring_enabled: bool,

    /// Current platform tag checked against `supported_platforms`.
    #[serde(default = "default_platform")]
    pub current_platform: String,

    /// Directory persisted per-plugin configuration is written to.
    pub config_dir: PathBuf,
}

fn default_manifest_filename() -> String {
    "plugin.json".to_string()
}
fn default_max_concurrent_loads() -> usize {
    5
}
fn default_true() -> bool {
    true
}
fn default_platform() -> String {
    std::env::consts::OS.to_string()
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            plugin_roots: Vec::new(),
            manifest_filename: default_manifest_filename(),
            trusted_roots: Vec::new(),
            prohibited_dependencies: Vec::new(),
            max_concurrent_loads: default_max_concurrent_loads(),
            stage_timeouts: StageTimeouts::default(),
            health_monitoring_enabled: true,
            current_platform: default_platform(),
            config_dir: PathBuf::from("./plugin-config"),
        }
    }
}

/// Per-stage timeout configuration (spec §5: "Each stage ... has its own
/// configurable deadline").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTimeouts {
    pub validate_ms: u64,
    pub init_ms: u64,
    pub configure_ms: u64,
    pub start_ms: u64,
    pub stop_ms: u64,
    pub unload_ms: u64,
    pub health_ms: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            validate_ms: 5_000,
            init_ms: 10_000,
            configure_ms: 5_000,
            start_ms: 30_000,
            stop_ms: 15_000,
            unload_ms: 10_000,
            health_ms: 5_000,
        }
    }
}

impl StageTimeouts {
    pub fn validate(&self) -> Duration {
        Duration::from_millis(self.validate_ms)
    }
    pub fn init(&self) -> Duration {
        Duration::from_millis(self.init_ms)
    }
    pub fn configure(&self) -> Duration {
        Duration::from_millis(self.configure_ms)
    }
    pub fn start(&self) -> Duration {
        Duration::from_millis(self.start_ms)
    }
    pub fn stop(&self) -> Duration {
        Duration::from_millis(self.stop_ms)
    }
    pub fn unload(&self) -> Duration {
        Duration::from_millis(self.unload_ms)
    }
    pub fn health(&self) -> Duration {
        Duration::from_millis(self.health_ms)
    }
}

/// Per-plugin settings payload, persisted as TOML and handed to
/// `Plugin::on_config_changed` on update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PluginConfigData {
    pub settings: HashMap<String, serde_json::Value>,
}

/// Loads and persists per-plugin configuration under `SupervisorConfig::config_dir`.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_dir: PathBuf,
}

impl ConfigStore {
    pub fn new(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    fn path_for(&self, plugin_id: &str) -> PathBuf {
        self.config_dir.join(format!("{plugin_id}.toml"))
    }

    pub async fn load(&self, plugin_id: &str) -> PluginResult<PluginConfigData> {
        let path = self.path_for(plugin_id);
        if !path.exists() {
            return Ok(PluginConfigData::default());
        }
        let content = tokio::fs::read_to_string(&path).await?;
        toml::from_str(&content).map_err(PluginError::from)
    }

    pub async fn save(&self, plugin_id: &str, config: &PluginConfigData) -> PluginResult<()> {
        tokio::fs::create_dir_all(&self.config_dir).await?;
        let content = toml::to_string_pretty(config).map_err(|e| PluginError::ConfigError {
            id: plugin_id.to_string(),
            reason: e.to_string(),
        })?;
        let path = self.path_for(plugin_id);
        let mut file = tokio::fs::File::create(&path).await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Load a `SupervisorConfig` from a TOML file on disk.
pub async fn load_supervisor_config(path: &Path) -> PluginResult<SupervisorConfig> {
    let content = tokio::fs::read_to_string(path).await?;
    toml::from_str(&content).map_err(PluginError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_has_sane_fan_out() {
        let config = SupervisorConfig::default();
        assert_eq!(config.max_concurrent_loads, 5);
    }

    #[tokio::test]
    async fn config_store_round_trips() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().to_path_buf());

        let mut data = PluginConfigData::default();
        data.settings.insert("level".to_string(), serde_json::json!("debug"));
        store.save("demo", &data).await.unwrap();

        let loaded = store.load("demo").await.unwrap();
        assert_eq!(loaded.settings.get("level"), Some(&serde_json::json!("debug")));
    }

    #[tokio::test]
    async fn missing_config_returns_default() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().to_path_buf());
        let loaded = store.load("absent").await.unwrap();
        assert!(loaded.settings.is_empty());
    }
}
