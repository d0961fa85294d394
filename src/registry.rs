//! The plugin registry: the single authoritative `id -> RuntimeRecord` map
//! (spec §3, §4.1, C1).
//!
//! Grounded on the teacher's `LifecycleManager`
//! (`Arc<RwLock<HashMap<String, PluginLifecycle>>>`, state-transition
//! validation before every mutation) generalized from one `RwLock` around
//! the whole map to a `dashmap::DashMap` so reads/writes of unrelated
//! records never contend, matching the corpus's `hooks::HookManager` style
//! for the same reason.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{PluginError, PluginResult};
use crate::manifest::Manifest;

/// Current lifecycle status of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginStatus {
    Discovered,
    Validated,
    Loaded,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
    Reloading,
}

impl std::fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl PluginStatus {
    /// Whether `to` is a legal direct transition from `self`. The registry
    /// is the single enforcement point for this; lifecycle/supervisor code
    /// never mutates status without going through `Registry::transition`.
    pub fn can_transition_to(self, to: PluginStatus) -> bool {
        use PluginStatus::*;
        matches!(
            (self, to),
            (Discovered, Validated)
                | (Discovered, Failed)
                | (Validated, Loaded)
                | (Validated, Failed)
                | (Loaded, Starting)
                | (Loaded, Failed)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Stopping)
                | (Running, Failed)
                | (Running, Reloading)
                | (Stopping, Stopped)
                | (Stopping, Failed)
                | (Stopped, Starting)
                | (Stopped, Loaded)
                | (Reloading, Loaded)
                | (Reloading, Failed)
                | (Failed, Validated)
                | (Failed, Loaded)
        )
    }
}

/// Current health as last observed by a health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

impl From<crate::traits::HealthResult> for HealthStatus {
    fn from(r: crate::traits::HealthResult) -> Self {
        match r {
            crate::traits::HealthResult::Healthy => HealthStatus::Healthy,
            crate::traits::HealthResult::Degraded => HealthStatus::Degraded,
            crate::traits::HealthResult::Unhealthy => HealthStatus::Unhealthy,
        }
    }
}

/// The authoritative record for one plugin: identity, isolation ownership,
/// status, health, counters and timestamps (spec §3).
pub struct RuntimeRecord {
    pub id: String,
    pub manifest: Manifest,
    pub instance_id: Uuid,
    pub status: PluginStatus,
    pub health: HealthStatus,
    pub consecutive_health_failures: u32,
    pub consecutive_health_successes: u32,
    pub reload_count: u64,
    pub config_version: u64,
    pub discovered_at: DateTime<Utc>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// The plugin's isolation boundary, exclusively owned by this record
    /// once loaded. `None` until C4 loads the plugin.
    pub boundary: Option<Arc<crate::loader::LoadedBoundary>>,
}

impl RuntimeRecord {
    pub fn new(manifest: Manifest) -> Self {
        Self {
            id: manifest.id.clone(),
            manifest,
            instance_id: Uuid::new_v4(),
            status: PluginStatus::Discovered,
            health: HealthStatus::Unknown,
            consecutive_health_failures: 0,
            consecutive_health_successes: 0,
            reload_count: 0,
            config_version: 0,
            discovered_at: Utc::now(),
            loaded_at: None,
            started_at: None,
            last_health_check_at: None,
            last_error: None,
            boundary: None,
        }
    }
}

/// A read-only snapshot of a `RuntimeRecord`, safe to serialize and hand to
/// callers of `Supervisor::snapshot` without exposing the isolation boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSnapshot {
    pub id: String,
    pub version: semver::Version,
    pub status: PluginStatus,
    pub health: HealthStatus,
    pub reload_count: u64,
    pub config_version: u64,
    pub discovered_at: DateTime<Utc>,
    pub loaded_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl From<&RuntimeRecord> for RecordSnapshot {
    fn from(r: &RuntimeRecord) -> Self {
        Self {
            id: r.id.clone(),
            version: r.manifest.version.clone(),
            status: r.status,
            health: r.health,
            reload_count: r.reload_count,
            config_version: r.config_version,
            discovered_at: r.discovered_at,
            loaded_at: r.loaded_at,
            started_at: r.started_at,
            last_health_check_at: r.last_health_check_at,
            last_error: r.last_error.clone(),
        }
    }
}

/// The authoritative `id -> RuntimeRecord` map. Every other component
/// reaches the set of known plugins through this type; there is no
/// secondary source of truth.
#[derive(Default)]
pub struct Registry {
    records: DashMap<String, RuntimeRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a newly discovered plugin. Fails if the id is already present.
    pub fn insert(&self, record: RuntimeRecord) -> PluginResult<()> {
        if self.records.contains_key(&record.id) {
            return Err(PluginError::AlreadyExists(record.id));
        }
        self.records.insert(record.id.clone(), record);
        Ok(())
    }

    /// Replace an existing record outright (used by discovery's
    /// dedup-keep-highest-version rule). Does not validate a status
    /// transition, since this supersedes the previous record entirely.
    pub fn replace(&self, record: RuntimeRecord) {
        self.records.insert(record.id.clone(), record);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn get_version(&self, id: &str) -> Option<semver::Version> {
        self.records.get(id).map(|r| r.manifest.version.clone())
    }

    /// Compare-and-swap a status transition. Rejects the move if `from`
    /// (read fresh under the per-entry lock) no longer matches, or if the
    /// status graph forbids `from -> to`.
    pub fn transition(&self, id: &str, to: PluginStatus) -> PluginResult<()> {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| PluginError::UnknownPlugin(id.to_string()))?;

        if !entry.status.can_transition_to(to) {
            return Err(PluginError::InvalidTransition {
                id: id.to_string(),
                from: entry.status.to_string(),
                to: to.to_string(),
            });
        }

        let now = Utc::now();
        match to {
            PluginStatus::Loaded => entry.loaded_at = Some(now),
            PluginStatus::Running => entry.started_at = Some(now),
            _ => {}
        }
        entry.status = to;
        Ok(())
    }

    /// Force-fail a record, recording the error that caused it. Allowed
    /// from any status (spec §3: `Failed` is reachable from any stage).
    pub fn mark_failed(&self, id: &str, reason: impl Into<String>) -> PluginResult<()> {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| PluginError::UnknownPlugin(id.to_string()))?;
        entry.status = PluginStatus::Failed;
        entry.last_error = Some(reason.into());
        Ok(())
    }

    pub fn record_health(&self, id: &str, health: HealthStatus, threshold_failure: u32, threshold_success: u32) -> PluginResult<()> {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| PluginError::UnknownPlugin(id.to_string()))?;
        entry.last_health_check_at = Some(Utc::now());

        match health {
            HealthStatus::Healthy => {
                entry.consecutive_health_successes += 1;
                entry.consecutive_health_failures = 0;
                if entry.consecutive_health_successes >= threshold_success {
                    entry.health = HealthStatus::Healthy;
                }
            }
            HealthStatus::Unhealthy | HealthStatus::Degraded => {
                entry.consecutive_health_failures += 1;
                entry.consecutive_health_successes = 0;
                if entry.consecutive_health_failures >= threshold_failure {
                    entry.health = health;
                }
            }
            HealthStatus::Unknown => entry.health = HealthStatus::Unknown,
        }
        Ok(())
    }

    pub fn increment_reload_count(&self, id: &str) -> PluginResult<()> {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| PluginError::UnknownPlugin(id.to_string()))?;
        entry.reload_count += 1;
        Ok(())
    }

    /// Bump `config_version` after a successful `update_config` (spec §4.7).
    pub fn increment_config_version(&self, id: &str) -> PluginResult<u64> {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| PluginError::UnknownPlugin(id.to_string()))?;
        entry.config_version += 1;
        Ok(entry.config_version)
    }

    /// Overwrite the reload counter directly, used by `reload_one` to carry
    /// a cumulative count forward onto the fresh record a reload produces.
    pub fn set_reload_count(&self, id: &str, count: u64) -> PluginResult<()> {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| PluginError::UnknownPlugin(id.to_string()))?;
        entry.reload_count = count;
        Ok(())
    }

    pub fn set_boundary(&self, id: &str, boundary: Arc<crate::loader::LoadedBoundary>) -> PluginResult<()> {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| PluginError::UnknownPlugin(id.to_string()))?;
        entry.boundary = Some(boundary);
        Ok(())
    }

    pub fn take_boundary(&self, id: &str) -> PluginResult<Option<Arc<crate::loader::LoadedBoundary>>> {
        let mut entry = self
            .records
            .get_mut(id)
            .ok_or_else(|| PluginError::UnknownPlugin(id.to_string()))?;
        Ok(entry.boundary.take())
    }

    pub fn status_of(&self, id: &str) -> PluginResult<PluginStatus> {
        self.records
            .get(id)
            .map(|r| r.status)
            .ok_or_else(|| PluginError::UnknownPlugin(id.to_string()))
    }

    pub fn snapshot(&self, id: &str) -> PluginResult<RecordSnapshot> {
        self.records
            .get(id)
            .map(|r| RecordSnapshot::from(&*r))
            .ok_or_else(|| PluginError::UnknownPlugin(id.to_string()))
    }

    pub fn snapshot_all(&self) -> Vec<RecordSnapshot> {
        self.records.iter().map(|r| RecordSnapshot::from(&*r)).collect()
    }

    pub fn remove(&self, id: &str) -> PluginResult<RuntimeRecord> {
        self.records
            .remove(id)
            .map(|(_, r)| r)
            .ok_or_else(|| PluginError::UnknownPlugin(id.to_string()))
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|r| r.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn manifest_of(&self, id: &str) -> PluginResult<Manifest> {
        self.records
            .get(id)
            .map(|r| r.manifest.clone())
            .ok_or_else(|| PluginError::UnknownPlugin(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;
    use std::path::PathBuf;

    fn manifest(id: &str) -> Manifest {
        Manifest {
            id: id.to_string(),
            name: id.to_string(),
            version: Version::new(1, 0, 0),
            main_artifact: PathBuf::from("plugin.so"),
            entry_point: "create_plugin".to_string(),
            min_host_version: Version::new(0, 1, 0),
            max_host_version: None,
            supported_platforms: vec![],
            dependencies: vec![],
            runtime_dependencies: vec![],
            capabilities: Default::default(),
            health_check: Default::default(),
            permissions: vec![],
            tags: vec![],
            configuration_schema: None,
        }
    }

    #[test]
    fn insert_rejects_duplicate_id() {
        let reg = Registry::new();
        reg.insert(RuntimeRecord::new(manifest("a"))).unwrap();
        let err = reg.insert(RuntimeRecord::new(manifest("a"))).unwrap_err();
        assert!(matches!(err, PluginError::AlreadyExists(_)));
    }

    #[test]
    fn legal_transition_succeeds_illegal_fails() {
        let reg = Registry::new();
        reg.insert(RuntimeRecord::new(manifest("a"))).unwrap();
        reg.transition("a", PluginStatus::Validated).unwrap();
        reg.transition("a", PluginStatus::Loaded).unwrap();

        let err = reg.transition("a", PluginStatus::Running).unwrap_err();
        assert!(matches!(err, PluginError::InvalidTransition { .. }));
    }

    #[test]
    fn mark_failed_works_from_any_status() {
        let reg = Registry::new();
        reg.insert(RuntimeRecord::new(manifest("a"))).unwrap();
        reg.mark_failed("a", "boom").unwrap();
        assert_eq!(reg.status_of("a").unwrap(), PluginStatus::Failed);
    }

    #[test]
    fn unknown_plugin_errors() {
        let reg = Registry::new();
        let err = reg.transition("missing", PluginStatus::Validated).unwrap_err();
        assert!(matches!(err, PluginError::UnknownPlugin(_)));
    }

    #[test]
    fn config_version_increments_independently_of_reload_count() {
        let reg = Registry::new();
        reg.insert(RuntimeRecord::new(manifest("a"))).unwrap();
        assert_eq!(reg.increment_config_version("a").unwrap(), 1);
        assert_eq!(reg.increment_config_version("a").unwrap(), 2);
        assert_eq!(reg.snapshot("a").unwrap().config_version, 2);
        assert_eq!(reg.snapshot("a").unwrap().reload_count, 0);
    }

    #[test]
    fn health_status_requires_consecutive_threshold() {
        let reg = Registry::new();
        reg.insert(RuntimeRecord::new(manifest("a"))).unwrap();
        reg.record_health("a", HealthStatus::Unhealthy, 2, 1).unwrap();
        assert_eq!(reg.snapshot("a").unwrap().health, HealthStatus::Unknown);
        reg.record_health("a", HealthStatus::Unhealthy, 2, 1).unwrap();
        assert_eq!(reg.snapshot("a").unwrap().health, HealthStatus::Unhealthy);
    }
}
