//! The supervisor (spec §4.7, C7): the top-level public API that replaces
//! the teacher's `PluginManager` facade, coordinating discovery, validation,
//! dependency ordering, loading, lifecycle staging and teardown for a whole
//! plugin population.
//!
//! Grounded on the teacher's `PluginManager` (the single facade struct in
//! `lib.rs` that owns every subsystem and exposes `load_plugin`/
//! `initialize_plugin`/`start_plugin`/`stop_plugin`/`unload_plugin`),
//! generalized into the batch/hot-operation split spec §4.7 names
//! (`start_all`/`stop_all` vs. `load_one`/`unload_one`/`reload_one`), with
//! bounded fan-out via `tokio::sync::Semaphore` (already a `tokio`
//! dependency; no new crate needed) and periodic health scheduling wired to
//! `health::HealthScheduler` through an explicit consumer loop the host runs
//! (spec §9 DESIGN NOTES: the core drives no background task the host did
//! not ask it to start).

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::config::{ConfigStore, SupervisorConfig};
use crate::dependency::DependencyResolver;
use crate::di::{IsolationPolicy, ServiceProvider};
use crate::discovery::Discovery;
use crate::error::{PluginError, PluginResult};
use crate::health::{HealthCheckRequest, HealthScheduler};
use crate::hooks::{HookManager, LifecycleEvent};
use crate::lifecycle::LifecycleDriver;
use crate::loader::{IsolatedLoader, PublishedSurface};
use crate::manifest::{DiscoveredPlugin, DiscoverySource, Manifest};
use crate::registry::{HealthStatus, PluginStatus, RecordSnapshot, Registry, RuntimeRecord};
use crate::traits::CancellationToken;
use crate::validator::{ValidationPolicy, Validator};
use crate::versioning::VersionChecker;

/// Per-plugin outcome of a batch operation (`start_all`/`stop_all`), named
/// explicitly rather than as an opaque flag (spec §6: "structured result
/// bundles, never opaque flags").
#[derive(Debug, Clone, Serialize)]
pub struct PluginOutcome {
    pub plugin_id: String,
    pub success: bool,
    pub reason: Option<String>,
}

/// Result of `start_all`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StartAllResult {
    pub started: Vec<PluginOutcome>,
    pub failed: Vec<PluginOutcome>,
}

/// Result of `stop_all`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StopAllResult {
    pub stopped: Vec<PluginOutcome>,
    pub failed: Vec<PluginOutcome>,
}

/// Result of `reload_one`.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadResult {
    pub plugin_id: String,
    pub is_successful: bool,
    pub new_version: Option<semver::Version>,
    pub reload_count: u64,
    pub previous_boundary_reclaimed: bool,
}

/// Snapshot of the whole registry, grouped by status/health (spec §4.7
/// `snapshot()`: "registry snapshot with counts by status/health").
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorSnapshot {
    pub records: Vec<RecordSnapshot>,
    pub counts_by_status: HashMap<String, usize>,
    pub counts_by_health: HashMap<String, usize>,
}

/// The top-level driver coordinating every other component.
pub struct Supervisor {
    config: SupervisorConfig,
    registry: Arc<Registry>,
    host_provider: Arc<ServiceProvider>,
    policy: Arc<IsolationPolicy>,
    loader: IsolatedLoader,
    lifecycle: LifecycleDriver,
    config_store: ConfigStore,
    hooks: Arc<HookManager>,
    health_scheduler: tokio::sync::Mutex<HealthScheduler>,
    health_rx: tokio::sync::Mutex<tokio::sync::mpsc::UnboundedReceiver<HealthCheckRequest>>,
    load_semaphore: tokio::sync::Semaphore,
    host_version: semver::Version,
    environment_name: String,
    providers: dashmap::DashMap<String, Arc<ServiceProvider>>,
    /// The manifest file path each registered plugin was discovered or
    /// loaded from, kept so `reload_one` can re-read it without the
    /// registry having to carry filesystem paths alongside `Manifest`.
    manifest_paths: dashmap::DashMap<String, PathBuf>,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        host_version: semver::Version,
        environment_name: String,
        host_provider: Arc<ServiceProvider>,
        policy: Arc<IsolationPolicy>,
        published_surface: PublishedSurface,
    ) -> Self {
        let max_concurrent = config.max_concurrent_loads.max(1);
        let (health_scheduler, health_rx) = HealthScheduler::new();
        Self {
            config_store: ConfigStore::new(config.config_dir.clone()),
            lifecycle: LifecycleDriver::new(config.stage_timeouts.clone()),
            loader: IsolatedLoader::new(published_surface),
            registry: Arc::new(Registry::new()),
            hooks: HookManager::new(),
            health_scheduler: tokio::sync::Mutex::new(health_scheduler),
            health_rx: tokio::sync::Mutex::new(health_rx),
            load_semaphore: tokio::sync::Semaphore::new(max_concurrent),
            host_provider,
            policy,
            host_version,
            environment_name,
            providers: dashmap::DashMap::new(),
            manifest_paths: dashmap::DashMap::new(),
            config,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn hooks(&self) -> &Arc<HookManager> {
        &self.hooks
    }

    fn publish(&self, plugin_id: &str, status: PluginStatus, detail: Option<String>) {
        self.hooks.publish(LifecycleEvent {
            plugin_id: plugin_id.to_string(),
            status,
            detail,
        });
    }

    fn manifest_path_for(&self, artifact_path: &PathBuf) -> PathBuf {
        artifact_path
            .parent()
            .map(|dir| dir.join(&self.config.manifest_filename))
            .unwrap_or_else(|| PathBuf::from(&self.config.manifest_filename))
    }

    /// `start_all(cancel)` (spec §4.7): discovery -> validation ->
    /// dependency-sort -> bounded-parallel load -> dependency-ordered init.
    pub async fn start_all(&self, cancel: CancellationToken) -> PluginResult<StartAllResult> {
        let discovery = Discovery::new(self.config.plugin_roots.clone());
        let report = discovery.scan();
        for error in &report.errors {
            tracing::warn!(path = %error.path.display(), reason = %error.reason, "discovery error");
        }

        let trusted_source_ids = trusted_ids_from_roots(&report.plugins, &self.config.trusted_roots);
        let version_checker = VersionChecker::new(self.host_version.clone());
        let validation_policy = ValidationPolicy {
            prohibited_dependencies: self.config.prohibited_dependencies.iter().cloned().collect(),
            trusted_sources_only: !self.config.trusted_roots.is_empty(),
            trusted_source_ids,
            current_platform: self.config.current_platform.clone(),
            require_artifact_fingerprint: false,
        };
        let validator = Validator::new(version_checker, validation_policy);

        let mut result = StartAllResult::default();
        let mut accepted: Vec<DiscoveredPlugin> = Vec::new();

        for discovered in report.plugins {
            let validation = validator.validate(&discovered.manifest, &discovered.artifact_path);
            if !validation.is_valid() {
                let reason = validation
                    .issues
                    .iter()
                    .map(|i| i.message.clone())
                    .collect::<Vec<_>>()
                    .join("; ");
                result.failed.push(PluginOutcome {
                    plugin_id: discovered.manifest.id.clone(),
                    success: false,
                    reason: Some(reason),
                });
                continue;
            }
            accepted.push(discovered);
        }

        let manifests: Vec<Manifest> = accepted.iter().map(|d| d.manifest.clone()).collect();
        let resolver = DependencyResolver::new(&manifests);

        if let Err(e) = resolver.check_dependencies_satisfied() {
            for manifest in &manifests {
                result.failed.push(PluginOutcome {
                    plugin_id: manifest.id.clone(),
                    success: false,
                    reason: Some(e.to_string()),
                });
            }
            return Ok(result);
        }

        let order = match resolver.resolve_order() {
            Ok(order) => order,
            Err(e) => {
                for manifest in &manifests {
                    result.failed.push(PluginOutcome {
                        plugin_id: manifest.id.clone(),
                        success: false,
                        reason: Some(e.to_string()),
                    });
                }
                return Ok(result);
            }
        };

        let by_id: HashMap<&str, &DiscoveredPlugin> =
            accepted.iter().map(|d| (d.manifest.id.as_str(), d)).collect();

        for discovered in &accepted {
            self.register_discovered(discovered);
        }

        // Dependents never start before their dependencies (spec §5): the
        // topo order from `resolve_order` already guarantees this, and init
        // runs sequentially in that order. Loading each plugin's artifact is
        // still bounded by the fan-out semaphore even though init stays serial.
        for plugin_id in order {
            let Some(discovered) = by_id.get(plugin_id.as_str()) else {
                continue;
            };

            if let Err(e) = self.check_required_dependencies_running(&discovered.manifest) {
                let _ = self.registry.mark_failed(&plugin_id, e.to_string());
                self.publish(&plugin_id, PluginStatus::Failed, Some(e.to_string()));
                result.failed.push(PluginOutcome {
                    plugin_id: plugin_id.clone(),
                    success: false,
                    reason: Some(e.to_string()),
                });
                continue;
            }

            match self.load_and_init_one(discovered, cancel.clone()).await {
                Ok(()) => result.started.push(PluginOutcome {
                    plugin_id: plugin_id.clone(),
                    success: true,
                    reason: None,
                }),
                Err(e) => {
                    let _ = self.registry.mark_failed(&plugin_id, e.to_string());
                    self.publish(&plugin_id, PluginStatus::Failed, Some(e.to_string()));
                    result.failed.push(PluginOutcome {
                        plugin_id: plugin_id.clone(),
                        success: false,
                        reason: Some(e.to_string()),
                    });
                }
            }
        }

        Ok(result)
    }

    /// Before loading a plugin, every non-optional dependency named in its
    /// manifest must already be `Running` in the registry. The topo order
    /// from `DependencyResolver::resolve_order` only guarantees dependencies
    /// are *attempted* first, not that they *succeeded*; without this guard
    /// a dependency that lands on `Failed` would still let a dependent start,
    /// violating the spec §8 invariant that a running plugin's required
    /// dependencies are running too.
    fn check_required_dependencies_running(&self, manifest: &Manifest) -> PluginResult<()> {
        for dep in &manifest.dependencies {
            if dep.optional {
                continue;
            }
            match self.registry.status_of(&dep.id) {
                Ok(PluginStatus::Running) => {}
                Ok(other) => {
                    return Err(PluginError::DependencyError {
                        id: manifest.id.clone(),
                        reason: format!(
                            "required dependency '{}' is not running (status: {other})",
                            dep.id
                        ),
                    });
                }
                Err(_) => {
                    return Err(PluginError::DependencyError {
                        id: manifest.id.clone(),
                        reason: format!("required dependency '{}' is not registered", dep.id),
                    });
                }
            }
        }
        Ok(())
    }

    fn register_discovered(&self, discovered: &DiscoveredPlugin) {
        let manifest_path = self.manifest_path_for(&discovered.artifact_path);
        self.manifest_paths
            .insert(discovered.manifest.id.clone(), manifest_path);

        if self.registry.contains(&discovered.manifest.id) {
            self.registry
                .replace(RuntimeRecord::new(discovered.manifest.clone()));
        } else if let Err(e) = self.registry.insert(RuntimeRecord::new(discovered.manifest.clone())) {
            tracing::warn!(plugin_id = %discovered.manifest.id, error = %e, "could not register discovered plugin");
        }
    }

    async fn load_and_init_one(
        &self,
        discovered: &DiscoveredPlugin,
        cancel: CancellationToken,
    ) -> PluginResult<()> {
        let plugin_id = discovered.manifest.id.clone();

        let _permit = self
            .load_semaphore
            .acquire()
            .await
            .map_err(|_| PluginError::Generic("load semaphore closed".to_string()))?;

        self.registry.transition(&plugin_id, PluginStatus::Validated)?;

        let boundary = Arc::new(
            self.loader
                .load(&discovered.manifest, &discovered.artifact_path)?,
        );
        self.registry.transition(&plugin_id, PluginStatus::Loaded)?;
        self.registry.set_boundary(&plugin_id, boundary.clone())?;
        self.publish(&plugin_id, PluginStatus::Loaded, None);

        self.registry.transition(&plugin_id, PluginStatus::Starting)?;

        let outcome = self
            .lifecycle
            .run_init(
                &discovered.manifest,
                &boundary,
                self.host_version.clone(),
                self.environment_name.clone(),
                self.host_provider.clone(),
                self.policy.clone(),
                cancel,
            )
            .await?;

        self.providers.insert(plugin_id.clone(), outcome.provider);
        self.registry.transition(&plugin_id, PluginStatus::Running)?;
        self.publish(&plugin_id, PluginStatus::Running, None);

        if discovered.manifest.health_check.enabled {
            let interval = std::time::Duration::from_secs(discovered.manifest.health_check.interval_secs);
            let mut scheduler = self.health_scheduler.lock().await;
            scheduler.schedule(plugin_id.clone(), interval, CancellationToken::new());
        }

        Ok(())
    }

    /// `load_one(path, cancel)` (spec §4.7): a hot operation that loads a
    /// single plugin from an explicit manifest path, independent of a full
    /// `start_all` sweep.
    pub async fn load_one(&self, manifest_path: &PathBuf, cancel: CancellationToken) -> PluginResult<()> {
        let raw = tokio::fs::read_to_string(manifest_path).await?;
        let manifest = crate::manifest::parse_manifest(&raw)?;
        let artifact_path = manifest_path
            .parent()
            .map(|dir| dir.join(&manifest.main_artifact))
            .unwrap_or_else(|| manifest.main_artifact.clone());

        if self.registry.contains(&manifest.id) {
            return Err(PluginError::AlreadyExists(manifest.id));
        }

        let discovered = DiscoveredPlugin {
            manifest: manifest.clone(),
            artifact_path,
            source: DiscoverySource::Manifest,
        };

        self.manifest_paths
            .insert(manifest.id.clone(), manifest_path.clone());
        self.registry.insert(RuntimeRecord::new(manifest))?;

        self.load_and_init_one(&discovered, cancel).await
    }

    /// Tear down a loaded plugin's isolation boundary and runtime state
    /// without touching its registry status: stops the health scheduler,
    /// runs the uninit stage sequence if a boundary is present, and drops
    /// the plugin's service provider. Callers own whatever registry
    /// transition fits their context (a clean stop vs. a reload).
    async fn run_teardown(&self, id: &str, cancel: CancellationToken) -> Vec<PluginError> {
        {
            let mut scheduler = self.health_scheduler.lock().await;
            scheduler.unschedule(id);
        }

        let boundary = self.registry.take_boundary(id).ok().flatten();
        self.providers.remove(id);

        match boundary {
            Some(boundary) => self.lifecycle.run_uninit(id, &boundary, cancel).await,
            None => Vec::new(),
        }
    }

    /// `unload_one(id, cancel)` (spec §4.7). Calling this twice in a row on
    /// the same id is not an error: the second call reports a warning
    /// rather than raising (spec §8).
    pub async fn unload_one(&self, id: &str, cancel: CancellationToken) -> PluginResult<Vec<PluginError>> {
        let status = self.registry.status_of(id)?;
        if matches!(status, PluginStatus::Stopped | PluginStatus::Failed) {
            return Ok(vec![PluginError::DisposalWarning {
                id: id.to_string(),
                reason: "plugin is not currently initialized".to_string(),
            }]);
        }

        if status == PluginStatus::Running {
            self.registry.transition(id, PluginStatus::Stopping)?;
        }

        let warnings = self.run_teardown(id, cancel).await;

        if status == PluginStatus::Running {
            self.registry.transition(id, PluginStatus::Stopped)?;
        } else {
            self.registry
                .mark_failed(id, "unloaded before reaching Running")?;
        }

        let final_status = self.registry.status_of(id)?;
        self.publish(id, final_status, None);

        Ok(warnings)
    }

    /// `reload_one(id, cancel)` (spec §4.7): tears the plugin down and loads
    /// it again from the same manifest path, carrying the reload counter
    /// forward. If the reload fails, the previous record is restored
    /// (marked `Failed`) rather than silently disappearing from the registry.
    pub async fn reload_one(&self, id: &str, cancel: CancellationToken) -> PluginResult<ReloadResult> {
        let manifest_path = self
            .manifest_paths
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PluginError::UnknownPlugin(id.to_string()))?;

        self.registry.transition(id, PluginStatus::Reloading)?;

        let warnings = self.run_teardown(id, cancel.clone()).await;
        let boundary_reclaimed = warnings.is_empty();

        let previous_record = self.registry.remove(id)?;

        match self.load_one(&manifest_path, cancel).await {
            Ok(()) => {
                self.registry
                    .set_reload_count(id, previous_record.reload_count + 1)?;
                let snapshot = self.registry.snapshot(id)?;
                Ok(ReloadResult {
                    plugin_id: id.to_string(),
                    is_successful: true,
                    new_version: Some(snapshot.version),
                    reload_count: snapshot.reload_count,
                    previous_boundary_reclaimed: boundary_reclaimed,
                })
            }
            Err(e) => {
                let mut restored = previous_record;
                restored.status = PluginStatus::Failed;
                restored.last_error = Some(e.to_string());
                self.registry.replace(restored);
                Err(e)
            }
        }
    }

    /// `update_config(id, new_cfg, cancel)` (spec §4.7): forwards to the
    /// module's `on_config_changed` hook, persists the merged settings, and
    /// increments `config_version` on success.
    pub async fn update_config(
        &self,
        id: &str,
        new_config: serde_json::Value,
        cancel: CancellationToken,
    ) -> PluginResult<()> {
        let boundary = self.registry.take_boundary(id)?.ok_or_else(|| {
            PluginError::Generic(format!("plugin '{id}' has no active boundary"))
        })?;

        let result = {
            let mut guard = boundary.plugin().await;
            guard.on_config_changed(new_config.clone(), cancel).await
        };

        self.registry.set_boundary(id, boundary)?;
        result?;

        let mut data = self.config_store.load(id).await?;
        if let serde_json::Value::Object(map) = new_config {
            for (k, v) in map {
                data.settings.insert(k, v);
            }
        }
        self.config_store.save(id, &data).await?;
        self.registry.increment_config_version(id)?;

        Ok(())
    }

    /// `check_health(id, cancel)` (spec §4.7): invokes the module's
    /// `health()` and caches the outcome via the registry's threshold logic.
    pub async fn check_health(&self, id: &str, cancel: CancellationToken) -> PluginResult<HealthStatus> {
        let manifest = self.registry.manifest_of(id)?;
        let boundary = self.registry.take_boundary(id)?.ok_or_else(|| {
            PluginError::Generic(format!("plugin '{id}' has no active boundary"))
        })?;

        let result = {
            let guard = boundary.plugin().await;
            guard.health(cancel).await
        };
        self.registry.set_boundary(id, boundary)?;

        let health_result = result?;
        let health: HealthStatus = health_result.into();
        self.registry.record_health(
            id,
            health,
            manifest.health_check.failure_threshold,
            manifest.health_check.success_threshold,
        )?;
        Ok(self.registry.snapshot(id)?.health)
    }

    /// Drains scheduled `HealthCheckRequest`s and calls `check_health` for
    /// each, until `cancel` fires. The host is expected to spawn this once,
    /// e.g. `tokio::spawn(supervisor.run_health_consumer(cancel))`; the
    /// supervisor itself never spawns background work unasked (spec §9).
    pub async fn run_health_consumer(&self, cancel: CancellationToken) {
        loop {
            let next = {
                let mut rx = self.health_rx.lock().await;
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    req = rx.recv() => req,
                }
            };

            let Some(request) = next else {
                break;
            };

            if let Err(e) = self.check_health(&request.plugin_id, cancel.clone()).await {
                tracing::warn!(plugin_id = %request.plugin_id, error = %e, "scheduled health check failed");
            }
        }
    }

    /// `snapshot()` (spec §4.7): registry snapshot with counts by
    /// status/health.
    pub fn snapshot(&self) -> SupervisorSnapshot {
        let records = self.registry.snapshot_all();

        let mut counts_by_status = HashMap::new();
        let mut counts_by_health = HashMap::new();
        for record in &records {
            *counts_by_status.entry(format!("{:?}", record.status)).or_insert(0) += 1;
            *counts_by_health.entry(format!("{:?}", record.health)).or_insert(0) += 1;
        }

        SupervisorSnapshot {
            records,
            counts_by_status,
            counts_by_health,
        }
    }

    /// `stop_all(cancel)` (spec §4.7): stops plugins in reverse dependency
    /// order, respecting each plugin's own stop timeout via the lifecycle
    /// driver; every plugin ends at `Stopped` or `Failed`.
    pub async fn stop_all(&self, cancel: CancellationToken) -> PluginResult<StopAllResult> {
        let manifests: Vec<Manifest> = self
            .registry
            .ids()
            .into_iter()
            .filter_map(|id| self.registry.manifest_of(&id).ok())
            .collect();

        let resolver = DependencyResolver::new(&manifests);
        let mut order = resolver
            .resolve_order()
            .unwrap_or_else(|_| manifests.iter().map(|m| m.id.clone()).collect());
        order.reverse();

        let mut result = StopAllResult::default();

        for plugin_id in order {
            match self.registry.status_of(&plugin_id) {
                Ok(PluginStatus::Running) | Ok(PluginStatus::Starting) => {
                    match self.unload_one(&plugin_id, cancel.clone()).await {
                        Ok(_warnings) => result.stopped.push(PluginOutcome {
                            plugin_id: plugin_id.clone(),
                            success: true,
                            reason: None,
                        }),
                        Err(e) => {
                            let _ = self.registry.mark_failed(&plugin_id, e.to_string());
                            result.failed.push(PluginOutcome {
                                plugin_id: plugin_id.clone(),
                                success: false,
                                reason: Some(e.to_string()),
                            });
                        }
                    }
                }
                _ => continue,
            }
        }

        Ok(result)
    }
}

/// Plugin ids whose resolved artifact path falls under one of the
/// configured trusted roots, used to build the validator's trusted-source
/// allow-list for a single `start_all` sweep.
fn trusted_ids_from_roots(plugins: &[DiscoveredPlugin], trusted_roots: &[PathBuf]) -> HashSet<String> {
    plugins
        .iter()
        .filter(|d| {
            trusted_roots
                .iter()
                .any(|root| d.artifact_path.starts_with(root))
        })
        .map(|d| d.manifest.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ManifestDependency;

    fn manifest(id: &str) -> Manifest {
        Manifest {
            id: id.to_string(),
            name: id.to_string(),
            version: semver::Version::new(1, 0, 0),
            main_artifact: PathBuf::from("a.so"),
            entry_point: "create_plugin".to_string(),
            min_host_version: semver::Version::new(0, 1, 0),
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

    fn bare_supervisor(config_dir: PathBuf) -> Supervisor {
        Supervisor::new(
            SupervisorConfig {
                config_dir,
                ..SupervisorConfig::default()
            },
            semver::Version::new(1, 0, 0),
            "test".to_string(),
            Arc::new(ServiceProvider::root()),
            Arc::new(IsolationPolicy::default()),
            PublishedSurface::new(),
        )
    }

    #[test]
    fn trusted_ids_from_roots_matches_prefix() {
        let plugins = vec![DiscoveredPlugin {
            manifest: manifest("a"),
            artifact_path: PathBuf::from("/trusted/a/a.so"),
            source: DiscoverySource::Manifest,
        }];

        let trusted = trusted_ids_from_roots(&plugins, &[PathBuf::from("/trusted")]);
        assert!(trusted.contains("a"));

        let untrusted = trusted_ids_from_roots(&plugins, &[PathBuf::from("/other")]);
        assert!(untrusted.is_empty());
    }

    /// A required dependency that hasn't reached `Running` (including one
    /// never registered at all) blocks its dependent from loading, even if
    /// the topo order would otherwise have let it proceed.
    #[test]
    fn required_dependency_guard_rejects_non_running_dependency() {
        let config_dir = tempfile::tempdir().unwrap();
        let supervisor = bare_supervisor(config_dir.path().to_path_buf());

        let mut consumer = manifest("consumer");
        consumer.dependencies.push(ManifestDependency {
            id: "dep".to_string(),
            min_version: None,
            max_version: None,
            optional: false,
        });

        // Not registered at all.
        let err = supervisor
            .check_required_dependencies_running(&consumer)
            .unwrap_err();
        assert!(matches!(err, PluginError::DependencyError { .. }));

        // Registered but stuck before `Running`.
        supervisor.registry.insert(RuntimeRecord::new(manifest("dep"))).unwrap();
        let err = supervisor
            .check_required_dependencies_running(&consumer)
            .unwrap_err();
        assert!(matches!(err, PluginError::DependencyError { .. }));

        // Reaches `Running`: guard now passes.
        supervisor.registry.transition("dep", PluginStatus::Validated).unwrap();
        supervisor.registry.transition("dep", PluginStatus::Loaded).unwrap();
        supervisor.registry.transition("dep", PluginStatus::Starting).unwrap();
        supervisor.registry.transition("dep", PluginStatus::Running).unwrap();
        assert!(supervisor
            .check_required_dependencies_running(&consumer)
            .is_ok());
    }

    #[test]
    fn required_dependency_guard_ignores_optional_dependencies() {
        let config_dir = tempfile::tempdir().unwrap();
        let supervisor = bare_supervisor(config_dir.path().to_path_buf());

        let mut consumer = manifest("consumer");
        consumer.dependencies.push(ManifestDependency {
            id: "never-registered".to_string(),
            min_version: None,
            max_version: None,
            optional: true,
        });

        assert!(supervisor
            .check_required_dependencies_running(&consumer)
            .is_ok());
    }
}
