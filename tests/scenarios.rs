//! End-to-end scenarios spanning discovery, validation, dependency
//! resolution and runtime supervision together, rather than one component
//! in isolation (see the `#[cfg(test)]` modules next to each component for
//! unit-level coverage).
//!
//! The boot/reload/health scenarios need a real compiled plugin artifact,
//! which this crate cannot produce during `cargo test` (cross-compiling a
//! `cdylib` as a build dependency of its own test suite is its own can of
//! worms). Build one once with:
//!
//! ```sh
//! cargo build -p minimal-plugin --release
//! mkdir -p tests/fixtures
//! cp target/release/<DLL_PREFIX>minimal_plugin.<DLL_SUFFIX> tests/fixtures/minimal_plugin.so
//! ```
//!
//! and the three scenarios below will run instead of skipping.

use plugin_core::config::{StageTimeouts, SupervisorConfig};
use plugin_core::di::{IsolationPolicy, ServiceProvider};
use plugin_core::loader::PublishedSurface;
use plugin_core::traits::CancellationToken;
use plugin_core::{PluginError, PluginStatus, Supervisor};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::tempdir;

fn compiled_fixture() -> Option<PathBuf> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/minimal_plugin.so");
    path.exists().then_some(path)
}

fn write_manifest(dir: &std::path::Path, id: &str, deps: &str) {
    let content = format!(
        r#"{{
            "id": "{id}",
            "name": "{id}",
            "version": "1.0.0",
            "main_artifact": "plugin.so",
            "entry_point": "create_plugin",
            "min_host_version": "0.1.0"
            {deps}
        }}"#
    );
    std::fs::write(dir.join("plugin.json"), content).unwrap();
}

fn supervisor_over(root: PathBuf, config_dir: PathBuf) -> Supervisor {
    let config = SupervisorConfig {
        plugin_roots: vec![root],
        config_dir,
        stage_timeouts: StageTimeouts::default(),
        ..SupervisorConfig::default()
    };
    Supervisor::new(
        config,
        semver::Version::new(1, 0, 0),
        "test".to_string(),
        Arc::new(ServiceProvider::root()),
        Arc::new(IsolationPolicy::default()),
        PublishedSurface::new(),
    )
}

/// Happy-path boot/shutdown: a single valid plugin discovered, validated,
/// loaded, initialized through to `Running`, then cleanly stopped.
#[tokio::test]
async fn happy_path_boot_and_shutdown() {
    let Some(artifact) = compiled_fixture() else {
        eprintln!("skipping: tests/fixtures/minimal_plugin.so not built, see module docs");
        return;
    };

    let root = tempdir().unwrap();
    let plugin_dir = root.path().join("demo");
    std::fs::create_dir_all(&plugin_dir).unwrap();
    write_manifest(&plugin_dir, "demo", "");
    std::fs::copy(&artifact, plugin_dir.join("plugin.so")).unwrap();

    let config_dir = tempdir().unwrap();
    let supervisor = supervisor_over(root.path().to_path_buf(), config_dir.path().to_path_buf());
    let cancel = CancellationToken::new();

    let result = supervisor.start_all(cancel.clone()).await.unwrap();
    assert_eq!(result.started.len(), 1);
    assert!(result.failed.is_empty());
    assert_eq!(
        supervisor.registry().status_of("demo").unwrap(),
        PluginStatus::Running
    );

    let stop_result = supervisor.stop_all(cancel).await.unwrap();
    assert_eq!(stop_result.stopped.len(), 1);
    assert_eq!(
        supervisor.registry().status_of("demo").unwrap(),
        PluginStatus::Stopped
    );
}

/// `reload_one` tears a running plugin down and loads it again from the
/// same manifest path, carrying the reload counter forward across the
/// freshly re-inserted record.
#[tokio::test]
async fn reload_carries_the_counter_forward() {
    let Some(artifact) = compiled_fixture() else {
        eprintln!("skipping: tests/fixtures/minimal_plugin.so not built, see module docs");
        return;
    };

    let root = tempdir().unwrap();
    let plugin_dir = root.path().join("demo");
    std::fs::create_dir_all(&plugin_dir).unwrap();
    write_manifest(&plugin_dir, "demo", "");
    std::fs::copy(&artifact, plugin_dir.join("plugin.so")).unwrap();

    let config_dir = tempdir().unwrap();
    let supervisor = supervisor_over(root.path().to_path_buf(), config_dir.path().to_path_buf());
    let cancel = CancellationToken::new();

    supervisor.start_all(cancel.clone()).await.unwrap();

    let first = supervisor.reload_one("demo", cancel.clone()).await.unwrap();
    assert!(first.is_successful);
    assert_eq!(first.reload_count, 1);

    let second = supervisor.reload_one("demo", cancel).await.unwrap();
    assert_eq!(second.reload_count, 2);
}

/// A plugin's health is reflected through `check_health` without the
/// supervisor unloading it on its own.
#[tokio::test]
async fn health_check_reflects_without_unloading() {
    let Some(artifact) = compiled_fixture() else {
        eprintln!("skipping: tests/fixtures/minimal_plugin.so not built, see module docs");
        return;
    };

    let root = tempdir().unwrap();
    let plugin_dir = root.path().join("demo");
    std::fs::create_dir_all(&plugin_dir).unwrap();
    write_manifest(&plugin_dir, "demo", "");
    std::fs::copy(&artifact, plugin_dir.join("plugin.so")).unwrap();

    let config_dir = tempdir().unwrap();
    let supervisor = supervisor_over(root.path().to_path_buf(), config_dir.path().to_path_buf());
    let cancel = CancellationToken::new();

    supervisor.start_all(cancel.clone()).await.unwrap();
    let health = supervisor.check_health("demo", cancel).await.unwrap();

    assert_eq!(health, plugin_core::HealthStatus::Healthy);
    assert_eq!(
        supervisor.registry().status_of("demo").unwrap(),
        PluginStatus::Running
    );
}

/// A manifest missing required fields is reported as a validation failure
/// in `start_all`'s result, never reaching the loader.
#[tokio::test]
async fn validation_rejects_malformed_manifest() {
    let root = tempdir().unwrap();
    let plugin_dir = root.path().join("broken");
    std::fs::create_dir_all(&plugin_dir).unwrap();
    std::fs::write(
        plugin_dir.join("plugin.json"),
        r#"{
            "id": "",
            "name": "broken",
            "version": "1.0.0",
            "main_artifact": "plugin.so",
            "entry_point": "create_plugin",
            "min_host_version": "0.1.0"
        }"#,
    )
    .unwrap();
    std::fs::write(plugin_dir.join("plugin.so"), b"not a real library").unwrap();

    let config_dir = tempdir().unwrap();
    let supervisor = supervisor_over(root.path().to_path_buf(), config_dir.path().to_path_buf());

    let result = supervisor.start_all(CancellationToken::new()).await.unwrap();
    assert!(result.started.is_empty());
    assert_eq!(result.failed.len(), 1);
}

/// Two plugins declaring a dependency on each other fail `start_all` as a
/// circular dependency before either is loaded.
#[tokio::test]
async fn circular_dependency_blocks_the_whole_batch() {
    let root = tempdir().unwrap();

    let a_dir = root.path().join("a");
    std::fs::create_dir_all(&a_dir).unwrap();
    write_manifest(&a_dir, "a", r#", "dependencies": [{"id": "b"}]"#);
    std::fs::write(a_dir.join("plugin.so"), b"stub").unwrap();

    let b_dir = root.path().join("b");
    std::fs::create_dir_all(&b_dir).unwrap();
    write_manifest(&b_dir, "b", r#", "dependencies": [{"id": "a"}]"#);
    std::fs::write(b_dir.join("plugin.so"), b"stub").unwrap();

    let config_dir = tempdir().unwrap();
    let supervisor = supervisor_over(root.path().to_path_buf(), config_dir.path().to_path_buf());

    let result = supervisor.start_all(CancellationToken::new()).await.unwrap();
    assert!(result.started.is_empty());
    assert_eq!(result.failed.len(), 2);
    assert!(result
        .failed
        .iter()
        .all(|o| o.reason.as_deref().unwrap_or("").contains("circular")
            || o.reason.as_deref().unwrap_or("").contains("Circular")));
}

/// A plugin without explicit access to a `ModuleOnly` service is denied at
/// the DI boundary; a trusted or globally-marked service is unaffected.
#[tokio::test]
async fn access_policy_denies_undeclared_module_only_service() {
    #[derive(Debug)]
    struct SecretStore;

    let mut root_provider = ServiceProvider::root();
    root_provider.register(Arc::new(SecretStore));
    let root_provider = Arc::new(root_provider);

    let policy = Arc::new(IsolationPolicy::new());
    policy.set_level::<SecretStore>(plugin_core::di::AccessLevel::ModuleOnly);

    let plugin_b = ServiceProvider::child("plugin-b", root_provider.clone(), policy.clone(), vec![]);
    let err = plugin_b.require::<SecretStore>().unwrap_err();
    assert!(matches!(err, PluginError::AccessDenied { .. }));

    policy.trust("plugin-b");
    let plugin_b_trusted =
        ServiceProvider::child("plugin-b", root_provider, policy, vec![]);
    assert!(plugin_b_trusted.get::<SecretStore>().is_some());
}
