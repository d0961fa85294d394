//! # Plugin Core
//!
//! Modular application host core providing:
//!
//! - Manifest-driven plugin discovery from the filesystem
//! - Structural and semantic manifest validation
//! - Dependency resolution and deterministic load ordering
//! - Process-local isolation boundaries around loaded plugin code
//! - A staged lifecycle engine (init and uninit state machines)
//! - Hierarchical dependency injection between host and plugins
//! - Capability-based access control
//! - Runtime supervision: start/stop/reload, health monitoring, hot-reload
//! - Lifecycle event hooks for host observability
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use plugin_core::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SupervisorConfig::default();
//!     let host_provider = Arc::new(di::ServiceProvider::root());
//!     let policy = Arc::new(di::IsolationPolicy::default());
//!     let published = loader::PublishedSurface::new();
//!
//!     let supervisor = Supervisor::new(
//!         config,
//!         semver::Version::new(1, 0, 0),
//!         "production".to_string(),
//!         host_provider,
//!         policy,
//!         published,
//!     );
//!
//!     let cancel = traits::CancellationToken::new();
//!     let result = supervisor.start_all(cancel.clone()).await?;
//!     tracing::info!(started = result.started.len(), failed = result.failed.len(), "boot complete");
//!
//!     supervisor.stop_all(cancel).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **Discovery**: walks configured plugin roots for manifest files
//! - **Validator**: checks manifest structure, prohibited dependencies, host
//!   and dependency version compatibility, trusted-source policy
//! - **Dependency Resolver**: cycle detection plus a topological load order
//! - **Isolated Loader**: opens the plugin artifact, instantiates it behind
//!   a published, capability-restricted surface
//! - **Lifecycle Driver**: runs the staged init/uninit state machines
//! - **Registry**: the single source of truth for plugin runtime state
//! - **Supervisor**: coordinates all of the above into start/stop/reload

#![warn(missing_docs)]
#![allow(clippy::too_many_arguments)]

pub mod config;
pub mod dependency;
pub mod di;
pub mod discovery;
pub mod error;
pub mod health;
pub mod hooks;
pub mod hotreload;
pub mod isolation;
pub mod lifecycle;
pub mod loader;
pub mod manifest;
pub mod registry;
pub mod supervisor;
pub mod traits;
pub mod validator;
pub mod versioning;

// Re-export the types most callers need, so `use plugin_core::*` covers the
// common path without reaching into individual modules.
pub use config::{ConfigStore, PluginConfigData, StageTimeouts, SupervisorConfig};
pub use dependency::DependencyResolver;
pub use di::{IsolationPolicy, ServiceProvider};
pub use discovery::{Discovery, DiscoveryError, DiscoveryReport};
pub use error::{PluginError, PluginResult};
pub use health::{HealthCheckRequest, HealthPolicy, HealthScheduler};
pub use hooks::{HookManager, LifecycleEvent, ListenerHandle};
pub use hotreload::HotReloadWatcher;
pub use isolation::{Capability, Sandbox};
pub use lifecycle::{InitOutcome, LifecycleDriver, LifecycleStage};
pub use loader::{IsolatedLoader, LoadedBoundary, PublishedSurface};
pub use manifest::{DiscoveredPlugin, Manifest, ManifestDependency};
pub use registry::{HealthStatus, PluginStatus, Registry, RuntimeRecord};
pub use supervisor::{
    PluginOutcome, ReloadResult, StartAllResult, StopAllResult, Supervisor, SupervisorSnapshot,
};
pub use traits::{CancellationToken, Plugin, PluginContext};
pub use validator::{ValidationPolicy, ValidationReport, Validator};
pub use versioning::VersionChecker;
