//! The module capability set: the only contract a plugin must implement
//! (spec §6), plus the host-side context types passed into it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::di::ServiceProvider;
use crate::error::PluginResult;

/// Every business-logic module loaded by the core must implement this trait.
/// All methods are invoked at most once per lifecycle phase except `health`
/// and `on_config_changed`, which may be invoked repeatedly.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Validate the module against the host's `PluginValidationContext`.
    /// Error-level messages are terminal; warnings are non-terminal.
    async fn validate(&self, ctx: &PluginValidationContext) -> PluginResult<ValidationOutcome>;

    /// Register the module's own services into a fresh child collection.
    async fn on_initialize(&mut self, services: &mut ServiceCollection) -> PluginResult<()>;

    /// Install pipeline stages the module owns, declaratively.
    fn on_configure(&mut self, builder: &mut AppBuilder);

    /// Start the module; a success means the module is live.
    async fn on_start(&mut self, cancel: CancellationToken) -> PluginResult<()>;

    /// Stop the module.
    async fn on_stop(&mut self, cancel: CancellationToken) -> PluginResult<()>;

    /// Release resources the module itself holds, ahead of boundary teardown.
    async fn on_unload(&mut self, cancel: CancellationToken) -> PluginResult<()>;

    /// React to a configuration update pushed by the supervisor.
    async fn on_config_changed(
        &mut self,
        new_config: serde_json::Value,
        cancel: CancellationToken,
    ) -> PluginResult<()>;

    /// Report current health.
    async fn health(&self, cancel: CancellationToken) -> PluginResult<HealthResult>;

    /// Downcast support for host code that needs module-specific behavior.
    fn as_any(&self) -> &dyn Any;
}

/// Context handed to `Plugin::validate`.
pub struct PluginValidationContext {
    pub host_version: semver::Version,
    pub environment_name: String,
    pub services: Arc<ServiceProvider>,
}

/// Outcome of a module's self-validation.
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationOutcome {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn is_terminal(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// A declarative service registration a module asks the host to perform.
/// Generalizes the source's runtime-reflection convention scan into an
/// explicit, build-time builder surface (spec §9 DESIGN NOTES).
pub struct ServiceCollection {
    pub(crate) registrations: Vec<ServiceRegistration>,
}

impl ServiceCollection {
    pub fn new() -> Self {
        Self {
            registrations: Vec::new(),
        }
    }

    /// Register a service instance under the given type name and lifetime.
    pub fn add(&mut self, type_name: &'static str, lifetime: ServiceLifetime, instance: Arc<dyn Any + Send + Sync>) {
        self.registrations.push(ServiceRegistration {
            type_name,
            lifetime,
            instance,
        });
    }
}

impl Default for ServiceCollection {
    fn default() -> Self {
        Self::new()
    }
}

/// A single registration produced by a module's `on_initialize`.
pub struct ServiceRegistration {
    pub type_name: &'static str,
    pub lifetime: ServiceLifetime,
    pub instance: Arc<dyn Any + Send + Sync>,
}

/// Declared lifetime of a registered service, used by the lifetime hazard
/// analysis in `di.rs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceLifetime {
    /// Lives for the process, or at least the plugin's lifetime.
    Singleton,
    /// Lives for one request/operation scope.
    Scoped,
    /// Lives for a single resolution.
    Transient,
}

/// Declarative pipeline-stage list a module contributes. The host owns the
/// actual request pipeline; this only records what the module asked for.
#[derive(Debug, Clone, Default)]
pub struct AppBuilder {
    pub stages: Vec<String>,
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn use_stage(&mut self, name: impl Into<String>) -> &mut Self {
        self.stages.push(name.into());
        self
    }
}

/// Cooperative cancellation signal threaded through every suspension point.
#[derive(Clone)]
pub struct CancellationToken {
    inner: tokio_util_cancel::Token,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: tokio_util_cancel::Token::new(),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.inner.cancelled().await
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimal cooperative-cancellation primitive modeled after
/// `tokio_util::sync::CancellationToken`, inlined so the crate does not add
/// a dependency the teacher pack never uses for this exact purpose; built
/// on the `tokio::sync::Notify` primitive already pulled in by `tokio`.
mod tokio_util_cancel {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tokio::sync::Notify;

    #[derive(Clone)]
    pub struct Token {
        cancelled: Arc<AtomicBool>,
        notify: Arc<Notify>,
    }

    impl Token {
        pub fn new() -> Self {
            Self {
                cancelled: Arc::new(AtomicBool::new(false)),
                notify: Arc::new(Notify::new()),
            }
        }

        pub fn cancel(&self) {
            self.cancelled.store(true, Ordering::SeqCst);
            self.notify.notify_waiters();
        }

        pub fn is_cancelled(&self) -> bool {
            self.cancelled.load(Ordering::SeqCst)
        }

        pub async fn cancelled(&self) {
            if self.is_cancelled() {
                return;
            }
            self.notify.notified().await;
        }
    }
}

/// Outcome of a `Plugin::health` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthResult {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Plugin metadata visible to host services (logger, config) via
/// `PluginContext`; distinct from `Manifest`, which is the on-disk format.
pub struct PluginContext {
    pub plugin_id: String,
    pub host_version: semver::Version,
    pub settings: HashMap<String, serde_json::Value>,
}
