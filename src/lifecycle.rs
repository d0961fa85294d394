//! The lifecycle engine (spec §4.6, C6): drives each plugin through the
//! staged initialization and uninitialization state machines, with
//! per-stage timeouts and dependency-ordered execution.
//!
//! Restructured from the teacher's `LifecycleManager` (per-operation
//! `tokio::time::timeout` around a single plugin call, `Arc<RwLock<HashMap>>`
//! bookkeeping) into an explicit multi-stage driver per plugin, since the
//! teacher's lifecycle only has one stage per transition (`initialize`,
//! `start`, `stop`) where this specification names six init stages and five
//! uninit stages that must run, time out, and fail independently.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use crate::config::StageTimeouts;
use crate::di::{IsolationPolicy, ServiceProvider};
use crate::error::{PluginError, PluginResult};
use crate::loader::LoadedBoundary;
use crate::manifest::Manifest;
use crate::traits::{
    AppBuilder, CancellationToken, PluginValidationContext, ServiceCollection,
};

/// A stage of the initialization state machine (spec §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InitStage {
    Validation,
    Creation,
    PluginValidation,
    ServiceInit,
    Configure,
    Start,
}

impl std::fmt::Display for InitStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A stage of the uninitialization state machine (spec §4.6). Every stage
/// is non-fatal: a failure becomes a warning and the sequence continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UninitStage {
    Stop,
    Unload,
    ServiceDispose,
    ContextCleanup,
}

impl std::fmt::Display for UninitStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Either machine's stage, for error reporting that must name the stage
/// that actually failed regardless of which state machine it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleStage {
    Init(InitStage),
    Uninit(UninitStage),
}

impl std::fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleStage::Init(s) => write!(f, "{s}"),
            LifecycleStage::Uninit(s) => write!(f, "{s}"),
        }
    }
}

impl From<InitStage> for LifecycleStage {
    fn from(stage: InitStage) -> Self {
        LifecycleStage::Init(stage)
    }
}

impl From<UninitStage> for LifecycleStage {
    fn from(stage: UninitStage) -> Self {
        LifecycleStage::Uninit(stage)
    }
}

/// Outcome of running the full init sequence for one plugin.
pub struct InitOutcome {
    pub provider: Arc<ServiceProvider>,
    pub app_builder: AppBuilder,
}

/// Drives one plugin's boundary through the init/uninit state machines.
pub struct LifecycleDriver {
    timeouts: StageTimeouts,
}

impl LifecycleDriver {
    pub fn new(timeouts: StageTimeouts) -> Self {
        Self { timeouts }
    }

    async fn run_stage<F, Fut, T>(
        &self,
        plugin_id: &str,
        stage: impl Into<LifecycleStage>,
        duration: Duration,
        f: F,
    ) -> PluginResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = PluginResult<T>>,
    {
        let stage = stage.into();
        match timeout(duration, f()).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(PluginError::InitializationFailed {
                id: plugin_id.to_string(),
                phase: stage,
                reason: e.to_string(),
            }),
            Err(_) => Err(PluginError::Timeout {
                id: plugin_id.to_string(),
            }),
        }
    }

    /// Run the full `Validation -> Creation -> PluginValidation ->
    /// ServiceInit -> Configure -> Start` sequence for one already-loaded
    /// plugin. Any stage failure aborts the remaining stages; the caller is
    /// responsible for marking the registry record `Failed`.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_init(
        &self,
        manifest: &Manifest,
        boundary: &LoadedBoundary,
        host_version: semver::Version,
        environment_name: String,
        host_provider: Arc<ServiceProvider>,
        policy: Arc<IsolationPolicy>,
        cancel: CancellationToken,
    ) -> PluginResult<InitOutcome> {
        let plugin_id = manifest.id.clone();

        // Stage 1: Validation — the loaded artifact and manifest must still
        // agree (re-check after loading, as spec §4.6 requires).
        self.run_stage(&plugin_id, InitStage::Validation, self.timeouts.validate(), || async {
            if manifest.id.is_empty() || manifest.entry_point.is_empty() {
                return Err(PluginError::ValidationFailed {
                    id: plugin_id.clone(),
                    reason: "manifest became invalid after load".to_string(),
                });
            }
            Ok(())
        })
        .await?;

        // Stage 2: Creation — the plugin instance already exists (C4 created
        // it via the entry point); confirm it's reachable through the boundary.
        self.run_stage(&plugin_id, InitStage::Creation, self.timeouts.init(), || async {
            let _ = boundary.plugin().await;
            Ok(())
        })
        .await?;

        // Stage 3: PluginValidation — the module's own self-check.
        let validation_ctx = PluginValidationContext {
            host_version,
            environment_name,
            services: host_provider.clone(),
        };
        let outcome = self
            .run_stage(
                &plugin_id,
                InitStage::PluginValidation,
                self.timeouts.validate(),
                || async {
                    let boundary = boundary.plugin().await;
                    boundary.validate(&validation_ctx).await
                },
            )
            .await?;
        if outcome.is_terminal() {
            return Err(PluginError::ValidationFailed {
                id: plugin_id.clone(),
                reason: outcome.errors.join("; "),
            });
        }
        if !outcome.warnings.is_empty() {
            tracing::warn!(plugin_id = %plugin_id, warnings = ?outcome.warnings, "plugin self-validation warnings");
        }

        // Stage 4: ServiceInit — collect the module's declared services,
        // build its child provider on top of the host provider.
        let mut services = ServiceCollection::new();
        self.run_stage(&plugin_id, InitStage::ServiceInit, self.timeouts.init(), || async {
            let mut guard = boundary.plugin().await;
            guard.on_initialize(&mut services).await
        })
        .await?;

        let declared: Vec<_> = services
            .registrations
            .into_iter()
            .map(|reg| (reg.instance.as_ref().type_id(), reg.instance))
            .collect();
        let provider = Arc::new(ServiceProvider::child(
            plugin_id.clone(),
            host_provider,
            policy,
            declared,
        ));

        // Stage 5: Configure — declarative pipeline-stage registration.
        let mut app_builder = AppBuilder::new();
        self.run_stage(&plugin_id, InitStage::Configure, self.timeouts.configure(), || async {
            let mut guard = boundary.plugin().await;
            guard.on_configure(&mut app_builder);
            Ok(())
        })
        .await?;

        // Stage 6: Start.
        self.run_stage(&plugin_id, InitStage::Start, self.timeouts.start(), || {
            let cancel = cancel.clone();
            async move {
                let mut guard = boundary.plugin().await;
                guard.on_start(cancel).await
            }
        })
        .await?;

        Ok(InitOutcome {
            provider,
            app_builder,
        })
    }

    /// Run the full `Stop -> Unload -> ServiceDispose -> ContextCleanup`
    /// sequence. Every stage failure becomes a warning, collected and
    /// returned, never aborting the remaining stages (spec §4.6: "Every
    /// stage catches failures as warnings so that later cleanup stages
    /// always run").
    pub async fn run_uninit(
        &self,
        plugin_id: &str,
        boundary: &LoadedBoundary,
        cancel: CancellationToken,
    ) -> Vec<PluginError> {
        let mut warnings = Vec::new();

        if let Err(e) = self
            .run_stage(plugin_id, UninitStage::Stop, self.timeouts.stop(), || {
                let cancel = cancel.clone();
                async move {
                    let mut guard = boundary.plugin().await;
                    guard.on_stop(cancel).await
                }
            })
            .await
        {
            warnings.push(Self::as_disposal_warning(plugin_id, UninitStage::Stop, e));
        }

        if let Err(e) = self
            .run_stage(plugin_id, UninitStage::Unload, self.timeouts.unload(), || {
                let cancel = cancel.clone();
                async move {
                    let mut guard = boundary.plugin().await;
                    guard.on_unload(cancel).await
                }
            })
            .await
        {
            warnings.push(Self::as_disposal_warning(plugin_id, UninitStage::Unload, e));
        }

        // ServiceDispose and ContextCleanup are driven by the caller (the
        // supervisor), which owns the per-plugin `ServiceProvider` and
        // `LoadedBoundary` and actually drops them; this driver only
        // reports the stage boundary for logging/warning symmetry.
        tracing::debug!(plugin_id = %plugin_id, "service dispose and context cleanup delegated to caller-owned drop");

        warnings
    }

    fn as_disposal_warning(plugin_id: &str, stage: UninitStage, err: PluginError) -> PluginError {
        tracing::warn!(plugin_id = %plugin_id, stage = %stage, error = %err, "uninit stage warning");
        PluginError::DisposalWarning {
            id: plugin_id.to_string(),
            reason: format!("{stage}: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_stage_display_matches_debug() {
        assert_eq!(InitStage::ServiceInit.to_string(), "ServiceInit");
    }

    #[test]
    fn uninit_stage_display_matches_debug() {
        assert_eq!(UninitStage::ContextCleanup.to_string(), "ContextCleanup");
    }

    #[test]
    fn lifecycle_stage_distinguishes_uninit_from_init() {
        let stop: LifecycleStage = UninitStage::Stop.into();
        let start: LifecycleStage = InitStage::Start.into();
        assert_eq!(stop.to_string(), "Stop");
        assert_eq!(start.to_string(), "Start");
        assert_ne!(stop, start);
    }
}
