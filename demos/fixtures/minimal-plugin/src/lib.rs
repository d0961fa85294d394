//! A minimal module used by `tests/scenarios.rs`. Build with:
//!
//! ```sh
//! cargo build -p minimal-plugin --release
//! cp target/release/libminimal_plugin.so <fixture dir>/plugin.so
//! ```
//!
//! Implements every `Plugin` method as a no-op success so the scenarios
//! exercise the supervisor's own state machine rather than plugin logic.

use async_trait::async_trait;
use plugin_core::traits::{
    AppBuilder, CancellationToken, HealthResult, PluginValidationContext, ServiceCollection,
    ValidationOutcome,
};
use plugin_core::{Plugin, PluginResult};
use std::any::Any;

struct MinimalPlugin {
    started: bool,
}

#[async_trait]
impl Plugin for MinimalPlugin {
    async fn validate(&self, _ctx: &PluginValidationContext) -> PluginResult<ValidationOutcome> {
        Ok(ValidationOutcome::ok())
    }

    async fn on_initialize(&mut self, _services: &mut ServiceCollection) -> PluginResult<()> {
        Ok(())
    }

    fn on_configure(&mut self, _builder: &mut AppBuilder) {}

    async fn on_start(&mut self, _cancel: CancellationToken) -> PluginResult<()> {
        self.started = true;
        Ok(())
    }

    async fn on_stop(&mut self, _cancel: CancellationToken) -> PluginResult<()> {
        self.started = false;
        Ok(())
    }

    async fn on_unload(&mut self, _cancel: CancellationToken) -> PluginResult<()> {
        Ok(())
    }

    async fn on_config_changed(
        &mut self,
        _new_config: serde_json::Value,
        _cancel: CancellationToken,
    ) -> PluginResult<()> {
        Ok(())
    }

    async fn health(&self, _cancel: CancellationToken) -> PluginResult<HealthResult> {
        Ok(if self.started {
            HealthResult::Healthy
        } else {
            HealthResult::Unhealthy
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// # Safety
/// Called only by `IsolatedLoader::load` through a `libloading::Symbol`
/// resolved from this library's own export table.
#[no_mangle]
pub unsafe extern "C" fn create_plugin() -> *mut dyn Plugin {
    let plugin: Box<dyn Plugin> = Box::new(MinimalPlugin { started: false });
    Box::into_raw(plugin)
}
