//! Plugins: units that configure a context during `init()`.
//!
//! Hooks run in plugin list order, in three phases:
//!
//! | Phase | Receives | Typical use |
//! |-------|----------|-------------|
//! | `before_register` | [`ContextSetup`] | remove or reorder defaults |
//! | `register` | [`ContextSetup`] | add methods, blocks, components, services |
//! | `after_register` | [`ScriptRuntime`] | validate or warm the finished runtime |
//!
//! Each phase is a single forward pass: a plugin sees everything earlier
//! plugins contributed, never what later ones will.

use crate::context::ContextSetup;
use crate::runtime::ScriptRuntime;

/// A unit of context configuration.
pub trait ScriptPlugin: Send + Sync + 'static {
    /// Name used in logs and initialization errors.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Runs before any plugin's `register`.
    fn before_register(&self, _setup: &mut ContextSetup) -> anyhow::Result<()> {
        Ok(())
    }

    /// Main registration pass.
    fn register(&self, setup: &mut ContextSetup) -> anyhow::Result<()>;

    /// Runs once the runtime is built and every back-reference is bound.
    fn after_register(&self, _runtime: &ScriptRuntime) -> anyhow::Result<()> {
        Ok(())
    }
}
