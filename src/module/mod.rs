//! # Module System
//!
//! Feature plugins loaded into the proxy at runtime.
//!
//! This module handles:
//! - The [`Module`] trait with its optional hooks
//! - Loading, unloading and reloading modules from named factories
//! - Command registration, aliases and tab completion
//! - Isolating module failures from the event loop

pub mod commands;
pub mod registry;

pub use commands::{CommandTable, CompletionRule, CompletionSources};
pub use registry::{LoadOutcome, ModuleFactory, ModuleRegistry};

use crate::context::ProxyContext;
use crate::error::{ProxyError, Result};
use crate::mavlink::{Frame, MavMessage};

/// A feature plugin
///
/// Every hook has a no-op default, so a module implements only what it
/// needs. Hooks run on the event loop and must return quickly.
///
/// # Examples
///
/// ```
/// use mav_proxy::context::ProxyContext;
/// use mav_proxy::error::Result;
/// use mav_proxy::mavlink::{Frame, MavMessage};
/// use mav_proxy::module::Module;
///
/// #[derive(Default)]
/// struct Counter {
///     frames: u64,
/// }
///
/// impl Module for Counter {
///     fn name(&self) -> &str {
///         "counter"
///     }
///
///     fn handle_message(&mut self, _ctx: &mut ProxyContext, _link: usize, _frame: &Frame, _msg: &MavMessage) -> Result<()> {
///         self.frames += 1;
///         Ok(())
///     }
/// }
/// ```
pub trait Module: Send {
    /// Registry name; must match the name the factory is registered under
    fn name(&self) -> &str;

    /// One-line description for `module list`
    fn description(&self) -> &str {
        ""
    }

    /// Called once after construction; register commands and settings here
    fn init(&mut self, _ctx: &mut ProxyContext) -> Result<()> {
        Ok(())
    }

    /// Every message received on a master link
    fn handle_message(
        &mut self,
        _ctx: &mut ProxyContext,
        _link: usize,
        _frame: &Frame,
        _msg: &MavMessage,
    ) -> Result<()> {
        Ok(())
    }

    /// Once per event-loop iteration
    fn idle(&mut self, _ctx: &mut ProxyContext) -> Result<()> {
        Ok(())
    }

    /// Cleanup before the module is removed
    fn unload(&mut self, _ctx: &mut ProxyContext) -> Result<()> {
        Ok(())
    }

    /// A command this module registered
    fn handle_command(&mut self, _ctx: &mut ProxyContext, command: &str, _args: &[String]) -> Result<()> {
        Err(ProxyError::Command(format!(
            "{}: command '{}' not implemented",
            self.name(),
            command
        )))
    }

    /// A command nobody registered; return true if handled
    fn handle_unknown_command(&mut self, _ctx: &mut ProxyContext, _args: &[String]) -> Result<bool> {
        Ok(false)
    }

    /// Bytes from an extra source this module added with
    /// [`ProxyContext::add_source`]
    fn handle_source(&mut self, _ctx: &mut ProxyContext, _source: &str, _data: &[u8]) -> Result<()> {
        Ok(())
    }
}
