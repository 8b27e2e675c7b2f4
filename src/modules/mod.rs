//! # Shipped Modules
//!
//! Modules compiled into the proxy. Each is registered under its name and
//! can be loaded with `module load NAME` or `--load-module`.

pub mod mode;
pub mod wp;

use crate::module::ModuleFactory;

/// Every module shipped with the proxy
pub fn builtin_factories() -> Vec<(&'static str, ModuleFactory)> {
    vec![
        (mode::NAME, mode::ModeModule::boxed as ModuleFactory),
        (wp::NAME, wp::WaypointModule::boxed as ModuleFactory),
    ]
}
