//! Built-in namespaces
//!
//! - `bundled_env` owns the running sandboxes (`enter_env`)
//! - `env/tasks` lets a sandbox spawn a replacement or fire a call without
//!   waiting for it
//! - `env/window` shows notices on a [`Terminal`]

mod bundled;
mod window;

use std::sync::Arc;

pub use bundled::{BUNDLED_ENV, ENTRY_POINT, TASKS, Workers};
pub use window::{StdTerminal, Terminal, WINDOW};

use crate::namespace::Registry;
use crate::sandbox::Bridge;

/// Register every built-in namespace on `registry`
pub fn install(registry: &Registry, bridge: &Bridge, terminal: Arc<dyn Terminal>) {
    bundled::install_bundled_env(registry, bridge);
    bundled::install_tasks(registry);
    window::install(registry, terminal);
}
