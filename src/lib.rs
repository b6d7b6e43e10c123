//! crangon - namespaced dispatch with sandboxed Rhai workers
//!
//! Host code registers namespaces of functions on a [`namespace::Registry`];
//! untrusted scripts run in [`sandbox`] sessions and may only reach
//! `env/*` namespaces through the bridge's allow-list.

pub mod config;
pub mod dispatch;
pub mod env;
pub mod logging;
pub mod namespace;
pub mod sandbox;
pub mod scripting;
