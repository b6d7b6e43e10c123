//! Scripting module - Rhai runtime for sandboxed user code
//!
//! User code only reaches the host through `worker::post`; the bootstrap
//! prelude builds `serialize_namespace`, `trigger` and `require` on top of it.

mod api;
mod engine;

pub(crate) use api::worker::WorkerChannel;
pub use engine::{BOOTSTRAP, SandboxEngine};
