//! The Rhai engine a sandbox session runs in
//!
//! One engine per session, owned by the session's thread. The engine only
//! knows the `worker` module, so every effect on the host goes through the
//! bridge's allow-list.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rhai::{AST, Dynamic, Engine};
use tracing::{debug, info};

use super::api;
use super::api::worker::WorkerChannel;
use crate::config::SandboxSettings;
use crate::sandbox::SandboxError;

/// Source of the prelude compiled ahead of every sandbox script
pub const BOOTSTRAP: &str = include_str!("bootstrap.rhai");

/// Scripting engine for one sandbox session
pub struct SandboxEngine {
    engine: Engine,
}

impl SandboxEngine {
    pub(crate) fn new(
        channel: Arc<WorkerChannel>,
        limits: &SandboxSettings,
        terminated: Arc<AtomicBool>,
    ) -> Self {
        Self {
            engine: Self::create_engine(channel, limits, terminated),
        }
    }

    fn create_engine(
        channel: Arc<WorkerChannel>,
        limits: &SandboxSettings,
        terminated: Arc<AtomicBool>,
    ) -> Engine {
        let mut engine = Engine::new();

        // Safety limits
        engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
        engine.set_max_operations(limits.max_operations);

        // Register `worker` as a static module (accessible as worker::*)
        let worker_module = api::worker::create_module(channel);
        engine.register_static_module("worker", worker_module.into());

        engine.on_print(|msg| info!(target: "sandbox", "{msg}"));
        engine.on_debug(|msg, src, pos| {
            debug!(target: "sandbox", "{}{pos:?} {msg}", src.unwrap_or_default());
        });

        // Abort at the next operation once the session is terminated
        engine.on_progress(move |_| {
            terminated
                .load(Ordering::Acquire)
                .then(|| Dynamic::from("terminated"))
        });

        engine
    }

    /// Compile the bootstrap prelude once so sessions can share it
    pub fn compile_bootstrap() -> Result<AST, SandboxError> {
        Engine::new()
            .compile(BOOTSTRAP)
            .map_err(|e| SandboxError::Bootstrap(e.to_string()))
    }

    /// Run user `source` after the bootstrap prelude
    pub fn run(&self, bootstrap: &AST, source: &str) -> Result<(), SandboxError> {
        let user = self
            .engine
            .compile(source)
            .map_err(|e| SandboxError::SandboxFault(format!("parse error: {e}")))?;

        let ast = bootstrap.merge(&user);
        self.engine
            .run_ast(&ast)
            .map_err(|e| SandboxError::SandboxFault(e.to_string()))
    }
}
