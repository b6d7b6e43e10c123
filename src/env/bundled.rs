//! `bundled_env` and `env/tasks`
//!
//! `bundled_env:enter_env` is the single entry point that starts sandboxes.
//! Every call terminates the sessions started by earlier calls before the
//! new one begins, so at most one generation runs at a time.

use serde_json::{Value, json};
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::dispatch::{DispatchError, Reply};
use crate::namespace::{Function, ParamType, Registry};
use crate::sandbox::{Bridge, SandboxSession};

pub const BUNDLED_ENV: &str = "bundled_env";
pub const ENTRY_POINT: &str = "bundled_env:enter_env";
pub const TASKS: &str = "env/tasks";

/// Live sessions started from `enter_env`, kept in `bundled_env`'s `$`
#[derive(Debug, Clone, Default)]
pub struct Workers(Vec<SandboxSession>);

impl Workers {
    pub fn sessions(&self) -> &[SandboxSession] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn latest(&self) -> Option<&SandboxSession> {
        self.0.last()
    }
}

pub(super) fn install_bundled_env(registry: &Registry, bridge: &Bridge) {
    let bridge = bridge.clone();

    registry.register(BUNDLED_ENV, &[]).define(
        "enter_env",
        Function::new(move |imports, args| {
            let code = args.first().and_then(Value::as_str).unwrap_or_default();

            imports.state().with(|workers: &mut Workers| {
                // make sure we don't leave the old workers running
                for stale in workers.0.drain(..) {
                    info!("terminated old worker {}", stale.id());
                    stale.terminate();
                }

                let session = bridge
                    .spawn(code)
                    .map_err(|e| DispatchError::failed(e.to_string()))?;
                let id = session.id().get();
                workers.0.push(session);
                Ok(json!(id))
            })
        })
        .with_params([ParamType::String]),
    );
}

pub(super) fn install_tasks(registry: &Registry) {
    let tasks = registry.register(TASKS, &[BUNDLED_ENV]);

    // Spawn a new sandbox with `code`
    tasks.define(
        "spawn",
        Function::new(|imports, args| {
            let bundled = imports
                .dependency(BUNDLED_ENV)
                .ok_or_else(|| DispatchError::failed("bundled_env is not injected"))?;
            bundled.call("enter_env", args)?;
            Ok(Value::Null)
        }),
    );

    // Alias of `trigger` that does not wait for the result
    let dispatcher = registry.clone();
    tasks.define(
        "trigger",
        Function::new(move |_, args| {
            let mut args = args.into_iter();
            let target = args.next().unwrap_or_default();
            let target = target.as_str().unwrap_or_default();
            let forwarded = match args.next() {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            };

            if let Reply::Pending(future) = dispatcher.trigger(target, forwarded)? {
                let target = target.to_string();
                let runtime = Handle::try_current()
                    .map_err(|_| DispatchError::failed("no runtime to drive the call"))?;
                runtime.spawn(async move {
                    if let Err(e) = future.await {
                        warn!("Background call to {target} failed: {e}");
                    }
                });
            }
            Ok(Value::Null)
        })
        .with_params([ParamType::String, ParamType::Object]),
    );
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::config::SandboxSettings;
    use crate::sandbox::SessionOutcome;

    fn setup() -> (Registry, Bridge) {
        let registry = Registry::new();
        let bridge = Bridge::new(
            registry.clone(),
            SandboxSettings {
                max_operations: 0,
                request_timeout: Duration::from_secs(5),
                ..SandboxSettings::default()
            },
        )
        .unwrap();
        install_bundled_env(&registry, &bridge);
        install_tasks(&registry);
        (registry, bridge)
    }

    fn workers(registry: &Registry) -> Workers {
        registry
            .lookup(BUNDLED_ENV)
            .unwrap()
            .state()
            .get::<Workers>()
            .unwrap_or_default()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_enter_env_terminates_first() {
        let (registry, _bridge) = setup();

        registry.trigger(ENTRY_POINT, vec![json!("loop { }")]).unwrap();
        let first = workers(&registry).latest().cloned().unwrap();

        registry.trigger(ENTRY_POINT, vec![json!("loop { }")]).unwrap();
        let live = workers(&registry);
        assert_eq!(live.len(), 1);

        let second = live.latest().cloned().unwrap();
        assert!(second.id() > first.id());
        assert!(first.is_terminated());
        assert_eq!(first.wait().await, SessionOutcome::Terminated);
        assert!(!second.is_terminated());

        second.terminate();
        assert_eq!(second.wait().await, SessionOutcome::Terminated);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn enter_env_returns_session_id() {
        let (registry, _bridge) = setup();

        let reply = registry.trigger(ENTRY_POINT, vec![json!("1 + 1;")]).unwrap();
        let id = reply.into_value().and_then(|v| v.as_u64()).unwrap();
        let session = workers(&registry).latest().cloned().unwrap();
        assert_eq!(session.id().get(), id);
        assert_eq!(session.wait().await, SessionOutcome::Completed);
    }

    #[test]
    fn enter_env_requires_code_string() {
        let (registry, _bridge) = setup();
        assert!(matches!(
            registry.trigger(ENTRY_POINT, vec![json!(42)]),
            Err(DispatchError::ArgumentTypeMismatch { position: 0, .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tasks_spawn_goes_through_enter_env() {
        let (registry, _bridge) = setup();

        let reply = registry
            .trigger("env/tasks:spawn", vec![json!("let x = 1;")])
            .unwrap();
        assert_eq!(reply.into_value(), Some(Value::Null));

        let session = workers(&registry).latest().cloned().unwrap();
        assert_eq!(session.wait().await, SessionOutcome::Completed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sandbox_can_spawn_a_replacement() {
        let (registry, _bridge) = setup();
        let gate = Arc::new(tokio::sync::Notify::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let gate_in = Arc::clone(&gate);
        let seen_in = Arc::clone(&seen);
        registry
            .register("env/probe", &[])
            .define(
                "wait",
                Function::pending(move |_, _| {
                    let gate = Arc::clone(&gate_in);
                    async move {
                        gate.notified().await;
                        Ok(Value::Null)
                    }
                }),
            )
            .define(
                "hit",
                Function::new(move |_, args| {
                    seen_in.lock().unwrap().extend(args);
                    Ok(Value::Null)
                }),
            );

        // the replacement terminates the session that spawned it
        registry
            .trigger(
                ENTRY_POINT,
                vec![json!(
                    r#"
                    trigger("env/probe:wait", []);
                    trigger("env/tasks:spawn", [`trigger("env/probe:hit", ["child"]);`]);
                "#
                )],
            )
            .unwrap();
        let parent = workers(&registry).latest().cloned().unwrap();
        gate.notify_one();
        assert_eq!(parent.wait().await, SessionOutcome::Terminated);

        let child = workers(&registry).latest().cloned().unwrap();
        assert!(child.id() > parent.id());
        assert_eq!(child.wait().await, SessionOutcome::Completed);
        assert_eq!(*seen.lock().unwrap(), vec![json!("child")]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn tasks_trigger_fires_pending_calls() {
        let (registry, _bridge) = setup();
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        registry.register("env/net", &[]).define(
            "fetch",
            Function::pending(move |_, args| {
                let tx = tx.lock().unwrap().take();
                async move {
                    if let Some(tx) = tx {
                        let _ = tx.send(args);
                    }
                    Ok(Value::Null)
                }
            }),
        );

        let reply = registry
            .trigger(
                "env/tasks:trigger",
                vec![json!("env/net:fetch"), json!(["/api/pastes"])],
            )
            .unwrap();
        assert_eq!(reply.into_value(), Some(Value::Null));
        assert_eq!(rx.await.unwrap(), vec![json!("/api/pastes")]);
    }

    #[test]
    fn tasks_trigger_propagates_dispatch_errors() {
        let (registry, _bridge) = setup();
        assert_eq!(
            registry
                .trigger("env/tasks:trigger", vec![json!("env/none:x"), json!([])])
                .unwrap_err(),
            DispatchError::UnknownNamespace("env/none".into())
        );
    }
}
