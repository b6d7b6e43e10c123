use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use rhai::AST;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::protocol::{AllowList, Envelope, Request, Response, Tagged};
use super::{SandboxError, SandboxSession, SessionId, SessionOutcome};
use crate::config::SandboxSettings;
use crate::namespace::Registry;
use crate::scripting::{SandboxEngine, WorkerChannel};

struct BridgeInner {
    registry: Registry,
    settings: SandboxSettings,
    allow_list: AllowList,
    bootstrap: AST,
    next_id: AtomicU64,
}

/// Spawns sandbox sessions and answers their requests
///
/// Cloning yields another handle to the same bridge.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    pub fn new(registry: Registry, settings: SandboxSettings) -> Result<Self, SandboxError> {
        let bootstrap = SandboxEngine::compile_bootstrap()?;
        let allow_list = AllowList::new(settings.env_prefix_only);

        Ok(Self {
            inner: Arc::new(BridgeInner {
                registry,
                settings,
                allow_list,
                bootstrap,
                next_id: AtomicU64::new(0),
            }),
        })
    }

    /// Start a new sandbox running `code`
    ///
    /// Must be called from within a tokio runtime, which serves the
    /// session's requests.
    pub fn spawn(&self, code: &str) -> Result<SandboxSession, SandboxError> {
        let runtime = Handle::try_current().map_err(|_| SandboxError::NoRuntime)?;
        let id = SessionId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1);

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (reply_tx, reply_rx) = std::sync::mpsc::channel();
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let terminated = Arc::new(AtomicBool::new(false));

        let session = SandboxSession::new(id, Arc::clone(&terminated), reply_tx, outcome_rx);
        let channel = Arc::new(WorkerChannel::new(
            id,
            request_tx,
            reply_rx,
            self.inner.settings.request_timeout,
        ));

        let bootstrap = self.inner.bootstrap.clone();
        let limits = self.inner.settings.clone();
        let code = code.to_string();

        std::thread::Builder::new()
            .name(format!("sandbox-{}", id.get()))
            .spawn(move || {
                let engine = SandboxEngine::new(channel, &limits, Arc::clone(&terminated));
                let result = engine.run(&bootstrap, &code);
                drop(engine);

                let outcome = match result {
                    _ if terminated.load(Ordering::Acquire) => SessionOutcome::Terminated,
                    Ok(()) => SessionOutcome::Completed,
                    Err(e) => {
                        error!("WORKER {id}: {e}");
                        SessionOutcome::Faulted(e.to_string())
                    }
                };
                debug!("Sandbox session {id} finished: {outcome:?}");
                outcome_tx.send_replace(Some(outcome));
            })?;

        runtime.spawn(serve(self.clone(), session.clone(), request_rx));
        info!("Spawned sandbox session {id}");

        Ok(session)
    }

    /// Validate one envelope and answer it
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::RejectedMessage`] if the envelope is
    /// malformed or calls something outside the allow-list. Dispatch
    /// failures are answered with [`Response::Error`] instead.
    pub async fn handle(&self, payload: Value) -> Result<Response, SandboxError> {
        let request = self.inner.allow_list.check(payload)?;
        Ok(answer(&self.inner.registry, request).await)
    }
}

async fn answer(registry: &Registry, request: Request) -> Response {
    match request {
        Request::SerializeNamespace { name } => match registry.serialize_namespace(&name) {
            Ok(names) => Response::Value(Value::from(names)),
            Err(e) => Response::Error(e.to_string()),
        },
        Request::Trigger { target, args } => {
            let reply = match registry.trigger(&target, args) {
                Ok(reply) => reply,
                Err(e) => return Response::Error(e.to_string()),
            };
            match reply.resolve().await {
                Ok(value) => Response::Value(value),
                Err(e) => Response::Error(e.to_string()),
            }
        }
    }
}

/// Host side of one session: answer requests one at a time until the
/// sandbox drops its channel or the session is terminated
///
/// A request gets at most `request_timeout` to resolve, the same budget the
/// sandbox waits for it, so an abandoned call never holds up the next one.
async fn serve(
    bridge: Bridge,
    session: SandboxSession,
    mut requests: mpsc::UnboundedReceiver<Envelope>,
) {
    let timeout = bridge.inner.settings.request_timeout;

    loop {
        let envelope = tokio::select! {
            biased;
            _ = session.cancelled() => break,
            envelope = requests.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };
        let Envelope {
            session: id,
            seq,
            payload,
        } = envelope;

        let handled = tokio::select! {
            biased;
            _ = session.cancelled() => {
                debug!("Dropping request {seq} of terminated session {id}");
                break;
            }
            handled = tokio::time::timeout(timeout, bridge.handle(payload)) => handled,
        };

        let response = match handled {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                // no reply: the sandbox waits until its request times out
                warn!("WORKER {id}: {e}");
                continue;
            }
            Err(_) => {
                warn!("WORKER {id}: request {seq} not answered within {timeout:?}, dropped");
                continue;
            }
        };

        session.reply(Tagged {
            session: id,
            seq,
            response,
        });
    }
    debug!("Stopped serving sandbox session {}", session.id());
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::namespace::Function;

    fn settings() -> SandboxSettings {
        SandboxSettings {
            request_timeout: Duration::from_secs(5),
            ..SandboxSettings::default()
        }
    }

    /// Namespace that stores every call's arguments in its state
    fn recording_registry() -> Registry {
        let registry = Registry::new();
        registry
            .register("env/test", &[])
            .define(
                "record",
                Function::new(|imports, args| {
                    imports
                        .state()
                        .with(|log: &mut Vec<Value>| log.push(Value::from(args)));
                    Ok(Value::Null)
                }),
            )
            .define("ping", Function::new(|_, _| Ok(json!("pong"))));
        registry
    }

    fn recorded(registry: &Registry) -> Vec<Value> {
        registry
            .lookup("env/test")
            .unwrap()
            .state()
            .get::<Vec<Value>>()
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn allowed_trigger_reenters_dispatcher() {
        let registry = recording_registry();
        registry.register("env/tasks", &[]).define(
            "spawn",
            Function::new(|imports, args| {
                imports.state().with(|calls: &mut Vec<Value>| calls.extend(args));
                Ok(Value::Null)
            }),
        );
        let bridge = Bridge::new(registry.clone(), settings()).unwrap();

        let response = bridge
            .handle(json!(["trigger", "env/tasks:spawn", ["code"]]))
            .await
            .unwrap();
        assert_eq!(response, Response::Value(Value::Null));

        let calls = registry
            .lookup("env/tasks")
            .unwrap()
            .state()
            .get::<Vec<Value>>();
        assert_eq!(calls, Some(vec![json!("code")]));
    }

    #[tokio::test]
    async fn disallowed_call_is_rejected_without_dispatch() {
        let registry = recording_registry();
        let bridge = Bridge::new(registry.clone(), settings()).unwrap();

        let err = bridge.handle(json!(["eval", "danger()"])).await.unwrap_err();
        assert!(matches!(err, SandboxError::RejectedMessage(_)));
        assert!(recorded(&registry).is_empty());
    }

    #[tokio::test]
    async fn dispatch_errors_are_answered() {
        let bridge = Bridge::new(recording_registry(), settings()).unwrap();

        let response = bridge
            .handle(json!(["trigger", "env/test:missing", []]))
            .await
            .unwrap();
        assert!(matches!(response, Response::Error(msg) if msg.contains("missing")));
    }

    #[tokio::test]
    async fn serialize_namespace_lists_functions() {
        let bridge = Bridge::new(recording_registry(), settings()).unwrap();

        let response = bridge
            .handle(json!(["serialize_namespace", "env/test"]))
            .await
            .unwrap();
        assert_eq!(response, Response::Value(json!(["ping", "record"])));
    }

    #[test]
    fn spawn_requires_runtime() {
        let bridge = Bridge::new(Registry::new(), settings()).unwrap();
        assert!(matches!(bridge.spawn("1;"), Err(SandboxError::NoRuntime)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sandbox_trigger_round_trip() {
        let registry = recording_registry();
        let bridge = Bridge::new(registry.clone(), settings()).unwrap();

        let session = bridge
            .spawn(
                r#"
                let reply = trigger("env/test:ping", []);
                trigger("env/test:record", [reply]);
            "#,
            )
            .unwrap();

        assert_eq!(session.wait().await, SessionOutcome::Completed);
        assert_eq!(recorded(&registry), vec![json!(["pong"])]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn require_builds_callable_proxy() {
        let registry = recording_registry();
        let bridge = Bridge::new(registry.clone(), settings()).unwrap();

        let session = bridge
            .spawn(
                r#"
                let tools = require("env/test");
                tools.record([tools.ping([]), 2]);
            "#,
            )
            .unwrap();

        assert_eq!(session.wait().await, SessionOutcome::Completed);
        assert_eq!(recorded(&registry), vec![json!(["pong", 2])]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn require_refuses_non_env_namespaces() {
        let bridge = Bridge::new(recording_registry(), settings()).unwrap();

        let session = bridge.spawn(r#"require("auth");"#).unwrap();
        match session.wait().await {
            SessionOutcome::Faulted(msg) => assert!(msg.contains("illegal namespace import")),
            other => panic!("Expected fault, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dispatch_error_is_catchable_in_sandbox() {
        let registry = recording_registry();
        let bridge = Bridge::new(registry.clone(), settings()).unwrap();

        let session = bridge
            .spawn(
                r#"
                try {
                    trigger("env/test:nope", []);
                } catch (err) {
                    trigger("env/test:record", ["caught"]);
                }
            "#,
            )
            .unwrap();

        assert_eq!(session.wait().await, SessionOutcome::Completed);
        assert_eq!(recorded(&registry), vec![json!(["caught"])]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn rejected_request_times_out() {
        let registry = recording_registry();
        let bridge = Bridge::new(
            registry.clone(),
            SandboxSettings {
                request_timeout: Duration::from_millis(100),
                ..SandboxSettings::default()
            },
        )
        .unwrap();

        let session = bridge.spawn(r#"worker::post(["eval", "danger()"]);"#).unwrap();
        match session.wait().await {
            SessionOutcome::Faulted(msg) => assert!(msg.contains("SandboxTimeout")),
            other => panic!("Expected timeout fault, got {:?}", other),
        }
        assert!(recorded(&registry).is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timed_out_request_does_not_block_the_next() {
        let registry = recording_registry();
        registry.register("env/slow", &[]).define(
            "never",
            Function::pending(|_, _| futures::future::pending()),
        );
        let bridge = Bridge::new(
            registry.clone(),
            SandboxSettings {
                request_timeout: Duration::from_millis(100),
                ..SandboxSettings::default()
            },
        )
        .unwrap();

        let session = bridge
            .spawn(
                r#"
                try {
                    trigger("env/slow:never", []);
                } catch (err) {
                    trigger("env/test:record", ["timed out"]);
                }
                let pong = trigger("env/test:ping", []);
                trigger("env/test:record", [pong]);
            "#,
            )
            .unwrap();

        assert_eq!(session.wait().await, SessionOutcome::Completed);
        assert_eq!(
            recorded(&registry),
            vec![json!(["timed out"]), json!(["pong"])]
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn terminate_drops_in_flight_request() {
        let registry = recording_registry();
        let entered = Arc::new(tokio::sync::Notify::new());
        let (guard_tx, guard_rx) = tokio::sync::oneshot::channel::<()>();
        let guard = Arc::new(std::sync::Mutex::new(Some(guard_tx)));
        {
            let entered = Arc::clone(&entered);
            registry.register("env/hang", &[]).define(
                "forever",
                Function::pending(move |_, _| {
                    let entered = Arc::clone(&entered);
                    let guard = guard.lock().unwrap().take();
                    async move {
                        let _guard = guard;
                        entered.notify_one();
                        futures::future::pending::<()>().await;
                        Ok(Value::Null)
                    }
                }),
            );
        }
        let bridge = Bridge::new(registry, settings()).unwrap();

        let session = bridge.spawn(r#"trigger("env/hang:forever", []);"#).unwrap();
        entered.notified().await;

        session.terminate();
        assert_eq!(session.wait().await, SessionOutcome::Terminated);

        // the sender inside the future is dropped along with it
        let dropped = tokio::time::timeout(Duration::from_secs(1), guard_rx).await;
        assert!(matches!(dropped, Ok(Err(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn runtime_error_faults_only_the_session() {
        let registry = recording_registry();
        let bridge = Bridge::new(registry.clone(), settings()).unwrap();

        let session = bridge.spawn(r#"throw "boom";"#).unwrap();
        assert!(matches!(session.wait().await, SessionOutcome::Faulted(_)));

        // the host keeps serving new sessions
        let session = bridge.spawn(r#"trigger("env/test:record", [1]);"#).unwrap();
        assert_eq!(session.wait().await, SessionOutcome::Completed);
        assert_eq!(recorded(&registry), vec![json!([1])]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn parse_error_faults_session() {
        let bridge = Bridge::new(recording_registry(), settings()).unwrap();

        let session = bridge.spawn("let = ;").unwrap();
        match session.wait().await {
            SessionOutcome::Faulted(msg) => assert!(msg.contains("parse error")),
            other => panic!("Expected parse fault, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn terminate_stops_running_script() {
        let bridge = Bridge::new(
            recording_registry(),
            SandboxSettings {
                max_operations: 0,
                ..settings()
            },
        )
        .unwrap();

        let session = bridge.spawn("loop { }").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!session.is_finished());

        session.terminate();
        session.terminate();
        assert_eq!(session.wait().await, SessionOutcome::Terminated);
        assert!(session.is_terminated());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn operation_budget_faults_session() {
        let bridge = Bridge::new(
            recording_registry(),
            SandboxSettings {
                max_operations: 1_000,
                ..settings()
            },
        )
        .unwrap();

        let session = bridge.spawn("loop { }").unwrap();
        assert!(matches!(session.wait().await, SessionOutcome::Faulted(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn session_ids_increase() {
        let bridge = Bridge::new(recording_registry(), settings()).unwrap();
        let first = bridge.spawn("1;").unwrap();
        let second = bridge.spawn("2;").unwrap();
        assert!(second.id() > first.id());
        first.wait().await;
        second.wait().await;
    }
}
