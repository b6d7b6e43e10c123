//! worker - Raw message channel back to the host
//!
//! Usage in Rhai:
//! ```rhai
//! let names = worker::post(["serialize_namespace", "env/window"]);
//! worker::post(["trigger", "env/window:alert", ["hello"]]);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rhai::{Dynamic, EvalAltResult};
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::sandbox::protocol::{Envelope, Response, Tagged};
use crate::sandbox::{SandboxError, SessionId};

/// Sandbox end of the request/reply channel of one session
pub(crate) struct WorkerChannel {
    session: SessionId,
    requests: UnboundedSender<Envelope>,
    replies: Mutex<Receiver<Tagged>>,
    timeout: Duration,
    seq: AtomicU64,
}

impl WorkerChannel {
    pub(crate) fn new(
        session: SessionId,
        requests: UnboundedSender<Envelope>,
        replies: Receiver<Tagged>,
        timeout: Duration,
    ) -> Self {
        Self {
            session,
            requests,
            replies: Mutex::new(replies),
            timeout,
            seq: AtomicU64::new(0),
        }
    }

    /// Send one envelope and block until its reply arrives
    ///
    /// Replies to earlier requests (for example ones that already timed
    /// out) are discarded.
    pub(crate) fn post(&self, payload: Value) -> Result<Value, SandboxError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("WORKER {} message sent ({seq})", self.session);

        self.requests
            .send(Envelope {
                session: self.session,
                seq,
                payload,
            })
            .map_err(|_| SandboxError::Terminated)?;

        let replies = self.replies.lock().unwrap_or_else(PoisonError::into_inner);
        let deadline = Instant::now() + self.timeout;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match replies.recv_timeout(remaining) {
                Ok(tagged) if tagged.session == self.session && tagged.seq == seq => {
                    debug!("WORKER {} message received ({seq})", self.session);
                    return match tagged.response {
                        Response::Value(value) => Ok(value),
                        Response::Error(message) => Err(SandboxError::Dispatch(message)),
                    };
                }
                Ok(stale) => {
                    debug!(
                        "WORKER {} dropping stale reply {} (waiting for {seq})",
                        self.session, stale.seq
                    );
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(SandboxError::SandboxTimeout(self.timeout));
                }
                Err(RecvTimeoutError::Disconnected) => return Err(SandboxError::Terminated),
            }
        }
    }
}

fn to_eval_error(e: impl std::fmt::Display) -> Box<EvalAltResult> {
    e.to_string().into()
}

/// Create the worker module bound to one session's channel
pub(crate) fn create_module(channel: Arc<WorkerChannel>) -> rhai::Module {
    let mut module = rhai::Module::new();

    // post(message) -> reply
    module.set_native_fn(
        "post",
        move |message: Dynamic| -> Result<Dynamic, Box<EvalAltResult>> {
            let payload: Value = rhai::serde::from_dynamic(&message)?;
            let reply = channel.post(payload).map_err(to_eval_error)?;
            rhai::serde::to_dynamic(reply)
        },
    );

    module
}
