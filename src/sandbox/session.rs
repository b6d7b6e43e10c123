use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, mpsc};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use super::protocol::Tagged;

/// Generation number of a sandbox session; later sessions have larger ids
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum SessionOutcome {
    Completed,
    Faulted(String),
    Terminated,
}

struct SessionInner {
    id: SessionId,
    terminated: Arc<AtomicBool>,
    replies: Mutex<Option<mpsc::Sender<Tagged>>>,
    outcome: watch::Receiver<Option<SessionOutcome>>,
    cancel: watch::Sender<bool>,
}

/// Handle to a running (or finished) sandbox
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct SandboxSession {
    inner: Arc<SessionInner>,
}

impl SandboxSession {
    pub(crate) fn new(
        id: SessionId,
        terminated: Arc<AtomicBool>,
        replies: mpsc::Sender<Tagged>,
        outcome: watch::Receiver<Option<SessionOutcome>>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                terminated,
                replies: Mutex::new(Some(replies)),
                outcome,
                cancel: watch::Sender::new(false),
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Stop the sandbox
    ///
    /// The script is aborted at its next operation and a request it is
    /// waiting on returns immediately. Host work still in flight for the
    /// session is dropped.
    pub fn terminate(&self) {
        if self.inner.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.inner.cancel.send_replace(true);
        info!("Terminated sandbox session {}", self.inner.id);
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.inner.outcome.borrow().is_some()
    }

    /// The outcome, once the sandbox thread has exited
    pub fn outcome(&self) -> Option<SessionOutcome> {
        self.inner.outcome.borrow().clone()
    }

    /// Wait for the sandbox thread to exit
    pub async fn wait(&self) -> SessionOutcome {
        let mut outcome = self.inner.outcome.clone();
        let settled = outcome
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|settled| (*settled).clone());
        settled.unwrap_or(SessionOutcome::Terminated)
    }

    /// Resolves once [`terminate`](Self::terminate) has been called
    pub(crate) async fn cancelled(&self) {
        let mut cancel = self.inner.cancel.subscribe();
        // the sender lives as long as `self`, so this only ends on terminate
        let _ = cancel.wait_for(|cancelled| *cancelled).await;
    }

    /// Deliver a response to the sandbox; `false` if it was dropped
    pub(crate) fn reply(&self, tagged: Tagged) -> bool {
        if self.is_terminated() || tagged.session != self.inner.id {
            debug!(
                "Dropping reply {} for session {} (current {})",
                tagged.seq, tagged.session, self.inner.id
            );
            return false;
        }

        let replies = self
            .inner
            .replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match replies.as_ref() {
            Some(sender) => sender.send(tagged).is_ok(),
            None => false,
        }
    }
}

impl fmt::Debug for SandboxSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxSession")
            .field("id", &self.inner.id)
            .field("terminated", &self.is_terminated())
            .field("outcome", &self.outcome())
            .finish()
    }
}
