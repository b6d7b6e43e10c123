//! Worker bridge
//!
//! Runs untrusted, user-authored Rhai code on its own thread and exposes
//! only a narrow, allow-listed surface back into the dispatcher. A sandbox
//! talks to the host exclusively through `[function, ...args]` messages;
//! each request blocks the sandbox until the host replies, the request
//! times out, or the session is terminated.

mod bridge;
mod error;
pub mod protocol;
mod session;

pub use bridge::Bridge;
pub use error::SandboxError;
pub use protocol::{ALLOWED_CALLS, AllowList, ENV_PREFIX, Request, Response};
pub use session::{SandboxSession, SessionId, SessionOutcome};
