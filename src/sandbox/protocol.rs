//! Messages exchanged between a sandbox and the host
//!
//! A sandbox posts `[function, ...args]`. Only the functions in
//! [`ALLOWED_CALLS`] are reachable; anything else is rejected at the
//! boundary and never answered.

use serde_json::Value;

use super::{SandboxError, SessionId};

/// Host entry points a sandbox may call
pub const ALLOWED_CALLS: [&str; 2] = ["serialize_namespace", "trigger"];

/// Prefix of namespaces meant for sandbox exposure
pub const ENV_PREFIX: &str = "env/";

/// A validated request from a sandbox
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    SerializeNamespace { name: String },
    Trigger { target: String, args: Vec<Value> },
}

impl Request {
    /// Parse a raw envelope, enforcing the allow-list
    pub fn parse(payload: Value) -> Result<Self, SandboxError> {
        let Value::Array(mut items) = payload else {
            return Err(SandboxError::rejected(
                "we can't do anything with this message",
            ));
        };
        if items.is_empty() {
            return Err(SandboxError::rejected("empty message"));
        }

        let Value::String(function) = items.remove(0) else {
            return Err(SandboxError::rejected("function name must be a string"));
        };
        if !ALLOWED_CALLS.contains(&function.as_str()) {
            return Err(SandboxError::rejected(format!(
                "illegal function call: {function}"
            )));
        }

        let mut args = items.into_iter();
        match function.as_str() {
            "serialize_namespace" => match args.next() {
                Some(Value::String(name)) => Ok(Request::SerializeNamespace { name }),
                _ => Err(SandboxError::rejected(
                    "serialize_namespace expects a namespace name",
                )),
            },
            _ => match (args.next(), args.next()) {
                (Some(Value::String(target)), Some(Value::Array(args))) => {
                    Ok(Request::Trigger { target, args })
                }
                (Some(Value::String(target)), None) => Ok(Request::Trigger {
                    target,
                    args: Vec::new(),
                }),
                _ => Err(SandboxError::rejected(
                    "trigger expects a target and an argument list",
                )),
            },
        }
    }

    /// Namespace the request reaches into
    pub fn namespace(&self) -> &str {
        match self {
            Request::SerializeNamespace { name } => name,
            Request::Trigger { target, .. } => target
                .split_once(':')
                .map_or(target.as_str(), |(namespace, _)| namespace),
        }
    }
}

/// Boundary policy applied to every envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowList {
    env_prefix_only: bool,
}

impl AllowList {
    pub fn new(env_prefix_only: bool) -> Self {
        Self { env_prefix_only }
    }

    /// Validate an envelope and turn it into a request
    pub fn check(&self, payload: Value) -> Result<Request, SandboxError> {
        let request = Request::parse(payload)?;
        if self.env_prefix_only && !request.namespace().starts_with(ENV_PREFIX) {
            return Err(SandboxError::rejected(format!(
                "namespace \"{}\" is not exposed to sandboxes",
                request.namespace()
            )));
        }
        Ok(request)
    }
}

impl Default for AllowList {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Host answer to one request
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Value(Value),
    Error(String),
}

/// Envelope posted by a sandbox
#[derive(Debug)]
pub(crate) struct Envelope {
    pub session: SessionId,
    pub seq: u64,
    pub payload: Value,
}

/// Response tagged with the session generation and request it answers
#[derive(Debug)]
pub(crate) struct Tagged {
    pub session: SessionId,
    pub seq: u64,
    pub response: Response,
}
