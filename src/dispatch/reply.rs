use std::fmt;

use futures::future::BoxFuture;
use serde_json::Value;

use super::DispatchError;

/// Result of a dispatch: either a value or a computation still running
pub enum Reply {
    Value(Value),
    Pending(BoxFuture<'static, Result<Value, DispatchError>>),
}

impl Reply {
    pub fn is_pending(&self) -> bool {
        matches!(self, Reply::Pending(_))
    }

    /// The value, if it is already available
    pub fn into_value(self) -> Option<Value> {
        match self {
            Reply::Value(value) => Some(value),
            Reply::Pending(_) => None,
        }
    }

    /// Wait for the final value
    pub async fn resolve(self) -> Result<Value, DispatchError> {
        match self {
            Reply::Value(value) => Ok(value),
            Reply::Pending(future) => future.await,
        }
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Value(value)
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Reply::Pending(_) => f.write_str("Pending"),
        }
    }
}
