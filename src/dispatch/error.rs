use crate::namespace::ParamType;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("Malformed dispatch target \"{0}\" (expected namespace:function)")]
    MalformedTarget(String),

    #[error("Namespace \"{0}\" is not registered")]
    UnknownNamespace(String),

    #[error("Function \"{function}\" is not defined in namespace \"{namespace}\"")]
    UnknownFunction { namespace: String, function: String },

    #[error("Namespace \"{namespace}\" depends on unregistered namespace \"{dependency}\"")]
    UnresolvedDependency {
        namespace: String,
        dependency: String,
    },

    #[error("Argument {position} of \"{target}\" should be {expected}, got {found}")]
    ArgumentTypeMismatch {
        target: String,
        position: usize,
        expected: ParamType,
        found: &'static str,
    },

    /// The function itself failed
    #[error("{0}")]
    Failed(String),
}

impl DispatchError {
    pub fn failed(message: impl Into<String>) -> Self {
        DispatchError::Failed(message.into())
    }
}
