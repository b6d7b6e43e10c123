use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// An envelope from the sandbox failed validation at the bridge
    #[error("Rejected message: {0}")]
    RejectedMessage(String),

    /// Uncaught error inside the sandbox
    #[error("Sandbox fault: {0}")]
    SandboxFault(String),

    #[error("SandboxTimeout: no reply within {0:?}")]
    SandboxTimeout(Duration),

    #[error("Sandbox session was terminated")]
    Terminated,

    /// The host answered a request with a dispatch error
    #[error("{0}")]
    Dispatch(String),

    #[error("Sandbox sessions must be spawned from within a tokio runtime")]
    NoRuntime,

    #[error("Failed to compile sandbox bootstrap: {0}")]
    Bootstrap(String),

    #[error("Failed to spawn sandbox thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl SandboxError {
    pub(crate) fn rejected(message: impl Into<String>) -> Self {
        SandboxError::RejectedMessage(message.into())
    }
}
