use std::time::Duration;

/// Limits and policy applied to every sandbox session
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    /// How long a sandbox waits for the host to answer one request
    pub request_timeout: Duration,
    /// Rhai operation budget per session (0 = unlimited)
    pub max_operations: u64,
    /// Maximum expression nesting depth inside the sandbox
    pub max_expr_depth: usize,
    /// Only allow `env/*` namespaces across the bridge
    pub env_prefix_only: bool,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_operations: 1_000_000,
            max_expr_depth: 64,
            env_prefix_only: true,
        }
    }
}

/// Host settings that can be customized via Rhai config
#[derive(Debug, Clone)]
pub struct Settings {
    pub sandbox: SandboxSettings,

    // Logging
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sandbox: SandboxSettings::default(),
            log_level: "info".to_string(),
        }
    }
}
