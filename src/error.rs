//! Error taxonomy
//!
//! Setup and model-invocation failures end a run. Parse and execution faults
//! never show up here: they are values (`ParsedAction::Invalid`, a failed
//! `ExecutionOutcome`) that get fed back to the model.

use std::path::PathBuf;

/// Failure before round 1 could start
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Failed to create session directory {}: {source}", path.display())]
    SessionDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to start execution sandbox: {0}")]
    Sandbox(#[from] SandboxError),
    #[error("Invalid dataset: {0}")]
    Dataset(String),
    #[error("Failed to write dataset to {}: {source}", path.display())]
    DatasetWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Model invocation failure (transport, auth, rate limit, malformed stream)
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("API key not configured: set {0}")]
    MissingApiKey(String),
    #[error("API request failed: {0}")]
    Request(String),
    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Stream read error: {0}")]
    Stream(String),
    #[error("Failed to build request: {0}")]
    Build(String),
}

impl ProviderError {
    /// Rate limits, gateway errors and connection failures are worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            ProviderError::Request(_) => true,
            _ => false,
        }
    }
}

/// The sandbox itself is unusable. Faults in the executed code are never
/// reported this way.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Python interpreter not found: {0}")]
    InterpreterNotFound(String),
    #[error("Failed to spawn interpreter '{}': {source}", interpreter.display())]
    Spawn {
        interpreter: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Sandbox protocol error: {0}")]
    Protocol(String),
    #[error("Sandbox worker exited")]
    WorkerExited,
}

/// Anything that terminates a run with an Error event
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Session setup failed: {0}")]
    Setup(#[from] SetupError),
    #[error("LLM call failed: {0}")]
    Model(#[from] ProviderError),
    #[error("Execution sandbox failed: {0}")]
    Sandbox(#[from] SandboxError),
}

/// Configuration that cannot be used
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(String),
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        let rate_limited = ProviderError::Status {
            status: 429,
            body: String::new(),
        };
        let bad_gateway = ProviderError::Status {
            status: 502,
            body: String::new(),
        };
        let unauthorized = ProviderError::Status {
            status: 401,
            body: "bad key".to_string(),
        };
        assert!(rate_limited.is_retryable());
        assert!(bad_gateway.is_retryable());
        assert!(!unauthorized.is_retryable());
        assert!(!ProviderError::Stream("eof".into()).is_retryable());
    }

    #[test]
    fn test_agent_error_text_is_verbatim() {
        let err: AgentError = ProviderError::Status {
            status: 401,
            body: "invalid api key".to_string(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "LLM call failed: API error 401: invalid api key"
        );
    }
}
