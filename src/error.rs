//! Engine error types

use std::time::Duration;

use thiserror::Error;

use crate::event::AgentPath;

/// Errors that can occur in the engine
#[derive(Debug, Error)]
pub enum MaestroError {
    /// Topology could not be resolved
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Task rejected before execution
    #[error("Invalid task: {0}")]
    InvalidTask(String),

    /// Tool layer error
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    /// Model backend error
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Event channel closed before the emission was sequenced
    #[error("Event channel closed")]
    ChannelClosed,
}

/// Errors raised by tools or while resolving them
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,
}

impl ToolError {
    /// Whether another attempt of the same call can succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::UnknownTool(_) | Self::Cancelled)
    }
}

/// Errors raised by a model backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// A single problem found while resolving a topology
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigViolation {
    #[error("{coordinator}: duplicate routing label `{label}`")]
    DuplicateLabel { coordinator: AgentPath, label: String },

    #[error("{coordinator}: sub-agent with empty routing label")]
    EmptyLabel { coordinator: AgentPath },

    #[error("{agent}: unknown tool `{tool}`")]
    UnknownTool { agent: AgentPath, tool: String },

    #[error("{agent}: unknown toolkit `{toolkit}`")]
    UnknownToolkit { agent: AgentPath, toolkit: String },

    #[error("{agent}: unknown model backend `{backend}`")]
    UnknownBackend { agent: AgentPath, backend: String },

    #[error("simple mode does not allow sub-agents")]
    SubAgentsInSimpleMode,

    #[error("{mode} mode requires at least one sub-agent")]
    MissingSubAgents { mode: String },

    #[error("{agent}: max_turns must be at least 1")]
    ZeroMaxTurns { agent: AgentPath },

    #[error("invalid execution policy: {0}")]
    InvalidPolicy(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Every violation found in one resolution pass
    #[error("invalid topology: {}", summarize(.0))]
    Invalid(Vec<ConfigViolation>),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub fn violations(&self) -> &[ConfigViolation] {
        match self {
            Self::Invalid(violations) => violations,
            _ => &[],
        }
    }
}

fn summarize(violations: &[ConfigViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_lists_every_violation() {
        let err = ConfigError::Invalid(vec![
            ConfigViolation::DuplicateLabel {
                coordinator: AgentPath::root(),
                label: "billing".into(),
            },
            ConfigViolation::UnknownTool {
                agent: AgentPath::root().child("billing"),
                tool: "refund".into(),
            },
        ]);
        let message = err.to_string();
        assert!(message.contains("root: duplicate routing label `billing`"));
        assert!(message.contains("root/billing: unknown tool `refund`"));
        assert_eq!(err.violations().len(), 2);
    }

    #[test]
    fn test_tool_error_retryable() {
        assert!(ToolError::ExecutionFailed("x".into()).is_retryable());
        assert!(ToolError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!ToolError::UnknownTool("x".into()).is_retryable());
        assert!(!ToolError::Cancelled.is_retryable());
    }

    #[test]
    fn test_maestro_error_from() {
        let err: MaestroError = ToolError::UnknownTool("echo".into()).into();
        assert_eq!(err.to_string(), "Tool error: unknown tool: echo");
    }
}
