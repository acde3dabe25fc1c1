//! Events emitted by a run
//!
//! Every event carries a sequence number assigned by the orchestrator's
//! collector, the path of the emitting agent and a typed payload. Events are
//! append-only: once sequenced they are never mutated or retracted.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::{CallId, InvocationId, TaskId};

/// Position of an agent in the topology.
///
/// The root agent has the empty path; a sub-agent's path lists the routing
/// labels from the root down to it.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentPath(Vec<String>);

impl AgentPath {
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_labels<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(labels.into_iter().map(Into::into).collect())
    }

    /// Path of the sub-agent reached from this one through `label`
    pub fn child(&self, label: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(label.into());
        Self(segments)
    }

    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Routing label of the agent, `None` for the root
    pub fn label(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// True when `other` lies strictly below this path
    pub fn is_ancestor_of(&self, other: &AgentPath) -> bool {
        other.0.len() > self.0.len() && other.0.starts_with(&self.0)
    }
}

impl fmt::Display for AgentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("root")?;
        for segment in &self.0 {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

/// Why an agent invocation ended in `AgentFailed`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("cancelled")]
    Cancelled,

    #[error("tool `{tool}` failed: {detail}")]
    ToolFailure { tool: String, detail: String },

    #[error("model backend failed: {detail}")]
    BackendFailure { detail: String },

    #[error("no sub-agent matches the task (labels: {labels:?})")]
    NoRoute { labels: Vec<String> },

    #[error("sub-agent `{label}` failed: {detail}")]
    SubAgentFailed { label: String, detail: String },

    #[error("gave up after {max_turns} turns")]
    MaxTurnsExceeded { max_turns: u32 },

    #[error("internal error: {detail}")]
    Internal { detail: String },
}

impl FailureReason {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result half of a tool call as reported in the stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { output: serde_json::Value },
    Failure { error: String },
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Payload of an event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    AgentSpawned {
        name: String,
        invocation: InvocationId,
    },
    ToolInvoked {
        call_id: CallId,
        tool: String,
        arguments: serde_json::Value,
        attempt: u32,
    },
    ToolResult {
        call_id: CallId,
        tool: String,
        outcome: ToolOutcome,
    },
    ContentChunk {
        text: String,
    },
    AgentCompleted {
        output: String,
    },
    AgentFailed {
        reason: FailureReason,
    },
}

impl EventKind {
    pub fn tag(&self) -> EventTag {
        match self {
            Self::AgentSpawned { .. } => EventTag::AgentSpawned,
            Self::ToolInvoked { .. } => EventTag::ToolInvoked,
            Self::ToolResult { .. } => EventTag::ToolResult,
            Self::ContentChunk { .. } => EventTag::ContentChunk,
            Self::AgentCompleted { .. } => EventTag::AgentCompleted,
            Self::AgentFailed { .. } => EventTag::AgentFailed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::AgentCompleted { .. } | Self::AgentFailed { .. })
    }
}

/// Discriminant of [`EventKind`] without its payload.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTag {
    AgentSpawned,
    ToolInvoked,
    ToolResult,
    ContentChunk,
    AgentCompleted,
    AgentFailed,
}

impl fmt::Display for EventTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AgentSpawned => "agent_spawned",
            Self::ToolInvoked => "tool_invoked",
            Self::ToolResult => "tool_result",
            Self::ContentChunk => "content_chunk",
            Self::AgentCompleted => "agent_completed",
            Self::AgentFailed => "agent_failed",
        };
        f.write_str(name)
    }
}

/// One sequenced record of the stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub sequence: u64,
    pub task_id: TaskId,
    pub agent_path: AgentPath,
    pub kind: EventKind,
}

impl Event {
    pub fn tag(&self) -> EventTag {
        self.kind.tag()
    }

    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }
}
