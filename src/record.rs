//! Completed runs

use serde::{Deserialize, Serialize};

use crate::event::{AgentPath, Event, EventKind, EventTag, FailureReason};
use crate::ids::TaskId;

/// How a run ended, taken from the root agent's terminal event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed { output: String },
    Failed { reason: FailureReason },
    Cancelled,
}

impl RunOutcome {
    fn from_terminal(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::AgentCompleted { output } => Some(Self::Completed {
                output: output.clone(),
            }),
            EventKind::AgentFailed { reason } if reason.is_cancelled() => Some(Self::Cancelled),
            EventKind::AgentFailed { reason } => Some(Self::Failed {
                reason: reason.clone(),
            }),
            _ => None,
        }
    }
}

/// Every event of a finished run plus its outcome.
///
/// Two records of the same task replayed against the same deterministic
/// backends have equal [`signature`](Self::signature)s.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: TaskId,
    pub events: Vec<Event>,
    pub outcome: RunOutcome,
}

impl TaskRecord {
    pub fn from_events(task_id: TaskId, events: Vec<Event>) -> Self {
        let outcome = events
            .iter()
            .rev()
            .find(|e| e.agent_path.is_root() && e.is_terminal())
            .and_then(|e| RunOutcome::from_terminal(&e.kind))
            .unwrap_or_else(|| RunOutcome::Failed {
                reason: FailureReason::Internal {
                    detail: "run ended without a root terminal event".into(),
                },
            });
        Self {
            task_id,
            events,
            outcome,
        }
    }

    /// Output of the root agent when the run completed
    pub fn final_output(&self) -> Option<&str> {
        match &self.outcome {
            RunOutcome::Completed { output } => Some(output),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed { .. })
    }

    /// Event kinds and emitting paths, in sequence order
    pub fn signature(&self) -> Vec<(EventTag, AgentPath)> {
        self.events
            .iter()
            .map(|e| (e.tag(), e.agent_path.clone()))
            .collect()
    }

    /// Event kinds emitted by one agent, in sequence order
    pub fn path_signature(&self, path: &AgentPath) -> Vec<EventTag> {
        self.events_for(path).iter().map(|e| e.tag()).collect()
    }

    pub fn events_for(&self, path: &AgentPath) -> Vec<&Event> {
        self.events.iter().filter(|e| &e.agent_path == path).collect()
    }

    /// Concatenated content chunks of one agent
    pub fn content_of(&self, path: &AgentPath) -> String {
        self.events_for(path)
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::ContentChunk { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}
