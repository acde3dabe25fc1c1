//! Per-task execution state

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::channel::EventEmitter;
use crate::error::MaestroError;
use crate::event::{AgentPath, Event, EventKind};
use crate::ids::{InvocationId, TaskId};

/// Mutable coordination state of one task.
///
/// Owned by the orchestrator's collector; agents never touch it. They observe
/// cancellation through their [`AgentContext`] token instead.
pub struct ExecutionContext {
    task_id: TaskId,
    next_sequence: u64,
    cancelled: bool,
    root_finished: bool,
    active: HashMap<InvocationId, AgentPath>,
    root_token: CancellationToken,
}

impl ExecutionContext {
    pub fn new(task_id: TaskId, root_token: CancellationToken) -> Self {
        Self {
            task_id,
            next_sequence: 1,
            cancelled: false,
            root_finished: false,
            active: HashMap::new(),
            root_token,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Sequence an emission and update the active set.
    pub fn record(&mut self, invocation: InvocationId, path: AgentPath, kind: EventKind) -> Event {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        match &kind {
            EventKind::AgentSpawned { .. } => {
                self.active.insert(invocation, path.clone());
            }
            kind if kind.is_terminal() => {
                self.active.remove(&invocation);
                if path.is_root() {
                    self.root_finished = true;
                }
            }
            _ => {}
        }

        Event {
            sequence,
            task_id: self.task_id,
            agent_path: path,
            kind,
        }
    }

    /// Mark the task cancelled and propagate to the root agent, which
    /// propagates to its active sub-agents. Returns false if already
    /// cancelled.
    pub fn cancel(&mut self) -> bool {
        if self.cancelled {
            debug!(task_id = %self.task_id, "Cancellation already requested");
            return false;
        }
        self.cancelled = true;
        info!(
            task_id = %self.task_id,
            active = self.active.len(),
            "Cancelling task"
        );
        self.root_token.cancel();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// The root reached a terminal event and no invocation is still active
    pub fn is_settled(&self) -> bool {
        self.root_finished && self.active.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Paths of the active invocations, sorted
    pub fn active_paths(&self) -> Vec<AgentPath> {
        let mut paths: Vec<AgentPath> = self.active.values().cloned().collect();
        paths.sort();
        paths
    }

    /// Sequence number the next event will get
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }
}

/// What an agent invocation gets to see of its task's execution.
pub struct AgentContext {
    pub task_id: TaskId,
    pub emitter: EventEmitter,
    pub cancel: CancellationToken,
}

impl AgentContext {
    pub(crate) fn new(task_id: TaskId, emitter: EventEmitter, cancel: CancellationToken) -> Self {
        Self {
            task_id,
            emitter,
            cancel,
        }
    }

    pub fn path(&self) -> &AgentPath {
        self.emitter.path()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Context for a sub-agent reached through `label`: its own channel and a
    /// child cancellation token.
    pub(crate) fn child(&self, label: &str) -> Result<AgentContext, MaestroError> {
        Ok(AgentContext {
            task_id: self.task_id,
            emitter: self.emitter.child(label)?,
            cancel: self.cancel.child_token(),
        })
    }
}
