//! Tasks and conversation messages

use serde::{Deserialize, Serialize};

use crate::error::MaestroError;
use crate::ids::TaskId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One conversation turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
        }
    }
}

/// A unit of work submitted to the root agent.
///
/// Immutable once submitted: agents only read it, and delegations derive new
/// tasks from it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Earlier conversation turns
    pub history: Vec<Message>,
    /// Latest user request
    pub request: String,
}

impl Task {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            history: Vec::new(),
            request: request.into(),
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    /// Reject tasks that cannot be executed.
    pub fn validate(&self) -> Result<(), MaestroError> {
        if self.request.trim().is_empty() {
            return Err(MaestroError::InvalidTask("request is empty".into()));
        }
        Ok(())
    }

    /// Task handed to a sub-agent. It shares the id and request; the
    /// conversation history stays with the coordinator.
    pub fn delegated(&self) -> Self {
        Self {
            id: self.id,
            history: Vec::new(),
            request: self.request.clone(),
        }
    }

    /// History followed by the request as a user message.
    pub fn messages(&self) -> Vec<Message> {
        let mut messages = self.history.clone();
        messages.push(Message::user(self.request.clone()));
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_task_rejected() {
        assert!(matches!(
            Task::new("").validate(),
            Err(MaestroError::InvalidTask(_))
        ));
        assert!(Task::new("  \n").validate().is_err());
        assert!(Task::new("say hi").validate().is_ok());
    }

    #[test]
    fn test_messages_append_request() {
        let task = Task::new("and now?").with_history(vec![
            Message::user("hello"),
            Message::assistant("hi there"),
        ]);
        let messages = task.messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2], Message::user("and now?"));
    }

    #[test]
    fn test_delegated_drops_history() {
        let task = Task::new("refund").with_history(vec![Message::user("earlier")]);
        let sub = task.delegated();
        assert_eq!(sub.id, task.id);
        assert!(sub.history.is_empty());
        assert_eq!(sub.request, "refund");
    }
}
