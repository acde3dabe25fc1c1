//! Model backend boundary
//!
//! A backend turns a conversation into a stream of chunks: text the agent
//! forwards as `ContentChunk` events, and tool calls it executes.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use crate::error::BackendError;
use crate::event::AgentPath;
use crate::task::Message;
use crate::tools::ToolDefinition;

/// What a generation request is for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestPurpose {
    /// A regular reasoning turn
    Turn,
    /// A coordinator asking which routing label fits the task; the reply
    /// text is taken as the label
    Route { labels: Vec<String> },
}

/// Everything a backend sees for one generation.
#[derive(Clone, Debug)]
pub struct GenerateRequest {
    pub agent_path: AgentPath,
    pub agent_name: String,
    pub instructions: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub purpose: RequestPurpose,
    /// Zero-based reasoning turn of this invocation
    pub turn: u32,
    /// Zero-based attempt of this turn; above zero on retries
    pub attempt: u32,
}

/// One streamed piece of a backend response.
#[derive(Clone, Debug, PartialEq)]
pub enum BackendChunk {
    Text(String),
    ToolCall { name: String, arguments: Value },
}

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<BackendChunk, BackendError>> + Send>>;

/// Trait implemented by each model backend.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerateRequest) -> Result<ChunkStream, BackendError>;
}

/// Named pool of model backends, shared read-only across runs.
#[derive(Default)]
pub struct BackendRegistry {
    backends: HashMap<String, Arc<dyn ModelBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under the name configurations refer to.
    pub fn register(&mut self, name: impl Into<String>, backend: Arc<dyn ModelBackend>) {
        self.backends.insert(name.into(), backend);
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ModelBackend>, BackendError> {
        self.backends
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::UnknownBackend(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.backends.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }
}
