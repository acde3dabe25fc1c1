//! Tool registry - resolves tool names to invocable capabilities

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::error::ToolError;
use crate::event::AgentPath;
use crate::ids::{CallId, TaskId};

/// Context handed to a tool for one call.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub task_id: TaskId,
    pub agent_path: AgentPath,
    pub call_id: CallId,
    /// Fires when the calling agent is cancelled. Tools may ignore it; the
    /// agent then waits for the call to finish before stopping.
    pub cancel: CancellationToken,
}

/// Tool description handed to model backends.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

/// Trait implemented by each tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    async fn invoke(&self, arguments: Value, ctx: &ToolContext) -> Result<Value, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

/// A resolved tool, ready to be invoked.
#[derive(Clone)]
pub struct ToolHandle {
    tool: Arc<dyn Tool>,
}

impl ToolHandle {
    pub fn name(&self) -> &str {
        self.tool.name()
    }

    pub fn definition(&self) -> ToolDefinition {
        self.tool.to_definition()
    }
}

impl std::fmt::Debug for ToolHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolHandle").field("name", &self.name()).finish()
    }
}

/// Registry of available tools and named toolkits.
///
/// Built once, then shared read-only across every agent of every run.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    toolkits: HashMap<String, Vec<String>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool of the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        debug!(tool = %name, "Registering tool");
        self.tools.insert(name, tool);
    }

    /// Register a toolkit: a name standing for a group of tool names.
    pub fn register_toolkit<I, S>(&mut self, name: impl Into<String>, tools: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.toolkits
            .insert(name.into(), tools.into_iter().map(Into::into).collect());
    }

    /// Resolve a tool name to a handle.
    pub fn resolve(&self, name: &str) -> Result<ToolHandle, ToolError> {
        self.tools
            .get(name)
            .map(|tool| ToolHandle {
                tool: Arc::clone(tool),
            })
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    /// Tool names a toolkit expands to.
    pub fn toolkit(&self, name: &str) -> Option<&[String]> {
        self.toolkits.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke a resolved tool.
    #[instrument(
        skip(self, handle, arguments, ctx),
        fields(tool = %handle.name(), agent = %ctx.agent_path)
    )]
    pub async fn invoke(
        &self,
        handle: &ToolHandle,
        arguments: Value,
        ctx: &ToolContext,
    ) -> Result<Value, ToolError> {
        debug!(call_id = %ctx.call_id, "Invoking tool");
        handle.tool.invoke(arguments, ctx).await
    }
}

/// Returns its `text` argument, or the arguments unchanged when there is none.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text back"
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } }
        })
    }

    async fn invoke(&self, arguments: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        Ok(arguments.get("text").cloned().unwrap_or(arguments))
    }
}

type ToolFn = dyn Fn(Value) -> anyhow::Result<Value> + Send + Sync;

/// Tool backed by a plain closure.
///
/// The closure runs on the blocking thread pool, so it may perform blocking
/// I/O. Errors are reported as [`ToolError::ExecutionFailed`].
pub struct FnTool {
    name: String,
    description: String,
    func: Arc<ToolFn>,
}

impl FnTool {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            func: Arc::new(func),
        }
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, arguments: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
        let func = Arc::clone(&self.func);
        tokio::task::spawn_blocking(move || func(arguments))
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("tool panicked: {e}")))?
            .map_err(|e| ToolError::ExecutionFailed(format!("{e:#}")))
    }
}
