//! Agent implementation - one unit of reasoning
//!
//! An agent invocation runs as its own tokio task. It announces itself with
//! `AgentSpawned`, optionally delegates to sub-agents (coordinators only),
//! then alternates backend turns and tool calls until the backend answers
//! without calling a tool. Every invocation ends in exactly one terminal
//! event, panics included.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::{FutureExt, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::backend::{BackendChunk, GenerateRequest, ModelBackend, RequestPurpose};
use crate::config::{ExecutionPolicy, RoutingStrategy};
use crate::context::AgentContext;
use crate::error::{BackendError, MaestroError, ToolError};
use crate::event::{AgentPath, EventKind, FailureReason, ToolOutcome};
use crate::ids::{CallId, InvocationId};
use crate::routing;
use crate::task::{Message, Task};
use crate::tools::{ToolContext, ToolHandle, ToolRegistry};

/// Lifecycle of an agent invocation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// How an invocation ended
#[derive(Clone, Debug, PartialEq)]
pub enum AgentOutcome {
    Completed { output: String },
    Failed { reason: FailureReason },
    Cancelled,
}

impl AgentOutcome {
    pub fn state(&self) -> AgentState {
        match self {
            Self::Completed { .. } => AgentState::Completed,
            Self::Failed { .. } => AgentState::Failed,
            Self::Cancelled => AgentState::Cancelled,
        }
    }

    fn to_event(&self) -> EventKind {
        match self {
            Self::Completed { output } => EventKind::AgentCompleted {
                output: output.clone(),
            },
            Self::Failed { reason } => EventKind::AgentFailed {
                reason: reason.clone(),
            },
            Self::Cancelled => EventKind::AgentFailed {
                reason: FailureReason::Cancelled,
            },
        }
    }
}

impl From<Result<String, FailureReason>> for AgentOutcome {
    fn from(result: Result<String, FailureReason>) -> Self {
        match result {
            Ok(output) => Self::Completed { output },
            Err(FailureReason::Cancelled) => Self::Cancelled,
            Err(reason) => Self::Failed { reason },
        }
    }
}

impl From<MaestroError> for FailureReason {
    fn from(error: MaestroError) -> Self {
        FailureReason::Internal {
            detail: error.to_string(),
        }
    }
}

/// How a coordinator dispatches a task to matching sub-agents
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// First matching sub-agent only
    First,
    /// Every matching sub-agent, concurrently
    All,
}

/// A sub-agent reachable from a coordinator.
pub struct Route {
    pub label: String,
    pub keywords: Vec<String>,
    pub agent: Arc<Agent>,
}

/// Delegation setup of a coordinator, fixed when the topology is built.
pub struct Coordinator {
    pub dispatch: Dispatch,
    pub routing: RoutingStrategy,
    pub fail_on_sub_agent_failure: bool,
    pub routes: Vec<Route>,
}

/// What an agent is able to do
pub enum AgentRole {
    Single,
    Coordinator(Coordinator),
}

/// A single agent of the topology
pub struct Agent {
    /// Display name, also the key backends use to tell agents apart
    pub name: String,
    /// Position in the topology
    pub path: AgentPath,
    role: AgentRole,
    backend: Arc<dyn ModelBackend>,
    registry: Arc<ToolRegistry>,
    tools: Vec<ToolHandle>,
    instructions: Option<String>,
    max_turns: u32,
    policy: ExecutionPolicy,
    /// Last state set by any invocation of this agent. Concurrent runs
    /// overwrite each other here; [`AgentHandle::state`] is per invocation.
    state: RwLock<AgentState>,
}

#[derive(Debug, Default)]
struct Reply {
    text: String,
    tool_calls: Vec<(String, Value)>,
}

enum TurnError {
    Cancelled,
    Backend { error: BackendError, streamed: bool },
    Emit(MaestroError),
}

fn ensure_active(ctx: &AgentContext) -> Result<(), FailureReason> {
    if ctx.is_cancelled() {
        Err(FailureReason::Cancelled)
    } else {
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("agent panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("agent panicked: {message}")
    } else {
        "agent panicked".to_string()
    }
}

impl Agent {
    pub fn role(&self) -> &AgentRole {
        &self.role
    }

    pub fn is_coordinator(&self) -> bool {
        matches!(self.role, AgentRole::Coordinator(_))
    }

    /// Sub-agents of a coordinator, empty for single agents
    pub fn routes(&self) -> &[Route] {
        match &self.role {
            AgentRole::Coordinator(coordinator) => &coordinator.routes,
            AgentRole::Single => &[],
        }
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name().to_string()).collect()
    }

    pub fn max_turns(&self) -> u32 {
        self.max_turns
    }

    /// Best-effort view across runs: the state most recently set by any
    /// invocation. Use [`AgentHandle::state`] to follow one invocation.
    pub fn state(&self) -> AgentState {
        *self.state.read()
    }

    /// Start an invocation of this agent.
    ///
    /// Returns as soon as the invocation is scheduled; its progress and
    /// result are observed through events and [`AgentHandle::join`].
    pub fn start(
        self: &Arc<Self>,
        task: Task,
        ctx: AgentContext,
    ) -> Result<AgentHandle, MaestroError> {
        task.validate()?;

        let state = Arc::new(RwLock::new(AgentState::Idle));
        let invocation = ctx.emitter.invocation();
        let cancel = ctx.cancel.clone();

        let agent = Arc::clone(self);
        let task_state = Arc::clone(&state);
        let join = tokio::spawn(async move { agent.execute(task, ctx, task_state).await });

        Ok(AgentHandle {
            agent: Arc::clone(self),
            invocation,
            state,
            cancel,
            join,
        })
    }

    /// Request cooperative cancellation of an invocation.
    pub fn cancel(&self, handle: &AgentHandle) {
        handle.cancel();
    }

    fn set_state(&self, invocation_state: &RwLock<AgentState>, state: AgentState) {
        *invocation_state.write() = state;
        *self.state.write() = state;
    }

    #[instrument(skip_all, fields(agent = %self.path, task_id = %task.id))]
    async fn execute(
        self: Arc<Self>,
        task: Task,
        ctx: AgentContext,
        state: Arc<RwLock<AgentState>>,
    ) -> AgentOutcome {
        let spawned = EventKind::AgentSpawned {
            name: self.name.clone(),
            invocation: ctx.emitter.invocation(),
        };
        if let Err(e) = ctx.emitter.emit(spawned).await {
            // never sequenced, so there is no terminal event to owe either
            warn!(error = %e, "Could not announce agent");
            let outcome = AgentOutcome::Failed { reason: e.into() };
            self.set_state(&state, outcome.state());
            return outcome;
        }
        self.set_state(&state, AgentState::Running);
        info!(name = %self.name, "Agent running");

        let result = AssertUnwindSafe(self.drive(&task, &ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                Err(FailureReason::Internal {
                    detail: panic_message(panic.as_ref()),
                })
            });

        let outcome = AgentOutcome::from(result);
        self.set_state(&state, outcome.state());
        match &outcome {
            AgentOutcome::Completed { .. } => info!("Agent completed"),
            AgentOutcome::Cancelled => info!("Agent cancelled"),
            AgentOutcome::Failed { reason } => warn!(reason = %reason, "Agent failed"),
        }

        if let Err(e) = ctx.emitter.emit(outcome.to_event()).await {
            warn!(error = %e, "Could not report terminal event");
        }
        outcome
    }

    async fn drive(&self, task: &Task, ctx: &AgentContext) -> Result<String, FailureReason> {
        let mut messages = task.messages();
        if let AgentRole::Coordinator(coordinator) = &self.role {
            let reports = self.delegate(coordinator, task, ctx).await?;
            messages.extend(reports);
        }
        self.reason(messages, ctx).await
    }

    /// Run the matching sub-agents and turn their results into messages.
    async fn delegate(
        &self,
        coordinator: &Coordinator,
        task: &Task,
        ctx: &AgentContext,
    ) -> Result<Vec<Message>, FailureReason> {
        ensure_active(ctx)?;
        let selected = self.select_routes(coordinator, task, ctx).await?;
        if selected.is_empty() {
            let labels = coordinator.routes.iter().map(|r| r.label.clone()).collect();
            return Err(FailureReason::NoRoute { labels });
        }
        ensure_active(ctx)?;

        let mut handles = Vec::with_capacity(selected.len());
        let mut start_error = None;
        for route in selected {
            debug!(label = %route.label, "Delegating");
            let started = ctx
                .child(&route.label)
                .and_then(|child_ctx| route.agent.start(task.delegated(), child_ctx));
            match started {
                Ok(handle) => handles.push((route.label.clone(), handle)),
                Err(e) => {
                    start_error = Some(e);
                    break;
                }
            }
        }
        if start_error.is_some() {
            for (_, handle) in &handles {
                handle.cancel();
            }
        }

        let outcomes = join_all(
            handles
                .into_iter()
                .map(|(label, handle)| async move { (label, handle.join().await) }),
        )
        .await;
        if let Some(e) = start_error {
            return Err(e.into());
        }

        let mut reports = Vec::with_capacity(outcomes.len());
        let mut first_failure = None;
        let mut any_cancelled = false;
        let mut any_completed = false;
        for (label, outcome) in outcomes {
            match outcome {
                AgentOutcome::Completed { output } => {
                    any_completed = true;
                    reports.push(Message::tool(format!("[{label}] {output}")));
                }
                AgentOutcome::Cancelled => any_cancelled = true,
                AgentOutcome::Failed { reason } => {
                    reports.push(Message::tool(format!("[{label}] failed: {reason}")));
                    first_failure.get_or_insert(FailureReason::SubAgentFailed {
                        label,
                        detail: reason.to_string(),
                    });
                }
            }
        }

        if any_cancelled || ctx.is_cancelled() {
            return Err(FailureReason::Cancelled);
        }
        if let Some(failure) = first_failure {
            if !any_completed || coordinator.fail_on_sub_agent_failure {
                return Err(failure);
            }
        }
        Ok(reports)
    }

    async fn select_routes<'c>(
        &self,
        coordinator: &'c Coordinator,
        task: &Task,
        ctx: &AgentContext,
    ) -> Result<Vec<&'c Route>, FailureReason> {
        let indices = match coordinator.routing {
            RoutingStrategy::Keyword => routing::keyword_matches(
                &task.request,
                coordinator
                    .routes
                    .iter()
                    .map(|r| (r.label.as_str(), r.keywords.as_slice())),
            ),
            RoutingStrategy::Model => {
                let labels: Vec<String> =
                    coordinator.routes.iter().map(|r| r.label.clone()).collect();
                let request = self.request(
                    task.messages(),
                    RequestPurpose::Route {
                        labels: labels.clone(),
                    },
                    0,
                );
                let reply = self.generate(request, ctx, false).await?;
                routing::match_label(&reply.text, labels.iter().map(String::as_str))
                    .into_iter()
                    .collect()
            }
        };

        let mut routes: Vec<&Route> = indices.into_iter().map(|i| &coordinator.routes[i]).collect();
        if coordinator.dispatch == Dispatch::First {
            routes.truncate(1);
        }
        debug!(
            selected = ?routes.iter().map(|r| r.label.as_str()).collect::<Vec<_>>(),
            "Routes selected"
        );
        Ok(routes)
    }

    fn request(
        &self,
        messages: Vec<Message>,
        purpose: RequestPurpose,
        turn: u32,
    ) -> GenerateRequest {
        GenerateRequest {
            agent_path: self.path.clone(),
            agent_name: self.name.clone(),
            instructions: self.instructions.clone(),
            messages,
            tools: self.tools.iter().map(ToolHandle::definition).collect(),
            purpose,
            turn,
            attempt: 0,
        }
    }

    /// Backend turns and tool calls until the backend stops calling tools.
    async fn reason(
        &self,
        mut messages: Vec<Message>,
        ctx: &AgentContext,
    ) -> Result<String, FailureReason> {
        for turn in 0..self.max_turns {
            ensure_active(ctx)?;
            let request = self.request(messages.clone(), RequestPurpose::Turn, turn);
            let reply = self.generate(request, ctx, true).await?;
            if reply.tool_calls.is_empty() {
                return Ok(reply.text);
            }

            if !reply.text.is_empty() {
                messages.push(Message::assistant(reply.text));
            }
            for (tool, arguments) in reply.tool_calls {
                // safe point: between two tool calls
                ensure_active(ctx)?;
                messages.push(Message::assistant(format!("call {tool}({arguments})")));
                let output = self.call_tool(&tool, arguments, ctx).await?;
                messages.push(Message::tool(format!("{tool}: {output}")));
            }
        }
        Err(FailureReason::MaxTurnsExceeded {
            max_turns: self.max_turns,
        })
    }

    /// One backend turn, retried with backoff while nothing has been streamed.
    async fn generate(
        &self,
        mut request: GenerateRequest,
        ctx: &AgentContext,
        stream_content: bool,
    ) -> Result<Reply, FailureReason> {
        loop {
            match self.generate_once(&request, ctx, stream_content).await {
                Ok(reply) => return Ok(reply),
                Err(TurnError::Cancelled) => return Err(FailureReason::Cancelled),
                Err(TurnError::Emit(e)) => return Err(e.into()),
                Err(TurnError::Backend { error, streamed }) => {
                    if streamed || request.attempt >= self.policy.backend_retry_limit {
                        warn!(
                            turn = request.turn,
                            attempt = request.attempt,
                            error = %error,
                            "Backend failed"
                        );
                        return Err(FailureReason::BackendFailure {
                            detail: error.to_string(),
                        });
                    }

                    let delay = self
                        .policy
                        .backend_backoff
                        .saturating_mul(1u32 << request.attempt.min(16));
                    warn!(
                        turn = request.turn,
                        attempt = request.attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Backend failed, retrying"
                    );
                    tokio::select! {
                        _ = ctx.cancel.cancelled() => return Err(FailureReason::Cancelled),
                        _ = sleep(delay) => {}
                    }
                    request.attempt += 1;
                }
            }
        }
    }

    async fn generate_once(
        &self,
        request: &GenerateRequest,
        ctx: &AgentContext,
        stream_content: bool,
    ) -> Result<Reply, TurnError> {
        let limit = self.policy.backend_timeout;
        let deadline = Instant::now() + limit;

        let opened = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(TurnError::Cancelled),
            opened = timeout_at(deadline, self.backend.generate(request)) => opened,
        };
        let mut stream = match opened {
            Ok(Ok(stream)) => stream,
            Ok(Err(error)) => return Err(TurnError::Backend { error, streamed: false }),
            Err(_) => {
                return Err(TurnError::Backend {
                    error: BackendError::Timeout(limit),
                    streamed: false,
                })
            }
        };

        let mut reply = Reply::default();
        let mut streamed = false;
        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(TurnError::Cancelled),
                next = timeout_at(deadline, stream.next()) => next,
            };
            match next {
                Err(_) => {
                    return Err(TurnError::Backend {
                        error: BackendError::Timeout(limit),
                        streamed,
                    })
                }
                Ok(None) => break,
                Ok(Some(Err(error))) => return Err(TurnError::Backend { error, streamed }),
                Ok(Some(Ok(BackendChunk::Text(text)))) => {
                    if text.is_empty() {
                        continue;
                    }
                    if stream_content {
                        ctx.emitter
                            .emit(EventKind::ContentChunk { text: text.clone() })
                            .await
                            .map_err(TurnError::Emit)?;
                        streamed = true;
                    }
                    reply.text.push_str(&text);
                }
                Ok(Some(Ok(BackendChunk::ToolCall { name, arguments }))) => {
                    reply.tool_calls.push((name, arguments));
                }
            }
        }

        // an empty routing answer names no label and is left to the router
        let routing = matches!(request.purpose, RequestPurpose::Route { .. });
        if reply.text.is_empty() && reply.tool_calls.is_empty() && !routing {
            return Err(TurnError::Backend {
                error: BackendError::Malformed("empty response".into()),
                streamed,
            });
        }
        Ok(reply)
    }

    /// Invoke a tool, retrying retryable failures up to the policy ceiling.
    ///
    /// Each attempt is reported as its own `ToolInvoked`/`ToolResult` pair.
    async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        ctx: &AgentContext,
    ) -> Result<Value, FailureReason> {
        let handle = self.tools.iter().find(|h| h.name() == tool);
        let mut attempt = 0;
        loop {
            let call_id = CallId::new();
            ctx.emitter
                .emit(EventKind::ToolInvoked {
                    call_id,
                    tool: tool.to_string(),
                    arguments: arguments.clone(),
                    attempt,
                })
                .await?;

            let result = match handle {
                Some(handle) => {
                    let tool_ctx = ToolContext {
                        task_id: ctx.task_id,
                        agent_path: self.path.clone(),
                        call_id,
                        cancel: ctx.cancel.clone(),
                    };
                    let limit = self.policy.tool_timeout;
                    let call = self.registry.invoke(handle, arguments.clone(), &tool_ctx);
                    match timeout(limit, call).await {
                        Ok(result) => result,
                        Err(_) => Err(ToolError::Timeout(limit)),
                    }
                }
                None => Err(ToolError::UnknownTool(tool.to_string())),
            };

            match result {
                Ok(output) => {
                    ctx.emitter
                        .emit(EventKind::ToolResult {
                            call_id,
                            tool: tool.to_string(),
                            outcome: ToolOutcome::Success {
                                output: output.clone(),
                            },
                        })
                        .await?;
                    return Ok(output);
                }
                Err(error) => {
                    ctx.emitter
                        .emit(EventKind::ToolResult {
                            call_id,
                            tool: tool.to_string(),
                            outcome: ToolOutcome::Failure {
                                error: error.to_string(),
                            },
                        })
                        .await?;

                    ensure_active(ctx)?;
                    if !error.is_retryable() || attempt >= self.policy.tool_retry_limit {
                        warn!(tool, attempt, error = %error, "Tool failed");
                        return Err(FailureReason::ToolFailure {
                            tool: tool.to_string(),
                            detail: error.to_string(),
                        });
                    }
                    debug!(tool, attempt, error = %error, "Tool failed, retrying");
                    attempt += 1;
                }
            }
        }
    }
}

/// Explicit construction of an [`Agent`] from typed parameters.
pub struct AgentBuilder {
    name: String,
    path: AgentPath,
    backend: Arc<dyn ModelBackend>,
    registry: Arc<ToolRegistry>,
    tools: Vec<ToolHandle>,
    instructions: Option<String>,
    max_turns: Option<u32>,
    policy: ExecutionPolicy,
    role: AgentRole,
}

impl AgentBuilder {
    pub fn new(
        name: impl Into<String>,
        path: AgentPath,
        backend: Arc<dyn ModelBackend>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            name: name.into(),
            path,
            backend,
            registry,
            tools: Vec::new(),
            instructions: None,
            max_turns: None,
            policy: ExecutionPolicy::default(),
            role: AgentRole::Single,
        }
    }

    pub fn instructions(mut self, instructions: Option<String>) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn tool(mut self, handle: ToolHandle) -> Self {
        self.tools.push(handle);
        self
    }

    /// Overrides the policy's turn limit
    pub fn max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn coordinator(mut self, coordinator: Coordinator) -> Self {
        self.role = AgentRole::Coordinator(coordinator);
        self
    }

    pub fn build(self) -> Arc<Agent> {
        debug!(agent = %self.path, name = %self.name, "Building agent");
        Arc::new(Agent {
            max_turns: self.max_turns.unwrap_or(self.policy.max_turns),
            name: self.name,
            path: self.path,
            role: self.role,
            backend: self.backend,
            registry: self.registry,
            tools: self.tools,
            instructions: self.instructions,
            policy: self.policy,
            state: RwLock::new(AgentState::Idle),
        })
    }
}

/// Handle to a running agent invocation
pub struct AgentHandle {
    agent: Arc<Agent>,
    invocation: InvocationId,
    state: Arc<RwLock<AgentState>>,
    cancel: CancellationToken,
    join: JoinHandle<AgentOutcome>,
}

impl AgentHandle {
    pub fn id(&self) -> InvocationId {
        self.invocation
    }

    pub fn state(&self) -> AgentState {
        *self.state.read()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the invocation to end. Its terminal event has been sequenced
    /// by the time this returns.
    pub async fn join(self) -> AgentOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => AgentOutcome::Failed {
                reason: FailureReason::Internal {
                    detail: format!("agent task aborted: {e}"),
                },
            },
        }
    }
}

impl std::ops::Deref for AgentHandle {
    type Target = Agent;

    fn deref(&self) -> &Self::Target {
        &self.agent
    }
}
