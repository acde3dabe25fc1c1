//! # Maestro
//!
//! Hierarchical agent orchestration with a strictly ordered event stream.
//!
//! A topology of agents is resolved from a declarative configuration. Each
//! task submitted to it runs as a tree of concurrent agent invocations whose
//! events are merged into one totally ordered stream.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                             ORCHESTRATOR                             │
//! │  ┌──────────────┐   ┌──────────────────────┐   ┌──────────────────┐  │
//! │  │  Resolver    │   │ Collector (per run)  │──▶│ RunHandle stream │  │
//! │  │  config→tree │   │ sequence + ack       │   └──────────────────┘  │
//! │  └──────────────┘   └──────────▲───────────┘                         │
//! └────────────────────────────────┼─────────────────────────────────────┘
//!                                  │ one bounded channel per invocation
//!          ┌───────────────────────┼───────────────────────┐
//!          │                       │                       │
//!   ┌──────┴──────┐         ┌──────┴──────┐         ┌──────┴──────┐
//!   │ Coordinator │────────▶│  Sub-agent  │         │  Sub-agent  │
//!   │   (root)    │────────────────────────────────▶│             │
//!   └──────┬──────┘         └──────┬──────┘         └──────┬──────┘
//!          │                       │                       │
//!          ▼                       ▼                       ▼
//!   ModelBackend            ToolRegistry             ModelBackend
//! ```
//!
//! ## Key Concepts
//!
//! - **Agent**: one reasoning unit with its own backend, tools and turn limit
//! - **Topology**: the tree of agents; coordinators route to sub-agents by label
//! - **Orchestrator**: runs tasks and sequences their events
//! - **Session**: a conversation carrying history across tasks

pub mod agent;
pub mod backend;
pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod ids;
pub mod logging;
pub mod orchestrator;
pub mod record;
pub mod resolver;
pub mod routing;
pub mod scripted;
pub mod session;
pub mod task;
pub mod tools;
pub mod topology;

pub use agent::{Agent, AgentBuilder, AgentHandle, AgentOutcome, AgentState};
pub use backend::{
    BackendChunk, BackendRegistry, ChunkStream, GenerateRequest, ModelBackend, RequestPurpose,
};
pub use channel::EventEmitter;
pub use config::{
    AgentConfig, AgentMode, ConfigLoader, ExecutionPolicy, RoutingStrategy, SubAgentConfig,
    TopologyConfig,
};
pub use context::{AgentContext, ExecutionContext};
pub use error::{BackendError, ConfigError, ConfigViolation, MaestroError, ToolError};
pub use event::{AgentPath, Event, EventKind, EventTag, FailureReason, ToolOutcome};
pub use ids::{CallId, InvocationId, SessionId, TaskId};
pub use logging::{init_logging, LoggingConfig};
pub use orchestrator::{Orchestrator, RunHandle};
pub use record::{RunOutcome, TaskRecord};
pub use resolver::TopologyResolver;
pub use scripted::{ScriptStep, ScriptedBackend};
pub use session::{Session, SessionHandle};
pub use task::{Message, Role, Task};
pub use tools::{EchoTool, FnTool, Tool, ToolContext, ToolDefinition, ToolHandle, ToolRegistry};
pub use topology::{Topology, TopologyTree};
