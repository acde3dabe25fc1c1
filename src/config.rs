//! Resolved topology configuration
//!
//! These types describe a topology in its resolved form: a root agent, its
//! sub-agents and the execution policy. Hosts usually build them in code or
//! deserialize them from JSON through [`ConfigLoader`]. Unknown fields are
//! rejected instead of silently ignored.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// How the root agent relates to its sub-agents.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    /// One agent, no delegation
    #[default]
    Simple,
    /// Coordinators route a task to the first matching sub-agent
    Orchestra,
    /// Coordinators fan a task out to every matching sub-agent concurrently
    Workforce,
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Simple => "simple",
            Self::Orchestra => "orchestra",
            Self::Workforce => "workforce",
        };
        f.write_str(name)
    }
}

/// How a coordinator picks sub-agents for a task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategy {
    /// Match routing labels and keywords against the task text
    #[default]
    Keyword,
    /// Ask the coordinator's backend to name the label
    Model,
}

/// Top-level resolved configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TopologyConfig {
    #[serde(default)]
    pub mode: AgentMode,
    pub root: AgentConfig,
    #[serde(default)]
    pub policy: ExecutionPolicy,
}

impl TopologyConfig {
    pub fn simple(root: AgentConfig) -> Self {
        Self {
            mode: AgentMode::Simple,
            root,
            policy: ExecutionPolicy::default(),
        }
    }

    pub fn orchestra(root: AgentConfig) -> Self {
        Self {
            mode: AgentMode::Orchestra,
            ..Self::simple(root)
        }
    }

    pub fn workforce(root: AgentConfig) -> Self {
        Self {
            mode: AgentMode::Workforce,
            ..Self::simple(root)
        }
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Declarative description of one agent.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfig {
    pub name: String,
    /// Name of the model backend in the backend registry
    pub backend: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    /// Toolkit names, expanded through the tool registry
    #[serde(default)]
    pub toolkits: Vec<String>,
    /// Overrides [`ExecutionPolicy::max_turns`]
    #[serde(default)]
    pub max_turns: Option<u32>,
    #[serde(default)]
    pub routing: RoutingStrategy,
    /// Treat any failed delegation as fatal for this coordinator
    #[serde(default)]
    pub fail_on_sub_agent_failure: bool,
    #[serde(default)]
    pub sub_agents: Vec<SubAgentConfig>,
}

impl AgentConfig {
    pub fn new(name: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            backend: backend.into(),
            instructions: None,
            tools: Vec::new(),
            toolkits: Vec::new(),
            max_turns: None,
            routing: RoutingStrategy::default(),
            fail_on_sub_agent_failure: false,
            sub_agents: Vec::new(),
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tools.push(tool.into());
        self
    }

    pub fn with_toolkit(mut self, toolkit: impl Into<String>) -> Self {
        self.toolkits.push(toolkit.into());
        self
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn with_routing(mut self, routing: RoutingStrategy) -> Self {
        self.routing = routing;
        self
    }

    pub fn fail_on_sub_agent_failure(mut self) -> Self {
        self.fail_on_sub_agent_failure = true;
        self
    }

    pub fn with_sub_agent(mut self, sub_agent: SubAgentConfig) -> Self {
        self.sub_agents.push(sub_agent);
        self
    }
}

/// A sub-agent together with the routing label its parent uses.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubAgentConfig {
    pub label: String,
    /// Extra words that route to this sub-agent besides the label itself
    #[serde(default)]
    pub keywords: Vec<String>,
    pub agent: AgentConfig,
}

impl SubAgentConfig {
    pub fn new(label: impl Into<String>, agent: AgentConfig) -> Self {
        Self {
            label: label.into(),
            keywords: Vec::new(),
            agent,
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }
}

/// Retry, timeout and buffering knobs shared by every agent of a topology.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionPolicy {
    pub max_turns: u32,
    /// Extra attempts for a failing tool call
    pub tool_retry_limit: u32,
    /// Extra attempts for a failing backend turn
    pub backend_retry_limit: u32,
    /// First backoff before a backend retry; doubles per attempt
    #[serde(rename = "backend_backoff_ms", with = "duration_ms")]
    pub backend_backoff: Duration,
    #[serde(rename = "tool_timeout_ms", with = "duration_ms")]
    pub tool_timeout: Duration,
    #[serde(rename = "backend_timeout_ms", with = "duration_ms")]
    pub backend_timeout: Duration,
    /// Capacity of every per-agent channel and of the output stream
    pub channel_capacity: usize,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            max_turns: 20,
            tool_retry_limit: 1,
            backend_retry_limit: 1,
            backend_backoff: Duration::from_millis(500),
            tool_timeout: Duration::from_secs(60),
            backend_timeout: Duration::from_secs(120),
            channel_capacity: 64,
        }
    }
}

/// Loads a [`TopologyConfig`] from JSON.
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn from_json_str(json: &str) -> Result<TopologyConfig, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<TopologyConfig, ConfigError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading topology configuration");
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }
}

/// Serde helper for Duration as milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}
