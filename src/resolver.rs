//! Topology resolution
//!
//! Turns a declarative [`TopologyConfig`] into a runnable [`Topology`]. The
//! whole configuration is checked before any agent is built, and every
//! problem found is reported at once.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::agent::{Agent, AgentBuilder, Coordinator, Dispatch, Route};
use crate::backend::BackendRegistry;
use crate::config::{AgentConfig, AgentMode, ExecutionPolicy, TopologyConfig};
use crate::error::{ConfigError, ConfigViolation};
use crate::event::AgentPath;
use crate::tools::ToolRegistry;
use crate::topology::Topology;

/// Builds topologies against a fixed set of tools and backends.
#[derive(Clone)]
pub struct TopologyResolver {
    tools: Arc<ToolRegistry>,
    backends: Arc<BackendRegistry>,
}

impl TopologyResolver {
    pub fn new(tools: Arc<ToolRegistry>, backends: Arc<BackendRegistry>) -> Self {
        Self { tools, backends }
    }

    /// Validate `config` and build its topology.
    #[instrument(skip_all, fields(mode = %config.mode, root = %config.root.name))]
    pub fn resolve(&self, config: &TopologyConfig) -> Result<Topology, ConfigError> {
        let violations = self.validate(config);
        if !violations.is_empty() {
            warn!(count = violations.len(), "Topology rejected");
            return Err(ConfigError::Invalid(violations));
        }

        let dispatch = match config.mode {
            AgentMode::Workforce => Dispatch::All,
            AgentMode::Simple | AgentMode::Orchestra => Dispatch::First,
        };
        let root = self.build(&config.root, AgentPath::root(), dispatch, &config.policy)?;
        let topology = Topology::new(config.mode, config.policy.clone(), root);

        info!(agents = topology.len(), "Topology resolved");
        Ok(topology)
    }

    /// Every problem with `config`, empty when it is valid.
    pub fn validate(&self, config: &TopologyConfig) -> Vec<ConfigViolation> {
        let mut violations = Vec::new();
        check_policy(&config.policy, &mut violations);

        match config.mode {
            AgentMode::Simple => {
                if !config.root.sub_agents.is_empty() {
                    violations.push(ConfigViolation::SubAgentsInSimpleMode);
                }
            }
            AgentMode::Orchestra | AgentMode::Workforce => {
                if config.root.sub_agents.is_empty() {
                    violations.push(ConfigViolation::MissingSubAgents {
                        mode: config.mode.to_string(),
                    });
                }
            }
        }

        let mut labels = HashSet::new();
        self.check_agent(&config.root, &AgentPath::root(), &mut labels, &mut violations);
        violations
    }

    /// Check one agent and its subtree. `labels` spans the whole topology.
    fn check_agent(
        &self,
        agent: &AgentConfig,
        path: &AgentPath,
        labels: &mut HashSet<String>,
        violations: &mut Vec<ConfigViolation>,
    ) {
        if !self.backends.contains(&agent.backend) {
            violations.push(ConfigViolation::UnknownBackend {
                agent: path.clone(),
                backend: agent.backend.clone(),
            });
        }

        for tool in &agent.tools {
            if !self.tools.contains(tool) {
                violations.push(ConfigViolation::UnknownTool {
                    agent: path.clone(),
                    tool: tool.clone(),
                });
            }
        }

        for toolkit in &agent.toolkits {
            match self.tools.toolkit(toolkit) {
                Some(members) => {
                    for tool in members.iter().filter(|t| !self.tools.contains(t)) {
                        violations.push(ConfigViolation::UnknownTool {
                            agent: path.clone(),
                            tool: tool.clone(),
                        });
                    }
                }
                None => violations.push(ConfigViolation::UnknownToolkit {
                    agent: path.clone(),
                    toolkit: toolkit.clone(),
                }),
            }
        }

        if agent.max_turns == Some(0) {
            violations.push(ConfigViolation::ZeroMaxTurns { agent: path.clone() });
        }

        // labels compare case-insensitively, like routing does
        for (index, sub) in agent.sub_agents.iter().enumerate() {
            let label = sub.label.trim();
            let segment = if label.is_empty() {
                violations.push(ConfigViolation::EmptyLabel {
                    coordinator: path.clone(),
                });
                format!("#{index}")
            } else {
                if !labels.insert(label.to_lowercase()) {
                    violations.push(ConfigViolation::DuplicateLabel {
                        coordinator: path.clone(),
                        label: sub.label.clone(),
                    });
                }
                label.to_string()
            };
            self.check_agent(&sub.agent, &path.child(segment), labels, violations);
        }
    }

    fn build(
        &self,
        config: &AgentConfig,
        path: AgentPath,
        dispatch: Dispatch,
        policy: &ExecutionPolicy,
    ) -> Result<Arc<Agent>, ConfigError> {
        let backend = self.backends.resolve(&config.backend).map_err(|_| {
            ConfigError::Invalid(vec![ConfigViolation::UnknownBackend {
                agent: path.clone(),
                backend: config.backend.clone(),
            }])
        })?;

        let mut builder = AgentBuilder::new(
            config.name.clone(),
            path.clone(),
            backend,
            Arc::clone(&self.tools),
        )
        .instructions(config.instructions.clone())
        .policy(policy.clone());
        if let Some(max_turns) = config.max_turns {
            builder = builder.max_turns(max_turns);
        }

        let mut seen = HashSet::new();
        let toolkit_members = config
            .toolkits
            .iter()
            .flat_map(|k| self.tools.toolkit(k).into_iter().flatten());
        for name in config.tools.iter().chain(toolkit_members) {
            if !seen.insert(name.as_str()) {
                continue;
            }
            let handle = self.tools.resolve(name).map_err(|_| {
                ConfigError::Invalid(vec![ConfigViolation::UnknownTool {
                    agent: path.clone(),
                    tool: name.clone(),
                }])
            })?;
            builder = builder.tool(handle);
        }

        if !config.sub_agents.is_empty() {
            let routes = config
                .sub_agents
                .iter()
                .map(|sub| {
                    let label = sub.label.trim().to_string();
                    let agent = self.build(&sub.agent, path.child(&label), dispatch, policy)?;
                    Ok(Route {
                        label,
                        keywords: sub.keywords.clone(),
                        agent,
                    })
                })
                .collect::<Result<Vec<_>, ConfigError>>()?;
            debug!(agent = %path, routes = routes.len(), "Coordinator built");
            builder = builder.coordinator(Coordinator {
                dispatch,
                routing: config.routing,
                fail_on_sub_agent_failure: config.fail_on_sub_agent_failure,
                routes,
            });
        }

        Ok(builder.build())
    }
}

fn check_policy(policy: &ExecutionPolicy, violations: &mut Vec<ConfigViolation>) {
    if policy.max_turns == 0 {
        violations.push(ConfigViolation::InvalidPolicy(
            "max_turns must be at least 1".into(),
        ));
    }
    if policy.channel_capacity == 0 {
        violations.push(ConfigViolation::InvalidPolicy(
            "channel_capacity must be at least 1".into(),
        ));
    }
    if policy.tool_timeout.is_zero() {
        violations.push(ConfigViolation::InvalidPolicy(
            "tool_timeout_ms must be positive".into(),
        ));
    }
    if policy.backend_timeout.is_zero() {
        violations.push(ConfigViolation::InvalidPolicy(
            "backend_timeout_ms must be positive".into(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRole;
    use crate::config::SubAgentConfig;
    use crate::scripted::ScriptedBackend;
    use crate::tools::EchoTool;

    fn resolver() -> TopologyResolver {
        let mut tools = ToolRegistry::new();
        tools.register(EchoTool);
        tools.register_toolkit("basics", ["echo"]);
        tools.register_toolkit("ghosts", ["phantom"]);

        let mut backends = BackendRegistry::new();
        backends.register("default", Arc::new(ScriptedBackend::new()));

        TopologyResolver::new(Arc::new(tools), Arc::new(backends))
    }

    fn agent(name: &str) -> AgentConfig {
        AgentConfig::new(name, "default")
    }

    fn violations(config: &TopologyConfig) -> Vec<ConfigViolation> {
        match resolver().resolve(config) {
            Err(ConfigError::Invalid(violations)) => violations,
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("expected the topology to be rejected"),
        }
    }

    #[test]
    fn test_resolve_simple() {
        let config = TopologyConfig::simple(agent("assistant").with_tool("echo"));
        let topology = resolver().resolve(&config).unwrap();

        assert_eq!(topology.len(), 1);
        assert_eq!(topology.root().tool_names(), vec!["echo"]);
        assert_eq!(topology.root().max_turns(), 20);
        assert!(!topology.root().is_coordinator());
    }

    #[test]
    fn test_duplicate_labels_rejected() {
        let config = TopologyConfig::orchestra(
            agent("concierge")
                .with_sub_agent(SubAgentConfig::new("billing", agent("a")))
                .with_sub_agent(SubAgentConfig::new("Billing", agent("b"))),
        );
        assert_eq!(
            violations(&config),
            vec![ConfigViolation::DuplicateLabel {
                coordinator: AgentPath::root(),
                label: "Billing".into(),
            }]
        );
    }

    #[test]
    fn test_labels_unique_across_coordinators() {
        let config = TopologyConfig::orchestra(
            agent("concierge")
                .with_sub_agent(SubAgentConfig::new("billing", agent("billing")))
                .with_sub_agent(SubAgentConfig::new(
                    "support",
                    agent("support-lead")
                        .with_sub_agent(SubAgentConfig::new("BILLING", agent("refunds"))),
                )),
        );
        assert_eq!(
            violations(&config),
            vec![ConfigViolation::DuplicateLabel {
                coordinator: AgentPath::root().child("support"),
                label: "BILLING".into(),
            }]
        );
    }

    #[test]
    fn test_mislabelled_subtrees_still_checked() {
        let config = TopologyConfig::orchestra(
            agent("concierge")
                .with_sub_agent(SubAgentConfig::new("billing", agent("a")))
                .with_sub_agent(SubAgentConfig::new(
                    "billing",
                    AgentConfig::new("b", "gpt-9").with_tool("shell"),
                ))
                .with_sub_agent(SubAgentConfig::new(
                    "",
                    AgentConfig::new("c", "nope").with_tool("rm"),
                )),
        );
        let found = violations(&config);
        let blank = AgentPath::root().child("#2");

        assert_eq!(found.len(), 6);
        assert!(found.contains(&ConfigViolation::DuplicateLabel {
            coordinator: AgentPath::root(),
            label: "billing".into(),
        }));
        assert!(found.contains(&ConfigViolation::UnknownBackend {
            agent: AgentPath::root().child("billing"),
            backend: "gpt-9".into(),
        }));
        assert!(found.contains(&ConfigViolation::UnknownTool {
            agent: AgentPath::root().child("billing"),
            tool: "shell".into(),
        }));
        assert!(found.contains(&ConfigViolation::EmptyLabel {
            coordinator: AgentPath::root(),
        }));
        assert!(found.contains(&ConfigViolation::UnknownBackend {
            agent: blank.clone(),
            backend: "nope".into(),
        }));
        assert!(found.contains(&ConfigViolation::UnknownTool {
            agent: blank,
            tool: "rm".into(),
        }));
    }

    #[test]
    fn test_all_violations_reported() {
        let config = TopologyConfig::orchestra(
            agent("concierge")
                .with_tool("shell")
                .with_sub_agent(SubAgentConfig::new(
                    "billing",
                    AgentConfig::new("billing", "gpt-9").with_max_turns(0),
                ))
                .with_sub_agent(SubAgentConfig::new(" ", agent("blank"))),
        );
        let found = violations(&config);
        let billing = AgentPath::root().child("billing");

        assert_eq!(found.len(), 4);
        assert!(found.contains(&ConfigViolation::UnknownTool {
            agent: AgentPath::root(),
            tool: "shell".into(),
        }));
        assert!(found.contains(&ConfigViolation::UnknownBackend {
            agent: billing.clone(),
            backend: "gpt-9".into(),
        }));
        assert!(found.contains(&ConfigViolation::ZeroMaxTurns { agent: billing }));
        assert!(found.contains(&ConfigViolation::EmptyLabel {
            coordinator: AgentPath::root(),
        }));
    }

    #[test]
    fn test_mode_shape_checked() {
        let simple = TopologyConfig::simple(
            agent("assistant").with_sub_agent(SubAgentConfig::new("x", agent("x"))),
        );
        assert_eq!(violations(&simple), vec![ConfigViolation::SubAgentsInSimpleMode]);

        let workforce = TopologyConfig::workforce(agent("lead"));
        assert_eq!(
            violations(&workforce),
            vec![ConfigViolation::MissingSubAgents {
                mode: "workforce".into()
            }]
        );
    }

    #[test]
    fn test_toolkits_expand() {
        let config =
            TopologyConfig::simple(agent("assistant").with_tool("echo").with_toolkit("basics"));
        let topology = resolver().resolve(&config).unwrap();
        // listed directly and through the toolkit, kept once
        assert_eq!(topology.root().tool_names(), vec!["echo"]);

        let missing = TopologyConfig::simple(agent("assistant").with_toolkit("power"));
        assert!(matches!(
            violations(&missing)[0],
            ConfigViolation::UnknownToolkit { .. }
        ));

        let dangling = TopologyConfig::simple(agent("assistant").with_toolkit("ghosts"));
        assert!(matches!(
            violations(&dangling)[0],
            ConfigViolation::UnknownTool { ref tool, .. } if tool == "phantom"
        ));
    }

    #[test]
    fn test_invalid_policy() {
        let policy = ExecutionPolicy {
            max_turns: 0,
            channel_capacity: 0,
            ..Default::default()
        };
        let config = TopologyConfig::simple(agent("assistant")).with_policy(policy);
        let found = violations(&config);
        assert_eq!(found.len(), 2);
        assert!(found
            .iter()
            .all(|v| matches!(v, ConfigViolation::InvalidPolicy(_))));
    }

    #[test]
    fn test_workforce_dispatches_to_all() {
        let config = TopologyConfig::workforce(
            agent("lead")
                .with_sub_agent(SubAgentConfig::new("research", agent("researcher")))
                .with_sub_agent(
                    SubAgentConfig::new("writing", agent("writer")).with_keywords(["draft"]),
                ),
        );
        let topology = resolver().resolve(&config).unwrap();

        assert_eq!(topology.len(), 3);
        match topology.root().role() {
            AgentRole::Coordinator(coordinator) => {
                assert_eq!(coordinator.dispatch, Dispatch::All);
                assert_eq!(coordinator.routes[1].keywords, vec!["draft"]);
                assert_eq!(
                    coordinator.routes[1].agent.path,
                    AgentPath::root().child("writing")
                );
            }
            AgentRole::Single => panic!("expected a coordinator"),
        }
    }

    #[test]
    fn test_nested_coordinators() {
        let config = TopologyConfig::orchestra(agent("concierge").with_sub_agent(
            SubAgentConfig::new(
                "support",
                agent("support-lead").with_sub_agent(SubAgentConfig::new("hardware", agent("hw"))),
            ),
        ));
        let topology = resolver().resolve(&config).unwrap();

        let hardware = AgentPath::from_labels(["support", "hardware"]);
        assert_eq!(topology.get(&hardware).map(|a| a.name.as_str()), Some("hw"));
        assert_eq!(topology.depth(&hardware), Some(2));
    }
}
