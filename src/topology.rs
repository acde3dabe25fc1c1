//! Resolved agent topology

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::agent::Agent;
use crate::config::{AgentMode, ExecutionPolicy};
use crate::event::AgentPath;

/// Node in the topology
struct TopologyNode {
    agent: Arc<Agent>,
    parent: Option<AgentPath>,
    children: Vec<AgentPath>,
}

/// The tree of agents built from a [`TopologyConfig`](crate::config::TopologyConfig).
///
/// Immutable after resolution and shared by every run of an orchestrator.
pub struct Topology {
    mode: AgentMode,
    policy: ExecutionPolicy,
    root: Arc<Agent>,
    /// All nodes by path
    nodes: HashMap<AgentPath, TopologyNode>,
}

impl Topology {
    /// Index the tree rooted at `root`.
    pub fn new(mode: AgentMode, policy: ExecutionPolicy, root: Arc<Agent>) -> Self {
        let mut nodes = HashMap::new();
        index(&mut nodes, Arc::clone(&root), None);
        Self {
            mode,
            policy,
            root,
            nodes,
        }
    }

    pub fn mode(&self) -> AgentMode {
        self.mode
    }

    pub fn policy(&self) -> &ExecutionPolicy {
        &self.policy
    }

    pub fn root(&self) -> &Arc<Agent> {
        &self.root
    }

    /// Get an agent by path
    pub fn get(&self, path: &AgentPath) -> Option<&Arc<Agent>> {
        self.nodes.get(path).map(|n| &n.agent)
    }

    pub fn parent(&self, path: &AgentPath) -> Option<&AgentPath> {
        self.nodes.get(path).and_then(|n| n.parent.as_ref())
    }

    /// Children of an agent, in routing order
    pub fn children(&self, path: &AgentPath) -> Vec<AgentPath> {
        self.nodes
            .get(path)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    /// Depth of an agent, `None` if it is not part of the topology
    pub fn depth(&self, path: &AgentPath) -> Option<usize> {
        self.nodes.get(path).map(|_| path.depth())
    }

    /// Paths of all agents at `depth`, sorted
    pub fn agents_at_depth(&self, depth: usize) -> Vec<AgentPath> {
        let mut paths: Vec<AgentPath> = self
            .nodes
            .keys()
            .filter(|p| p.depth() == depth)
            .cloned()
            .collect();
        paths.sort();
        paths
    }

    /// All paths, sorted
    pub fn paths(&self) -> Vec<AgentPath> {
        let mut paths: Vec<AgentPath> = self.nodes.keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// A topology always has its root
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Serializable snapshot of the tree
    pub fn to_tree(&self) -> TopologyTree {
        self.build_tree_node(&self.root)
    }

    fn build_tree_node(&self, agent: &Arc<Agent>) -> TopologyTree {
        let children = self
            .children(&agent.path)
            .iter()
            .filter_map(|path| self.get(path))
            .map(|child| self.build_tree_node(child))
            .collect();

        TopologyTree {
            path: agent.path.clone(),
            name: agent.name.clone(),
            tools: agent.tool_names(),
            max_turns: agent.max_turns(),
            children,
        }
    }
}

fn index(
    nodes: &mut HashMap<AgentPath, TopologyNode>,
    agent: Arc<Agent>,
    parent: Option<AgentPath>,
) {
    let path = agent.path.clone();
    let children: Vec<AgentPath> = agent.routes().iter().map(|r| r.agent.path.clone()).collect();
    for route in agent.routes() {
        index(nodes, Arc::clone(&route.agent), Some(path.clone()));
    }
    nodes.insert(
        path,
        TopologyNode {
            agent,
            parent,
            children,
        },
    );
}

/// Snapshot of a topology node and its descendants
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TopologyTree {
    pub path: AgentPath,
    pub name: String,
    pub tools: Vec<String>,
    pub max_turns: u32,
    pub children: Vec<TopologyTree>,
}

impl TopologyTree {
    /// Number of agents in this subtree
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(TopologyTree::count).sum::<usize>()
    }
}
