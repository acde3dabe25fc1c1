//! Session management - a conversation over one topology

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, instrument};

use crate::backend::BackendRegistry;
use crate::config::TopologyConfig;
use crate::error::{ConfigError, MaestroError};
use crate::ids::SessionId;
use crate::orchestrator::{Orchestrator, RunHandle};
use crate::record::TaskRecord;
use crate::resolver::TopologyResolver;
use crate::task::{Message, Task};
use crate::tools::ToolRegistry;
use crate::topology::Topology;

/// A conversation with a topology
///
/// Keeps the history of completed turns and hands it to every new task.
pub struct Session {
    /// Session ID
    pub id: SessionId,
    resolver: TopologyResolver,
    orchestrator: RwLock<Orchestrator>,
    /// Completed user/assistant turns
    history: RwLock<Vec<Message>>,
}

impl Session {
    /// Create a session, resolving `config` against the given registries
    pub fn new(
        config: &TopologyConfig,
        tools: Arc<ToolRegistry>,
        backends: Arc<BackendRegistry>,
    ) -> Result<Self, ConfigError> {
        let resolver = TopologyResolver::new(tools, backends);
        let topology = resolver.resolve(config)?;
        let id = SessionId::new();

        info!(session_id = %id, mode = %config.mode, "Creating new session");

        Ok(Self {
            id,
            resolver,
            orchestrator: RwLock::new(Orchestrator::new(topology)),
            history: RwLock::new(Vec::new()),
        })
    }

    /// Start a task carrying the conversation so far
    pub fn start(&self, request: impl Into<String>) -> Result<RunHandle, MaestroError> {
        let task = Task::new(request).with_history(self.history());
        self.orchestrator().run(task)
    }

    /// Run one turn to completion and extend the history when it succeeds
    #[instrument(skip(self, request), fields(session_id = %self.id))]
    pub async fn chat(&self, request: impl Into<String>) -> Result<TaskRecord, MaestroError> {
        let request = request.into();
        let record = self.start(request.clone())?.into_record().await;

        match record.final_output() {
            Some(output) => {
                let mut history = self.history.write();
                history.push(Message::user(request));
                history.push(Message::assistant(output));
                debug!(turns = history.len() / 2, "Turn recorded");
            }
            None => debug!(outcome = ?record.outcome, "Turn not recorded"),
        }
        Ok(record)
    }

    /// Cancel every run of this session
    pub fn cancel(&self) {
        self.orchestrator.read().cancel_all();
    }

    /// Swap in a new topology.
    ///
    /// Runs of the old topology are cancelled and the history is cleared. On
    /// error the session keeps its current topology.
    pub fn reconfigure(&self, config: &TopologyConfig) -> Result<(), ConfigError> {
        let topology = self.resolver.resolve(config)?;
        let previous =
            std::mem::replace(&mut *self.orchestrator.write(), Orchestrator::new(topology));
        previous.cancel_all();
        self.clear_history();

        info!(session_id = %self.id, mode = %config.mode, "Session reconfigured");
        Ok(())
    }

    pub fn clear_history(&self) {
        self.history.write().clear();
    }

    pub fn history(&self) -> Vec<Message> {
        self.history.read().clone()
    }

    pub fn orchestrator(&self) -> Orchestrator {
        self.orchestrator.read().clone()
    }

    pub fn topology(&self) -> Arc<Topology> {
        Arc::clone(self.orchestrator.read().topology())
    }
}

/// Handle to a session for external interaction
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Session>,
}

impl SessionHandle {
    pub fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(session),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }
}

impl std::ops::Deref for SessionHandle {
    type Target = Session;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
