//! Main orchestrator - runs tasks against a topology
//!
//! Each run gets a collector task that owns the run's [`ExecutionContext`].
//! It reads every agent channel through one `SelectAll`, assigns sequence
//! numbers, forwards events to the caller's stream and acknowledges the
//! emitter. Cancellation requests travel on the same control channel as
//! channel registrations so they are serialized with everything else.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::SelectAll;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::backend::BackendRegistry;
use crate::channel::{ChannelBuilder, ChannelPair, Control, ControlSender, Emission};
use crate::config::TopologyConfig;
use crate::context::{AgentContext, ExecutionContext};
use crate::error::{ConfigError, MaestroError};
use crate::event::Event;
use crate::ids::TaskId;
use crate::record::TaskRecord;
use crate::resolver::TopologyResolver;
use crate::task::Task;
use crate::tools::ToolRegistry;
use crate::topology::Topology;

type RunMap = Arc<Mutex<HashMap<TaskId, ControlSender>>>;

/// Runs tasks against one resolved topology.
///
/// Cheap to clone; clones share the topology and the set of live runs.
#[derive(Clone)]
pub struct Orchestrator {
    topology: Arc<Topology>,
    /// Live runs by task
    runs: RunMap,
}

impl Orchestrator {
    pub fn new(topology: Topology) -> Self {
        Self {
            topology: Arc::new(topology),
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolve `config` and build an orchestrator for it.
    pub fn from_config(
        config: &TopologyConfig,
        tools: Arc<ToolRegistry>,
        backends: Arc<BackendRegistry>,
    ) -> Result<Self, ConfigError> {
        let topology = TopologyResolver::new(tools, backends).resolve(config)?;
        Ok(Self::new(topology))
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// Start running `task` and return its event stream.
    ///
    /// An invalid task is rejected before anything is emitted.
    #[instrument(skip(self, task), fields(task_id = %task.id))]
    pub fn run(&self, task: Task) -> Result<RunHandle, MaestroError> {
        task.validate()?;

        let capacity = self.topology.policy().channel_capacity;
        let (emitter, pair) = ChannelBuilder::new().buffer_size(capacity).build();
        let control = pair.control();
        let (out_tx, out_rx) = mpsc::channel(capacity.max(1));

        let task_id = task.id;
        let root_token = CancellationToken::new();
        let ctx = AgentContext::new(task_id, emitter, root_token.clone());
        let collector = Collector {
            ctx: ExecutionContext::new(task_id, root_token),
            out_tx,
        };

        self.runs.lock().insert(task_id, control.clone());
        let runs = Arc::clone(&self.runs);
        tokio::spawn(async move {
            collector.run(pair).await;
            runs.lock().remove(&task_id);
        });

        if let Err(e) = self.topology.root().start(task, ctx) {
            control.cancel();
            return Err(e);
        }
        info!(mode = %self.topology.mode(), "Run started");

        Ok(RunHandle {
            task_id,
            events: ReceiverStream::new(out_rx),
            control,
        })
    }

    /// Run `task` to the end and collect its record.
    pub async fn execute(&self, task: Task) -> Result<TaskRecord, MaestroError> {
        Ok(self.run(task)?.into_record().await)
    }

    /// Cancel one live run. Returns false if no such run is live.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        match self.runs.lock().get(task_id) {
            Some(control) => {
                control.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every live run
    pub fn cancel_all(&self) {
        let runs = self.runs.lock();
        if !runs.is_empty() {
            info!(runs = runs.len(), "Cancelling all runs");
        }
        for control in runs.values() {
            control.cancel();
        }
    }

    pub fn active_runs(&self) -> Vec<TaskId> {
        self.runs.lock().keys().copied().collect()
    }
}

/// Sequencing side of a run
struct Collector {
    ctx: ExecutionContext,
    out_tx: mpsc::Sender<Event>,
}

impl Collector {
    #[instrument(skip_all, fields(task_id = %self.ctx.task_id()))]
    async fn run(mut self, pair: ChannelPair) {
        let ChannelPair {
            root_rx,
            mut control_rx,
            ..
        } = pair;

        let mut streams = SelectAll::new();
        streams.push(ReceiverStream::new(root_rx));

        loop {
            tokio::select! {
                biased;
                Some(control) = control_rx.recv() => match control {
                    Control::Register(rx) => streams.push(ReceiverStream::new(rx)),
                    Control::Cancel => {
                        self.ctx.cancel();
                    }
                },
                emission = streams.next() => match emission {
                    Some(emission) => self.forward(emission).await,
                    None => break,
                },
            }
            if self.ctx.is_settled() {
                break;
            }
        }

        if !self.ctx.is_settled() {
            warn!(active = ?self.ctx.active_paths(), "Run ended with active agents");
        }
        debug!(events = self.ctx.next_sequence() - 1, "Run finished");
    }

    async fn forward(&mut self, emission: Emission) {
        let Emission {
            invocation,
            path,
            kind,
            ack,
        } = emission;

        let event = self.ctx.record(invocation, path, kind);
        let sequence = event.sequence;
        debug!(sequence, agent = %event.agent_path, kind = %event.tag(), "Event");

        if self.out_tx.send(event).await.is_err() && self.ctx.cancel() {
            debug!("Event stream dropped, run cancelled");
        }
        let _ = ack.send(sequence);
    }
}

/// Event stream of one run.
///
/// Yields events in sequence order and ends after the last terminal event.
/// Dropping the handle cancels the run.
pub struct RunHandle {
    task_id: TaskId,
    events: ReceiverStream<Event>,
    control: ControlSender,
}

impl RunHandle {
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Request cancellation. Idempotent, and a no-op once the run finished.
    pub fn cancel(&self) {
        debug!(task_id = %self.task_id, "Cancel requested");
        self.control.cancel();
    }

    /// Drain the remaining events into a record.
    pub async fn into_record(mut self) -> TaskRecord {
        let mut events = Vec::new();
        while let Some(event) = self.events.next().await {
            events.push(event);
        }
        TaskRecord::from_events(self.task_id, events)
    }
}

impl Stream for RunHandle {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.control.cancel();
    }
}
