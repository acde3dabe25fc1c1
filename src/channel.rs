//! Per-agent event channels
//!
//! Every agent invocation owns a bounded channel into the orchestrator's
//! collector. An emission carries a one-shot acknowledgement: the emitter
//! only returns once the collector has assigned the sequence number and
//! handed the event to the sink, so an agent's next step is always causally
//! after its previous event in the global order.

use tokio::sync::{mpsc, oneshot};

use crate::error::MaestroError;
use crate::event::{AgentPath, EventKind};
use crate::ids::InvocationId;

/// An event on its way to the collector, not yet sequenced.
pub(crate) struct Emission {
    pub invocation: InvocationId,
    pub path: AgentPath,
    pub kind: EventKind,
    pub ack: oneshot::Sender<u64>,
}

/// Messages for the collector besides emissions.
pub(crate) enum Control {
    /// Start reading a new agent channel
    Register(mpsc::Receiver<Emission>),
    /// Cancel the run
    Cancel,
}

/// Sending side of a run's control channel.
#[derive(Clone)]
pub(crate) struct ControlSender {
    tx: mpsc::UnboundedSender<Control>,
}

impl ControlSender {
    /// Request cancellation. A no-op once the run has closed.
    pub fn cancel(&self) {
        let _ = self.tx.send(Control::Cancel);
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Collector side of a run's channels
pub(crate) struct ChannelPair {
    /// Emissions of the root agent
    pub root_rx: mpsc::Receiver<Emission>,
    /// Registrations and cancellation requests
    pub control_rx: mpsc::UnboundedReceiver<Control>,
    control: ControlSender,
}

impl ChannelPair {
    pub fn control(&self) -> ControlSender {
        self.control.clone()
    }
}

/// Emits events on behalf of one agent invocation.
pub struct EventEmitter {
    invocation: InvocationId,
    path: AgentPath,
    tx: mpsc::Sender<Emission>,
    control: ControlSender,
    buffer_size: usize,
}

impl EventEmitter {
    pub fn invocation(&self) -> InvocationId {
        self.invocation
    }

    pub fn path(&self) -> &AgentPath {
        &self.path
    }

    /// Emit an event and wait until it has been sequenced.
    ///
    /// Blocks while the agent channel is full or the sink is not keeping up.
    pub async fn emit(&self, kind: EventKind) -> Result<u64, MaestroError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(Emission {
                invocation: self.invocation,
                path: self.path.clone(),
                kind,
                ack: ack_tx,
            })
            .await
            .map_err(|_| MaestroError::ChannelClosed)?;
        ack_rx.await.map_err(|_| MaestroError::ChannelClosed)
    }

    /// Open a channel for a sub-agent reached through `label`.
    pub(crate) fn child(&self, label: &str) -> Result<EventEmitter, MaestroError> {
        let (tx, rx) = mpsc::channel(self.buffer_size);
        self.control
            .tx
            .send(Control::Register(rx))
            .map_err(|_| MaestroError::ChannelClosed)?;
        Ok(EventEmitter {
            invocation: InvocationId::new(),
            path: self.path.child(label),
            tx,
            control: self.control.clone(),
            buffer_size: self.buffer_size,
        })
    }
}

/// Builder for the channels of one run
pub(crate) struct ChannelBuilder {
    buffer_size: usize,
}

impl ChannelBuilder {
    pub fn new() -> Self {
        Self { buffer_size: 64 }
    }

    /// Capacity of every per-agent channel
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    /// Build the root emitter and the collector side.
    pub fn build(self) -> (EventEmitter, ChannelPair) {
        let (tx, root_rx) = mpsc::channel(self.buffer_size);
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let control = ControlSender { tx: control_tx };

        let emitter = EventEmitter {
            invocation: InvocationId::new(),
            path: AgentPath::root(),
            tx,
            control: control.clone(),
            buffer_size: self.buffer_size,
        };
        let pair = ChannelPair {
            root_rx,
            control_rx,
            control,
        };

        (emitter, pair)
    }
}

impl Default for ChannelBuilder {
    fn default() -> Self {
        Self::new()
    }
}
