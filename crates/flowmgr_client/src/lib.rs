//! Northbound client of the flow orchestrator.
//!
//! Publishes flow commands on the `Orchestrator` channel and awaits the
//! correlated reply coming back on the `Northbound` channel. The client never
//! blocks a thread: each request suspends until its reply is handed over by
//! [`NorthboundClient::complete`] or by the listener task returned from
//! [`NorthboundClient::spawn_listener`].
use std::time::Duration;

use flowmgr_core::{
    orchestration::{
        api::{CommandData, Destination, Envelope, InfoData, Message},
        error::{ErrorData, OrchestrationError},
        infrastructure::flow::{Flow, FlowFilter, FlowState, PathInfoData},
    },
    transport::{CorrelationIdGenerator, pending::PendingReplies},
};
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};
use tower::{Service, ServiceExt};
#[cfg(feature = "flowmgr_tracing")]
use tracing::{debug, warn};

pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Request rejected by the orchestrator: {0:?}")]
    Rejected(ErrorData),

    #[error("No reply for request {0} within the timeout")]
    Timeout(String),

    #[error("Reply channel closed before request {0} was answered")]
    Disconnected(String),

    #[error("Unexpected reply: {0:?}")]
    UnexpectedReply(Message),

    #[error(transparent)]
    Bus(#[from] OrchestrationError),
}

impl ClientError {
    /// Error payload of a rejected request.
    pub fn error_data(&self) -> Option<&ErrorData> {
        match self {
            ClientError::Rejected(error) => Some(error),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct NorthboundClient<B> {
    bus: B,
    pending: PendingReplies,
    correlation_ids: CorrelationIdGenerator,
    timeout: Duration,
}

impl<B> NorthboundClient<B> {
    /// Creates a client publishing through `bus`, waiting at most `timeout_ms` per reply.
    pub fn new(bus: B, timeout_ms: u64) -> Self {
        Self {
            bus,
            pending: PendingReplies::default(),
            correlation_ids: CorrelationIdGenerator::new("nb"),
            timeout: Duration::from_millis(timeout_ms),
        }
    }

    /// Hands a northbound envelope to the request awaiting it.
    ///
    /// # Returns
    /// `false` if no request awaits the envelope
    pub fn complete(&self, envelope: Envelope) -> bool {
        match self.pending.complete(envelope) {
            Ok(()) => true,
            Err(_envelope) => {
                #[cfg(feature = "flowmgr_tracing")]
                debug!("[client] Unawaited reply dropped: {:?}", _envelope.correlation_id);
                false
            }
        }
    }

    /// Feeds the replies read from `northbound` until the channel closes.
    pub fn spawn_listener(&self, mut northbound: UnboundedReceiver<Envelope>) -> JoinHandle<()> {
        let pending = self.pending.clone();
        tokio::spawn(async move {
            while let Some(envelope) = northbound.recv().await {
                if let Err(_envelope) = pending.complete(envelope) {
                    #[cfg(feature = "flowmgr_tracing")]
                    debug!("[client] Unawaited reply dropped: {:?}", _envelope.correlation_id);
                }
            }
        })
    }

    /// Number of requests still waiting for their reply.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

impl<B> NorthboundClient<B>
where
    B: Service<Envelope, Response = (), Error = OrchestrationError> + Clone + Send + 'static,
    B::Future: Send,
{
    /// Publishes `command` and waits for its correlated reply.
    pub async fn request(&mut self, command: CommandData) -> Result<InfoData, ClientError> {
        let correlation_id = self.correlation_ids.next_id();
        let reply = self.pending.register(correlation_id.clone());
        let envelope =
            Envelope::command(Destination::Orchestrator, Some(correlation_id.clone()), command);
        if let Err(error) = self.bus.ready().await?.call(envelope).await {
            self.pending.cancel(&correlation_id);
            return Err(error.into());
        }

        let reply = match tokio::time::timeout(self.timeout, reply).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(ClientError::Disconnected(correlation_id)),
            Err(_) => {
                self.pending.cancel(&correlation_id);
                #[cfg(feature = "flowmgr_tracing")]
                warn!("[client] Request timed out: correlation_id: {}", correlation_id);
                return Err(ClientError::Timeout(correlation_id));
            }
        };
        match reply.message {
            Message::Info(info) => Ok(info),
            Message::Error(error) => Err(ClientError::Rejected(error)),
            message => Err(ClientError::UnexpectedReply(message)),
        }
    }

    pub async fn create(&mut self, flow: Flow) -> Result<Flow, ClientError> {
        self.flow(CommandData::FlowCreate(flow)).await
    }

    pub async fn update(&mut self, flow: Flow) -> Result<Flow, ClientError> {
        self.flow(CommandData::FlowUpdate(flow)).await
    }

    pub async fn delete(&mut self, flow_id: impl Into<String>) -> Result<Flow, ClientError> {
        self.flow(CommandData::FlowDelete { flow_id: flow_id.into() }).await
    }

    pub async fn get(&mut self, flow_id: impl Into<String>) -> Result<Flow, ClientError> {
        self.flow(CommandData::FlowGet { flow_id: flow_id.into() }).await
    }

    pub async fn dump(&mut self, filter: Option<FlowFilter>) -> Result<Vec<Flow>, ClientError> {
        match self.request(CommandData::FlowsGet { filter }).await? {
            InfoData::Flows { flows } => Ok(flows),
            info => Err(ClientError::UnexpectedReply(Message::Info(info))),
        }
    }

    pub async fn status(&mut self, flow_id: impl Into<String>) -> Result<FlowState, ClientError> {
        match self.request(CommandData::FlowStatus { flow_id: flow_id.into() }).await? {
            InfoData::FlowStatus { state, .. } => Ok(state),
            info => Err(ClientError::UnexpectedReply(Message::Info(info))),
        }
    }

    pub async fn path(&mut self, flow_id: impl Into<String>) -> Result<PathInfoData, ClientError> {
        match self.request(CommandData::FlowPath { flow_id: flow_id.into() }).await? {
            InfoData::FlowPath { path, .. } => Ok(path),
            info => Err(ClientError::UnexpectedReply(Message::Info(info))),
        }
    }

    async fn flow(&mut self, command: CommandData) -> Result<Flow, ClientError> {
        match self.request(command).await? {
            InfoData::Flow(flow) => Ok(flow),
            info => Err(ClientError::UnexpectedReply(Message::Info(info))),
        }
    }
}
