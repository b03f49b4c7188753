//! Path engine client over the message bus.
//!
//! Publishes a path request to the topology engine under a fresh correlation
//! id and suspends until the router hands back the correlated reply. The
//! caller never blocks a thread while waiting, and the wait is bounded by the
//! configured timeout.
use std::{future::Future, pin::Pin, task::Poll, time::Duration};

use tower::{Service, ServiceExt};
#[cfg(feature = "flowmgr_tracing")]
use tracing::{info, warn};

use crate::{
    orchestration::{
        api::{CommandData, Destination, Envelope, InfoData, Message, PathRequest, PathResponse},
        error::OrchestrationError,
    },
    transport::{CorrelationIdGenerator, pending::PendingReplies},
};

#[derive(Clone)]
pub struct PathEngineClient<B> {
    bus: B,
    pending: PendingReplies,
    correlation_ids: CorrelationIdGenerator,
    /// Reply timeout in milliseconds, disabled if 0
    timeout: u64,
}

impl<B> PathEngineClient<B> {
    /// Creates a client publishing through `bus` and collecting replies from `pending`.
    ///
    /// Timeout is disabled if set to 0.
    pub fn new(bus: B, pending: PendingReplies, timeout_ms: u64) -> Self {
        Self {
            bus,
            pending,
            correlation_ids: CorrelationIdGenerator::new("path"),
            timeout: timeout_ms,
        }
    }
}

impl<B> Service<PathRequest> for PathEngineClient<B>
where
    B: Service<Envelope, Response = (), Error = OrchestrationError> + Clone + Send + 'static,
    B::Future: Send,
{
    type Response = PathResponse;
    type Error = OrchestrationError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: PathRequest) -> Self::Future {
        let mut bus = self.bus.clone();
        let pending = self.pending.clone();
        let correlation_id = self.correlation_ids.next_id();
        let timeout = self.timeout;
        Box::pin(async move {
            let PathRequest::Compute(flow) = request;
            let flow_id = flow.flow_id.clone();
            #[cfg(feature = "flowmgr_tracing")]
            info!("[path] Compute: flow_id: {}, correlation_id: {}", flow_id, correlation_id);

            let reply = pending.register(correlation_id.clone());
            let envelope = Envelope::command(
                Destination::TopologyEngine,
                Some(correlation_id.clone()),
                CommandData::PathRequest(flow),
            );
            if let Err(error) = bus.ready().await?.call(envelope).await {
                pending.cancel(&correlation_id);
                return Err(error);
            }

            let reply = if timeout > 0 {
                match tokio::time::timeout(Duration::from_millis(timeout), reply).await {
                    Ok(reply) => reply,
                    Err(_) => {
                        pending.cancel(&correlation_id);
                        #[cfg(feature = "flowmgr_tracing")]
                        warn!("[path] Compute timed out: flow_id: {}", flow_id);
                        return Err(OrchestrationError::PathComputationTimeout(flow_id));
                    }
                }
            } else {
                reply.await
            }
            .map_err(|_| OrchestrationError::InternalOrchestrationError)?;

            match reply.message {
                Message::Info(InfoData::Path(paths)) => Ok(PathResponse::Paths(paths)),
                Message::Error(error) => {
                    Err(OrchestrationError::PathComputationFailed(flow_id, error.message))
                }
                _ => Err(OrchestrationError::InternalOrchestrationError),
            }
        })
    }
}
