//! Topology engine error handler.
//!
//! The topology engine reports the failure of a flow operation it was asked
//! to persist with an error envelope addressed to the orchestrator. The
//! failure is reflected on the cache so that later queries see it:
//!
//! - `CREATION_FAILURE`: a flow-pair whose rules were never confirmed is
//!   removed with its switch resources and reads `NOT_FOUND` afterwards. One
//!   the speaker already confirmed stays cached and goes DOWN.
//! - `UPDATE_FAILURE`: the flow-pair stays cached and goes DOWN.
//! - `DELETION_FAILURE`: the flow-pair is already gone, nothing changes.
use std::{future::Future, pin::Pin, task::Poll};

use tower::{Service, ServiceExt};
#[cfg(feature = "flowmgr_tracing")]
use tracing::{info, warn};

use crate::orchestration::{
    api::{
        CacheRequest, CacheResponse, Destination, Envelope, Message, StatusRequest, StatusResponse,
        TransactionRequest, TransactionResponse,
    },
    error::{ErrorType, OrchestrationError},
    services::{locks::FlowLocks, resources::ResourcePool, status::StatusEvent},
};

#[derive(Debug, Clone)]
pub struct EngineErrorService<C, S, T> {
    resources: ResourcePool,
    locks: FlowLocks,
    cache: C,
    status: S,
    transactions: T,
}

impl<C, S, T> EngineErrorService<C, S, T> {
    pub fn new(resources: ResourcePool, locks: FlowLocks, cache: C, status: S, transactions: T) -> Self {
        Self { resources, locks, cache, status, transactions }
    }
}

impl<C, S, T> Service<Envelope> for EngineErrorService<C, S, T>
where
    C: Service<CacheRequest, Response = CacheResponse, Error = OrchestrationError>
        + Clone
        + Send
        + 'static,
    C::Future: Send,
    S: Service<StatusRequest, Response = StatusResponse, Error = OrchestrationError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
    T: Service<TransactionRequest, Response = TransactionResponse, Error = OrchestrationError>
        + Clone
        + Send
        + 'static,
    T::Future: Send,
{
    /// Error to forward to the northbound, if any
    type Response = Option<Envelope>;
    type Error = OrchestrationError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, envelope: Envelope) -> Self::Future {
        let resources = self.resources.clone();
        let locks = self.locks.clone();
        let mut cache = self.cache.clone();
        let mut status = self.status.clone();
        let mut transactions = self.transactions.clone();
        Box::pin(async move {
            let error = match envelope.message {
                Message::Error(error) => error,
                message => return Err(OrchestrationError::UnroutableEnvelope(format!("{message:?}"))),
            };
            let flow_id = error.description.clone();
            #[cfg(feature = "flowmgr_tracing")]
            warn!(
                "[engine] Error: flow_id: {}, error_type: {}, message: {}",
                flow_id, error.error_type, error.message
            );

            match error.error_type {
                ErrorType::CreationFailure => {
                    let _guard = locks.acquire(&flow_id).await;
                    let confirmed = match cache.ready().await?.call(CacheRequest::Get(flow_id.clone())).await {
                        Ok(CacheResponse::Flow(pair)) => pair.is_confirmed(),
                        Ok(_) => return Err(OrchestrationError::InternalOrchestrationError),
                        Err(OrchestrationError::FlowNotFound(_)) => false,
                        Err(error) => return Err(error),
                    };
                    if confirmed {
                        fail_flow(&mut status, &mut transactions, &flow_id).await?;
                        #[cfg(feature = "flowmgr_tracing")]
                        info!("[engine] Confirmed flow down: flow_id: {}", flow_id);
                    } else {
                        match cache.ready().await?.call(CacheRequest::Remove(flow_id.clone())).await {
                            Ok(_) | Err(OrchestrationError::FlowNotFound(_)) => {}
                            Err(error) => return Err(error),
                        }
                        resources.release(&flow_id);
                        transactions.ready().await?.call(TransactionRequest::Fail(flow_id.clone())).await?;
                        #[cfg(feature = "flowmgr_tracing")]
                        info!("[engine] Creation rolled back: flow_id: {}", flow_id);
                    }
                }
                ErrorType::UpdateFailure => {
                    let _guard = locks.acquire(&flow_id).await;
                    fail_flow(&mut status, &mut transactions, &flow_id).await?;
                }
                _ => {
                    #[cfg(feature = "flowmgr_tracing")]
                    info!("[engine] No flow change: flow_id: {}, error_type: {}", flow_id, error.error_type);
                }
            }

            Ok(envelope
                .correlation_id
                .map(|correlation_id| Envelope::error(Destination::Northbound, Some(correlation_id), error)))
        })
    }
}

/// Drops the outstanding transaction of a flow and takes it DOWN, if still cached.
async fn fail_flow<S, T>(
    status: &mut S,
    transactions: &mut T,
    flow_id: &str,
) -> Result<(), OrchestrationError>
where
    S: Service<StatusRequest, Response = StatusResponse, Error = OrchestrationError>,
    T: Service<TransactionRequest, Response = TransactionResponse, Error = OrchestrationError>,
{
    transactions.ready().await?.call(TransactionRequest::Fail(flow_id.to_string())).await?;
    match status
        .ready()
        .await?
        .call(StatusRequest::Apply { flow_id: flow_id.to_string(), event: StatusEvent::Failed })
        .await
    {
        Ok(_) | Err(OrchestrationError::FlowNotFound(_)) => Ok(()),
        Err(error) => Err(error),
    }
}
