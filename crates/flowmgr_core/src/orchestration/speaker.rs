//! Speaker Response Handler.
//!
//! Consumes what the speaker sends back to the transaction tracker: echoed
//! rule commands and rule confirmations complete transactions, flow-down
//! reports and error envelopes fail them. Nothing is answered to the speaker;
//! a speaker error is forwarded to the northbound when it still carries the
//! requester's correlation id.
use std::{future::Future, pin::Pin, task::Poll};

use tower::{Service, ServiceExt};
#[cfg(feature = "flowmgr_tracing")]
use tracing::{debug, info, warn};

use crate::orchestration::{
    api::{
        CommandData, Destination, Envelope, InfoData, Message, StatusRequest, StatusResponse,
        TransactionRequest, TransactionResponse,
    },
    error::OrchestrationError,
    infrastructure::flow::{FlowId, TransactionId},
    services::{locks::FlowLocks, status::StatusEvent},
};

#[derive(Debug, Clone)]
pub struct SpeakerResponseService<S, T> {
    locks: FlowLocks,
    status: S,
    transactions: T,
}

impl<S, T> SpeakerResponseService<S, T> {
    pub fn new(locks: FlowLocks, status: S, transactions: T) -> Self {
        Self { locks, status, transactions }
    }
}

impl<S, T> SpeakerResponseService<S, T>
where
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
    /// Applies an event, a flow deleted in the meantime is not an error
    async fn apply(&mut self, flow_id: FlowId, event: StatusEvent) -> Result<(), OrchestrationError> {
        match self.status.ready().await?.call(StatusRequest::Apply { flow_id, event }).await {
            Ok(_) | Err(OrchestrationError::FlowNotFound(_)) => Ok(()),
            Err(error) => Err(error),
        }
    }

    async fn confirm(
        &mut self,
        flow_id: FlowId,
        transaction_id: TransactionId,
    ) -> Result<(), OrchestrationError> {
        let _guard = self.locks.acquire(&flow_id).await;
        match self
            .transactions
            .ready()
            .await?
            .call(TransactionRequest::Confirm { flow_id: flow_id.clone(), transaction_id })
            .await?
        {
            TransactionResponse::Confirmed { completed: true } => {
                #[cfg(feature = "flowmgr_tracing")]
                info!(
                    "[speaker] Transaction completed: flow_id: {}, transaction_id: {}",
                    flow_id, transaction_id
                );
                self.apply(flow_id, StatusEvent::TransactionConfirmed(transaction_id)).await
            }
            TransactionResponse::Confirmed { completed: false } => {
                #[cfg(feature = "flowmgr_tracing")]
                debug!(
                    "[speaker] Transaction progressed: flow_id: {}, transaction_id: {}",
                    flow_id, transaction_id
                );
                Ok(())
            }
            TransactionResponse::Rejected => {
                #[cfg(feature = "flowmgr_tracing")]
                warn!(
                    "[speaker] Stale confirmation ignored: flow_id: {}, transaction_id: {}",
                    flow_id, transaction_id
                );
                Ok(())
            }
            _ => Err(OrchestrationError::InternalOrchestrationError),
        }
    }

    async fn fail(&mut self, flow_id: FlowId) -> Result<(), OrchestrationError> {
        let _guard = self.locks.acquire(&flow_id).await;
        match self.transactions.ready().await?.call(TransactionRequest::Fail(flow_id.clone())).await? {
            TransactionResponse::Failed(_operation) => {
                #[cfg(feature = "flowmgr_tracing")]
                warn!("[speaker] Flow failed: flow_id: {}, operation: {:?}", flow_id, _operation);
                self.apply(flow_id, StatusEvent::Failed).await
            }
            _ => Err(OrchestrationError::InternalOrchestrationError),
        }
    }
}

impl<S, T> Service<Envelope> for SpeakerResponseService<S, T>
where
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
        let mut this = self.clone();
        Box::pin(async move {
            match envelope.message {
                Message::Command(CommandData::Rule(rule)) => {
                    this.confirm(rule.flow_id, rule.transaction_id).await?;
                    Ok(None)
                }
                Message::Info(InfoData::RuleConfirmation { flow_id, transaction_id }) => {
                    this.confirm(flow_id, transaction_id).await?;
                    Ok(None)
                }
                Message::Info(InfoData::FlowDown { flow_id }) => {
                    this.fail(flow_id).await?;
                    Ok(None)
                }
                Message::Error(error) => {
                    #[cfg(feature = "flowmgr_tracing")]
                    warn!(
                        "[speaker] Error: flow_id: {}, error_type: {}, message: {}",
                        error.description, error.error_type, error.message
                    );
                    this.fail(error.description.clone()).await?;
                    Ok(envelope
                        .correlation_id
                        .map(|correlation_id| {
                            Envelope::error(Destination::Northbound, Some(correlation_id), error)
                        }))
                }
                message => Err(OrchestrationError::UnroutableEnvelope(format!("{message:?}"))),
            }
        })
    }
}
