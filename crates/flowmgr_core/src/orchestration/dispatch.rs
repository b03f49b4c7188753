//! Rule dispatch stage.
//!
//! Turns a flow into switch rules and pushes them to the speaker under one
//! tracked transaction. Dispatch happens in three situations: the topology
//! engine forwards a single rule after persisting a flow, an update re-pushes
//! the rules of the rewritten flow, and a delete removes the rules of the
//! flow-pair it just took out of the cache.
//!
//! The transaction is opened and the flow marked IN_PROGRESS before the first
//! rule leaves, so that a confirmation can never overtake its own transaction.
//! If a rule cannot be published the transaction is dropped and the flow goes
//! back to the state it had. Install rules are derived from the flow-pair as
//! read under the flow's guard, never from a copy taken before it.
use std::{future::Future, pin::Pin, task::Poll};

use tower::{Service, ServiceExt};
#[cfg(feature = "flowmgr_tracing")]
use tracing::{info, warn};

use crate::orchestration::{
    api::{
        CacheRequest, CacheResponse, CommandData, CorrelationId, Destination, Envelope,
        RuleRequest, RuleResponse, StatusRequest, StatusResponse, TransactionRequest,
        TransactionResponse,
    },
    error::OrchestrationError,
    infrastructure::{
        flow::{FlowId, FlowState},
        rules::{self, OperationKind, RuleCommand},
    },
    services::{locks::FlowLocks, status::StatusEvent},
};

#[derive(Debug, Clone)]
pub struct RuleDispatchService<C, S, T, B> {
    /// Per-flow serialization shared with the other handlers
    locks: FlowLocks,
    /// Flow cache, source of the rules to install
    cache: C,
    /// Status service moving flows to IN_PROGRESS
    status: S,
    /// Transaction tracker
    transactions: T,
    /// Outbound bus towards the speaker
    bus: B,
}

impl<C, S, T, B> RuleDispatchService<C, S, T, B> {
    pub fn new(locks: FlowLocks, cache: C, status: S, transactions: T, bus: B) -> Self {
        Self { locks, cache, status, transactions, bus }
    }
}

impl<C, S, T, B> RuleDispatchService<C, S, T, B>
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
    B: Service<Envelope, Response = (), Error = OrchestrationError> + Clone + Send + 'static,
    B::Future: Send,
{
    /// Internal method to push a batch of rules for one flow
    ///
    /// `tracked` is false when the flow-pair is no longer cached, in which case only the
    /// transaction records the push.
    async fn push(
        mut self,
        flow_id: FlowId,
        operation: OperationKind,
        batch: Vec<RuleCommand>,
        tracked: bool,
        correlation_id: Option<CorrelationId>,
    ) -> Result<RuleResponse, OrchestrationError> {
        let locks = self.locks.clone();
        let _guard = locks.acquire(&flow_id).await;
        self.push_guarded(flow_id, operation, batch, tracked, correlation_id).await
    }

    /// Internal method to push the install rules of a cached flow as it is under its guard
    async fn install(
        mut self,
        flow_id: FlowId,
        correlation_id: Option<CorrelationId>,
    ) -> Result<RuleResponse, OrchestrationError> {
        let locks = self.locks.clone();
        let _guard = locks.acquire(&flow_id).await;
        let pair = match self.cache.ready().await?.call(CacheRequest::Get(flow_id.clone())).await? {
            CacheResponse::Flow(pair) => pair,
            _ => return Err(OrchestrationError::InternalOrchestrationError),
        };
        let batch = rules::install_rules(&pair);
        self.push_guarded(flow_id, OperationKind::Install, batch, true, correlation_id).await
    }

    /// Internal method to drop the transaction of a flow and take it down
    async fn abandon(mut self, flow_id: FlowId) -> Result<RuleResponse, OrchestrationError> {
        let locks = self.locks.clone();
        let _guard = locks.acquire(&flow_id).await;
        self.transactions.ready().await?.call(TransactionRequest::Fail(flow_id.clone())).await?;
        match self.apply(&flow_id, StatusEvent::Failed).await {
            Ok(()) | Err(OrchestrationError::FlowNotFound(_)) => {}
            Err(error) => return Err(error),
        }
        #[cfg(feature = "flowmgr_tracing")]
        info!("[dispatch] Abandoned: flow_id: {}", flow_id);
        Ok(RuleResponse::Abandoned)
    }

    /// Internal method to push a batch while the flow's guard is held
    async fn push_guarded(
        &mut self,
        flow_id: FlowId,
        operation: OperationKind,
        batch: Vec<RuleCommand>,
        tracked: bool,
        correlation_id: Option<CorrelationId>,
    ) -> Result<RuleResponse, OrchestrationError> {
        if batch.is_empty() {
            #[cfg(feature = "flowmgr_tracing")]
            warn!("[dispatch] No rule to push: flow_id: {}, operation: {:?}", flow_id, operation);
            return Ok(RuleResponse::Skipped);
        }

        let previous = if tracked { self.state(&flow_id).await? } else { None };

        let transaction_id = match self
            .transactions
            .ready()
            .await?
            .call(TransactionRequest::Begin {
                flow_id: flow_id.clone(),
                operation,
                expected: batch.len(),
            })
            .await?
        {
            TransactionResponse::Begun(transaction_id) => transaction_id,
            _ => return Err(OrchestrationError::InternalOrchestrationError),
        };

        if previous.is_some() {
            self.apply(&flow_id, StatusEvent::TransactionBegun(transaction_id)).await?;
        }

        #[cfg(feature = "flowmgr_tracing")]
        info!(
            "[dispatch] Push: flow_id: {}, operation: {:?}, transaction_id: {}, rules: {}",
            flow_id,
            operation,
            transaction_id,
            batch.len()
        );

        let rules = batch.len();
        for rule in batch {
            let envelope = Envelope::command(
                Destination::Speaker,
                correlation_id.clone(),
                CommandData::Rule(rule.with_transaction_id(transaction_id)),
            );
            if let Err(error) = self.bus.ready().await?.call(envelope).await {
                #[cfg(feature = "flowmgr_tracing")]
                warn!("[dispatch] Push failed: flow_id: {}, error: {}", flow_id, error);
                self.transactions.ready().await?.call(TransactionRequest::Fail(flow_id.clone())).await?;
                if let Some(previous) = previous {
                    self.apply(&flow_id, StatusEvent::Reverted(previous)).await?;
                }
                return Err(error);
            }
        }

        Ok(RuleResponse::Pushed { transaction_id, rules })
    }

    /// Internal method to read the current state, `None` if the flow is not cached
    async fn state(&mut self, flow_id: &str) -> Result<Option<FlowState>, OrchestrationError> {
        match self.status.ready().await?.call(StatusRequest::Query(flow_id.to_string())).await {
            Ok(StatusResponse::State(state)) => Ok(Some(state)),
            Err(OrchestrationError::FlowNotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn apply(&mut self, flow_id: &str, event: StatusEvent) -> Result<(), OrchestrationError> {
        self.status
            .ready()
            .await?
            .call(StatusRequest::Apply { flow_id: flow_id.to_string(), event })
            .await
            .map(|_| ())
    }
}

impl<C, S, T, B> Service<RuleRequest> for RuleDispatchService<C, S, T, B>
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
    B: Service<Envelope, Response = (), Error = OrchestrationError> + Clone + Send + 'static,
    B::Future: Send,
{
    type Response = RuleResponse;
    type Error = OrchestrationError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: RuleRequest) -> Self::Future {
        let mut this = self.clone();
        Box::pin(async move {
            match request {
                RuleRequest::Install { flow_id, correlation_id } => {
                    this.install(flow_id, correlation_id).await
                }
                RuleRequest::Remove { pair, correlation_id } => {
                    let batch = rules::remove_rules(&pair);
                    let flow_id = pair.flow_id().to_string();
                    this.push(flow_id, OperationKind::Remove, batch, false, correlation_id).await
                }
                RuleRequest::Forward { rule, correlation_id } => {
                    let flow_id = rule.flow_id.clone();
                    let operation = rule.operation();
                    this.push(flow_id, operation, vec![rule], true, correlation_id).await
                }
                RuleRequest::Abandon { flow_id } => this.abandon(flow_id).await,
            }
        })
    }
}
