//! Status state machine.
//!
//! The state of a flow lives on its cached [`FlowPair`] and nowhere else: the
//! state machine only defines how [`StatusEvent`]s move it. Events are applied
//! by the flow cache under the per-key guard of its map, so a transition is
//! atomic with respect to every other write of the same flow.
//!
//! ```text
//!  create/update        begin            confirm (last)
//! ───────────────▶ ALLOCATED ───────▶ IN_PROGRESS ───────▶ UP
//!                                          │  ▲               │
//!                       error / expiry     │  └── begin ──────┘
//!                                          ▼
//!                                         DOWN
//! ```
use std::{future::Future, pin::Pin, task::Poll};

use tower::{Service, ServiceExt};
#[cfg(feature = "flowmgr_tracing")]
use tracing::info;

use crate::orchestration::{
    api::{CacheRequest, CacheResponse, StatusRequest, StatusResponse},
    error::OrchestrationError,
    infrastructure::flow::{FlowPair, FlowState, TransactionId},
};

/// Events moving a flow through its states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// The flow-pair was written by a create or an update.
    Allocated,
    /// A rule transaction began.
    TransactionBegun(TransactionId),
    /// The given transaction completed.
    TransactionConfirmed(TransactionId),
    /// A rule operation failed or the speaker reported the flow down.
    Failed,
    /// The given transaction stayed unconfirmed for too long.
    Expired(TransactionId),
    /// A rule push never left the orchestrator, back to the state it started from.
    Reverted(FlowState),
}

impl StatusEvent {
    /// State reached from `current` on this event.
    pub fn next_state(self, current: FlowState) -> FlowState {
        match (self, current) {
            (StatusEvent::Allocated, _) => FlowState::Allocated,
            (StatusEvent::TransactionBegun(_), _) => FlowState::InProgress,
            (StatusEvent::TransactionConfirmed(_), _) => FlowState::Up,
            (StatusEvent::Failed, _) => FlowState::Down,
            // Only a flow still waiting on the speaker can go stale
            (StatusEvent::Expired(_), FlowState::InProgress) => FlowState::Down,
            (StatusEvent::Expired(_), state) => state,
            (StatusEvent::Reverted(state), _) => state,
        }
    }

    /// Applies the event to both directions of `pair`.
    ///
    /// Confirmation and expiry only move the flow-pair still stamped with their transaction.
    pub fn apply(self, pair: &mut FlowPair) -> FlowState {
        if let StatusEvent::TransactionConfirmed(transaction_id) | StatusEvent::Expired(transaction_id) =
            self
            && pair.forward.transaction_id != Some(transaction_id)
        {
            return pair.state();
        }
        let state = self.next_state(pair.state());
        pair.set_state(state);
        match self {
            StatusEvent::TransactionBegun(transaction_id) => {
                pair.set_transaction_id(Some(transaction_id))
            }
            StatusEvent::Allocated => {}
            StatusEvent::TransactionConfirmed(_) => {
                pair.set_transaction_id(None);
                pair.set_confirmed(true);
            }
            StatusEvent::Failed | StatusEvent::Reverted(_) => pair.set_transaction_id(None),
            StatusEvent::Expired(_) => {
                if state == FlowState::Down {
                    pair.set_transaction_id(None)
                }
            }
        }
        state
    }
}

/// Status service answering queries and applying transitions through the flow cache.
#[derive(Debug, Clone)]
pub struct StatusService<C> {
    cache: C,
}

impl<C> StatusService<C> {
    pub fn new(cache: C) -> Self {
        Self { cache }
    }
}

impl<C> Service<StatusRequest> for StatusService<C>
where
    C: Service<CacheRequest, Response = CacheResponse, Error = OrchestrationError>
        + Clone
        + Send
        + 'static,
    C::Future: Send,
{
    type Response = StatusResponse;
    type Error = OrchestrationError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: StatusRequest) -> Self::Future {
        let mut cache = self.cache.clone();
        Box::pin(async move {
            let request = match request {
                StatusRequest::Query(flow_id) => CacheRequest::Get(flow_id),
                StatusRequest::Apply { flow_id, event } => {
                    #[cfg(feature = "flowmgr_tracing")]
                    info!("[status] Apply: flow_id: {}, event: {:?}", flow_id, event);
                    CacheRequest::Transition { flow_id, event }
                }
            };
            match cache.ready().await?.call(request).await? {
                CacheResponse::Flow(pair) => Ok(StatusResponse::State(pair.state())),
                _ => Err(OrchestrationError::InternalOrchestrationError),
            }
        })
    }
}
