//! Stale transaction sweeper.
//!
//! A speaker that never answers leaves its flow IN_PROGRESS forever. When a
//! stale transaction timeout is configured, the sweeper periodically clears
//! the transactions older than the timeout and takes their flows DOWN. A
//! flow that moved on to a newer transaction in between is left alone.
//!
//! The removal of a deleted flow has no flow left to take down, its record is
//! only kept to correlate the speaker's answer. Removal records older than the
//! removal timeout are dropped on the same sweep.
use std::time::Duration;

use tokio::task::JoinHandle;
use tower::{Service, ServiceExt};
#[cfg(feature = "flowmgr_tracing")]
use tracing::{info, warn};

use crate::orchestration::{
    api::{StatusRequest, StatusResponse, TransactionRequest, TransactionResponse},
    error::OrchestrationError,
    infrastructure::{flow::FlowId, rules::OperationKind},
    services::{locks::FlowLocks, status::StatusEvent, transaction::TransactionRecord},
};

#[derive(Debug, Clone)]
pub struct TransactionSweeper<S, T> {
    locks: FlowLocks,
    status: S,
    transactions: T,
    /// Age after which an unconfirmed transaction is stale
    timeout: Option<Duration>,
    /// Age after which an unconfirmed removal is forgotten
    removal_timeout: Option<Duration>,
}

impl<S, T> TransactionSweeper<S, T>
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
    pub fn new(locks: FlowLocks, status: S, transactions: T, timeout: Option<Duration>) -> Self {
        Self { locks, status, transactions, timeout, removal_timeout: None }
    }

    pub fn with_removal_timeout(self, removal_timeout: Option<Duration>) -> Self {
        Self { removal_timeout, ..self }
    }

    /// Internal method to clear the transactions older than `older_than`
    async fn expire(
        &mut self,
        older_than: Duration,
        operation: Option<OperationKind>,
    ) -> Result<Vec<TransactionRecord>, OrchestrationError> {
        match self
            .transactions
            .ready()
            .await?
            .call(TransactionRequest::Expire { older_than_ms: older_than.as_millis() as u64, operation })
            .await?
        {
            TransactionResponse::Expired(records) => Ok(records),
            _ => Err(OrchestrationError::InternalOrchestrationError),
        }
    }

    /// Expires the stale transactions once.
    ///
    /// # Returns
    /// The flows whose transaction expired, whether or not they were still cached
    pub async fn sweep_once(&mut self) -> Result<Vec<FlowId>, OrchestrationError> {
        let mut records = Vec::new();
        if let Some(timeout) = self.timeout {
            records.extend(self.expire(timeout, None).await?);
        }
        if let Some(removal_timeout) = self.removal_timeout {
            records.extend(self.expire(removal_timeout, Some(OperationKind::Remove)).await?);
        }

        let mut expired = Vec::with_capacity(records.len());
        for record in records {
            #[cfg(feature = "flowmgr_tracing")]
            warn!(
                "[expiry] Stale transaction: flow_id: {}, transaction_id: {}, operation: {:?}",
                record.flow_id, record.transaction_id, record.operation
            );
            let _guard = self.locks.acquire(&record.flow_id).await;
            match self
                .status
                .ready()
                .await?
                .call(StatusRequest::Apply {
                    flow_id: record.flow_id.clone(),
                    event: StatusEvent::Expired(record.transaction_id),
                })
                .await
            {
                Ok(_) | Err(OrchestrationError::FlowNotFound(_)) => {}
                Err(error) => return Err(error),
            }
            expired.push(record.flow_id);
        }
        Ok(expired)
    }

    /// Runs the sweep every `interval` until the task is aborted.
    pub fn spawn(mut self, interval: Duration) -> JoinHandle<()> {
        #[cfg(feature = "flowmgr_tracing")]
        info!(
            "[expiry] Sweeper started: timeout: {:?}, removal_timeout: {:?}, interval: {:?}",
            self.timeout, self.removal_timeout, interval
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(_error) = self.sweep_once().await {
                    #[cfg(feature = "flowmgr_tracing")]
                    warn!("[expiry] Sweep failed: {}", _error);
                }
            }
        })
    }
}
