//! Transaction tracker service.
//!
//! Keeps, per flow, the switch rule transaction awaiting confirmation by the
//! speaker. At most one transaction is outstanding per flow: a new `Begin`
//! replaces the previous one, and confirmations carrying a superseded id are
//! rejected. Records outlive the cached flow-pair, so removals of deleted
//! flows are still correlated until the sweeper expires them.
use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    task::Poll,
    time::Duration,
};

use dashmap::{DashMap, Entry};
use tokio::time::Instant;
use tower::Service;
#[cfg(feature = "flowmgr_tracing")]
use tracing::{debug, info, warn};

use crate::orchestration::{
    api::{TransactionRequest, TransactionResponse},
    error::OrchestrationError,
    infrastructure::{
        flow::{FlowId, TransactionId},
        rules::OperationKind,
    },
};

/// Outstanding rule transaction of a flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub flow_id: FlowId,
    pub transaction_id: TransactionId,
    pub operation: OperationKind,
    pub created_at: Instant,
    /// Confirmations still expected before the transaction completes.
    pub pending: usize,
}

#[derive(Debug, Clone)]
pub struct TransactionService {
    /// Outstanding transaction per flow id
    records: Arc<DashMap<FlowId, TransactionRecord>>,
    /// Next transaction id, ids are never reused
    next_id: Arc<AtomicU64>,
}

impl Default for TransactionService {
    fn default() -> Self {
        Self { records: Arc::new(DashMap::new()), next_id: Arc::new(AtomicU64::new(1)) }
    }
}

impl TransactionService {
    /// Internal method to open a transaction
    fn begin(&self, flow_id: FlowId, operation: OperationKind, expected: usize) -> TransactionId {
        let transaction_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = TransactionRecord {
            flow_id: flow_id.clone(),
            transaction_id,
            operation,
            created_at: Instant::now(),
            pending: expected.max(1),
        };
        if let Some(_superseded) = self.records.insert(flow_id, record) {
            #[cfg(feature = "flowmgr_tracing")]
            debug!(
                "[transaction] Begin supersedes transaction {} of flow {}",
                _superseded.transaction_id, _superseded.flow_id
            );
        }
        transaction_id
    }

    /// Internal method to account for a confirmation
    fn confirm(&self, flow_id: FlowId, transaction_id: TransactionId) -> TransactionResponse {
        match self.records.entry(flow_id) {
            Entry::Occupied(mut entry) if entry.get().transaction_id == transaction_id => {
                let record = entry.get_mut();
                record.pending = record.pending.saturating_sub(1);
                if record.pending == 0 {
                    entry.remove();
                    TransactionResponse::Confirmed { completed: true }
                } else {
                    TransactionResponse::Confirmed { completed: false }
                }
            }
            _entry => {
                #[cfg(feature = "flowmgr_tracing")]
                warn!(
                    "[transaction] Confirm rejected: flow_id: {}, transaction_id: {}",
                    _entry.key(),
                    transaction_id
                );
                TransactionResponse::Rejected
            }
        }
    }

    /// Internal method to clear and return every stale transaction, of `operation` if set
    fn expire(&self, older_than: Duration, operation: Option<OperationKind>) -> Vec<TransactionRecord> {
        let now = Instant::now();
        let is_stale = |record: &TransactionRecord| {
            now.duration_since(record.created_at) >= older_than
                && operation.is_none_or(|operation| record.operation == operation)
        };
        let stale: Vec<FlowId> = self
            .records
            .iter()
            .filter(|entry| is_stale(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        // A record replaced since the scan is fresh again and must survive
        stale
            .into_iter()
            .filter_map(|flow_id| {
                self.records.remove_if(&flow_id, |_, record| is_stale(record)).map(|(_, record)| record)
            })
            .collect()
    }
}

impl Service<TransactionRequest> for TransactionService {
    type Response = TransactionResponse;
    type Error = OrchestrationError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: TransactionRequest) -> Self::Future {
        let this = self.clone();
        Box::pin(async move {
            match request {
                TransactionRequest::Begin { flow_id, operation, expected } => {
                    #[cfg(feature = "flowmgr_tracing")]
                    let _flow_id = flow_id.clone();
                    let transaction_id = this.begin(flow_id, operation, expected);
                    #[cfg(feature = "flowmgr_tracing")]
                    info!(
                        "[transaction] Begin: flow_id: {}, operation: {:?}, transaction_id: {}, expected: {}",
                        _flow_id, operation, transaction_id, expected
                    );
                    Ok(TransactionResponse::Begun(transaction_id))
                }
                TransactionRequest::Confirm { flow_id, transaction_id } => {
                    Ok(this.confirm(flow_id, transaction_id))
                }
                TransactionRequest::Fail(flow_id) => {
                    let operation = this.records.remove(&flow_id).map(|(_, record)| record.operation);
                    #[cfg(feature = "flowmgr_tracing")]
                    info!("[transaction] Fail: flow_id: {}, operation: {:?}", flow_id, operation);
                    Ok(TransactionResponse::Failed(operation))
                }
                TransactionRequest::Get(flow_id) => Ok(TransactionResponse::Record(
                    this.records.get(&flow_id).map(|record| record.value().clone()),
                )),
                TransactionRequest::Expire { older_than_ms, operation } => Ok(
                    TransactionResponse::Expired(this.expire(Duration::from_millis(older_than_ms), operation)),
                ),
            }
        })
    }
}
