//! Registry of envelopes awaited by correlation id.
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::orchestration::api::{CorrelationId, Envelope};

#[derive(Debug, Clone, Default)]
pub struct PendingReplies {
    waiters: Arc<DashMap<CorrelationId, oneshot::Sender<Envelope>>>,
}

impl PendingReplies {
    /// Registers interest in the reply correlated by `correlation_id`.
    pub fn register(&self, correlation_id: CorrelationId) -> oneshot::Receiver<Envelope> {
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(correlation_id, tx);
        rx
    }

    /// Gives up waiting, e.g. after a timeout.
    pub fn cancel(&self, correlation_id: &str) {
        self.waiters.remove(correlation_id);
    }

    pub fn is_awaited(&self, envelope: &Envelope) -> bool {
        envelope
            .correlation_id
            .as_deref()
            .is_some_and(|correlation_id| self.waiters.contains_key(correlation_id))
    }

    /// Hands the envelope to its waiter, or gives it back if nobody awaits it.
    pub fn complete(&self, envelope: Envelope) -> Result<(), Envelope> {
        let Some(correlation_id) = envelope.correlation_id.clone() else {
            return Err(envelope);
        };
        match self.waiters.remove(&correlation_id) {
            // A waiter that timed out in between dropped its receiver
            Some((_, waiter)) => waiter.send(envelope),
            None => Err(envelope),
        }
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}
