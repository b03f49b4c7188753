//! Per-flow serialization of multi-step mutations.
//!
//! Single store operations are atomic on their own. Handlers that combine
//! several of them for one flow (cache write, transaction begin, status
//! transition) take the flow's guard first, so that two such sequences on the
//! same flow never interleave while sequences on other flows run freely.
//! Guards are never held across calls to the path engine.
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::orchestration::infrastructure::flow::FlowId;

#[derive(Debug, Clone, Default)]
pub struct FlowLocks {
    locks: Arc<DashMap<FlowId, Arc<Mutex<()>>>>,
}

/// Exclusive access to one flow, released on drop.
#[derive(Debug)]
pub struct FlowGuard {
    flow_id: FlowId,
    locks: Arc<DashMap<FlowId, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl FlowLocks {
    /// Waits until the flow is free and takes it.
    pub async fn acquire(&self, flow_id: &str) -> FlowGuard {
        let mutex = self.locks.entry(flow_id.to_string()).or_default().value().clone();
        FlowGuard {
            flow_id: flow_id.to_string(),
            locks: self.locks.clone(),
            guard: Some(mutex.lock_owned().await),
        }
    }

    /// Number of flows currently guarded or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for FlowGuard {
    fn drop(&mut self) {
        // Held by the map and by this guard only: nobody is waiting
        self.locks.remove_if(&self.flow_id, |_, mutex| Arc::strong_count(mutex) <= 2);
        self.guard.take();
    }
}
