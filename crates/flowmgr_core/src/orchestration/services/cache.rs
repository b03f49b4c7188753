//! Flow cache service.
//!
//! Authoritative in-memory view of every flow-pair, keyed by flow id. Storage
//! is abstracted behind [`FlowStore`] so that a persistent or distributed
//! backend can replace the in-memory map without touching handler logic.
//! Every store operation is atomic with respect to a single flow id and never
//! blocks operations on other ids.
use std::{fmt, future::Future, pin::Pin, sync::Arc, task::Poll};

use dashmap::{DashMap, Entry};
use tower::Service;
#[cfg(feature = "flowmgr_tracing")]
use tracing::{debug, info};

use crate::orchestration::{
    api::{CacheRequest, CacheResponse, now_millis},
    error::OrchestrationError,
    infrastructure::flow::{FlowFilter, FlowId, FlowPair},
};

/// Storage backend of the flow cache.
pub trait FlowStore: Send + Sync + 'static {
    /// Copy of the flow-pair, if cached.
    fn get(&self, flow_id: &str) -> Option<FlowPair>;

    /// Inserts a new flow-pair, failing if its id is already cached.
    fn insert(&self, pair: FlowPair) -> Result<(), OrchestrationError>;

    /// Inserts or replaces a flow-pair, returning the previous one.
    fn put(&self, pair: FlowPair) -> Option<FlowPair>;

    /// Removes a flow-pair, returning it.
    fn remove(&self, flow_id: &str) -> Option<FlowPair>;

    /// Snapshot of the flow-pairs accepted by `filter`.
    fn list(&self, filter: Option<&FlowFilter>) -> Vec<FlowPair>;

    /// Mutates a cached flow-pair in place and returns a copy of the result.
    fn modify(&self, flow_id: &str, f: &mut dyn FnMut(&mut FlowPair)) -> Option<FlowPair>;
}

/// Map-backed [`FlowStore`].
#[derive(Debug, Default)]
pub struct InMemoryFlowStore {
    flows: DashMap<FlowId, FlowPair>,
}

impl FlowStore for InMemoryFlowStore {
    fn get(&self, flow_id: &str) -> Option<FlowPair> {
        self.flows.get(flow_id).map(|pair| pair.value().clone())
    }

    fn insert(&self, pair: FlowPair) -> Result<(), OrchestrationError> {
        match self.flows.entry(pair.flow_id().to_string()) {
            Entry::Occupied(entry) => Err(OrchestrationError::FlowAlreadyExists(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(pair);
                Ok(())
            }
        }
    }

    fn put(&self, pair: FlowPair) -> Option<FlowPair> {
        self.flows.insert(pair.flow_id().to_string(), pair)
    }

    fn remove(&self, flow_id: &str) -> Option<FlowPair> {
        self.flows.remove(flow_id).map(|(_, pair)| pair)
    }

    fn list(&self, filter: Option<&FlowFilter>) -> Vec<FlowPair> {
        self.flows
            .iter()
            .filter(|entry| filter.is_none_or(|filter| filter.matches(entry.value())))
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn modify(&self, flow_id: &str, f: &mut dyn FnMut(&mut FlowPair)) -> Option<FlowPair> {
        self.flows.get_mut(flow_id).map(|mut pair| {
            f(pair.value_mut());
            pair.value().clone()
        })
    }
}

/// Flow cache service over a shared [`FlowStore`].
#[derive(Clone)]
pub struct FlowCacheService {
    store: Arc<dyn FlowStore>,
}

impl Default for FlowCacheService {
    fn default() -> Self {
        Self::new(InMemoryFlowStore::default())
    }
}

impl fmt::Debug for FlowCacheService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowCacheService").finish_non_exhaustive()
    }
}

impl FlowCacheService {
    pub fn new(store: impl FlowStore) -> Self {
        Self { store: Arc::new(store) }
    }

    /// Builds the service over an already shared store.
    pub fn with_store(store: Arc<dyn FlowStore>) -> Self {
        Self { store }
    }

    fn get(&self, flow_id: FlowId) -> Result<FlowPair, OrchestrationError> {
        self.store.get(&flow_id).ok_or(OrchestrationError::FlowNotFound(flow_id))
    }

    fn insert(&self, mut pair: FlowPair) -> Result<(), OrchestrationError> {
        pair.set_last_updated(now_millis());
        self.store.insert(pair)
    }

    fn put(&self, mut pair: FlowPair) {
        pair.set_last_updated(now_millis());
        self.store.put(pair);
    }

    fn remove(&self, flow_id: FlowId) -> Result<FlowPair, OrchestrationError> {
        self.store.remove(&flow_id).ok_or(OrchestrationError::FlowNotFound(flow_id))
    }
}

impl Service<CacheRequest> for FlowCacheService {
    type Response = CacheResponse;
    type Error = OrchestrationError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: CacheRequest) -> Self::Future {
        let this = self.clone();
        Box::pin(async move {
            match request {
                CacheRequest::Get(flow_id) => this.get(flow_id).map(CacheResponse::Flow),
                CacheRequest::Insert(pair) => {
                    #[cfg(feature = "flowmgr_tracing")]
                    info!("[cache] Insert: flow_id: {}", pair.flow_id());
                    this.insert(pair).map(|_| CacheResponse::Ack)
                }
                CacheRequest::Put(pair) => {
                    #[cfg(feature = "flowmgr_tracing")]
                    info!("[cache] Put: flow_id: {}", pair.flow_id());
                    this.put(pair);
                    Ok(CacheResponse::Ack)
                }
                CacheRequest::Remove(flow_id) => {
                    #[cfg(feature = "flowmgr_tracing")]
                    info!("[cache] Remove: flow_id: {}", flow_id);
                    this.remove(flow_id).map(CacheResponse::Flow)
                }
                CacheRequest::List(filter) => {
                    Ok(CacheResponse::Flows(this.store.list(filter.as_ref())))
                }
                CacheRequest::Transition { flow_id, event } => {
                    let timestamp = now_millis();
                    let pair = this.store.modify(&flow_id, &mut |pair: &mut FlowPair| {
                        event.apply(pair);
                        pair.set_last_updated(timestamp);
                    });
                    #[cfg(feature = "flowmgr_tracing")]
                    debug!(
                        "[cache] Transition: flow_id: {}, event: {:?}, state: {:?}",
                        flow_id,
                        event,
                        pair.as_ref().map(FlowPair::state)
                    );
                    pair.map(CacheResponse::Flow).ok_or(OrchestrationError::FlowNotFound(flow_id))
                }
            }
        })
    }
}
