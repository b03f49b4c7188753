//! Message bus plumbing.
//!
//! The orchestrator publishes envelopes through any service implementing
//! `Service<Envelope, Response = (), Error = OrchestrationError>`. Delivery
//! is one-way: publishing never waits for the consumer. Replies, when a
//! component needs one, come back as separate envelopes and are matched by
//! correlation id through [`pending::PendingReplies`].
//!
//! - [`loopback`]: in-process bus with per-destination subscriptions
//! - [`nop`]: bus and path engine that do nothing, for unit tests
//! - [`path`]: path engine client speaking over the bus
//! - [`codec`]: JSON wire form of envelopes

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crate::orchestration::api::CorrelationId;

pub mod codec;
pub mod loopback;
pub mod nop;
pub mod path;
pub mod pending;

/// Generates correlation ids unique within the process, prefixed by their issuer.
#[derive(Debug, Clone)]
pub struct CorrelationIdGenerator {
    prefix: String,
    next: Arc<AtomicU64>,
}

impl CorrelationIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into(), next: Arc::new(AtomicU64::new(1)) }
    }

    pub fn next_id(&self) -> CorrelationId {
        format!("{}-{}", self.prefix, self.next.fetch_add(1, Ordering::Relaxed))
    }
}
