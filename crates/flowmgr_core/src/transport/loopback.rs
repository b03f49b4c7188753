//! # Loopback Transport Implementation
//!
//! In-process message bus for tests, simulation and single-process
//! deployments. Consumers subscribe to a logical [`Destination`] and receive
//! every envelope published to it afterwards; a destination with several
//! subscribers behaves like a broadcast topic, one without subscribers drops
//! what is published to it.
//!
//! ## Wire Check
//!
//! With wire check enabled every published envelope goes through the JSON
//! codec and back before delivery, so that serialization failures surface
//! exactly where a networked bus would report them.

use std::{future::Future, pin::Pin, sync::Arc, task::Poll};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tower::Service;
#[cfg(feature = "flowmgr_tracing")]
use tracing::debug;

use crate::{
    orchestration::{
        api::{Destination, Envelope},
        error::OrchestrationError,
    },
    transport::codec,
};

type Subscribers = DashMap<Destination, Vec<mpsc::UnboundedSender<Envelope>>>;

/// Loopback bus service.
///
/// Cloning is cheap and every clone publishes to the same subscriptions.
#[derive(Clone, Default)]
pub struct BusLoopback {
    /// Subscriptions indexed by destination.
    subscribers: Arc<Subscribers>,
    /// Round-trip every envelope through the JSON codec.
    wire_check: bool,
}

impl BusLoopback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables the JSON round-trip of every published envelope.
    pub fn with_wire_check(self, wire_check: bool) -> Self {
        Self { wire_check, ..self }
    }

    /// Receives every envelope published to `destination` from now on.
    pub fn subscribe(&self, destination: Destination) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.entry(destination).or_default().push(tx);
        rx
    }

    /// Delivers an envelope to the current subscribers of its destination.
    pub fn publish(&self, envelope: Envelope) -> Result<(), OrchestrationError> {
        let envelope = if self.wire_check {
            codec::decode(&codec::encode(&envelope)?)?
        } else {
            envelope
        };
        let destination = envelope.destination;
        let Some(mut subscribers) = self.subscribers.get_mut(&destination) else {
            #[cfg(feature = "flowmgr_tracing")]
            debug!("[loopback] No subscriber for destination: {:?}", destination);
            return Ok(());
        };
        subscribers.retain(|subscriber| !subscriber.is_closed());
        if let Some((last, others)) = subscribers.split_last() {
            for subscriber in others {
                subscriber
                    .send(envelope.clone())
                    .map_err(|_| OrchestrationError::DeliveryFailed(destination))?;
            }
            last.send(envelope).map_err(|_| OrchestrationError::DeliveryFailed(destination))?;
        }
        Ok(())
    }
}

impl Service<Envelope> for BusLoopback {
    type Response = ();
    type Error = OrchestrationError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, envelope: Envelope) -> Self::Future {
        // Published before the future is polled, so that call order is delivery order
        let result = self.publish(envelope);
        Box::pin(async move { result })
    }
}
