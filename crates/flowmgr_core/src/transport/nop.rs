use std::{pin::Pin, task::Poll};

use tower::Service;

use crate::orchestration::{
    api::{Envelope, PathRequest, PathResponse},
    error::OrchestrationError,
    infrastructure::flow::FlowPathPair,
};

/// Bus that accepts and discards every envelope.
#[derive(Clone, Default)]
pub struct BusNop;

impl Service<Envelope> for BusNop {
    type Response = ();
    type Error = OrchestrationError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _: Envelope) -> Self::Future {
        Box::pin(async move { Ok(()) })
    }
}

/// Path engine answering every request with empty paths of zero latency.
#[derive(Clone, Default)]
pub struct PathNop;

impl Service<PathRequest> for PathNop {
    type Response = PathResponse;
    type Error = OrchestrationError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: PathRequest) -> Self::Future {
        Box::pin(async move {
            Ok(match request {
                PathRequest::Compute(_) => PathResponse::Paths(FlowPathPair::default()),
            })
        })
    }
}
