//! Flow Command Handler.
//!
//! Serves the northbound commands: create, update, delete, get, dump, status
//! and path. Each command envelope is answered by exactly one envelope
//! addressed back to the northbound under the requester's correlation id,
//! either an info payload or an error mapped onto the reported taxonomy.
//!
//! Mutations follow the same shape: precondition checks and path computation
//! first, without holding anything, then the cache write and the cache-update
//! broadcast under the flow's guard, then the hand-off to the rule stage. The
//! reply is only built once the cache-update has been published, so observers
//! mirroring the cache always learn about a change before the requester does.
//! Once the cache write is published the command has succeeded: a rule push
//! failing after it is logged and left to the flow's state, not to the reply.
use std::{future::Future, pin::Pin, task::Poll};

use tower::{Service, ServiceExt};
#[cfg(feature = "flowmgr_tracing")]
use tracing::{debug, info, warn};

use crate::orchestration::{
    api::{
        CacheRequest, CacheResponse, CommandData, CorrelationId, Destination, Envelope, InfoData,
        Message, PathRequest, PathResponse, RuleRequest, RuleResponse, StatusRequest,
        StatusResponse,
    },
    config::OrchestratorConfig,
    error::{ErrorData, OrchestrationError},
    infrastructure::flow::{
        Flow, FlowFilter, FlowId, FlowInfoData, FlowPair, FlowPathPair, FlowState, FlowUpdateType,
    },
    services::{locks::FlowLocks, resources::ResourcePool},
    validation::FlowValidator,
};

/// Flow Command Handler service
///
/// Generic over the flow cache `C`, the status service `S`, the rule stage `D`, the path
/// engine `P` and the outbound bus `B`.
#[derive(Debug, Clone)]
pub struct FlowCommandService<C, S, D, P, B> {
    /// Switch rule identifiers of every cached flow-pair
    resources: ResourcePool,
    /// Per-flow serialization shared with the other handlers
    locks: FlowLocks,
    /// Rule push policy, timeouts and validation switch
    config: OrchestratorConfig,
    /// Flow cache
    cache: C,
    /// Status state machine
    status: S,
    /// Rule stage
    dispatch: D,
    /// Path engine
    path: P,
    /// Outbound bus for cache-update broadcasts
    bus: B,
}

impl<C, S, D, P, B> FlowCommandService<C, S, D, P, B> {
    pub fn new(
        resources: ResourcePool,
        locks: FlowLocks,
        cache: C,
        status: S,
        dispatch: D,
        path: P,
        bus: B,
    ) -> Self {
        Self {
            resources,
            locks,
            config: OrchestratorConfig::default(),
            cache,
            status,
            dispatch,
            path,
            bus,
        }
    }

    pub fn with_config(self, config: OrchestratorConfig) -> Self {
        Self { config, ..self }
    }

    /// Enables the validation of create and update payloads
    pub fn with_payload_validation(self, enable: bool) -> Self {
        Self { config: self.config.with_payload_validation(enable), ..self }
    }

    fn validate(&self, flow: Flow) -> Result<Flow, OrchestrationError> {
        if self.config.payload_validation { FlowValidator.validate(flow) } else { Ok(flow) }
    }
}

impl<C, S, D, P, B> FlowCommandService<C, S, D, P, B>
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
    D: Service<RuleRequest, Response = RuleResponse, Error = OrchestrationError>
        + Clone
        + Send
        + 'static,
    D::Future: Send,
    P: Service<PathRequest, Response = PathResponse, Error = OrchestrationError>
        + Clone
        + Send
        + 'static,
    P::Future: Send,
    B: Service<Envelope, Response = (), Error = OrchestrationError> + Clone + Send + 'static,
    B::Future: Send,
{
    async fn get(&mut self, flow_id: FlowId) -> Result<FlowPair, OrchestrationError> {
        match self.cache.ready().await?.call(CacheRequest::Get(flow_id)).await? {
            CacheResponse::Flow(pair) => Ok(pair),
            _ => Err(OrchestrationError::InternalOrchestrationError),
        }
    }

    async fn compute_paths(&mut self, flow: &Flow) -> Result<FlowPathPair, OrchestrationError> {
        match self.path.ready().await?.call(PathRequest::Compute(flow.clone())).await? {
            PathResponse::Paths(paths) => Ok(paths),
        }
    }

    /// Hands a request to the rule stage, which reverts the flow's state itself on failure
    async fn push_rules(&mut self, _flow_id: &str, request: RuleRequest) {
        let result = match self.dispatch.ready().await {
            Ok(dispatch) => dispatch.call(request).await,
            Err(error) => Err(error),
        };
        if let Err(_error) = result {
            #[cfg(feature = "flowmgr_tracing")]
            warn!("[command] Rule stage failed: flow_id: {}, error: {}", _flow_id, _error);
        }
    }

    async fn publish_cache_update(
        &mut self,
        operation: FlowUpdateType,
        pair: &FlowPair,
        correlation_id: &Option<CorrelationId>,
    ) -> Result<(), OrchestrationError> {
        #[cfg(feature = "flowmgr_tracing")]
        debug!("[command] Cache update: flow_id: {}, operation: {:?}", pair.flow_id(), operation);
        let envelope = Envelope::info(
            Destination::CacheUpdate,
            correlation_id.clone(),
            InfoData::CacheUpdate(FlowInfoData::new(operation, pair)),
        );
        self.bus.ready().await?.call(envelope).await
    }

    async fn create(
        &mut self,
        flow: Flow,
        correlation_id: &Option<CorrelationId>,
    ) -> Result<InfoData, OrchestrationError> {
        let flow = self.validate(flow)?;
        let flow_id = flow.flow_id.clone();
        #[cfg(feature = "flowmgr_tracing")]
        info!("[command] Create: flow_id: {}", flow_id);

        match self.get(flow_id.clone()).await {
            Ok(_) => return Err(OrchestrationError::FlowAlreadyExists(flow_id)),
            Err(OrchestrationError::FlowNotFound(_)) => {}
            Err(error) => return Err(error),
        }

        let paths = self.compute_paths(&flow).await.map_err(OrchestrationError::into_creation_failure)?;

        let mut forward = flow;
        forward.flow_path = paths.forward;
        forward.state = FlowState::Allocated;
        forward.transaction_id = None;
        forward.confirmed = false;
        let mut reverse = forward.reverse();
        reverse.flow_path = paths.reverse;
        let mut pair = FlowPair::new(forward, reverse);

        {
            let _guard = self.locks.acquire(&flow_id).await;
            // A concurrent create of the same id may have won while the path was computed
            match self.get(flow_id.clone()).await {
                Ok(_) => return Err(OrchestrationError::FlowAlreadyExists(flow_id)),
                Err(OrchestrationError::FlowNotFound(_)) => {}
                Err(error) => return Err(error),
            }
            self.resources.allocate(&flow_id)?.assign(&mut pair);
            if let Err(error) = self.cache.ready().await?.call(CacheRequest::Insert(pair.clone())).await {
                self.resources.release(&flow_id);
                return Err(error);
            }
            if let Err(error) = self.publish_cache_update(FlowUpdateType::Create, &pair, correlation_id).await {
                #[cfg(feature = "flowmgr_tracing")]
                warn!("[command] Create rolled back: flow_id: {}, error: {}", flow_id, error);
                self.cache.ready().await?.call(CacheRequest::Remove(flow_id.clone())).await?;
                self.resources.release(&flow_id);
                return Err(error);
            }
        }

        if self.config.install_on_create {
            let request = RuleRequest::Install { flow_id: flow_id.clone(), correlation_id: correlation_id.clone() };
            self.push_rules(&flow_id, request).await;
        }

        Ok(InfoData::Flow(pair.forward))
    }

    async fn update(
        &mut self,
        flow: Flow,
        correlation_id: &Option<CorrelationId>,
    ) -> Result<InfoData, OrchestrationError> {
        let flow = self.validate(flow)?;
        let flow_id = flow.flow_id.clone();
        #[cfg(feature = "flowmgr_tracing")]
        info!("[command] Update: flow_id: {}", flow_id);

        let existing = self.get(flow_id.clone()).await?;
        let paths = if existing.forward.is_path_affected_by(&flow) {
            match self.compute_paths(&flow).await {
                Ok(paths) => paths,
                Err(error) => {
                    // The flow can no longer be routed as requested
                    self.push_rules(&flow_id, RuleRequest::Abandon { flow_id: flow_id.clone() }).await;
                    return Err(error.into_update_failure());
                }
            }
        } else {
            FlowPathPair {
                forward: existing.forward.flow_path.clone(),
                reverse: existing.reverse.flow_path.clone(),
            }
        };

        let pair = {
            let _guard = self.locks.acquire(&flow_id).await;
            // Deleted while the path was being computed
            let existing = self.get(flow_id.clone()).await?;

            let mut forward = flow;
            forward.flow_path = paths.forward;
            forward.cookie = existing.forward.cookie;
            forward.meter_id = existing.forward.meter_id;
            forward.transit_vlan = existing.forward.transit_vlan;
            forward.state = FlowState::Allocated;
            forward.transaction_id = None;
            let mut reverse = forward.reverse();
            reverse.flow_path = paths.reverse;
            reverse.cookie = existing.reverse.cookie;
            reverse.meter_id = existing.reverse.meter_id;
            reverse.transit_vlan = existing.reverse.transit_vlan;
            let mut pair = FlowPair::new(forward, reverse);
            pair.set_confirmed(existing.is_confirmed());

            self.cache.ready().await?.call(CacheRequest::Put(pair.clone())).await?;
            if let Err(error) = self.publish_cache_update(FlowUpdateType::Update, &pair, correlation_id).await {
                #[cfg(feature = "flowmgr_tracing")]
                warn!("[command] Update rolled back: flow_id: {}, error: {}", flow_id, error);
                self.cache.ready().await?.call(CacheRequest::Put(existing)).await?;
                return Err(error);
            }
            pair
        };

        if self.config.reinstall_on_update {
            let request = RuleRequest::Install { flow_id: flow_id.clone(), correlation_id: correlation_id.clone() };
            self.push_rules(&flow_id, request).await;
        }

        Ok(InfoData::Flow(pair.forward))
    }

    async fn delete(
        &mut self,
        flow_id: FlowId,
        correlation_id: &Option<CorrelationId>,
    ) -> Result<InfoData, OrchestrationError> {
        #[cfg(feature = "flowmgr_tracing")]
        info!("[command] Delete: flow_id: {}", flow_id);

        let pair = {
            let _guard = self.locks.acquire(&flow_id).await;
            let pair = match self.cache.ready().await?.call(CacheRequest::Remove(flow_id.clone())).await? {
                CacheResponse::Flow(pair) => pair,
                _ => return Err(OrchestrationError::InternalOrchestrationError),
            };
            if let Err(error) = self.publish_cache_update(FlowUpdateType::Delete, &pair, correlation_id).await {
                #[cfg(feature = "flowmgr_tracing")]
                warn!("[command] Delete rolled back: flow_id: {}, error: {}", flow_id, error);
                self.cache.ready().await?.call(CacheRequest::Put(pair)).await?;
                return Err(error);
            }
            self.resources.release(&flow_id);
            pair
        };

        // The transaction outlives the cache row until the speaker confirms the removal
        let request = RuleRequest::Remove { pair: pair.clone(), correlation_id: correlation_id.clone() };
        self.push_rules(&flow_id, request).await;

        Ok(InfoData::Flow(pair.forward))
    }

    async fn dump(&mut self, filter: Option<FlowFilter>) -> Result<InfoData, OrchestrationError> {
        match self.cache.ready().await?.call(CacheRequest::List(filter)).await? {
            CacheResponse::Flows(pairs) => {
                let mut flows: Vec<Flow> = pairs.into_iter().map(|pair| pair.forward).collect();
                flows.sort_by(|a, b| a.flow_id.cmp(&b.flow_id));
                Ok(InfoData::Flows { flows })
            }
            _ => Err(OrchestrationError::InternalOrchestrationError),
        }
    }

    /// Internal method to run one northbound command
    async fn handle(
        &mut self,
        command: CommandData,
        correlation_id: &Option<CorrelationId>,
    ) -> Result<InfoData, OrchestrationError> {
        match command {
            CommandData::FlowCreate(flow) => self.create(flow, correlation_id).await,
            CommandData::FlowUpdate(flow) => self.update(flow, correlation_id).await,
            CommandData::FlowDelete { flow_id } => self.delete(flow_id, correlation_id).await,
            CommandData::FlowGet { flow_id } => {
                Ok(InfoData::Flow(self.get(flow_id).await?.forward))
            }
            CommandData::FlowsGet { filter } => self.dump(filter).await,
            CommandData::FlowStatus { flow_id } => {
                match self.status.ready().await?.call(StatusRequest::Query(flow_id.clone())).await? {
                    StatusResponse::State(state) => Ok(InfoData::FlowStatus { flow_id, state }),
                }
            }
            CommandData::FlowPath { flow_id } => {
                let pair = self.get(flow_id.clone()).await?;
                Ok(InfoData::FlowPath { flow_id, path: pair.forward.flow_path })
            }
            command @ (CommandData::PathRequest(_) | CommandData::Rule(_)) => {
                Err(OrchestrationError::UnroutableEnvelope(format!("{command:?}")))
            }
        }
    }
}

impl<C, S, D, P, B> Service<Envelope> for FlowCommandService<C, S, D, P, B>
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
    D: Service<RuleRequest, Response = RuleResponse, Error = OrchestrationError>
        + Clone
        + Send
        + 'static,
    D::Future: Send,
    P: Service<PathRequest, Response = PathResponse, Error = OrchestrationError>
        + Clone
        + Send
        + 'static,
    P::Future: Send,
    B: Service<Envelope, Response = (), Error = OrchestrationError> + Clone + Send + 'static,
    B::Future: Send,
{
    /// Reply for the northbound
    type Response = Envelope;
    type Error = OrchestrationError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _: &mut std::task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, envelope: Envelope) -> Self::Future {
        let mut this = self.clone();
        Box::pin(async move {
            let Envelope { correlation_id, message, .. } = envelope;
            let Message::Command(command) = message else {
                return Err(OrchestrationError::UnroutableEnvelope(format!("{message:?}")));
            };
            if matches!(command, CommandData::PathRequest(_) | CommandData::Rule(_)) {
                return Err(OrchestrationError::UnroutableEnvelope(format!("{command:?}")));
            }
            let reply = match this.handle(command, &correlation_id).await {
                Ok(info) => Message::Info(info),
                Err(error) => {
                    #[cfg(feature = "flowmgr_tracing")]
                    warn!("[command] Failed: correlation_id: {:?}, error: {}", correlation_id, error);
                    Message::Error(ErrorData::from(error))
                }
            };
            Ok(Envelope::new(Destination::Northbound, correlation_id, reply))
        })
    }
}
