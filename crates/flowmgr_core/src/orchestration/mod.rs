//! Orchestration module.
//!
//! Services driving flows from a northbound command to their installed state.
//!
//! ## Handlers
//!
//! - **Router**: entry point of every inbound envelope, hands it to the handler owning its
//!   destination and payload kind
//! - **Flow Command Handler**: create, update, delete, get, dump, status and path commands
//! - **Rule stage**: opens rule transactions and pushes rules to the speaker
//! - **Speaker Response Handler**: completes or fails transactions from speaker responses
//! - **Engine error handler**: reflects topology engine failures on the cache
//! - **Transaction sweeper**: expiry of transactions the speaker never answered
//!
//! ## Services
//!
//! - **Flow Cache**: authoritative flow-pairs behind a substitutable store
//! - **Transaction Tracker**: at most one outstanding rule transaction per flow
//! - **Status State Machine**: ALLOCATED, IN_PROGRESS, UP and DOWN transitions
//! - **Resource Pool**: cookies, meters and transit vlans
//!
//! Handlers mutating the same flow share one set of per-flow locks, so that their
//! multi-step sequences never interleave while unrelated flows proceed concurrently.
//!
//! ## Default Service Stacks
//!
//! Type aliases for the stack wired by [`init_orchestrator`]:
//! - `RouterDefaultStack<B, P>`: router over the in-memory services, bus `B` and path engine `P`
//! - `SweeperDefaultStack`: stale transaction sweeper over the same services
pub mod api;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod expiry;
pub mod infrastructure;
pub mod router;
pub mod services;
pub mod speaker;
pub mod validation;

use crate::transport::{path::PathEngineClient, pending::PendingReplies};

pub type StatusDefaultStack = services::status::StatusService<services::cache::FlowCacheService>;

pub type DispatchDefaultStack<B> = dispatch::RuleDispatchService<
    services::cache::FlowCacheService,
    StatusDefaultStack,
    services::transaction::TransactionService,
    B,
>;

pub type CommandDefaultStack<B, P> = command::FlowCommandService<
    services::cache::FlowCacheService,
    StatusDefaultStack,
    DispatchDefaultStack<B>,
    P,
    B,
>;

pub type EngineDefaultStack = engine::EngineErrorService<
    services::cache::FlowCacheService,
    StatusDefaultStack,
    services::transaction::TransactionService,
>;

pub type SpeakerDefaultStack =
    speaker::SpeakerResponseService<StatusDefaultStack, services::transaction::TransactionService>;

pub type RouterDefaultStack<B, P> = router::Router<
    CommandDefaultStack<B, P>,
    DispatchDefaultStack<B>,
    EngineDefaultStack,
    SpeakerDefaultStack,
    B,
>;

pub type SweeperDefaultStack =
    expiry::TransactionSweeper<StatusDefaultStack, services::transaction::TransactionService>;

/// Initialize an orchestrator publishing through `bus` and computing paths with `path`.
///
/// # Returns
/// The router to feed with inbound envelopes, the transaction sweeper (`None` if `config`
/// disables both stale and removal expiry, not yet spawned) and the registry of awaited replies
pub fn init_orchestrator<B, P>(
    config: config::OrchestratorConfig,
    bus: B,
    path: P,
) -> (RouterDefaultStack<B, P>, Option<SweeperDefaultStack>, PendingReplies)
where
    B: tower::Service<api::Envelope, Response = (), Error = error::OrchestrationError>
        + Clone
        + Send
        + 'static,
    B::Future: Send,
{
    init_orchestrator_with_pending(config, bus, path, PendingReplies::default())
}

/// Initialize an orchestrator whose path engine is the topology engine reached over `bus`.
///
/// Path replies come back through the router, which must therefore be fed with the
/// envelopes addressed to the `Orchestrator` destination.
pub fn init_orchestrator_over_bus<B>(
    config: config::OrchestratorConfig,
    bus: B,
) -> (RouterDefaultStack<B, PathEngineClient<B>>, Option<SweeperDefaultStack>, PendingReplies)
where
    B: tower::Service<api::Envelope, Response = (), Error = error::OrchestrationError>
        + Clone
        + Send
        + 'static,
    B::Future: Send,
{
    let pending = PendingReplies::default();
    let path = PathEngineClient::new(bus.clone(), pending.clone(), config.path_timeout_ms);
    init_orchestrator_with_pending(config, bus, path, pending)
}

fn init_orchestrator_with_pending<B, P>(
    config: config::OrchestratorConfig,
    bus: B,
    path: P,
    pending: PendingReplies,
) -> (RouterDefaultStack<B, P>, Option<SweeperDefaultStack>, PendingReplies)
where
    B: tower::Service<api::Envelope, Response = (), Error = error::OrchestrationError>
        + Clone
        + Send
        + 'static,
    B::Future: Send,
{
    let cache = services::cache::FlowCacheService::default();
    let status = services::status::StatusService::new(cache.clone());
    let transactions = services::transaction::TransactionService::default();
    let resources = services::resources::ResourcePool::default();
    let locks = services::locks::FlowLocks::default();

    let dispatch: DispatchDefaultStack<B> = dispatch::RuleDispatchService::new(
        locks.clone(),
        cache.clone(),
        status.clone(),
        transactions.clone(),
        bus.clone(),
    );
    let command: CommandDefaultStack<B, P> = command::FlowCommandService::new(
        resources.clone(),
        locks.clone(),
        cache.clone(),
        status.clone(),
        dispatch.clone(),
        path,
        bus.clone(),
    )
    .with_config(config);
    let engine: EngineDefaultStack = engine::EngineErrorService::new(
        resources,
        locks.clone(),
        cache,
        status.clone(),
        transactions.clone(),
    );
    let speaker: SpeakerDefaultStack =
        speaker::SpeakerResponseService::new(locks.clone(), status.clone(), transactions.clone());
    let sweeper: Option<SweeperDefaultStack> = (config.stale_transaction_timeout().is_some()
        || config.removal_transaction_timeout().is_some())
    .then(|| {
        expiry::TransactionSweeper::new(locks, status, transactions, config.stale_transaction_timeout())
            .with_removal_timeout(config.removal_transaction_timeout())
    });

    let router = router::Router::new(pending.clone(), command, dispatch, engine, speaker, bus);
    (router, sweeper, pending)
}
