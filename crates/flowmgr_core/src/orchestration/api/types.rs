//! Orchestration API type definitions.
//!
//! Two families of types live here.
//!
//! ## Envelopes
//! Everything exchanged with collaborators travels as an [`Envelope`]: a
//! correlation id, a timestamp, a logical [`Destination`] and a [`Message`].
//! The message is a closed sum of command, info and error payloads, each
//! tagged by an explicit discriminant so that the router can match them
//! exhaustively and the wire form stays self-describing.
//!
//! ## Internal Service APIs
//! Request/response types of the services composing the orchestrator:
//! - **Cache**: flow-pair storage keyed by flow id
//! - **Transaction**: outstanding switch rule transactions
//! - **Status**: status queries and transitions
//! - **Path**: path computation by the external engine
//! - **Rule**: the rule stage pushing rules to the speaker
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::orchestration::{
    error::ErrorData,
    infrastructure::{
        flow::{
            Flow, FlowFilter, FlowId, FlowInfoData, FlowPair, FlowPathPair, FlowState,
            PathInfoData, TransactionId,
        },
        rules::{OperationKind, RuleCommand},
    },
    services::{status::StatusEvent, transaction::TransactionRecord},
};

/// Correlates a reply with the request that caused it.
pub type CorrelationId = String;

/// Logical channel an envelope is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Destination {
    /// Replies to northbound requesters.
    Northbound,
    /// Inbound commands for the orchestrator, from the northbound or the topology engine.
    Orchestrator,
    /// Path computation and persistence engine.
    TopologyEngine,
    /// Switch speaker.
    Speaker,
    /// Inbound speaker responses correlated by transaction.
    TransactionTracker,
    /// Broadcast of every successful flow-pair change.
    CacheUpdate,
}

/// Command payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum CommandData {
    #[serde(rename = "create-flow")]
    FlowCreate(Flow),
    #[serde(rename = "update-flow")]
    FlowUpdate(Flow),
    #[serde(rename = "delete-flow")]
    FlowDelete { flow_id: FlowId },
    #[serde(rename = "get-flow")]
    FlowGet { flow_id: FlowId },
    #[serde(rename = "get-flows")]
    FlowsGet { filter: Option<FlowFilter> },
    #[serde(rename = "status-flow")]
    FlowStatus { flow_id: FlowId },
    #[serde(rename = "path-flow")]
    FlowPath { flow_id: FlowId },
    /// Path computation request for the topology engine.
    #[serde(rename = "path-request")]
    PathRequest(Flow),
    /// Switch rule, from the topology engine to the orchestrator or from the orchestrator to
    /// the speaker. The speaker echoes it back to the transaction tracker once applied.
    #[serde(rename = "rule")]
    Rule(RuleCommand),
}

impl CommandData {
    /// Flow the command is about, if any.
    pub fn flow_id(&self) -> Option<&str> {
        match self {
            CommandData::FlowCreate(flow)
            | CommandData::FlowUpdate(flow)
            | CommandData::PathRequest(flow) => Some(&flow.flow_id),
            CommandData::FlowDelete { flow_id }
            | CommandData::FlowGet { flow_id }
            | CommandData::FlowStatus { flow_id }
            | CommandData::FlowPath { flow_id } => Some(flow_id),
            CommandData::Rule(rule) => Some(&rule.flow_id),
            CommandData::FlowsGet { .. } => None,
        }
    }
}

/// Info payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum InfoData {
    Flow(Flow),
    Flows { flows: Vec<Flow> },
    FlowStatus { flow_id: FlowId, state: FlowState },
    FlowPath { flow_id: FlowId, path: PathInfoData },
    CacheUpdate(FlowInfoData),
    Path(FlowPathPair),
    /// Speaker confirmation of an applied rule.
    RuleConfirmation { flow_id: FlowId, transaction_id: TransactionId },
    /// Speaker report that a flow no longer forwards traffic.
    FlowDown { flow_id: FlowId },
}

/// Envelope body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum Message {
    Command(CommandData),
    Info(InfoData),
    Error(ErrorData),
}

/// Unit of exchange on every logical channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// `None` when the envelope answers nobody.
    pub correlation_id: Option<CorrelationId>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    pub destination: Destination,
    pub message: Message,
}

impl Envelope {
    pub fn new(
        destination: Destination,
        correlation_id: Option<CorrelationId>,
        message: Message,
    ) -> Self {
        Self { correlation_id, timestamp: now_millis(), destination, message }
    }

    pub fn command(
        destination: Destination,
        correlation_id: Option<CorrelationId>,
        command: CommandData,
    ) -> Self {
        Self::new(destination, correlation_id, Message::Command(command))
    }

    pub fn info(
        destination: Destination,
        correlation_id: Option<CorrelationId>,
        info: InfoData,
    ) -> Self {
        Self::new(destination, correlation_id, Message::Info(info))
    }

    pub fn error(
        destination: Destination,
        correlation_id: Option<CorrelationId>,
        error: ErrorData,
    ) -> Self {
        Self::new(destination, correlation_id, Message::Error(error))
    }
}

/// Milliseconds since the Unix epoch, 0 if the clock is before it.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

/// Flow cache request types.
#[derive(Debug, Clone)]
pub enum CacheRequest {
    /// Look up a flow-pair.
    Get(FlowId),
    /// Insert a new flow-pair, failing if the id is already cached.
    Insert(FlowPair),
    /// Insert or replace a flow-pair.
    Put(FlowPair),
    /// Remove a flow-pair and return it.
    Remove(FlowId),
    /// Snapshot of the flow-pairs matching the optional filter.
    List(Option<FlowFilter>),
    /// Apply a status event to a cached flow-pair.
    Transition { flow_id: FlowId, event: StatusEvent },
}

/// Flow cache response types.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheResponse {
    Flow(FlowPair),
    Flows(Vec<FlowPair>),
    Ack,
}

/// Transaction tracker request types.
#[derive(Debug, Clone)]
pub enum TransactionRequest {
    /// Open a transaction expecting `expected` confirmations, replacing any outstanding one.
    Begin { flow_id: FlowId, operation: OperationKind, expected: usize },
    /// Account for one confirmation.
    Confirm { flow_id: FlowId, transaction_id: TransactionId },
    /// Clear the outstanding transaction after an error.
    Fail(FlowId),
    /// Outstanding transaction of a flow, if any.
    Get(FlowId),
    /// Clear and return every transaction older than the given age in milliseconds,
    /// only those of `operation` if set.
    Expire { older_than_ms: u64, operation: Option<OperationKind> },
}

/// Transaction tracker response types.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionResponse {
    Begun(TransactionId),
    /// The transaction id matched; `completed` once every expected confirmation arrived.
    Confirmed { completed: bool },
    /// The transaction id did not match the outstanding one.
    Rejected,
    Failed(Option<OperationKind>),
    Record(Option<TransactionRecord>),
    Expired(Vec<TransactionRecord>),
}

/// Status service request types.
#[derive(Debug, Clone)]
pub enum StatusRequest {
    Query(FlowId),
    Apply { flow_id: FlowId, event: StatusEvent },
}

/// Status service response types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusResponse {
    State(FlowState),
}

/// Path computation request types.
#[derive(Debug, Clone)]
pub enum PathRequest {
    Compute(Flow),
}

/// Path computation response types.
#[derive(Debug, Clone, PartialEq)]
pub enum PathResponse {
    Paths(FlowPathPair),
}

/// Rule stage request types.
#[derive(Debug, Clone)]
pub enum RuleRequest {
    /// Push every install rule of a cached flow.
    Install { flow_id: FlowId, correlation_id: Option<CorrelationId> },
    /// Push the remove rules of a flow-pair that may already be gone from the cache.
    Remove { pair: FlowPair, correlation_id: Option<CorrelationId> },
    /// Forward a single rule issued by the topology engine.
    Forward { rule: RuleCommand, correlation_id: Option<CorrelationId> },
    /// Drop the outstanding transaction of a flow and take it DOWN.
    Abandon { flow_id: FlowId },
}

/// Rule stage response types.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleResponse {
    /// Rules emitted under the given transaction.
    Pushed { transaction_id: TransactionId, rules: usize },
    /// Nothing to push.
    Skipped,
    /// The flow was taken DOWN.
    Abandoned,
}
