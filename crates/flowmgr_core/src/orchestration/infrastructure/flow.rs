//! Flow model.
//!
//! A [`Flow`] is one direction of a provisioned path. Both directions of a
//! logical flow share one identifier and are owned together as a
//! [`FlowPair`], which is the unit stored in the flow cache.
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier shared by both directions of a flow.
pub type FlowId = String;

/// Identifier correlating emitted switch rules with their confirmations.
pub type TransactionId = u64;

/// Externally visible status of a flow.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowState {
    /// Stored, no rule operation outstanding, not confirmed since the last write.
    #[default]
    Allocated,
    /// A rule install or remove transaction is outstanding.
    InProgress,
    /// Rules confirmed by the speaker.
    Up,
    /// A rule operation failed or the flow was reported down.
    Down,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            FlowState::Allocated => "ALLOCATED",
            FlowState::InProgress => "IN_PROGRESS",
            FlowState::Up => "UP",
            FlowState::Down => "DOWN",
        };
        write!(f, "{state}")
    }
}

/// One hop of a computed path.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathNode {
    pub switch_id: String,
    pub port_no: u32,
    pub seq_id: u32,
    pub segment_latency: u64,
}

impl PathNode {
    pub fn new(switch_id: impl Into<String>, port_no: u32, seq_id: u32) -> Self {
        Self { switch_id: switch_id.into(), port_no, seq_id, segment_latency: 0 }
    }
}

/// Ordered hops from source to destination, as produced by the path engine.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathInfoData {
    pub latency: u64,
    pub path: Vec<PathNode>,
}

impl PathInfoData {
    pub fn new(latency: u64, path: Vec<PathNode>) -> Self {
        Self { latency, path }
    }

    /// Same hops walked from destination to source, renumbered from zero.
    pub fn reversed(&self) -> Self {
        let path = self
            .path
            .iter()
            .rev()
            .enumerate()
            .map(|(seq_id, node)| PathNode { seq_id: seq_id as u32, ..node.clone() })
            .collect();
        Self { latency: self.latency, path }
    }

    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }
}

/// Forward and reverse paths computed for a flow.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowPathPair {
    pub forward: PathInfoData,
    pub reverse: PathInfoData,
}

/// One direction of a provisioned path.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    pub flow_id: FlowId,
    pub bandwidth: i64,
    pub description: String,
    pub source_switch: String,
    pub source_port: u32,
    pub source_vlan: u16,
    pub destination_switch: String,
    pub destination_port: u32,
    pub destination_vlan: u16,
    pub cookie: u64,
    pub meter_id: u32,
    pub transit_vlan: u16,
    pub flow_path: PathInfoData,
    pub state: FlowState,
    pub transaction_id: Option<TransactionId>,
    /// Set once a rule transaction of the flow completed, kept across updates.
    #[serde(default)]
    pub confirmed: bool,
    /// Milliseconds since the Unix epoch of the last cache write.
    pub last_updated: u64,
}

impl Flow {
    /// Builds a flow as submitted by a northbound requester.
    ///
    /// Switch rule identifiers are left unassigned until allocation.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        flow_id: impl Into<FlowId>,
        bandwidth: i64,
        description: impl Into<String>,
        source_switch: impl Into<String>,
        source_port: u32,
        source_vlan: u16,
        destination_switch: impl Into<String>,
        destination_port: u32,
        destination_vlan: u16,
    ) -> Self {
        Self {
            flow_id: flow_id.into(),
            bandwidth,
            description: description.into(),
            source_switch: source_switch.into(),
            source_port,
            source_vlan,
            destination_switch: destination_switch.into(),
            destination_port,
            destination_vlan,
            ..Default::default()
        }
    }

    /// The opposite direction: endpoints swapped, switch rule identifiers cleared.
    pub fn reverse(&self) -> Self {
        Self {
            flow_id: self.flow_id.clone(),
            bandwidth: self.bandwidth,
            description: self.description.clone(),
            source_switch: self.destination_switch.clone(),
            source_port: self.destination_port,
            source_vlan: self.destination_vlan,
            destination_switch: self.source_switch.clone(),
            destination_port: self.source_port,
            destination_vlan: self.source_vlan,
            ..Default::default()
        }
    }

    pub fn is_one_switch(&self) -> bool {
        self.source_switch == self.destination_switch
    }

    /// Whether `other` moves an endpoint or changes the reserved bandwidth.
    pub fn is_path_affected_by(&self, other: &Flow) -> bool {
        self.bandwidth != other.bandwidth
            || self.source_switch != other.source_switch
            || self.source_port != other.source_port
            || self.source_vlan != other.source_vlan
            || self.destination_switch != other.destination_switch
            || self.destination_port != other.destination_port
            || self.destination_vlan != other.destination_vlan
    }

    /// Whether the flow starts or ends on `switch_id`, or crosses it.
    pub fn touches_switch(&self, switch_id: &str) -> bool {
        self.source_switch == switch_id
            || self.destination_switch == switch_id
            || self.flow_path.path.iter().any(|node| node.switch_id == switch_id)
    }
}

/// Both directions of a flow, stored and mutated together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowPair {
    pub forward: Flow,
    pub reverse: Flow,
}

impl FlowPair {
    pub fn new(forward: Flow, reverse: Flow) -> Self {
        Self { forward, reverse }
    }

    pub fn flow_id(&self) -> &str {
        &self.forward.flow_id
    }

    pub fn state(&self) -> FlowState {
        self.forward.state
    }

    pub fn set_state(&mut self, state: FlowState) {
        self.forward.state = state;
        self.reverse.state = state;
    }

    pub fn set_transaction_id(&mut self, transaction_id: Option<TransactionId>) {
        self.forward.transaction_id = transaction_id;
        self.reverse.transaction_id = transaction_id;
    }

    /// Whether the speaker ever confirmed the rules of this flow-pair.
    pub fn is_confirmed(&self) -> bool {
        self.forward.confirmed
    }

    pub fn set_confirmed(&mut self, confirmed: bool) {
        self.forward.confirmed = confirmed;
        self.reverse.confirmed = confirmed;
    }

    pub fn set_last_updated(&mut self, timestamp: u64) {
        self.forward.last_updated = timestamp;
        self.reverse.last_updated = timestamp;
    }
}

/// Optional criteria for dumping flows.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowFilter {
    pub switch_id: Option<String>,
    pub state: Option<FlowState>,
}

impl FlowFilter {
    pub fn matches(&self, pair: &FlowPair) -> bool {
        let switch_matches = self
            .switch_id
            .as_deref()
            .is_none_or(|switch_id| pair.forward.touches_switch(switch_id));
        let state_matches = self.state.is_none_or(|state| pair.state() == state);
        switch_matches && state_matches
    }
}

/// Kind of change announced on the cache-update channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowUpdateType {
    Create,
    Update,
    Delete,
}

/// Cache-update payload: the change kind and both directions after the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowInfoData {
    pub flow_id: FlowId,
    pub operation: FlowUpdateType,
    pub forward: Flow,
    pub reverse: Flow,
}

impl FlowInfoData {
    pub fn new(operation: FlowUpdateType, pair: &FlowPair) -> Self {
        Self {
            flow_id: pair.flow_id().to_string(),
            operation,
            forward: pair.forward.clone(),
            reverse: pair.reverse.clone(),
        }
    }
}
