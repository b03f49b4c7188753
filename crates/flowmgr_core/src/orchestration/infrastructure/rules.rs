//! Switch rule commands exchanged with the speaker.
//!
//! Rules are derived from a flow direction's endpoints and computed path: a
//! flow whose endpoints sit on the same switch needs a single one-switch rule,
//! any other flow needs an ingress rule, one transit rule per intermediate
//! switch and an egress rule.
use serde::{Deserialize, Serialize};

use super::flow::{Flow, FlowId, FlowPair, TransactionId};

/// Kind of rule operation tracked by a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Install,
    Remove,
}

/// VLAN rewrite applied on the output side of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputVlanType {
    None,
    Push,
    Pop,
    Replace,
}

impl OutputVlanType {
    /// Rewrite needed to go from `input_vlan` to `output_vlan`, 0 meaning untagged.
    pub fn between(input_vlan: u16, output_vlan: u16) -> Self {
        match (input_vlan, output_vlan) {
            (0, 0) => OutputVlanType::None,
            (0, _) => OutputVlanType::Push,
            (_, 0) => OutputVlanType::Pop,
            (_, _) => OutputVlanType::Replace,
        }
    }
}

/// Match and action part of a rule, per rule variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Rule {
    InstallOneSwitchFlow {
        input_port: u32,
        output_port: u32,
        input_vlan: u16,
        output_vlan: u16,
        output_vlan_type: OutputVlanType,
        bandwidth: i64,
        meter_id: u32,
    },
    InstallIngressFlow {
        input_port: u32,
        output_port: u32,
        input_vlan: u16,
        transit_vlan: u16,
        output_vlan_type: OutputVlanType,
        bandwidth: i64,
        meter_id: u32,
    },
    InstallTransitFlow {
        input_port: u32,
        output_port: u32,
        transit_vlan: u16,
    },
    InstallEgressFlow {
        input_port: u32,
        output_port: u32,
        transit_vlan: u16,
        output_vlan: u16,
        output_vlan_type: OutputVlanType,
    },
    RemoveFlow {
        meter_id: Option<u32>,
    },
}

impl Rule {
    pub fn operation(&self) -> OperationKind {
        match self {
            Rule::RemoveFlow { .. } => OperationKind::Remove,
            _ => OperationKind::Install,
        }
    }
}

/// A rule addressed to one switch on behalf of one flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCommand {
    pub transaction_id: TransactionId,
    pub flow_id: FlowId,
    pub cookie: u64,
    pub switch_id: String,
    pub rule: Rule,
}

impl RuleCommand {
    pub fn new(flow: &Flow, switch_id: impl Into<String>, rule: Rule) -> Self {
        Self {
            transaction_id: 0,
            flow_id: flow.flow_id.clone(),
            cookie: flow.cookie,
            switch_id: switch_id.into(),
            rule,
        }
    }

    pub fn operation(&self) -> OperationKind {
        self.rule.operation()
    }

    pub fn with_transaction_id(self, transaction_id: TransactionId) -> Self {
        Self { transaction_id, ..self }
    }
}

/// Install rules for both directions of a flow.
///
/// A multi-switch direction without a computed path yields no rules.
pub fn install_rules(pair: &FlowPair) -> Vec<RuleCommand> {
    direction_install_rules(&pair.forward)
        .into_iter()
        .chain(direction_install_rules(&pair.reverse))
        .collect()
}

/// Remove rules for every switch touched by both directions of a flow.
pub fn remove_rules(pair: &FlowPair) -> Vec<RuleCommand> {
    direction_remove_rules(&pair.forward)
        .into_iter()
        .chain(direction_remove_rules(&pair.reverse))
        .collect()
}

fn direction_install_rules(flow: &Flow) -> Vec<RuleCommand> {
    if flow.is_one_switch() {
        return vec![RuleCommand::new(
            flow,
            flow.source_switch.clone(),
            Rule::InstallOneSwitchFlow {
                input_port: flow.source_port,
                output_port: flow.destination_port,
                input_vlan: flow.source_vlan,
                output_vlan: flow.destination_vlan,
                output_vlan_type: OutputVlanType::between(flow.source_vlan, flow.destination_vlan),
                bandwidth: flow.bandwidth,
                meter_id: flow.meter_id,
            },
        )];
    }

    let path = &flow.flow_path.path;
    let (Some(first), Some(last)) = (path.first(), path.last()) else {
        return Vec::new();
    };

    let mut rules = vec![RuleCommand::new(
        flow,
        flow.source_switch.clone(),
        Rule::InstallIngressFlow {
            input_port: flow.source_port,
            output_port: first.port_no,
            input_vlan: flow.source_vlan,
            transit_vlan: flow.transit_vlan,
            output_vlan_type: OutputVlanType::between(flow.source_vlan, flow.transit_vlan),
            bandwidth: flow.bandwidth,
            meter_id: flow.meter_id,
        },
    )];

    // Hops come in (ingress port, egress port) pairs on each intermediate switch
    if path.len() > 2 {
        for hop in path[1..path.len() - 1].chunks_exact(2) {
            rules.push(RuleCommand::new(
                flow,
                hop[0].switch_id.clone(),
                Rule::InstallTransitFlow {
                    input_port: hop[0].port_no,
                    output_port: hop[1].port_no,
                    transit_vlan: flow.transit_vlan,
                },
            ));
        }
    }

    rules.push(RuleCommand::new(
        flow,
        flow.destination_switch.clone(),
        Rule::InstallEgressFlow {
            input_port: last.port_no,
            output_port: flow.destination_port,
            transit_vlan: flow.transit_vlan,
            output_vlan: flow.destination_vlan,
            output_vlan_type: OutputVlanType::between(flow.transit_vlan, flow.destination_vlan),
        },
    ));
    rules
}

fn direction_remove_rules(flow: &Flow) -> Vec<RuleCommand> {
    let mut switches = vec![flow.source_switch.clone()];
    for node in &flow.flow_path.path {
        if switches.last() != Some(&node.switch_id) {
            switches.push(node.switch_id.clone());
        }
    }
    if switches.last() != Some(&flow.destination_switch) {
        switches.push(flow.destination_switch.clone());
    }

    switches
        .into_iter()
        .enumerate()
        .map(|(index, switch_id)| {
            // Only the ingress switch carries the meter
            let meter_id = (index == 0).then_some(flow.meter_id);
            RuleCommand::new(flow, switch_id, Rule::RemoveFlow { meter_id })
        })
        .collect()
}
