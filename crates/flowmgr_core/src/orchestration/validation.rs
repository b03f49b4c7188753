//! Validation of northbound flow payloads.
//!
//! Rejects create and update payloads that no switch could ever install before
//! they reach the cache or the path engine. Enabled on the command handler
//! with `with_payload_validation(true)`.

use crate::orchestration::{error::OrchestrationError, infrastructure::flow::Flow};

pub const MAX_VLAN_ID: u16 = 4095;

#[derive(Debug, Clone)]
pub struct FlowValidator;

impl FlowValidator {
    /// Checks the fields a requester controls.
    ///
    /// # Returns
    /// The payload unchanged when valid, `InvalidFlow` naming the first violation otherwise
    pub fn validate(&self, flow: Flow) -> Result<Flow, OrchestrationError> {
        let violation = if flow.flow_id.trim().is_empty() {
            Some("flow id is empty")
        } else if flow.bandwidth < 0 {
            Some("bandwidth is negative")
        } else if flow.source_vlan > MAX_VLAN_ID || flow.destination_vlan > MAX_VLAN_ID {
            Some("vlan id out of range")
        } else if flow.source_switch.is_empty() || flow.destination_switch.is_empty() {
            Some("endpoint switch is missing")
        } else if flow.source_switch == flow.destination_switch
            && flow.source_port == flow.destination_port
            && flow.source_vlan == flow.destination_vlan
        {
            Some("source and destination endpoints are identical")
        } else {
            None
        };
        match violation {
            Some(reason) => Err(OrchestrationError::InvalidFlow(flow.flow_id, reason.to_string())),
            None => Ok(flow),
        }
    }
}
