//! JSON wire form of envelopes.
use crate::orchestration::{api::Envelope, error::OrchestrationError};

pub fn encode(envelope: &Envelope) -> Result<String, OrchestrationError> {
    serde_json::to_string(envelope)
        .map_err(|error| OrchestrationError::SerializationFailed(error.to_string()))
}

pub fn decode(payload: &str) -> Result<Envelope, OrchestrationError> {
    serde_json::from_str(payload)
        .map_err(|error| OrchestrationError::SerializationFailed(error.to_string()))
}
