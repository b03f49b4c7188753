//! Internal failure conditions and their mapping onto the reported error vocabulary.
//!
//! Services fail with [`OrchestrationError`], which names the precise internal
//! condition. Before anything leaves the orchestrator it is mapped onto the
//! closed [`ErrorType`] taxonomy and wrapped into an [`ErrorData`] payload, so
//! every handler reports failures with the same vocabulary.
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::orchestration::{api::Destination, infrastructure::flow::FlowId};

#[derive(Debug, Error, PartialEq)]
pub enum OrchestrationError {
    #[error("Orchestration error, internal orchestration API error")]
    InternalOrchestrationError,

    #[error("Orchestration error, flow already exists (flow_id: {0})")]
    FlowAlreadyExists(FlowId),

    #[error("Orchestration error, flow not found (flow_id: {0})")]
    FlowNotFound(FlowId),

    #[error("Orchestration error, invalid flow (flow_id: {0}): {1}")]
    InvalidFlow(FlowId, String),

    #[error("Orchestration error, path computation failed (flow_id: {0}): {1}")]
    PathComputationFailed(FlowId, String),

    #[error("Orchestration error, path computation timed out (flow_id: {0})")]
    PathComputationTimeout(FlowId),

    #[error("Orchestration error, switch resources exhausted (flow_id: {0})")]
    ResourcesExhausted(FlowId),

    #[error("Orchestration error, flow creation failed (flow_id: {0}): {1}")]
    CreationFailed(FlowId, String),

    #[error("Orchestration error, flow update failed (flow_id: {0}): {1}")]
    UpdateFailed(FlowId, String),

    #[error("Orchestration error, failed to serialize envelope: {0}")]
    SerializationFailed(String),

    #[error("Orchestration error, failed to deliver envelope (destination: {0:?})")]
    DeliveryFailed(Destination),

    #[error("Orchestration error, unroutable envelope: {0}")]
    UnroutableEnvelope(String),
}

impl OrchestrationError {
    /// Maps the internal condition onto the reported taxonomy.
    pub fn error_type(&self) -> ErrorType {
        match self {
            OrchestrationError::FlowAlreadyExists(_) => ErrorType::AlreadyExists,
            OrchestrationError::FlowNotFound(_) => ErrorType::NotFound,
            OrchestrationError::CreationFailed(..)
            | OrchestrationError::ResourcesExhausted(_) => ErrorType::CreationFailure,
            OrchestrationError::UpdateFailed(..) => ErrorType::UpdateFailure,
            OrchestrationError::InvalidFlow(..) => ErrorType::RequestInvalid,
            // Path failures are reported as the failure of the operation that needed the path,
            // callers convert them before they reach the mapper.
            OrchestrationError::PathComputationFailed(..)
            | OrchestrationError::PathComputationTimeout(_)
            | OrchestrationError::InternalOrchestrationError
            | OrchestrationError::SerializationFailed(_)
            | OrchestrationError::DeliveryFailed(_)
            | OrchestrationError::UnroutableEnvelope(_) => ErrorType::InternalError,
        }
    }

    /// The flow the failure is about, or the best available context.
    pub fn description(&self) -> String {
        match self {
            OrchestrationError::FlowAlreadyExists(flow_id)
            | OrchestrationError::FlowNotFound(flow_id)
            | OrchestrationError::InvalidFlow(flow_id, _)
            | OrchestrationError::PathComputationFailed(flow_id, _)
            | OrchestrationError::PathComputationTimeout(flow_id)
            | OrchestrationError::ResourcesExhausted(flow_id)
            | OrchestrationError::CreationFailed(flow_id, _)
            | OrchestrationError::UpdateFailed(flow_id, _) => flow_id.clone(),
            OrchestrationError::SerializationFailed(context)
            | OrchestrationError::UnroutableEnvelope(context) => context.clone(),
            OrchestrationError::DeliveryFailed(destination) => format!("{destination:?}"),
            OrchestrationError::InternalOrchestrationError => String::new(),
        }
    }

    /// Converts a path failure into the failure of a flow creation.
    pub fn into_creation_failure(self) -> Self {
        match self {
            OrchestrationError::PathComputationFailed(flow_id, message) => {
                OrchestrationError::CreationFailed(flow_id, message)
            }
            OrchestrationError::PathComputationTimeout(flow_id) => {
                OrchestrationError::CreationFailed(flow_id, "path computation timed out".into())
            }
            other => other,
        }
    }

    /// Converts a path failure into the failure of a flow update.
    pub fn into_update_failure(self) -> Self {
        match self {
            OrchestrationError::PathComputationFailed(flow_id, message) => {
                OrchestrationError::UpdateFailed(flow_id, message)
            }
            OrchestrationError::PathComputationTimeout(flow_id) => {
                OrchestrationError::UpdateFailed(flow_id, "path computation timed out".into())
            }
            other => other,
        }
    }
}

/// Closed set of error kinds reported outside the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    AlreadyExists,
    NotFound,
    CreationFailure,
    UpdateFailure,
    DeletionFailure,
    RequestInvalid,
    InternalError,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let error_type = match self {
            ErrorType::AlreadyExists => "ALREADY_EXISTS",
            ErrorType::NotFound => "NOT_FOUND",
            ErrorType::CreationFailure => "CREATION_FAILURE",
            ErrorType::UpdateFailure => "UPDATE_FAILURE",
            ErrorType::DeletionFailure => "DELETION_FAILURE",
            ErrorType::RequestInvalid => "REQUEST_INVALID",
            ErrorType::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{error_type}")
    }
}

/// Error payload carried by error envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorData {
    pub error_type: ErrorType,
    pub message: String,
    /// Flow id or best-available context.
    pub description: String,
}

impl ErrorData {
    pub fn new(
        error_type: ErrorType,
        message: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self { error_type, message: message.into(), description: description.into() }
    }
}

impl From<&OrchestrationError> for ErrorData {
    fn from(error: &OrchestrationError) -> Self {
        ErrorData::new(error.error_type(), error.to_string(), error.description())
    }
}

impl From<OrchestrationError> for ErrorData {
    fn from(error: OrchestrationError) -> Self {
        ErrorData::from(&error)
    }
}
