//! APIs of the orchestrator.
//!
//! - **Envelopes**: the typed messages exchanged with the northbound, the topology
//!   engine and the speaker over logical channels
//! - **Internal service APIs**: requests and responses of the services the orchestrator
//!   is composed of

pub mod types;

pub use types::*;
